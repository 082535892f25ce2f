//! Messages exchanged with the on-device installer.
//!
//! Every call is a single [`InstallerRequest`] answered by a single
//! [`InstallerResponse`]; see [`crate::installer`] for the framing.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    #[default]
    Unknown,
    Arch32Bit,
    Arch64Bit,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Arch::Unknown => "ARCH_UNKNOWN",
            Arch::Arch32Bit => "ARCH_32_BIT",
            Arch::Arch64Bit => "ARCH_64_BIT",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveLiteral {
    pub key: String,
    /// Source offset of the literal inside its file.
    pub offset: i32,
    pub helper_class: String,
    pub value_type: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveLiteralUpdateRequest {
    pub package_name: String,
    pub process_ids: Vec<u32>,
    pub arch: Arch,
    pub updates: Vec<LiveLiteral>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveLiteralUpdateResponse {
    pub success_agents: Vec<AgentResponse>,
    pub failed_agents: Vec<AgentResponse>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidateMode {
    #[default]
    InvalidateGroups,
    SaveAndLoad,
    RestartActivity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveEditClass {
    pub class_name: String,
    pub class_data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveEditRequest {
    pub package_name: String,
    pub process_ids: Vec<u32>,
    pub arch: Arch,
    pub invalidate_mode: InvalidateMode,
    pub group_ids: Vec<i32>,
    pub target_classes: Vec<LiveEditClass>,
    pub support_classes: Vec<LiveEditClass>,
    pub debug_mode_enabled: bool,
    pub structural_redefinition: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveEditStatus {
    #[default]
    Unknown,
    Ok,
    Error,
    AgentError,
    InstallerError,
}

impl fmt::Display for LiveEditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LiveEditStatus::Unknown => "UNKNOWN",
            LiveEditStatus::Ok => "OK",
            LiveEditStatus::Error => "ERROR",
            LiveEditStatus::AgentError => "AGENT_ERROR",
            LiveEditStatus::InstallerError => "INSTALLER_ERROR",
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveEditResponse {
    pub status: LiveEditStatus,
    pub success_agents: Vec<AgentResponse>,
    pub failed_agents: Vec<AgentResponse>,
}

/// How the UI should react after classes were swapped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecomposeType {
    #[default]
    None,
    Normal,
    ResetState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnsupportedChangeKind {
    Unknown,
    AddedClass,
    AddedMethod,
    RemovedMethod,
    AddedField,
    RemovedField,
    ModifiedField,
    ModifiedSuper,
    AddedInterface,
    RemovedInterface,
    UnsupportedComposeVersion,
}

/// A change the agent could not apply to the running process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsupportedChange {
    pub kind: UnsupportedChangeKind,
    pub class_name: String,
    /// Method or field name, depending on `kind`.
    pub target_name: String,
    pub file_name: String,
    pub line_number: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLiveLiteralResponse {
    pub extra: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLiveEditResponse {
    pub errors: Vec<UnsupportedChange>,
    pub recompose_type: RecomposeType,
}

/// Outcome reported by the agent attached to one process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub pid: u32,
    pub live_literal_response: Option<AgentLiveLiteralResponse>,
    pub live_edit_response: Option<AgentLiveEditResponse>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeStatusRequest {
    pub application_id: String,
    pub process_ids: Vec<u32>,
    pub arch: Arch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeException {
    pub exception_class_name: String,
    pub message: String,
    pub recoverable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeStatusResponse {
    pub exceptions: Vec<ComposeException>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallerRequest {
    LiveLiteralUpdate(LiveLiteralUpdateRequest),
    LiveEdit(LiveEditRequest),
    ComposeStatus(ComposeStatusRequest),
}

impl InstallerRequest {
    pub fn name(&self) -> &'static str {
        match self {
            InstallerRequest::LiveLiteralUpdate(_) => "live-literal-update",
            InstallerRequest::LiveEdit(_) => "live-edit",
            InstallerRequest::ComposeStatus(_) => "compose-status",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallerResponse {
    LiveLiteralUpdate(LiveLiteralUpdateResponse),
    LiveEdit(LiveEditResponse),
    ComposeStatus(ComposeStatusResponse),
    /// The installer could not run the command at all.
    Error { message: String },
}

impl InstallerResponse {
    pub fn name(&self) -> &'static str {
        match self {
            InstallerResponse::LiveLiteralUpdate(_) => "live-literal-update",
            InstallerResponse::LiveEdit(_) => "live-edit",
            InstallerResponse::ComposeStatus(_) => "compose-status",
            InstallerResponse::Error { .. } => "error",
        }
    }
}
