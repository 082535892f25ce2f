//! Pushes small code and literal changes to running processes without a
//! reinstall.
//!
//! Unlike a full deploy this runs without an APK and favours response time.
//! All updates are best effort, so transport failures are folded into the
//! returned error list instead of being propagated.

use std::collections::{BTreeMap, BTreeSet};

use crate::adb::AdbClient;
use crate::error::UpdateLiveEditError;
use crate::installer::{Installer, InstallerError};
use crate::proto::{
    Arch, ComposeException, ComposeStatusRequest, InvalidateMode, LiveEditClass, LiveEditRequest,
    LiveEditResponse, LiveEditStatus, LiveLiteral, LiveLiteralUpdateRequest, RecomposeType,
};

pub const NO_TARGET_PIDS: &str = "No target pids to Live Edit";
pub const MISSING_AGENT_RESPONSE: &str = "Live Edit response does not contain agent response object";

/// One changed literal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateLiveLiteralParam {
    pub key: String,
    pub offset: i32,
    pub helper: String,
    pub value_type: String,
    pub value: String,
}

impl UpdateLiveLiteralParam {
    pub fn new(
        key: impl Into<String>,
        offset: i32,
        helper: impl Into<String>,
        value_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            offset,
            helper: helper.into(),
            value_type: value_type.into(),
            value: value.into(),
        }
    }
}

/// Recompiled classes to swap into the running processes, keyed by class
/// name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateLiveEditsParam {
    pub classes: BTreeMap<String, Vec<u8>>,
    pub support_classes: BTreeMap<String, Vec<u8>>,
    pub group_ids: BTreeSet<i32>,
    pub invalidate_mode: InvalidateMode,
    pub debug_mode_enabled: bool,
    pub use_structural_redefinition: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateLiveEditResult {
    pub errors: Vec<UpdateLiveEditError>,
    pub recompose_type: RecomposeType,
}

impl UpdateLiveEditResult {
    fn failed(errors: Vec<UpdateLiveEditError>) -> Self {
        Self {
            errors,
            recompose_type: RecomposeType::None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LiveUpdateDeployer;

impl LiveUpdateDeployer {
    pub fn new() -> Self {
        Self
    }

    /// Sends every literal in one request. Agents that could not apply the
    /// update each contribute one error.
    pub fn update_live_literal<I, A, P>(
        &self,
        installer: &I,
        adb: &A,
        package_name: &str,
        params: P,
    ) -> Vec<UpdateLiveEditError>
    where
        I: Installer + ?Sized,
        A: AdbClient + ?Sized,
        P: IntoIterator<Item = UpdateLiveLiteralParam>,
    {
        let process_ids = adb.pids(package_name);
        let arch = adb.arch(&process_ids);

        let request = LiveLiteralUpdateRequest {
            package_name: package_name.to_string(),
            process_ids,
            arch,
            updates: params
                .into_iter()
                .map(|param| LiveLiteral {
                    key: param.key,
                    offset: param.offset,
                    helper_class: param.helper,
                    value_type: param.value_type,
                    value: param.value,
                })
                .collect(),
        };

        let mut errors = Vec::new();
        match installer.update_live_literals(&request) {
            Ok(response) => {
                for failure in &response.failed_agents {
                    let extra = failure
                        .live_literal_response
                        .as_ref()
                        .map(|r| r.extra.as_str())
                        .unwrap_or_default();
                    errors.push(UpdateLiveEditError::from_message(extra));
                }
            }
            Err(err) => {
                tracing::error!(
                    target: crate::TRACE_TARGET,
                    package = package_name,
                    error = %err,
                    "live literal update failed"
                );
            }
        }
        errors
    }

    pub fn update_live_edit<I, A>(
        &self,
        installer: &I,
        adb: &A,
        package_name: &str,
        param: &UpdateLiveEditsParam,
    ) -> UpdateLiveEditResult
    where
        I: Installer + ?Sized,
        A: AdbClient + ?Sized,
    {
        let process_ids = adb.pids(package_name);
        if process_ids.is_empty() {
            tracing::info!(
                target: crate::TRACE_TARGET,
                package = package_name,
                "cancelling live edit: no target pids"
            );
            return UpdateLiveEditResult::failed(vec![UpdateLiveEditError::from_message(
                NO_TARGET_PIDS,
            )]);
        }
        let arch = adb.arch(&process_ids);

        let request = LiveEditRequest {
            package_name: package_name.to_string(),
            process_ids,
            arch,
            invalidate_mode: param.invalidate_mode,
            group_ids: param.group_ids.iter().copied().collect(),
            target_classes: live_edit_classes(&param.classes),
            support_classes: live_edit_classes(&param.support_classes),
            debug_mode_enabled: param.debug_mode_enabled,
            structural_redefinition: param.use_structural_redefinition,
        };

        match installer.live_edit(&request) {
            Ok(response) => interpret_live_edit(response),
            Err(err) => {
                tracing::warn!(
                    target: crate::TRACE_TARGET,
                    package = package_name,
                    error = %err,
                    "live edit request failed"
                );
                UpdateLiveEditResult::failed(vec![UpdateLiveEditError::from_error(&err)])
            }
        }
    }

    /// Exceptions raised while recomposing; empty when the app is not
    /// running.
    pub fn retrieve_compose_status<I, A>(
        &self,
        installer: &I,
        adb: &A,
        app_id: &str,
    ) -> Result<Vec<ComposeException>, InstallerError>
    where
        I: Installer + ?Sized,
        A: AdbClient + ?Sized,
    {
        let process_ids = adb.pids(app_id);
        let arch = adb.arch(&process_ids);
        if arch == Arch::Unknown {
            return Ok(Vec::new());
        }

        let request = ComposeStatusRequest {
            application_id: app_id.to_string(),
            process_ids,
            arch,
        };
        Ok(installer.compose_status(&request)?.exceptions)
    }
}

fn live_edit_classes(classes: &BTreeMap<String, Vec<u8>>) -> Vec<LiveEditClass> {
    classes
        .iter()
        .map(|(name, data)| LiveEditClass {
            class_name: name.clone(),
            class_data: data.clone(),
        })
        .collect()
}

fn interpret_live_edit(response: LiveEditResponse) -> UpdateLiveEditResult {
    match response.status {
        LiveEditStatus::AgentError => {
            let errors = response
                .failed_agents
                .iter()
                .filter_map(|agent| agent.live_edit_response.as_ref())
                .flat_map(|le| le.errors.iter())
                .map(UpdateLiveEditError::from_change)
                .collect();
            UpdateLiveEditResult::failed(errors)
        }
        LiveEditStatus::Ok => {
            let mut recompose_type = None;
            for agent in &response.success_agents {
                let Some(le) = &agent.live_edit_response else {
                    return UpdateLiveEditResult::failed(vec![UpdateLiveEditError::from_message(
                        MISSING_AGENT_RESPONSE,
                    )]);
                };
                recompose_type.get_or_insert(le.recompose_type);
            }
            UpdateLiveEditResult {
                errors: Vec::new(),
                recompose_type: recompose_type.unwrap_or_default(),
            }
        }
        status => UpdateLiveEditResult::failed(vec![UpdateLiveEditError::from_message(
            status.to_string(),
        )]),
    }
}
