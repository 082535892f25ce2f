use std::error::Error as StdError;
use std::fmt;

use crate::proto::{UnsupportedChange, UnsupportedChangeKind};

const APP_RESTART: &str = "Rerun app to apply changes.";
const UNSUPPORTED_COMPOSE_VERSION: &str = "Update Compose runtime and compiler versions 1.3.0 or higher in order to view the latest Live Edit changes.";

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("the application does not support any ABI of the device")]
    UnsupportedArch,
}

/// Why a live update did not take effect, rendered for the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateLiveEditError {
    kind: UnsupportedChangeKind,
    detail: String,
}

impl UpdateLiveEditError {
    pub fn from_change(change: &UnsupportedChange) -> Self {
        let UnsupportedChange {
            kind,
            class_name: class,
            target_name: target,
            file_name: file,
            line_number: line,
        } = change;

        let detail = match kind {
            UnsupportedChangeKind::AddedClass => {
                format!("Unsupported addition of new class:<br>'{class}' in file '{file}'.")
            }
            UnsupportedChangeKind::AddedMethod => format!(
                "Unsupported addition of new method:<br>'{class}.{target}' in file '{file}', line {line}."
            ),
            UnsupportedChangeKind::RemovedMethod => {
                format!("Unsupported deletion of method:<br>'{class}.{target}' in file '{file}'.")
            }
            UnsupportedChangeKind::AddedField => format!(
                "Unsupported addition of field:<br>'{class}' in class '{target}' in file '{file}'."
            ),
            UnsupportedChangeKind::RemovedField => format!(
                "Unsupported deletion of field:<br>'{class}' in class '{target}' in file '{file}'."
            ),
            UnsupportedChangeKind::ModifiedField => format!(
                "Unsupported change to field:<br>'{class}' in class '{target}' in file '{file}'."
            ),
            UnsupportedChangeKind::ModifiedSuper => format!(
                "Unsupported change to superclass of class:<br>'{class}' in file '{file}'."
            ),
            UnsupportedChangeKind::AddedInterface | UnsupportedChangeKind::RemovedInterface => {
                format!("Unsupported change to interfaces of class:<br>'{class}' in file '{file}'.")
            }
            UnsupportedChangeKind::UnsupportedComposeVersion => {
                UNSUPPORTED_COMPOSE_VERSION.to_string()
            }
            UnsupportedChangeKind::Unknown => "Unknown error.".to_string(),
        };

        Self {
            kind: *kind,
            detail,
        }
    }

    pub fn from_error(error: &dyn StdError) -> Self {
        Self::from_message(error.to_string())
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            kind: UnsupportedChangeKind::Unknown,
            detail: message.into(),
        }
    }

    pub fn kind(&self) -> UnsupportedChangeKind {
        self.kind
    }

    /// The message without the rerun hint.
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// The user-facing message: the detail followed by a rerun hint, except
    /// for [`UnsupportedChangeKind::UnsupportedComposeVersion`].
    pub fn message(&self) -> String {
        match self.kind {
            UnsupportedChangeKind::UnsupportedComposeVersion => self.detail.clone(),
            _ => format!("{}<br>{APP_RESTART}", self.detail),
        }
    }
}

impl fmt::Display for UpdateLiveEditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl StdError for UpdateLiveEditError {}
