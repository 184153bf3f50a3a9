#![forbid(unsafe_code)]

use ac_core::ids::IdError;
use ac_core::model::{Action, StorageKind};
use ac_storage::StoreError;

/// Caller-facing failures. Display strings are what a channel adapter may
/// show the end user; row-level detail stays in the audit journal.
#[derive(Debug)]
pub enum EngineError {
    NoContext {
        kind: StorageKind,
    },
    PermissionDenied {
        action: Action,
        resource: Option<String>,
    },
    InvalidIdentity(IdError),
    StoreUnavailable,
    Store(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoContext { kind } => {
                write!(f, "no storage context to resolve {} root", kind.as_str())
            }
            Self::PermissionDenied { action, resource } => match resource {
                Some(resource) => {
                    write!(f, "permission denied ({} on {resource})", action.as_str())
                }
                None => write!(f, "permission denied ({})", action.as_str()),
            },
            Self::InvalidIdentity(err) => write!(f, "invalid identity: {err}"),
            Self::StoreUnavailable | Self::Store(_) => write!(f, "setup failed, try again"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::InvalidIdentity(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}
