//! Error taxonomy surfaced by the provisioning driver.

use thiserror::Error;

use crate::exit_codes;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A guard rejected the host; nothing was changed.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A step's action failed; later steps did not run.
    #[error("step '{step}' failed: {detail}")]
    StepFailed {
        step: String,
        action: String,
        exit_code: Option<i32>,
        detail: String,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProvisionError {
    pub fn precondition(err: anyhow::Error) -> Self {
        Self::Precondition(format!("{err:#}"))
    }

    /// Process exit status for this failure.
    ///
    /// Step failures propagate the failing command's own status.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::Precondition(_) => exit_codes::PRECONDITION,
            ProvisionError::StepFailed {
                exit_code: Some(code),
                ..
            } if *code != 0 => *code,
            ProvisionError::StepFailed { .. } | ProvisionError::Internal(_) => exit_codes::FAILED,
        }
    }
}
