//! Error taxonomy surfaced to the operator.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Step;

/// Exit status for usage errors and refused runs.
pub const EXIT_USAGE: i32 = 1;
/// Exit status when a key, certificate or store operation fails.
pub const EXIT_STEP_FAILED: i32 = 2;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("missing required argument: FQDN (e.g. `keystore-gen broker1.example.com`)")]
    MissingFqdn,

    #[error("invalid FQDN `{fqdn}`: {reason}")]
    InvalidFqdn { fqdn: String, reason: String },

    #[error("invalid configuration: {0:#}")]
    InvalidConfig(anyhow::Error),

    #[error("{} already exists; move or delete it before running again", path.display())]
    ArtifactExists { path: PathBuf },

    #[error("step `{step}` failed: {source:#}")]
    StepFailed {
        step: Step,
        #[source]
        source: anyhow::Error,
    },
}

impl ProvisionError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingFqdn
            | Self::InvalidFqdn { .. }
            | Self::InvalidConfig(_)
            | Self::ArtifactExists { .. } => EXIT_USAGE,
            Self::StepFailed { .. } => EXIT_STEP_FAILED,
        }
    }

    /// The failed pipeline step, if the error came from one.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}
