//! Fatal error taxonomy of a conversion job.
//!
//! Only conditions that make the bundle meaningless abort a job. Recoverable
//! conditions (unresolved page geometry, default calibration, trace gaps) are
//! encoded in the data model instead: confidence fields, NaN samples and
//! [`QualityFlag`](crate::types::QualityFlag)s that flow forward with the
//! bundle.

use thiserror::Error;

/// Reasons a conversion job fails outright.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Fewer lead regions than required could be resolved, validated or
    /// fallback. There is no safe partial result.
    #[error("layout unresolved: {resolved} of {required} lead regions usable")]
    LayoutUnresolved { resolved: usize, required: usize },

    /// An external collaborator exceeded its time budget. Surfaced distinctly
    /// so callers can decide to retry with different hints; never retried
    /// silently inside the core.
    #[error("{stage} collaborator timed out")]
    CollaboratorTimeout { stage: &'static str },

    /// An external collaborator call failed.
    #[error("{stage} collaborator failed: {message}")]
    CollaboratorFailed { stage: &'static str, message: String },

    /// The job was cancelled between per-lead units of work.
    #[error("conversion cancelled")]
    Cancelled,

    /// The input image or configuration cannot be processed at all.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Errors reported by external layout/segmentation collaborators.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider timed out")]
    Timeout,
    #[error("provider failed: {0}")]
    Failed(String),
}

impl ConvertError {
    /// Map a collaborator failure onto the job-level taxonomy, preserving the
    /// timeout distinction.
    pub(crate) fn from_provider(stage: &'static str, err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout => ConvertError::CollaboratorTimeout { stage },
            ProviderError::Failed(message) => ConvertError::CollaboratorFailed { stage, message },
        }
    }
}
