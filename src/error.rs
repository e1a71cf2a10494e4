use crate::extend::types::Stage;
use thiserror::Error;

/// Failures that end (or, for mismatches, short-circuit) an extension run.
///
/// Collaborator plumbing reports `anyhow::Error`; these variants are what
/// the orchestrator turns those into once it knows what the failure means.
#[derive(Debug, Error)]
pub enum ExtendError {
    /// Malformed or out-of-range answer to a prompt.
    #[error("Invalid input: {0}")]
    Input(String),

    /// A named disk, partition, mount point or volume group does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Volume groups are inconsistent with the requested plan.
    #[error("Storage topology error: {0}")]
    Topology(String),

    /// An external tool failed while mutating storage.
    #[error("Stage '{stage}' failed: {cause}")]
    Stage { stage: Stage, cause: String },

    #[error("Unsupported filesystem type '{0}' (only ext2/3/4 and xfs can be grown)")]
    UnsupportedFilesystem(String),

    /// Boot configuration could not be updated after a successful resize.
    #[error("Boot configuration step '{step}' failed: {cause}")]
    BootConfig { step: &'static str, cause: String },
}

impl ExtendError {
    pub fn stage(stage: Stage, err: anyhow::Error) -> Self {
        ExtendError::Stage {
            stage,
            cause: format!("{err:#}"),
        }
    }
}
