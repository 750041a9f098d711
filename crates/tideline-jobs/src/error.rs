use thiserror::Error;

/// Errors returned synchronously to callers of [`crate::JobRegistry`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job is missing a job_id or a prompt")]
    InvalidJob,

    #[error("a job with id {0} is already registered")]
    DuplicateJob(String),
}
