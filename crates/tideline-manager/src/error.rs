use thiserror::Error;

/// Errors surfaced by the jetstream manager. Registry errors pass through
/// unchanged (spec §7: "registry errors are returned to the caller
/// synchronously").
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Registry(#[from] tideline_jobs::RegistryError),

    #[error(transparent)]
    Jetstream(#[from] tideline_jetstream::JetstreamError),
}
