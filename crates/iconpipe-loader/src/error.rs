use thiserror::Error;

/// Errors surfaced by the pipeline's consumer API.
///
/// Resolution failures are never errors; they end in `LoadState::Failed`.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid item id {0}: must be positive")]
    InvalidId(u32),

    #[error("icon pipeline has been shut down")]
    ShutDown,

    #[error(transparent)]
    Config(#[from] iconpipe_core::ConfigError),

    #[error("failed to build remote client: {0}")]
    Client(#[from] iconpipe_client::ClientError),

    #[error("failed to start scheduler: {0}")]
    Scheduler(#[from] iconpipe_scheduler::SchedulerError),
}

pub type LoadResult<T> = Result<T, LoadError>;
