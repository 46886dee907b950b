use thiserror::Error;

/// Errors that can occur while starting a scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid scheduler configuration: {0}")]
    Config(#[from] iconpipe_core::ConfigError),

    #[error("no tokio runtime available to run the admission loop")]
    NoRuntime,
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
