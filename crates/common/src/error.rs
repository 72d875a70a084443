use thiserror::Error;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Notifier already started")]
    AlreadyStarted,

    #[error("Notifier not started")]
    NotStarted,

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Dispatcher thread panicked: {0}")]
    ConsumerPanicked(String),
}
