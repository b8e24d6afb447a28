use thiserror::Error;

#[derive(Error, Debug)]
pub enum Errors {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Watch index cleared: {0}")]
    IndexCleared(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Watch closed: {0}")]
    WatchClosed(String),
}
