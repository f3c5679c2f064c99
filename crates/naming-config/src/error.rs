//! Configuration error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to determine XDG directory: {0}")]
    Xdg(String),

    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),

    #[error("i/o error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}
