//! Top-level server error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] naming_config::ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] naming_registry::RegistryError),

    #[error("distro protocol error: {0}")]
    Distro(#[from] naming_distro::DistroError),
}

pub type ServerResult<T> = Result<T, ServerError>;
