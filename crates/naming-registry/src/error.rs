//! Registry-level error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("this node does not own service {service}; mutation must be forwarded to the owner")]
    NotOwner { service: String },

    #[error("instance {ip}:{port} not found in service {service}")]
    InstanceNotFound {
        service: String,
        ip: String,
        port: u16,
    },
}
