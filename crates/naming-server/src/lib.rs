//! Composition root for the naming service server: wires the distro
//! protocol, registry, and store together and drives their periodic tasks.

pub mod context;
pub mod dispatcher;
pub mod error;

pub use context::ServerContext;
pub use dispatcher::Dispatcher;
pub use error::{ServerError, ServerResult};
