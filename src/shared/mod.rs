//! Transport layer: the channel trait and its implementations.

pub mod subprocess;
pub mod testing;
pub mod transport;

pub use subprocess::ChildProcessTransport;
pub use testing::{RequestLog, ScriptedTransport};
pub use transport::PackageTransport;
