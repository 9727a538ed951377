//! # votask
//!
//! Client SDK for the VO Package tasking interface.
//!
//! A *package* is a collection of computational tasks implemented in a
//! binary that executes as a connected subprocess; task discovery and
//! execution are commands sent to that binary, with results returned
//! over the IPC channel as a stream of parameter objects. This crate
//! manages the whole lifecycle: finding package binaries on a search
//! path, launching them, interrogating them for their task list, and
//! executing tasks with typed parameter sets.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use votask::PackageRegistry;
//!
//! # async fn example() -> votask::Result<()> {
//! let registry = PackageRegistry::with_search_path(["/opt/vao/packages"]);
//!
//! let package = registry.load_package("vo-cli").await?;
//! let mut task = package.task("voregistry")?;
//! task.set_value("searchTerm", "quasar")?;
//!
//! let results = task.execute_sync().await?;
//! for (name, value) in results.param_list(Some("result"))? {
//!     println!("{name}: {value:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Asynchronous execution hands the exchange to a background worker:
//!
//! ```rust,no_run
//! # async fn example(package: votask::Package) -> votask::Result<()> {
//! let mut task = package.task("voregistry")?;
//! task.set_value("searchTerm", "quasar")?;
//! task.execute_async()?;
//! // ... do other work, poll task.status() ...
//! let results = task.wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`PackageRegistry`] resolves names to binaries through `.vop`
//!   descriptor files on an ordered search path.
//! - [`Package`] owns one live subprocess channel and hands out
//!   [`Task`] objects bound to it.
//! - [`Task`] runs the `Created → (Running | Pending) → {Done, Error}`
//!   state machine; output parameters stream back in emission order
//!   and pattern-matched callbacks fire as each record arrives.
//! - [`shared::PackageTransport`] is the narrow seam to the binary;
//!   the subprocess transport frames newline-delimited JSON, and
//!   [`shared::ScriptedTransport`] substitutes an in-memory fake for
//!   tests.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod error;
pub mod package;
pub mod registry;
pub mod shared;
pub mod task;
pub mod types;

pub use error::{Error, Result};
pub use package::{Package, PackageAttrs};
pub use registry::PackageRegistry;
pub use task::{ExecStatus, Task};
pub use types::{
    Param, ParamKind, ParamValue, ParameterSet, PackageManifest, Scalar, TaskInfo,
};
