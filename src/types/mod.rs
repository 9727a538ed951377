//! Core data types: parameters, parameter sets and wire messages.

pub mod param;
pub mod protocol;
pub mod pset;

pub use param::{Param, ParamKind, ParamValue, Scalar};
pub use protocol::{
    ExecuteParams, PackageManifest, PackageRequest, PackageResponse, StatusRecord, TaskInfo,
};
pub use pset::ParameterSet;
