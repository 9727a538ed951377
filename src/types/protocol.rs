//! Wire messages for the package binary contract.
//!
//! A loaded package binary speaks a small request/response protocol
//! over its IPC channel. The host sends a [`PackageRequest`]; the
//! binary answers a discovery request with one [`PackageResponse::Manifest`]
//! frame, and an execute request with zero or more
//! [`PackageResponse::Param`] frames followed by exactly one
//! [`PackageResponse::Status`] terminator.
//!
//! These types define the message shapes only; the byte encoding is
//! owned by the transport (the default subprocess transport frames
//! them as newline-delimited JSON). All field names are `camelCase`
//! on the wire.

use serde::{Deserialize, Serialize};

use crate::types::param::Param;
use crate::types::pset::ParameterSet;

/// A request from the host to the package binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum PackageRequest {
    /// Ask the binary for its metadata and task list.
    Discover,
    /// Execute a named task with the given input parameter set.
    Execute(ExecuteParams),
}

/// Payload of an execute request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteParams {
    /// The task to run.
    pub task: String,
    /// The task's input parameter set, frozen for the duration of the
    /// execution.
    pub pset: ParameterSet,
}

/// A response frame from the package binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PackageResponse {
    /// Reply to a discovery request.
    Manifest(PackageManifest),
    /// One streamed output parameter of an executing task.
    Param(Param),
    /// Terminator of an execute stream: success or failure.
    Status(StatusRecord),
}

/// Package metadata and task list, as reported by the binary itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    /// The package name.
    pub name: String,
    /// Description of the package.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// The package author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Contact email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// URL to the package icon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    /// Package version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// The tasks the package exposes, in the binary's own order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskInfo>,
}

/// Descriptor of one task inside a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// The task name.
    pub name: String,
    /// Description of the task.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Template of the task's input parameters.
    #[serde(default, skip_serializing_if = "ParameterSet::is_empty")]
    pub params: ParameterSet,
}

/// The terminating record of an execute stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    /// Exit status reported by the task; zero means success.
    pub status: i32,
    /// Optional diagnostic message accompanying a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl StatusRecord {
    /// A successful terminator.
    pub fn ok() -> Self {
        Self {
            status: 0,
            msg: None,
        }
    }

    /// A failure terminator with a status code and message.
    pub fn error(status: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: Some(msg.into()),
        }
    }

    /// Whether this terminator reports success.
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}
