//! Loaded packages and their subprocess channel.
//!
//! A [`Package`] is a collection of tasks plus metadata about the
//! package itself. The functional part lives in a binary executing as
//! a connected subprocess; discovery and execution are requests sent
//! over the package's IPC channel, with results streamed back as
//! parameter records. Every [`Task`] handed out by a package is bound
//! to that one live channel for its lifetime: once the subprocess
//! terminates the channel stays closed and is never respawned.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};
use crate::shared::transport::PackageTransport;
use crate::task::Task;
use crate::types::protocol::{PackageManifest, PackageRequest, PackageResponse, TaskInfo};

/// Exclusive handle to a package's IPC channel.
///
/// The transport sits behind an async mutex; an execution owns the
/// guard from dispatch until its terminal status record, so a second
/// concurrent execution observes [`Error::ChannelBusy`] instead of
/// interleaving frames.
pub(crate) struct Channel {
    transport: Arc<Mutex<Box<dyn PackageTransport>>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("busy", &self.transport.try_lock().is_err())
            .finish()
    }
}

pub(crate) type ChannelGuard = OwnedMutexGuard<Box<dyn PackageTransport>>;

impl Channel {
    pub(crate) fn new(transport: Box<dyn PackageTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport: Arc::new(Mutex::new(transport)),
        })
    }

    /// Acquires the channel for one exchange, failing immediately if an
    /// execution is already outstanding.
    pub(crate) fn try_acquire(&self) -> Result<ChannelGuard> {
        Arc::clone(&self.transport)
            .try_lock_owned()
            .map_err(|_| Error::ChannelBusy)
    }

    /// Waits for the channel and closes the underlying transport.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        let mut guard = self.transport.lock().await;
        guard.close().await
    }
}

/// Package metadata, combining what the binary reported at discovery
/// with where the registry found it on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageAttrs {
    /// The package name.
    pub name: String,
    /// Description of the package.
    pub description: String,
    /// The package author.
    pub author: Option<String>,
    /// Contact email address.
    pub contact: Option<String>,
    /// URL to the package icon.
    pub icon_url: Option<String>,
    /// Package version string.
    pub version: Option<String>,
    /// The directory the package descriptor was found in, when loaded
    /// through a registry search path.
    pub dir: Option<PathBuf>,
    /// The package binary path, when loaded from disk.
    pub binfile: Option<PathBuf>,
}

impl PackageAttrs {
    fn from_manifest(manifest: &PackageManifest) -> Self {
        Self {
            name: manifest.name.clone(),
            description: manifest.description.clone(),
            author: manifest.author.clone(),
            contact: manifest.contact.clone(),
            icon_url: manifest.icon_url.clone(),
            version: manifest.version.clone(),
            dir: None,
            binfile: None,
        }
    }
}

/// A loaded package: metadata, task descriptors and the live channel.
///
/// Obtained from [`PackageRegistry`](crate::registry::PackageRegistry)
/// in normal use, or from [`Package::load`] directly when the caller
/// already has a transport (development binaries, in-memory tests).
///
/// Dropping the package (and every task obtained from it) releases the
/// channel, which kills the subprocess.
#[derive(Debug)]
pub struct Package {
    attrs: PackageAttrs,
    tasks: Vec<TaskInfo>,
    channel: Arc<Channel>,
}

impl Package {
    /// Completes the discovery handshake over `transport` and builds
    /// the package from the manifest the binary reports.
    ///
    /// The handshake must finish within `timeout`; a binary that never
    /// answers, answers garbage, or dies first produces
    /// [`Error::PackageLaunch`] and the transport is dropped
    /// (terminating the subprocess).
    pub async fn load(transport: Box<dyn PackageTransport>, timeout: Duration) -> Result<Self> {
        let transport_type = transport.transport_type();
        let channel = Channel::new(transport);
        let manifest = Self::discover(&channel, timeout, transport_type).await?;

        tracing::info!(
            package = %manifest.name,
            tasks = manifest.tasks.len(),
            transport = transport_type,
            "package loaded"
        );

        Ok(Self {
            attrs: PackageAttrs::from_manifest(&manifest),
            tasks: manifest.tasks,
            channel,
        })
    }

    async fn discover(
        channel: &Arc<Channel>,
        timeout: Duration,
        transport_type: &'static str,
    ) -> Result<PackageManifest> {
        let launch_err = |message: String| Error::PackageLaunch {
            name: transport_type.to_string(),
            message,
        };

        // The channel is freshly created, so acquisition cannot fail.
        let mut guard = channel.try_acquire()?;
        guard
            .send(PackageRequest::Discover)
            .await
            .map_err(|e| launch_err(format!("discovery request failed: {e}")))?;

        let reply = tokio::time::timeout(timeout, guard.receive())
            .await
            .map_err(|_| {
                launch_err(format!(
                    "no reply to discovery within {}ms",
                    timeout.as_millis()
                ))
            })?
            .map_err(|e| launch_err(format!("discovery reply failed: {e}")))?;

        match reply {
            PackageResponse::Manifest(manifest) => Ok(manifest),
            other => Err(launch_err(format!(
                "unexpected reply to discovery: {other:?}"
            ))),
        }
    }

    /// Records where the registry found this package on disk.
    pub(crate) fn set_origin(&mut self, dir: Option<PathBuf>, binfile: PathBuf) {
        self.attrs.dir = dir;
        self.attrs.binfile = Some(binfile);
    }

    /// The package name, as reported by the binary.
    pub fn name(&self) -> &str {
        &self.attrs.name
    }

    /// The package metadata.
    pub fn attrs(&self) -> &PackageAttrs {
        &self.attrs
    }

    /// The package metadata as a field-name keyed map.
    pub fn pkg_attrs(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        map.insert("name", self.attrs.name.clone());
        map.insert("description", self.attrs.description.clone());
        if let Some(author) = &self.attrs.author {
            map.insert("author", author.clone());
        }
        if let Some(contact) = &self.attrs.contact {
            map.insert("contact", contact.clone());
        }
        if let Some(icon_url) = &self.attrs.icon_url {
            map.insert("iconUrl", icon_url.clone());
        }
        if let Some(version) = &self.attrs.version {
            map.insert("version", version.clone());
        }
        if let Some(dir) = &self.attrs.dir {
            map.insert("dir", dir.display().to_string());
        }
        if let Some(binfile) = &self.attrs.binfile {
            map.insert("binfile", binfile.display().to_string());
        }
        map
    }

    /// Iterates the task descriptors in discovery order, each exactly
    /// once.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskInfo> {
        self.tasks.iter()
    }

    /// Builds a [`Task`] for the named task descriptor.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the package has no task of that name.
    pub fn task(&self, name: &str) -> Result<Task> {
        let info = self
            .tasks
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })?;
        Ok(Task::new(
            info.clone(),
            self.attrs.name.clone(),
            Arc::clone(&self.channel),
        ))
    }

    /// Builds tasks for every descriptor whose name matches the glob
    /// `pattern`, in discovery order; all tasks when `pattern` is
    /// `None` or empty.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPattern`] if the pattern is not a valid glob.
    pub fn task_list(&self, pattern: Option<&str>) -> Result<Vec<Task>> {
        let matcher = match pattern {
            None | Some("") => None,
            Some(p) => Some(glob::Pattern::new(p).map_err(|e| Error::invalid_pattern(p, &e))?),
        };
        Ok(self
            .tasks
            .iter()
            .filter(|t| matcher.as_ref().map_or(true, |m| m.matches(&t.name)))
            .map(|info| {
                Task::new(
                    info.clone(),
                    self.attrs.name.clone(),
                    Arc::clone(&self.channel),
                )
            })
            .collect())
    }

    /// Closes the package channel, terminating the subprocess. Waits
    /// for any outstanding execution to reach its terminal state first.
    pub async fn close(&self) -> Result<()> {
        tracing::debug!(package = %self.attrs.name, "closing package channel");
        self.channel.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::testing::ScriptedTransport;
    use crate::types::protocol::StatusRecord;

    fn manifest() -> PackageManifest {
        serde_json::from_value(serde_json::json!({
            "name": "vo-cli",
            "description": "VO command line tasks",
            "author": "VAO",
            "version": "1.2",
            "tasks": [
                {"name": "voregistry", "description": "registry keyword search"},
                {"name": "vodata", "description": "data access"},
                {"name": "voatlas", "description": "sky atlas"},
            ],
        }))
        .unwrap()
    }

    async fn loaded_package() -> Package {
        let transport = ScriptedTransport::new(vec![PackageResponse::Manifest(manifest())]);
        Package::load(Box::new(transport), Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn load_discovers_metadata_and_tasks() {
        let package = loaded_package().await;
        assert_eq!(package.name(), "vo-cli");
        assert_eq!(package.tasks().count(), 3);

        let attrs = package.pkg_attrs();
        assert_eq!(attrs["name"], "vo-cli");
        assert_eq!(attrs["version"], "1.2");
        assert!(!attrs.contains_key("binfile"));
    }

    #[tokio::test]
    async fn load_rejects_non_manifest_reply() {
        let transport =
            ScriptedTransport::new(vec![PackageResponse::Status(StatusRecord::ok())]);
        let err = Package::load(Box::new(transport), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PackageLaunch { .. }));
    }

    #[tokio::test]
    async fn load_fails_when_binary_dies_first() {
        let transport = ScriptedTransport::disconnected();
        let err = Package::load(Box::new(transport), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PackageLaunch { .. }));
    }

    #[tokio::test]
    async fn task_lookup_and_listing() {
        let package = loaded_package().await;

        let task = package.task("voregistry").unwrap();
        assert_eq!(task.name(), "voregistry");
        assert!(matches!(
            package.task("nope"),
            Err(Error::NotFound { .. })
        ));

        let all = package.task_list(None).unwrap();
        let names: Vec<_> = all.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, ["voregistry", "vodata", "voatlas"]);

        let vo = package.task_list(Some("vo[ar]*")).unwrap();
        assert_eq!(vo.len(), 2);
    }
}
