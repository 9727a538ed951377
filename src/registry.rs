//! Package discovery and loading.
//!
//! A [`PackageRegistry`] owns an ordered search path of directories
//! and a cache mapping package names to binaries. Each directory is
//! searched for `.vop` descriptor files; a descriptor is a small TOML
//! document naming the package binary:
//!
//! ```toml
//! # vo-cli.vop
//! binary = "vo-cli.e"
//! ```
//!
//! The package name is the descriptor's file stem, relative binary
//! paths resolve against the descriptor's directory, and the first
//! directory on the search path to claim a name wins. Scanning is
//! explicit and idempotent, so packages can be installed or removed
//! while the process runs.
//!
//! The registry is an ordinary constructed object passed by reference
//! to whoever needs it; there is no process-global search path.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::package::Package;
use crate::shared::subprocess::ChildProcessTransport;

/// File extension marking a package descriptor.
const DESCRIPTOR_EXT: &str = "vop";

/// Default bound on the discovery handshake of a freshly spawned
/// package binary.
const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Contents of a `.vop` descriptor file.
#[derive(Debug, Deserialize)]
struct Descriptor {
    /// Path of the package binary, relative to the descriptor's
    /// directory unless absolute.
    binary: PathBuf,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Ordered, de-duplicated search directories.
    search_path: Vec<PathBuf>,
    /// Package name to resolved location, rebuilt by `scan`.
    cache: BTreeMap<String, Resolved>,
}

#[derive(Debug, Clone)]
struct Resolved {
    dir: PathBuf,
    binfile: PathBuf,
}

/// Resolves package names to binaries and loads them as connected
/// subprocesses.
///
/// # Examples
///
/// ```rust,no_run
/// use votask::PackageRegistry;
///
/// # async fn example() -> votask::Result<()> {
/// let registry = PackageRegistry::with_search_path(["/opt/vao/packages"]);
/// let available = registry.scan().await?;
/// if available.contains("vo-cli") {
///     let package = registry.load_package("vo-cli").await?;
///     println!("{} tasks", package.tasks().count());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PackageRegistry {
    state: Mutex<RegistryState>,
    launch_timeout: Duration,
}

impl Default for PackageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageRegistry {
    /// Creates a registry with an empty search path.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
        }
    }

    /// Creates a registry over the given search directories.
    pub fn with_search_path<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let registry = Self::new();
        registry
            .state
            .try_lock()
            .expect("freshly constructed registry")
            .search_path = dedup(dirs);
        registry
    }

    /// Bounds the discovery handshake of every subsequent load.
    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    /// Replaces the search path. The cache is cleared; the next scan
    /// (explicit or implicit) rebuilds it.
    pub async fn set_search_path<I, P>(&self, dirs: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut state = self.state.lock().await;
        state.search_path = dedup(dirs);
        state.cache.clear();
    }

    /// Appends one directory to the search path; a directory already
    /// present keeps its original position.
    pub async fn append_dir(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        let mut state = self.state.lock().await;
        if !state.search_path.contains(&dir) {
            state.search_path.push(dir);
            state.cache.clear();
        }
    }

    /// The current search path, in order.
    pub async fn search_path(&self) -> Vec<PathBuf> {
        self.state.lock().await.search_path.clone()
    }

    /// Re-scans the search path for package descriptor files and
    /// rebuilds the name cache.
    ///
    /// Safe to call repeatedly as the filesystem changes: missing
    /// directories and malformed descriptors are skipped with a
    /// warning, never failing the scan as a whole.
    pub async fn scan(&self) -> Result<BTreeSet<String>> {
        let mut state = self.state.lock().await;
        scan_locked(&mut state);
        Ok(state.cache.keys().cloned().collect())
    }

    /// Lists cached package names matching the glob `pattern`, all of
    /// them when `pattern` is `None` or empty. Scans first if the
    /// cache is empty.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPattern`] if the pattern is not a valid glob.
    pub async fn pkg_list(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let matcher = match pattern {
            None | Some("") => None,
            Some(p) => Some(glob::Pattern::new(p).map_err(|e| Error::invalid_pattern(p, &e))?),
        };
        let mut state = self.state.lock().await;
        if state.cache.is_empty() {
            scan_locked(&mut state);
        }
        Ok(state
            .cache
            .keys()
            .filter(|name| matcher.as_ref().map_or(true, |m| m.matches(name)))
            .cloned()
            .collect())
    }

    /// Loads the named package: resolves it through the cache
    /// (scanning implicitly if the cache is empty), spawns its binary
    /// as a connected subprocess and completes the discovery handshake
    /// before returning.
    ///
    /// # Errors
    ///
    /// [`Error::PackageNotFound`] if the name does not resolve,
    /// [`Error::PackageLaunch`] if the binary cannot be started or
    /// does not answer discovery within the launch timeout.
    pub async fn load_package(&self, name: &str) -> Result<Package> {
        let resolved = {
            let mut state = self.state.lock().await;
            if state.cache.is_empty() {
                scan_locked(&mut state);
            }
            state
                .cache
                .get(name)
                .cloned()
                .ok_or_else(|| Error::PackageNotFound {
                    name: name.to_string(),
                })?
        };
        self.launch(name, Some(resolved.dir), resolved.binfile)
            .await
    }

    /// Loads a package binary directly, bypassing the search path.
    /// Supports out-of-path development packages.
    pub async fn load_package_file(&self, name: &str, file: impl Into<PathBuf>) -> Result<Package> {
        let binfile = file.into();
        let dir = binfile.parent().map(Path::to_path_buf);
        self.launch(name, dir, binfile).await
    }

    async fn launch(&self, name: &str, dir: Option<PathBuf>, binfile: PathBuf) -> Result<Package> {
        tracing::info!(package = name, binary = %binfile.display(), "loading package");
        let transport = ChildProcessTransport::spawn(&binfile).map_err(|e| match e {
            Error::PackageLaunch { message, .. } => Error::PackageLaunch {
                name: name.to_string(),
                message: format!("{}: {message}", binfile.display()),
            },
            other => other,
        })?;
        let mut package = Package::load(Box::new(transport), self.launch_timeout)
            .await
            .map_err(|e| match e {
                // Attribute handshake failures to the requested name.
                Error::PackageLaunch { message, .. } => Error::PackageLaunch {
                    name: name.to_string(),
                    message,
                },
                other => other,
            })?;

        if package.name() != name {
            tracing::warn!(
                requested = name,
                reported = package.name(),
                "package manifest reports a different name"
            );
        }
        package.set_origin(dir, binfile);
        Ok(package)
    }
}

/// Rebuilds the cache from the search path. First directory to claim a
/// name wins.
fn scan_locked(state: &mut RegistryState) {
    let mut cache = BTreeMap::new();
    for dir in &state.search_path {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping search directory");
                continue;
            }
        };
        let mut descriptors: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == DESCRIPTOR_EXT))
            .collect();
        // Directory iteration order is platform-defined; keep scans
        // deterministic.
        descriptors.sort();

        for path in descriptors {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match read_descriptor(&path) {
                Ok(descriptor) => {
                    let binfile = if descriptor.binary.is_absolute() {
                        descriptor.binary
                    } else {
                        dir.join(descriptor.binary)
                    };
                    cache.entry(name.to_string()).or_insert_with(|| {
                        tracing::debug!(
                            package = name,
                            binary = %binfile.display(),
                            "package descriptor found"
                        );
                        Resolved {
                            dir: dir.clone(),
                            binfile,
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(descriptor = %path.display(), error = %e, "skipping malformed descriptor");
                }
            }
        }
    }
    state.cache = cache;
}

fn read_descriptor(path: &Path) -> Result<Descriptor> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Protocol(format!("unreadable descriptor: {e}")))?;
    toml::from_str(&text).map_err(|e| Error::Protocol(format!("invalid descriptor: {e}")))
}

fn dedup<I, P>(dirs: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let mut seen = BTreeSet::new();
    dirs.into_iter()
        .map(Into::into)
        .filter(|dir| seen.insert(dir.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_descriptor(dir: &Path, name: &str, binary: &str) {
        std::fs::write(
            dir.join(format!("{name}.{DESCRIPTOR_EXT}")),
            format!("binary = \"{binary}\"\n"),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn scan_finds_descriptors_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "vo-cli", "vo-cli.e");
        write_descriptor(dir.path(), "sextractor", "sex.e");
        std::fs::write(dir.path().join("README"), "not a package").unwrap();

        let registry = PackageRegistry::with_search_path([dir.path()]);
        let first = registry.scan().await.unwrap();
        assert_eq!(
            first.iter().collect::<Vec<_>>(),
            ["sextractor", "vo-cli"]
        );

        let second = registry.scan().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn scan_tracks_filesystem_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "vo-cli", "vo-cli.e");

        let registry = PackageRegistry::with_search_path([dir.path()]);
        assert_eq!(registry.scan().await.unwrap().len(), 1);

        std::fs::remove_file(dir.path().join("vo-cli.vop")).unwrap();
        write_descriptor(dir.path(), "newpkg", "newpkg.e");
        let names = registry.scan().await.unwrap();
        assert!(names.contains("newpkg"));
        assert!(!names.contains("vo-cli"));
    }

    #[tokio::test]
    async fn first_search_directory_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_descriptor(first.path(), "vo-cli", "first.e");
        write_descriptor(second.path(), "vo-cli", "second.e");

        let registry = PackageRegistry::with_search_path([first.path(), second.path()]);
        registry.scan().await.unwrap();
        let packages = registry.pkg_list(Some("vo-*")).await.unwrap();
        assert_eq!(packages, ["vo-cli"]);

        // Resolution points at the first directory's binary; loading
        // it fails (no such file) but names the right package.
        let err = registry.load_package("vo-cli").await.unwrap_err();
        assert!(matches!(err, Error::PackageLaunch { .. }));
    }

    #[tokio::test]
    async fn search_path_is_deduplicated_in_order() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let registry = PackageRegistry::new();
        registry
            .set_search_path([a.path(), b.path(), a.path()])
            .await;
        assert_eq!(registry.search_path().await, [a.path(), b.path()]);

        registry.append_dir(b.path()).await;
        assert_eq!(registry.search_path().await.len(), 2);
    }

    #[tokio::test]
    async fn malformed_descriptor_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "good", "good.e");
        std::fs::write(dir.path().join("broken.vop"), "binary = [").unwrap();

        let registry = PackageRegistry::with_search_path([dir.path()]);
        let names = registry.scan().await.unwrap();
        assert_eq!(names.iter().collect::<Vec<_>>(), ["good"]);
    }

    #[tokio::test]
    async fn unknown_package_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PackageRegistry::with_search_path([dir.path()]);
        let err = registry.load_package("ghost").await.unwrap_err();
        assert!(matches!(err, Error::PackageNotFound { .. }));
    }

    #[tokio::test]
    async fn load_package_file_bypasses_search_path() {
        // Points at a nonexistent development binary: resolution is
        // bypassed, so the failure is a launch error, not NotFound.
        let registry = PackageRegistry::new();
        let err = registry
            .load_package_file("devpkg", "/nonexistent/devpkg.e")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PackageLaunch { .. }));
    }
}
