//! Subprocess transport implementation.
//!
//! Launches a package binary as a connected child process and speaks
//! the package protocol over its stdin/stdout as newline-delimited
//! JSON frames. EOF on the child's stdout marks the channel closed;
//! the child is killed when the transport is dropped so a released
//! package never leaves an orphaned process behind.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{Error, Result};
use crate::shared::transport::{decode_frame, encode_frame, PackageTransport};
use crate::types::protocol::{PackageRequest, PackageResponse};

/// Transport over a spawned package binary's stdin/stdout.
///
/// # Examples
///
/// ```rust,no_run
/// use votask::shared::ChildProcessTransport;
///
/// # async fn example() -> votask::Result<()> {
/// let transport = ChildProcessTransport::spawn("/opt/vao/bin/vo-cli.e".as_ref())?;
/// // Hand to Package::load for the discovery handshake.
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChildProcessTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    closed: bool,
}

impl ChildProcessTransport {
    /// Spawns the package binary with piped stdin/stdout.
    ///
    /// The child's stderr is inherited so package diagnostics stay
    /// visible. The child is killed if the transport is dropped.
    ///
    /// # Errors
    ///
    /// [`Error::PackageLaunch`] if the binary cannot be started.
    pub fn spawn(binary: &Path) -> Result<Self> {
        tracing::debug!(binary = %binary.display(), "spawning package binary");
        let mut child = Command::new(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::PackageLaunch {
                name: binary.display().to_string(),
                message: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| Error::PackageLaunch {
            name: binary.display().to_string(),
            message: "child stdin not captured".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::PackageLaunch {
            name: binary.display().to_string(),
            message: "child stdout not captured".to_string(),
        })?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            closed: false,
        })
    }

    /// Writes one frame followed by the newline delimiter.
    async fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        let write = async {
            self.stdin.write_all(bytes).await?;
            self.stdin.write_all(b"\n").await?;
            self.stdin.flush().await
        };
        if let Err(e) = write.await {
            self.closed = true;
            tracing::debug!(error = %e, "package channel write failed");
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    /// Reads one newline-delimited frame from the child's stdout.
    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut line = String::new();
        let bytes_read = self.stdout.read_line(&mut line).await.map_err(|e| {
            self.closed = true;
            tracing::debug!(error = %e, "package channel read failed");
            Error::ChannelClosed
        })?;

        if bytes_read == 0 {
            // EOF: the package binary has terminated.
            self.closed = true;
            return Err(Error::ChannelClosed);
        }

        let line = line.trim_end_matches('\n').trim_end_matches('\r');
        if line.is_empty() {
            return Err(Error::Protocol("empty frame received".to_string()));
        }
        Ok(line.as_bytes().to_vec())
    }
}

#[async_trait]
impl PackageTransport for ChildProcessTransport {
    async fn send(&mut self, request: PackageRequest) -> Result<()> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        let bytes = encode_frame(&request)?;
        self.write_frame(&bytes).await
    }

    async fn receive(&mut self) -> Result<PackageResponse> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        let frame = self.read_frame().await?;
        decode_frame(&frame)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.stdin.flush().await;
        // Terminate the subprocess; a released package must not leave
        // an orphan running.
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "package binary already gone on close");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }

    fn transport_type(&self) -> &'static str {
        "subprocess"
    }
}
