//! In-memory scripted transport.
//!
//! [`ScriptedTransport`] plays back a canned sequence of response
//! frames and records every request it is sent, so package loading and
//! task execution can be exercised without spawning a real subprocess.
//! When the script runs out the transport reports the channel closed,
//! which doubles as a crashed-binary simulation.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::shared::transport::PackageTransport;
use crate::types::protocol::{PackageRequest, PackageResponse};

/// Shared view of the requests a [`ScriptedTransport`] has received.
///
/// Cloneable; stays valid after the transport has been moved into a
/// package channel.
#[derive(Debug, Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<PackageRequest>>>);

impl RequestLog {
    /// Snapshot of all requests sent so far, in order.
    pub fn requests(&self) -> Vec<PackageRequest> {
        self.0.lock().clone()
    }

    /// Number of requests sent so far.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether no request has been sent.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    fn record(&self, request: PackageRequest) {
        self.0.lock().push(request);
    }
}

/// A transport that answers from a fixed script.
///
/// Responses are consumed front to back, one per `receive` call,
/// regardless of which request triggered them; exhausting the script
/// closes the channel.
///
/// # Examples
///
/// ```
/// use votask::shared::ScriptedTransport;
/// use votask::types::{PackageResponse, StatusRecord};
///
/// let transport = ScriptedTransport::new(vec![
///     PackageResponse::Status(StatusRecord::ok()),
/// ]);
/// let log = transport.log();
/// assert!(log.is_empty());
/// ```
#[derive(Debug)]
pub struct ScriptedTransport {
    script: VecDeque<PackageResponse>,
    log: RequestLog,
    delay: Option<std::time::Duration>,
    closed: bool,
}

impl ScriptedTransport {
    /// Creates a transport that will play back `responses` in order.
    pub fn new(responses: Vec<PackageResponse>) -> Self {
        Self {
            script: responses.into(),
            log: RequestLog::default(),
            delay: None,
            closed: false,
        }
    }

    /// Delays every `receive` by the given duration, simulating a slow
    /// package binary.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Creates a transport whose channel is already closed, as if the
    /// binary died before the first exchange.
    pub fn disconnected() -> Self {
        let mut transport = Self::new(Vec::new());
        transport.closed = true;
        transport
    }

    /// A handle to the request log, usable after the transport has
    /// been handed to a package.
    pub fn log(&self) -> RequestLog {
        self.log.clone()
    }
}

#[async_trait]
impl PackageTransport for ScriptedTransport {
    async fn send(&mut self, request: PackageRequest) -> Result<()> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        self.log.record(request);
        Ok(())
    }

    async fn receive(&mut self) -> Result<PackageResponse> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.script.pop_front() {
            Some(response) => Ok(response),
            None => {
                // Script exhausted: behave like a terminated binary.
                self.closed = true;
                Err(Error::ChannelClosed)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }

    fn transport_type(&self) -> &'static str {
        "scripted"
    }
}
