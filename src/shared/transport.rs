//! The package channel transport trait.
//!
//! The execution engine talks to a loaded package binary exclusively
//! through [`PackageTransport`]: send one request, then read response
//! frames one at a time until the protocol says the exchange is over.
//! The wire encoding belongs to the implementation; the default
//! subprocess transport uses newline-delimited JSON, and tests swap in
//! an in-memory scripted transport.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::protocol::{PackageRequest, PackageResponse};

/// Bidirectional channel to a package binary.
///
/// Implementations must deliver response frames in the exact order the
/// binary emits them, one at a time, with no reordering or lookahead
/// buffering visible to the caller.
#[async_trait]
pub trait PackageTransport: Send {
    /// Sends one request to the package binary.
    async fn send(&mut self, request: PackageRequest) -> Result<()>;

    /// Receives the next response frame.
    ///
    /// Returns [`Error::ChannelClosed`] once the binary has terminated
    /// or the channel is otherwise unusable; the channel must never be
    /// reused after that.
    async fn receive(&mut self) -> Result<PackageResponse>;

    /// Closes the channel, terminating the package binary.
    async fn close(&mut self) -> Result<()>;

    /// Whether the channel is still usable.
    fn is_connected(&self) -> bool;

    /// A short label for the transport implementation, for diagnostics.
    fn transport_type(&self) -> &'static str {
        "unknown"
    }
}

/// Serializes a request into one wire frame (no delimiter).
pub fn encode_frame(request: &PackageRequest) -> Result<Vec<u8>> {
    serde_json::to_vec(request)
        .map_err(|e| Error::Protocol(format!("failed to serialize request: {e}")))
}

/// Parses one wire frame into a response.
pub fn decode_frame(frame: &[u8]) -> Result<PackageResponse> {
    serde_json::from_slice(frame).map_err(|e| Error::Protocol(format!("invalid frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::protocol::StatusRecord;

    #[test]
    fn encode_produces_bare_json() {
        let bytes = encode_frame(&PackageRequest::Discover).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with('{'));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn decode_round_trips_status() {
        let frame = serde_json::to_vec(&PackageResponse::Status(StatusRecord::ok())).unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded, PackageResponse::Status(StatusRecord::ok()));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_frame(b"not json").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
