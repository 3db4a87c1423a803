//! Transport abstractions for chunk delivery
//!
//! Two ways bytes move once a transfer is negotiated: an ordered, reliable
//! peer-to-peer byte stream ([`DirectTransport`]) with buffered-bytes
//! backpressure, or the relay fallback that rides the signaling channel.
//! Exactly one of the two is active for a transfer after negotiation
//! concludes.
//!
//! The trait-based design allows mock implementations during testing and
//! whatever connectivity primitive the host provides in production.

pub mod frame;
pub mod mock;

pub(crate) mod direct;
pub(crate) mod relay;

use async_trait::async_trait;
use tokio::sync::mpsc;

use self::frame::FrameError;

/// An event reported by a direct transport after establishment
#[derive(Debug)]
pub enum TransportEvent {
    /// Bytes arrived from the peer (arbitrary stream slices, not frames)
    Data(Vec<u8>),
    /// The peer closed the connection or it was lost
    Closed,
}

/// An established, ordered, reliable peer-to-peer byte stream
///
/// Contract consumed by the engine: `send` queues bytes for in-order
/// delivery; `buffered_bytes`/`buffer_low` expose the outbound queue for
/// watermark flow control; inbound data and closure arrive as
/// [`TransportEvent`]s on the receiver taken with `take_events`.
#[async_trait]
pub trait DirectTransport: Send + Sync {
    /// Queue bytes for delivery to the peer
    async fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Bytes queued locally but not yet handed to the network
    fn buffered_bytes(&self) -> u64;

    /// Resolves once buffered bytes have dropped below the transport's
    /// low watermark (immediately if they already have, or if the
    /// transport is closed)
    async fn buffer_low(&self);

    /// Resolves once everything queued so far has been handed to the
    /// network
    async fn flush(&self) -> Result<(), TransportError>;

    /// Tear the connection down
    async fn close(&self);

    /// Take the inbound event receiver (yields `None` after the first call)
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}

/// Errors on either transport after selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport closed before the terminal signal was delivered
    Closed,
    /// A send was refused or failed
    Send(String),
    /// The inbound byte stream could not be framed
    Frame(FrameError),
    /// A relay chunk arrived out of send order
    OutOfOrder { expected: u64, actual: u64 },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport closed before transfer finished"),
            TransportError::Send(msg) => write!(f, "transport send failed: {msg}"),
            TransportError::Frame(err) => write!(f, "framing error: {err}"),
            TransportError::OutOfOrder { expected, actual } => {
                write!(f, "chunk {actual} arrived while expecting {expected}")
            }
        }
    }
}

impl std::error::Error for TransportError {}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        TransportError::Frame(err)
    }
}
