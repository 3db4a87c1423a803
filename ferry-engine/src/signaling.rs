//! Signaling channel abstraction
//!
//! The relay server's message channel, as consumed by the engine: ordered,
//! reliable, per-peer delivery of [`Envelope`]s. The host owns the actual
//! connection and pushes inbound envelopes into the engine via
//! [`crate::engine::TransferEngine::handle_envelope`]; this trait only
//! covers the outbound direction.

use async_trait::async_trait;

use ferry_common::Envelope;

/// Outbound half of the relay signaling connection
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send an envelope to the peer it is addressed to
    async fn send(&self, envelope: Envelope) -> Result<(), SignalingError>;
}

/// Errors sending on the signaling channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// The relay connection is gone
    ChannelClosed,
    /// The relay refused or failed to route the envelope
    Send(String),
}

impl std::fmt::Display for SignalingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalingError::ChannelClosed => write!(f, "signaling channel closed"),
            SignalingError::Send(msg) => write!(f, "signaling send failed: {msg}"),
        }
    }
}

impl std::error::Error for SignalingError {}
