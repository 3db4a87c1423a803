//! Engine error taxonomy
//!
//! Every failure resolves locally to a terminal transfer status; none of
//! these errors cross the status-query boundary to the UI layer.

use crate::codec::CryptoError;
use crate::signaling::SignalingError;
use crate::transport::TransportError;

/// Errors that terminate a transfer
#[derive(Debug)]
pub enum EngineError {
    /// No pre-shared secret configured; fails before any network activity
    Config(String),
    /// An operation was called in a state that does not allow it
    InvalidOperation(String),
    /// Chunk encryption or authentication failure, fatal and never retried
    Crypto(CryptoError),
    /// Send/receive failure on the selected transport
    Transport(TransportError),
    /// Send failure on the signaling channel
    Signaling(SignalingError),
    /// File source/sink I/O failure
    Io(std::io::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Config(msg) => write!(f, "configuration error: {msg}"),
            EngineError::InvalidOperation(msg) => write!(f, "invalid operation: {msg}"),
            EngineError::Crypto(err) => write!(f, "crypto error: {err}"),
            EngineError::Transport(err) => write!(f, "transport error: {err}"),
            EngineError::Signaling(err) => write!(f, "signaling error: {err}"),
            EngineError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Config(_) | EngineError::InvalidOperation(_) => None,
            EngineError::Crypto(err) => Some(err),
            EngineError::Transport(err) => Some(err),
            EngineError::Signaling(err) => Some(err),
            EngineError::Io(err) => Some(err),
        }
    }
}

impl From<CryptoError> for EngineError {
    fn from(err: CryptoError) -> Self {
        EngineError::Crypto(err)
    }
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        EngineError::Transport(err)
    }
}

impl From<SignalingError> for EngineError {
    fn from(err: SignalingError) -> Self {
        EngineError::Signaling(err)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}
