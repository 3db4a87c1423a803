//! Signaling envelopes for transfer negotiation and relayed delivery
//!
//! All envelopes are routed through the relay server as JSON, addressed to
//! a single peer. The relay never sees plaintext file data: `Chunk`
//! envelopes carry base64-encoded ciphertext sealed by the chunk codec.
//!
//! Inbound envelopes are validated with [`Envelope::validate`] at the
//! boundary, before anything reaches the transfer engine.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::peer::PeerId;
use crate::{
    CHUNK_TAG_LEN, MAX_CHUNK_DATA_LEN, MAX_FILENAME_BYTES, MAX_SIGNAL_PAYLOAD, MAX_TRANSFER_SIZE,
    RELAY_CHUNK_SIZE,
};

/// Kind of an opaque connectivity-negotiation signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Session-description handshake message
    Handshake,
    /// Trickled connectivity candidate
    Candidate,
}

/// Opaque payload exchanged while establishing the direct transport
///
/// The engine forwards these verbatim between the connectivity layer and
/// the signaling channel; it never inspects the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPayload {
    pub kind: SignalKind,
    pub payload: String,
}

/// A signaling message, addressed to one peer and correlated by transfer id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Offer a file to a peer
    Offer {
        target: PeerId,
        transfer_id: Uuid,
        filename: String,
        size: u64,
    },
    /// Receiver accepted the offer
    Accept { target: PeerId, transfer_id: Uuid },
    /// Receiver declined the offer
    Reject { target: PeerId, transfer_id: Uuid },
    /// Opaque connectivity-negotiation payload, either direction
    Signal {
        target: PeerId,
        transfer_id: Uuid,
        signal: SignalPayload,
    },
    /// One encrypted chunk, relay path only
    Chunk {
        target: PeerId,
        transfer_id: Uuid,
        index: u64,
        /// base64-encoded ciphertext
        data: String,
    },
    /// All chunks sent, relay path only
    Done { target: PeerId, transfer_id: Uuid },
    /// Transfer cancelled, either direction
    Cancel { target: PeerId, transfer_id: Uuid },
}

impl Envelope {
    /// The peer this envelope is addressed to
    pub fn target(&self) -> &PeerId {
        match self {
            Envelope::Offer { target, .. }
            | Envelope::Accept { target, .. }
            | Envelope::Reject { target, .. }
            | Envelope::Signal { target, .. }
            | Envelope::Chunk { target, .. }
            | Envelope::Done { target, .. }
            | Envelope::Cancel { target, .. } => target,
        }
    }

    /// The transfer this envelope belongs to
    pub fn transfer_id(&self) -> Uuid {
        match self {
            Envelope::Offer { transfer_id, .. }
            | Envelope::Accept { transfer_id, .. }
            | Envelope::Reject { transfer_id, .. }
            | Envelope::Signal { transfer_id, .. }
            | Envelope::Chunk { transfer_id, .. }
            | Envelope::Done { transfer_id, .. }
            | Envelope::Cancel { transfer_id, .. } => *transfer_id,
        }
    }

    /// Validate an inbound envelope before it is handed to the engine
    ///
    /// Control envelopes carrying only ids are always valid; offers,
    /// signals and chunks are checked against the protocol limits.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        match self {
            Envelope::Offer { filename, size, .. } => {
                if filename.is_empty() {
                    return Err(EnvelopeError::EmptyFilename);
                }
                if filename.len() > MAX_FILENAME_BYTES {
                    return Err(EnvelopeError::FilenameTooLong);
                }
                // Offers name a file, never a path. Reject anything a
                // receiver could be tricked into writing outside its
                // chosen destination.
                if filename.contains('/') || filename.contains('\\') || filename == ".." {
                    return Err(EnvelopeError::UnsafeFilename);
                }
                if *size > MAX_TRANSFER_SIZE {
                    return Err(EnvelopeError::SizeTooLarge);
                }
                Ok(())
            }
            Envelope::Signal { signal, .. } => {
                if signal.payload.len() > MAX_SIGNAL_PAYLOAD {
                    return Err(EnvelopeError::SignalTooLarge);
                }
                Ok(())
            }
            Envelope::Chunk { data, .. } => {
                if data.len() > MAX_CHUNK_DATA_LEN {
                    return Err(EnvelopeError::ChunkTooLarge);
                }
                let decoded = BASE64
                    .decode(data)
                    .map_err(|_| EnvelopeError::InvalidChunkEncoding)?;
                if decoded.len() < CHUNK_TAG_LEN {
                    return Err(EnvelopeError::InvalidChunkEncoding);
                }
                if decoded.len() > RELAY_CHUNK_SIZE + CHUNK_TAG_LEN {
                    return Err(EnvelopeError::ChunkTooLarge);
                }
                Ok(())
            }
            Envelope::Accept { .. }
            | Envelope::Reject { .. }
            | Envelope::Done { .. }
            | Envelope::Cancel { .. } => Ok(()),
        }
    }
}

/// Get the type name for an envelope (matches the enum variant name)
#[must_use]
pub fn envelope_type(envelope: &Envelope) -> &'static str {
    match envelope {
        Envelope::Offer { .. } => "Offer",
        Envelope::Accept { .. } => "Accept",
        Envelope::Reject { .. } => "Reject",
        Envelope::Signal { .. } => "Signal",
        Envelope::Chunk { .. } => "Chunk",
        Envelope::Done { .. } => "Done",
        Envelope::Cancel { .. } => "Cancel",
    }
}

/// Errors from envelope boundary validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Offer filename is empty
    EmptyFilename,
    /// Offer filename exceeds the protocol limit
    FilenameTooLong,
    /// Offer filename contains path components
    UnsafeFilename,
    /// Declared file size exceeds the protocol limit
    SizeTooLarge,
    /// Chunk payload exceeds the per-message limit
    ChunkTooLarge,
    /// Chunk payload is not valid base64 or too short to be ciphertext
    InvalidChunkEncoding,
    /// Connectivity-signal payload exceeds the protocol limit
    SignalTooLarge,
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::EmptyFilename => write!(f, "filename is empty"),
            EnvelopeError::FilenameTooLong => write!(f, "filename too long"),
            EnvelopeError::UnsafeFilename => write!(f, "filename contains path components"),
            EnvelopeError::SizeTooLarge => write!(f, "declared size too large"),
            EnvelopeError::ChunkTooLarge => write!(f, "chunk payload too large"),
            EnvelopeError::InvalidChunkEncoding => write!(f, "chunk payload is not valid base64"),
            EnvelopeError::SignalTooLarge => write!(f, "signal payload too large"),
        }
    }
}

impl std::error::Error for EnvelopeError {}
