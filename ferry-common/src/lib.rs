//! Ferry Common Library
//!
//! Shared types and constants for the Ferry peer file transfer system.
//! Both peers of a transfer (and the relay server, which only routes
//! envelopes) depend on this crate for the signaling schema.

pub mod envelope;
pub mod peer;

pub use envelope::{Envelope, EnvelopeError, SignalKind, SignalPayload, envelope_type};
pub use peer::PeerId;

use std::time::Duration;

/// Plaintext chunk size on the direct peer-to-peer path
pub const DIRECT_CHUNK_SIZE: usize = 64 * 1024;

/// Plaintext chunk size on the relay path
///
/// Smaller than the direct chunk size so that base64 inflation keeps each
/// signaling message within the relay's per-message capacity.
pub const RELAY_CHUNK_SIZE: usize = 48 * 1024;

/// AEAD authentication tag length appended to every sealed chunk
pub const CHUNK_TAG_LEN: usize = 16;

/// How long the sender waits for the direct transport to become ready
/// before falling back to the relay path
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered-bytes level above which the sender pauses pushing chunks
pub const SEND_HIGH_WATERMARK: u64 = 1024 * 1024;

/// Buffered-bytes level below which a paused sender resumes
pub const SEND_LOW_WATERMARK: u64 = 256 * 1024;

/// Number of relay chunk messages sent between cooperative yields
pub const RELAY_YIELD_EVERY: u64 = 4;

/// Maximum filename length accepted in an offer (bytes)
pub const MAX_FILENAME_BYTES: usize = 255;

/// Maximum declared file size accepted in an offer (4 GiB)
pub const MAX_TRANSFER_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Maximum opaque connectivity-signal payload size (bytes)
pub const MAX_SIGNAL_PAYLOAD: usize = 16 * 1024;

/// Maximum base64-encoded chunk payload length in a relay message
///
/// A full relay chunk is `RELAY_CHUNK_SIZE` plaintext bytes plus the AEAD
/// tag, then base64-encoded at 4 output bytes per 3 input bytes.
pub const MAX_CHUNK_DATA_LEN: usize = 4 * (RELAY_CHUNK_SIZE + CHUNK_TAG_LEN).div_ceil(3);
