//! Transfer records and the status state machine
//!
//! `Transfer` is the caller-visible snapshot of one file transfer. The
//! engine owns the live record and publishes immutable clones on every
//! state change; UI layers bind to the snapshots, never to engine
//! internals.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ferry_common::PeerId;

// =============================================================================
// Transfer Direction
// =============================================================================

/// Direction of the transfer, from the local peer's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Local peer is sending the file
    Send,
    /// Local peer is receiving the file
    Receive,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

// =============================================================================
// Transfer Status
// =============================================================================

/// Current status of a transfer
///
/// Transitions are monotone forward; the four terminal states are
/// absorbing. `pending → rejected` is only reachable on the receive side
/// of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Offered, waiting on the receiver's decision
    Pending,
    /// Accepted, negotiating the transport
    Connecting,
    /// Actively moving chunks
    Transferring,
    /// All chunks delivered and the terminal signal seen
    Completed,
    /// Failed (crypto, transport, or configuration)
    Failed,
    /// Receiver declined the offer
    Rejected,
    /// Cancelled by either side
    Cancelled,
}

impl TransferStatus {
    /// Returns true if no further status mutation or transport activity
    /// is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed
                | TransferStatus::Failed
                | TransferStatus::Rejected
                | TransferStatus::Cancelled
        )
    }

    /// Returns true if the transfer is active (connecting or transferring)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TransferStatus::Connecting | TransferStatus::Transferring
        )
    }

    /// Returns true if `next` is a legal forward transition from `self`
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        match (self, next) {
            (Pending, Connecting) => true,
            (Pending, Rejected) => true,
            (Connecting, Transferring) => true,
            (Transferring, Completed) => true,
            // any non-terminal state can fail or be cancelled
            (Pending | Connecting | Transferring, Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Connecting => "connecting",
            TransferStatus::Transferring => "transferring",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Rejected => "rejected",
            TransferStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Transfer
// =============================================================================

/// A single file transfer between two peers
///
/// Snapshots of this record are the engine's sole externally observable
/// interface, consumed by a UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique identifier, shared by both peers
    pub id: Uuid,

    /// The remote peer's identity
    pub peer: PeerId,

    /// The remote peer's display name
    pub peer_name: String,

    /// Name of the file being transferred
    pub filename: String,

    /// Declared size in bytes
    pub size: u64,

    /// Whether the local peer is sending or receiving
    pub direction: TransferDirection,

    /// Current status
    pub status: TransferStatus,

    /// Bytes transferred so far
    pub bytes_transferred: u64,

    /// Timestamp when the transfer was created (offered)
    pub created_at: i64,

    /// Timestamp when chunks started flowing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
}

impl Transfer {
    /// Create a record for a locally initiated (send) transfer
    pub fn new_outgoing(peer: PeerId, peer_name: String, filename: String, size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            peer_name,
            filename,
            size,
            direction: TransferDirection::Send,
            status: TransferStatus::Pending,
            bytes_transferred: 0,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
        }
    }

    /// Create a record for an inbound offer (receive)
    ///
    /// The id comes from the offering peer so both sides correlate on it.
    pub fn new_incoming(
        id: Uuid,
        peer: PeerId,
        peer_name: String,
        filename: String,
        size: u64,
    ) -> Self {
        Self {
            id,
            peer,
            peer_name,
            filename,
            size,
            direction: TransferDirection::Receive,
            status: TransferStatus::Pending,
            bytes_transferred: 0,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
        }
    }

    /// Calculate progress as a percentage (0.0 to 100.0)
    pub fn progress_percent(&self) -> f32 {
        if self.size == 0 {
            if self.status == TransferStatus::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            (self.bytes_transferred as f64 / self.size as f64 * 100.0) as f32
        }
    }
}
