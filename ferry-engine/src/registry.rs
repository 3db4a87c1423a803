//! Transfer registry
//!
//! Owns every `Transfer` record and its private runtime state, enforces
//! the status state machine, and publishes immutable snapshots on every
//! state change. One registry instance per engine; nothing here is global.
//!
//! The map sits behind a `std::sync::Mutex`: every operation is short and
//! lock-free of I/O, so UI reads and network-callback writes from
//! different tasks serialize cleanly. Heavy handles (sources, sinks,
//! transports) are owned by the per-transfer task; the runtime kept here
//! is what cancellation needs to reach.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use uuid::Uuid;

use ferry_common::SignalPayload;

use crate::io::FileSource;
use crate::keys::TransferKey;
use crate::transfer::{Transfer, TransferStatus};
use crate::transport::DirectTransport;
use crate::transport::relay::RelayFrame;

/// Capacity of the snapshot broadcast channel
const EVENT_CHANNEL_SIZE: usize = 128;

/// Minimum interval between progress snapshots per transfer
const PROGRESS_PUBLISH_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// Private per-transfer runtime state
///
/// Released (taken out of the registry) the instant the transfer reaches
/// a terminal status. The negotiation timer lives inside the per-transfer
/// task, so aborting `task` also cancels it.
#[derive(Default)]
pub(crate) struct Runtime {
    /// Derived symmetric key, present from acceptance onward
    pub key: Option<TransferKey>,
    /// Sender side: path of the offered file, opened when the peer accepts
    pub source_path: Option<PathBuf>,
    /// Sender side: pre-supplied source, for hosts without a filesystem
    pub source: Option<Box<dyn FileSource>>,
    /// The per-transfer streaming task
    pub task: Option<AbortHandle>,
    /// Selected direct transport, if the direct path won negotiation
    pub transport: Option<Arc<dyn DirectTransport>>,
    /// Routes inbound relay chunks into the receive loop
    pub relay_tx: Option<mpsc::UnboundedSender<RelayFrame>>,
    /// Routes inbound connectivity signals into the pending attempt
    pub signal_tx: Option<mpsc::UnboundedSender<SignalPayload>>,
}

struct Entry {
    transfer: Transfer,
    runtime: Runtime,
    last_publish: Option<Instant>,
}

/// Registry of all transfers known to one engine instance
pub(crate) struct TransferRegistry {
    entries: Mutex<HashMap<Uuid, Entry>>,
    events: broadcast::Sender<Transfer>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to transfer snapshots
    pub fn subscribe(&self) -> broadcast::Receiver<Transfer> {
        self.events.subscribe()
    }

    /// Register a new transfer; returns false if the id already exists
    pub fn insert(&self, transfer: Transfer) -> bool {
        let mut entries = self.entries.lock().expect("transfer registry lock poisoned");
        if entries.contains_key(&transfer.id) {
            return false;
        }
        let _ = self.events.send(transfer.clone());
        entries.insert(
            transfer.id,
            Entry {
                transfer,
                runtime: Runtime::default(),
                last_publish: None,
            },
        );
        true
    }

    /// Snapshot of one transfer
    pub fn snapshot(&self, id: Uuid) -> Option<Transfer> {
        self.entries
            .lock()
            .expect("transfer registry lock poisoned")
            .get(&id)
            .map(|entry| entry.transfer.clone())
    }

    /// Snapshots of all known transfers
    pub fn snapshots(&self) -> Vec<Transfer> {
        self.entries
            .lock()
            .expect("transfer registry lock poisoned")
            .values()
            .map(|entry| entry.transfer.clone())
            .collect()
    }

    /// Current status of one transfer
    pub fn status(&self, id: Uuid) -> Option<TransferStatus> {
        self.entries
            .lock()
            .expect("transfer registry lock poisoned")
            .get(&id)
            .map(|entry| entry.transfer.status)
    }

    /// Ids of all transfers not yet in a terminal state
    pub fn non_terminal_ids(&self) -> Vec<Uuid> {
        self.entries
            .lock()
            .expect("transfer registry lock poisoned")
            .values()
            .filter(|entry| !entry.transfer.status.is_terminal())
            .map(|entry| entry.transfer.id)
            .collect()
    }

    /// Advance a transfer's status, if the transition is legal
    ///
    /// Publishes a snapshot on success. Entering `Transferring` stamps
    /// `started_at`.
    pub fn set_status(&self, id: Uuid, next: TransferStatus) -> bool {
        let mut entries = self.entries.lock().expect("transfer registry lock poisoned");
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        if !entry.transfer.status.can_transition_to(next) {
            return false;
        }
        entry.transfer.status = next;
        if next == TransferStatus::Transferring {
            entry.transfer.started_at = Some(chrono::Utc::now().timestamp());
        }
        let _ = self.events.send(entry.transfer.clone());
        entry.last_publish = Some(Instant::now());
        true
    }

    /// Record streaming progress
    ///
    /// Only moves forward, and only while the transfer is active.
    /// Snapshots are throttled so a fast transfer does not flood
    /// subscribers; the record itself is always current.
    pub fn update_progress(&self, id: Uuid, bytes_transferred: u64) {
        let mut entries = self.entries.lock().expect("transfer registry lock poisoned");
        let Some(entry) = entries.get_mut(&id) else {
            return;
        };
        if !entry.transfer.status.is_active() {
            return;
        }
        if bytes_transferred <= entry.transfer.bytes_transferred {
            return;
        }
        entry.transfer.bytes_transferred = bytes_transferred;

        let due = entry
            .last_publish
            .is_none_or(|at| at.elapsed() >= PROGRESS_PUBLISH_INTERVAL);
        if due {
            let _ = self.events.send(entry.transfer.clone());
            entry.last_publish = Some(Instant::now());
        }
    }

    /// Commit a terminal status and release the runtime, atomically
    ///
    /// The terminal check happens under the lock immediately before the
    /// commit, so a cancel racing a completion (or vice versa) can never
    /// overwrite a terminal state. Returns the final snapshot and the
    /// runtime for the caller to tear down, or `None` if the transfer is
    /// unknown, already terminal, or the transition is illegal.
    pub fn terminate(&self, id: Uuid, status: TransferStatus) -> Option<(Transfer, Runtime)> {
        debug_assert!(status.is_terminal());
        let mut entries = self.entries.lock().expect("transfer registry lock poisoned");
        let entry = entries.get_mut(&id)?;
        if !entry.transfer.status.can_transition_to(status) {
            return None;
        }
        entry.transfer.status = status;
        let _ = self.events.send(entry.transfer.clone());
        entry.last_publish = Some(Instant::now());
        Some((entry.transfer.clone(), std::mem::take(&mut entry.runtime)))
    }

    /// Mutate the private runtime of a transfer
    pub fn with_runtime<R>(&self, id: Uuid, f: impl FnOnce(&mut Runtime) -> R) -> Option<R> {
        let mut entries = self.entries.lock().expect("transfer registry lock poisoned");
        entries.get_mut(&id).map(|entry| f(&mut entry.runtime))
    }

    /// Clone the relay routing sender for a transfer, if one is live
    pub fn relay_sender(&self, id: Uuid) -> Option<mpsc::UnboundedSender<RelayFrame>> {
        self.with_runtime(id, |runtime| runtime.relay_tx.clone()).flatten()
    }

    /// Clone the connectivity-signal sender for a transfer, if one is live
    pub fn signal_sender(&self, id: Uuid) -> Option<mpsc::UnboundedSender<SignalPayload>> {
        self.with_runtime(id, |runtime| runtime.signal_tx.clone()).flatten()
    }
}
