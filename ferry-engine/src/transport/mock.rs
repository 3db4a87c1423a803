//! Mock direct transport for testing
//!
//! A connected pair of in-memory transport ends. Sending on one end
//! delivers a `Data` event to the other; closing delivers `Closed`. An
//! optional manual-backpressure mode makes `send` grow the buffered-bytes
//! counter so tests can exercise the watermark logic by draining it
//! explicitly.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use super::{DirectTransport, TransportError, TransportEvent};

struct EndState {
    /// Delivers events to the peer end
    peer_tx: mpsc::UnboundedSender<TransportEvent>,
    /// Own inbound events, taken once by the consumer
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    /// Simulated outbound queue depth
    buffered: AtomicU64,
    /// Signalled when the queue drains below the low mark
    low_notify: Notify,
    /// Buffered level below which `buffer_low` resolves
    low_mark: u64,
    /// When true, `send` grows `buffered` and tests drain it by hand
    manual_backpressure: bool,
    closed: AtomicBool,
    /// Total payload bytes accepted by `send`
    sent_bytes: AtomicU64,
}

/// One end of an in-memory transport pair
#[derive(Clone)]
pub struct MockDirectTransport {
    state: Arc<EndState>,
}

impl MockDirectTransport {
    /// Create a connected pair with no backpressure simulation
    pub fn pair() -> (Self, Self) {
        Self::pair_inner(0, false)
    }

    /// Create a connected pair where `send` accumulates buffered bytes
    /// until the test calls [`MockDirectTransport::drain`]
    pub fn pair_with_backpressure(low_mark: u64) -> (Self, Self) {
        Self::pair_inner(low_mark, true)
    }

    fn pair_inner(low_mark: u64, manual_backpressure: bool) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = Self::end(tx_b, rx_a, low_mark, manual_backpressure);
        let b = Self::end(tx_a, rx_b, low_mark, manual_backpressure);
        (a, b)
    }

    fn end(
        peer_tx: mpsc::UnboundedSender<TransportEvent>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        low_mark: u64,
        manual_backpressure: bool,
    ) -> Self {
        Self {
            state: Arc::new(EndState {
                peer_tx,
                events: Mutex::new(Some(events)),
                buffered: AtomicU64::new(0),
                low_notify: Notify::new(),
                low_mark,
                manual_backpressure,
                closed: AtomicBool::new(false),
                sent_bytes: AtomicU64::new(0),
            }),
        }
    }

    /// Empty the simulated outbound queue and wake a parked sender
    pub fn drain(&self) {
        self.state.buffered.store(0, Ordering::Release);
        self.state.low_notify.notify_waiters();
    }

    /// Total payload bytes this end has accepted for sending
    pub fn sent_bytes(&self) -> u64 {
        self.state.sent_bytes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DirectTransport for MockDirectTransport {
    async fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self.state.manual_backpressure {
            self.state
                .buffered
                .fetch_add(bytes.len() as u64, Ordering::AcqRel);
        }
        self.state
            .sent_bytes
            .fetch_add(bytes.len() as u64, Ordering::AcqRel);
        self.state
            .peer_tx
            .send(TransportEvent::Data(bytes))
            .map_err(|_| TransportError::Closed)
    }

    fn buffered_bytes(&self) -> u64 {
        self.state.buffered.load(Ordering::Acquire)
    }

    async fn buffer_low(&self) {
        loop {
            let notified = self.state.low_notify.notified();
            if self.state.closed.load(Ordering::Acquire) {
                return;
            }
            if self.state.buffered.load(Ordering::Acquire) <= self.state.low_mark {
                return;
            }
            notified.await;
        }
    }

    async fn flush(&self) -> Result<(), TransportError> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.state.closed.swap(true, Ordering::AcqRel) {
            let _ = self.state.peer_tx.send(TransportEvent::Closed);
            self.state.low_notify.notify_waiters();
        }
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.state.events.lock().expect("events lock poisoned").take()
    }
}
