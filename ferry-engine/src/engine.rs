//! The transfer engine
//!
//! Ties the registry, key derivation, negotiation and the two transports
//! together behind the public operations: offer a file, accept or reject
//! an inbound offer, cancel, and feed inbound signaling envelopes in.
//!
//! Each accepted transfer runs in its own spawned task, so all chunk
//! processing for a given transfer is serialized by construction. The
//! engine publishes `Transfer` snapshots on every state change; no errors
//! cross the status-query boundary.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use ferry_common::{
    DIRECT_CHUNK_SIZE, Envelope, NEGOTIATION_TIMEOUT, PeerId, RELAY_CHUNK_SIZE, RELAY_YIELD_EVERY,
    SEND_HIGH_WATERMARK, SignalPayload,
};

use crate::codec::ChunkCipher;
use crate::error::EngineError;
use crate::io::{FileSink, FileSource, FsSource};
use crate::keys::{SecretProvider, derive_transfer_key};
use crate::negotiation::{
    ConnectorRole, PeerConnector, ReceiverSelection, Selection, select_receiver_transport,
    select_transport,
};
use crate::registry::TransferRegistry;
use crate::signaling::SignalingChannel;
use crate::transfer::{Transfer, TransferDirection, TransferStatus};
use crate::transport::TransportError;
use crate::transport::direct::{drain_direct, pump_direct};
use crate::transport::relay::{RelayFrame, drain_relay, pump_relay};

// =============================================================================
// Configuration
// =============================================================================

/// Tunables for one engine instance
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long direct-transport establishment may take before the
    /// transfer falls back to the relay path
    pub negotiation_timeout: Duration,
    /// Plaintext chunk size on the direct path
    pub direct_chunk_size: usize,
    /// Plaintext chunk size on the relay path
    pub relay_chunk_size: usize,
    /// Buffered-bytes level above which the direct sender pauses
    pub high_watermark: u64,
    /// Relay chunks sent between cooperative yields
    pub relay_yield_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: NEGOTIATION_TIMEOUT,
            direct_chunk_size: DIRECT_CHUNK_SIZE,
            relay_chunk_size: RELAY_CHUNK_SIZE,
            high_watermark: SEND_HIGH_WATERMARK,
            relay_yield_every: RELAY_YIELD_EVERY,
        }
    }
}

/// A file source not yet opened: either a path or a ready source
enum SourceSlot {
    Path(std::path::PathBuf),
    Ready(Box<dyn FileSource>),
}

// =============================================================================
// Engine
// =============================================================================

struct EngineInner {
    config: EngineConfig,
    registry: TransferRegistry,
    signaling: Arc<dyn SignalingChannel>,
    connector: Arc<dyn PeerConnector>,
    secrets: Arc<dyn SecretProvider>,
}

/// The transfer negotiation and encrypted-chunk delivery engine
///
/// One instance per signaling connection. Cheap to clone; clones share
/// the same registry and collaborators.
#[derive(Clone)]
pub struct TransferEngine {
    inner: Arc<EngineInner>,
}

impl TransferEngine {
    /// Create an engine over the injected collaborators
    pub fn new(
        config: EngineConfig,
        signaling: Arc<dyn SignalingChannel>,
        connector: Arc<dyn PeerConnector>,
        secrets: Arc<dyn SecretProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry: TransferRegistry::new(),
                signaling,
                connector,
                secrets,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Snapshots of all known transfers
    pub fn transfers(&self) -> Vec<Transfer> {
        self.inner.registry.snapshots()
    }

    /// Snapshot of one transfer
    pub fn transfer(&self, id: Uuid) -> Option<Transfer> {
        self.inner.registry.snapshot(id)
    }

    /// Subscribe to transfer snapshots, published on every state change
    pub fn subscribe(&self) -> broadcast::Receiver<Transfer> {
        self.inner.registry.subscribe()
    }

    // -------------------------------------------------------------------------
    // Local operations
    // -------------------------------------------------------------------------

    /// Offer a local file to a peer
    ///
    /// Registers a pending send-direction transfer and emits the offer.
    /// No runtime state is created until the peer accepts.
    pub async fn send_file(
        &self,
        peer: PeerId,
        peer_name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Uuid, EngineError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                EngineError::InvalidOperation("path has no usable filename".to_string())
            })?
            .to_string();
        self.offer(
            peer,
            peer_name.into(),
            filename,
            metadata.len(),
            SourceSlot::Path(path.to_path_buf()),
        )
        .await
    }

    /// Offer an already-opened source to a peer
    ///
    /// For hosts that do not hand the engine a filesystem path.
    pub async fn send_source(
        &self,
        peer: PeerId,
        peer_name: impl Into<String>,
        filename: impl Into<String>,
        size: u64,
        source: Box<dyn FileSource>,
    ) -> Result<Uuid, EngineError> {
        self.offer(
            peer,
            peer_name.into(),
            filename.into(),
            size,
            SourceSlot::Ready(source),
        )
        .await
    }

    async fn offer(
        &self,
        peer: PeerId,
        peer_name: String,
        filename: String,
        size: u64,
        slot: SourceSlot,
    ) -> Result<Uuid, EngineError> {
        let transfer = Transfer::new_outgoing(peer.clone(), peer_name, filename.clone(), size);
        let id = transfer.id;
        self.inner.registry.insert(transfer);
        self.inner.registry.with_runtime(id, |runtime| match slot {
            SourceSlot::Path(path) => runtime.source_path = Some(path),
            SourceSlot::Ready(source) => runtime.source = Some(source),
        });

        let envelope = Envelope::Offer {
            target: peer,
            transfer_id: id,
            filename,
            size,
        };
        if let Err(err) = self.inner.signaling.send(envelope).await {
            self.inner.registry.terminate(id, TransferStatus::Failed);
            return Err(err.into());
        }
        debug!(%id, "offer sent");
        Ok(id)
    }

    /// Accept a pending inbound offer, writing into `sink`
    ///
    /// Derives the transfer key, moves the transfer to `connecting`, and
    /// emits the accept signal. With no shared secret configured the
    /// transfer fails before anything is sent.
    pub async fn accept(&self, id: Uuid, sink: Box<dyn FileSink>) -> Result<(), EngineError> {
        let snapshot = self
            .inner
            .registry
            .snapshot(id)
            .ok_or_else(|| EngineError::InvalidOperation("unknown transfer".to_string()))?;
        if snapshot.status != TransferStatus::Pending
            || snapshot.direction != TransferDirection::Receive
        {
            return Err(EngineError::InvalidOperation(
                "accept is only valid for a pending inbound offer".to_string(),
            ));
        }

        let Some(secret) = self.inner.secrets.shared_secret() else {
            warn!(%id, "no shared secret configured, failing transfer");
            self.inner.registry.terminate(id, TransferStatus::Failed);
            return Err(EngineError::Config(
                "no shared secret configured".to_string(),
            ));
        };
        let key = derive_transfer_key(&secret, &id);

        // register routing before the accept signal can draw peer traffic
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        self.inner.registry.with_runtime(id, |runtime| {
            runtime.key = Some(key.clone());
            runtime.signal_tx = Some(signal_tx);
            runtime.relay_tx = Some(relay_tx);
        });
        if !self
            .inner
            .registry
            .set_status(id, TransferStatus::Connecting)
        {
            // cancelled in the meantime; nothing to do
            return Ok(());
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        spawn_signal_forwarder(Arc::clone(&self.inner), id, snapshot.peer.clone(), out_rx);
        let task = tokio::spawn(run_receiver(
            Arc::clone(&self.inner),
            id,
            snapshot.peer.clone(),
            sink,
            ChunkCipher::new(&key),
            signal_rx,
            out_tx,
            relay_rx,
        ));
        self.inner
            .registry
            .with_runtime(id, |runtime| runtime.task = Some(task.abort_handle()));

        let envelope = Envelope::Accept {
            target: snapshot.peer,
            transfer_id: id,
        };
        if let Err(err) = self.inner.signaling.send(envelope).await {
            if let Some((_, runtime)) = self.inner.registry.terminate(id, TransferStatus::Failed) {
                if let Some(task) = runtime.task {
                    task.abort();
                }
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Decline a pending inbound offer
    pub async fn reject(&self, id: Uuid) -> Result<(), EngineError> {
        let snapshot = self
            .inner
            .registry
            .snapshot(id)
            .ok_or_else(|| EngineError::InvalidOperation("unknown transfer".to_string()))?;
        if snapshot.status != TransferStatus::Pending
            || snapshot.direction != TransferDirection::Receive
        {
            return Err(EngineError::InvalidOperation(
                "reject is only valid for a pending inbound offer".to_string(),
            ));
        }

        // no runtime state existed; nothing to release
        self.inner.registry.terminate(id, TransferStatus::Rejected);
        self.inner
            .signaling
            .send(Envelope::Reject {
                target: snapshot.peer,
                transfer_id: id,
            })
            .await?;
        Ok(())
    }

    /// Cancel a transfer from any non-terminal state
    ///
    /// Idempotent: unknown ids and already-terminal transfers are left
    /// untouched. Tears down the runtime and notifies the peer.
    pub async fn cancel(&self, id: Uuid) {
        self.cancel_internal(id, true).await;
    }

    /// Cancel every non-terminal transfer and release all runtime state
    pub async fn shutdown(&self) {
        for id in self.inner.registry.non_terminal_ids() {
            self.cancel_internal(id, true).await;
        }
    }

    async fn cancel_internal(&self, id: Uuid, notify_peer: bool) {
        // terminal check and commit happen atomically in the registry
        let Some((snapshot, runtime)) = self
            .inner
            .registry
            .terminate(id, TransferStatus::Cancelled)
        else {
            return;
        };
        debug!(%id, "transfer cancelled");
        if let Some(task) = runtime.task {
            task.abort();
        }
        if let Some(transport) = runtime.transport {
            transport.close().await;
        }
        if notify_peer {
            let _ = self
                .inner
                .signaling
                .send(Envelope::Cancel {
                    target: snapshot.peer,
                    transfer_id: id,
                })
                .await;
        }
    }

    // -------------------------------------------------------------------------
    // Inbound envelopes
    // -------------------------------------------------------------------------

    /// Feed one inbound signaling envelope into the engine
    ///
    /// `from` is the authenticated sender as reported by the signaling
    /// layer, `from_name` its display name (used only for offers).
    /// Envelopes for unknown or already-terminal transfers are dropped
    /// without effect: that is the expected race between local
    /// cancellation and in-flight remote messages, not an error.
    pub async fn handle_envelope(&self, from: PeerId, from_name: &str, envelope: Envelope) {
        if let Err(err) = envelope.validate() {
            warn!(%from, error = %err, "dropping invalid envelope");
            return;
        }
        let id = envelope.transfer_id();

        match envelope {
            Envelope::Offer { filename, size, .. } => {
                let transfer =
                    Transfer::new_incoming(id, from, from_name.to_string(), filename, size);
                if !self.inner.registry.insert(transfer) {
                    debug!(%id, "dropping offer for already-known transfer");
                }
            }
            Envelope::Accept { .. } => {
                let Some(snapshot) = self.live_transfer_from(id, &from, "Accept") else {
                    return;
                };
                if snapshot.status == TransferStatus::Pending
                    && snapshot.direction == TransferDirection::Send
                {
                    self.start_sending(snapshot).await;
                }
            }
            Envelope::Reject { .. } => {
                let Some(snapshot) = self.live_transfer_from(id, &from, "Reject") else {
                    return;
                };
                if snapshot.status == TransferStatus::Pending
                    && snapshot.direction == TransferDirection::Send
                {
                    self.inner.registry.terminate(id, TransferStatus::Rejected);
                }
            }
            Envelope::Signal { signal, .. } => {
                if self.live_transfer_from(id, &from, "Signal").is_none() {
                    return;
                }
                if let Some(tx) = self.inner.registry.signal_sender(id) {
                    let _ = tx.send(signal);
                }
            }
            Envelope::Chunk { index, data, .. } => {
                if self.live_transfer_from(id, &from, "Chunk").is_none() {
                    return;
                }
                if let Some(tx) = self.inner.registry.relay_sender(id) {
                    if let Ok(data) = BASE64.decode(&data) {
                        let _ = tx.send(RelayFrame::Chunk { index, data });
                    }
                }
            }
            Envelope::Done { .. } => {
                if self.live_transfer_from(id, &from, "Done").is_none() {
                    return;
                }
                if let Some(tx) = self.inner.registry.relay_sender(id) {
                    let _ = tx.send(RelayFrame::Done);
                }
            }
            Envelope::Cancel { .. } => {
                if self.live_transfer_from(id, &from, "Cancel").is_none() {
                    return;
                }
                // the peer already tore its side down; don't echo back
                self.cancel_internal(id, false).await;
            }
        }
    }

    /// Look up a non-terminal transfer that actually belongs to `from`
    fn live_transfer_from(&self, id: Uuid, from: &PeerId, kind: &'static str) -> Option<Transfer> {
        let Some(snapshot) = self.inner.registry.snapshot(id) else {
            debug!(%id, kind, "dropping envelope for unknown transfer");
            return None;
        };
        if snapshot.status.is_terminal() {
            debug!(%id, kind, "dropping envelope for terminal transfer");
            return None;
        }
        if snapshot.peer != *from {
            warn!(%id, kind, %from, "dropping envelope from mismatched peer");
            return None;
        }
        Some(snapshot)
    }

    /// The peer accepted our offer: derive the key, open the source, and
    /// start the sender task
    async fn start_sending(&self, snapshot: Transfer) {
        let id = snapshot.id;

        let Some(secret) = self.inner.secrets.shared_secret() else {
            warn!(%id, "no shared secret configured, failing transfer");
            self.inner.registry.terminate(id, TransferStatus::Failed);
            return;
        };
        let key = derive_transfer_key(&secret, &id);

        let slot = self
            .inner
            .registry
            .with_runtime(id, |runtime| (runtime.source.take(), runtime.source_path.take()));
        let Some((source, source_path)) = slot else {
            return;
        };
        let source: Box<dyn FileSource> = match (source, source_path) {
            (Some(source), _) => source,
            (None, Some(path)) => match FsSource::open(&path).await {
                Ok(source) => Box::new(source),
                Err(err) => {
                    warn!(%id, error = %err, "failed to open source file");
                    self.inner.registry.terminate(id, TransferStatus::Failed);
                    return;
                }
            },
            (None, None) => {
                warn!(%id, "no source registered for accepted transfer");
                self.inner.registry.terminate(id, TransferStatus::Failed);
                return;
            }
        };

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        self.inner.registry.with_runtime(id, |runtime| {
            runtime.key = Some(key.clone());
            runtime.signal_tx = Some(signal_tx);
        });
        if !self
            .inner
            .registry
            .set_status(id, TransferStatus::Connecting)
        {
            return;
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        spawn_signal_forwarder(Arc::clone(&self.inner), id, snapshot.peer.clone(), out_rx);
        let task = tokio::spawn(run_sender(
            Arc::clone(&self.inner),
            id,
            snapshot.peer,
            source,
            ChunkCipher::new(&key),
            signal_rx,
            out_tx,
        ));
        self.inner
            .registry
            .with_runtime(id, |runtime| runtime.task = Some(task.abort_handle()));
    }
}

// =============================================================================
// Per-transfer tasks
// =============================================================================

/// Wrap outgoing connectivity signals in envelopes and ship them
///
/// Lives until the connectivity layer drops its sender, which happens
/// when the pending attempt resolves or is aborted.
fn spawn_signal_forwarder(
    inner: Arc<EngineInner>,
    id: Uuid,
    peer: PeerId,
    mut out_rx: mpsc::UnboundedReceiver<SignalPayload>,
) {
    tokio::spawn(async move {
        while let Some(signal) = out_rx.recv().await {
            let envelope = Envelope::Signal {
                target: peer.clone(),
                transfer_id: id,
                signal,
            };
            if inner.signaling.send(envelope).await.is_err() {
                break;
            }
        }
    });
}

/// Commit a terminal status from inside the per-transfer task
///
/// The task is the caller, so its own abort handle is dropped rather
/// than fired; only the transport needs explicit closing here.
async fn finish_from_task(inner: &EngineInner, id: Uuid, status: TransferStatus) {
    if let Some((_, runtime)) = inner.registry.terminate(id, status) {
        if let Some(transport) = runtime.transport {
            transport.close().await;
        }
    }
}

/// Sender side: negotiate a transport, then stream the file through it
async fn run_sender(
    inner: Arc<EngineInner>,
    id: Uuid,
    peer: PeerId,
    mut source: Box<dyn FileSource>,
    cipher: ChunkCipher,
    signals_in: mpsc::UnboundedReceiver<SignalPayload>,
    signals_out: mpsc::UnboundedSender<SignalPayload>,
) {
    let pending = inner
        .connector
        .open(id, peer.clone(), ConnectorRole::Initiator, signals_in, signals_out)
        .await;
    let selection = select_transport(id, pending, inner.config.negotiation_timeout).await;

    let result = match selection {
        Selection::Direct(transport) => {
            inner
                .registry
                .with_runtime(id, |runtime| runtime.transport = Some(Arc::clone(&transport)));
            if !inner.registry.set_status(id, TransferStatus::Transferring) {
                transport.close().await;
                let _ = source.close().await;
                return;
            }
            pump_direct(
                &*transport,
                &cipher,
                &mut *source,
                inner.config.direct_chunk_size,
                inner.config.high_watermark,
                |bytes| inner.registry.update_progress(id, bytes),
            )
            .await
        }
        Selection::Relay => {
            if !inner.registry.set_status(id, TransferStatus::Transferring) {
                let _ = source.close().await;
                return;
            }
            pump_relay(
                &*inner.signaling,
                &cipher,
                &mut *source,
                inner.config.relay_chunk_size,
                inner.config.relay_yield_every,
                &peer,
                id,
                |bytes| inner.registry.update_progress(id, bytes),
            )
            .await
        }
    };

    let _ = source.close().await;
    match result {
        Ok(total) => {
            debug!(%id, total, "send complete");
            finish_from_task(&inner, id, TransferStatus::Completed).await;
        }
        Err(err) => {
            warn!(%id, error = %err, "send failed");
            finish_from_task(&inner, id, TransferStatus::Failed).await;
        }
    }
}

/// Receiver side: negotiate a transport, then drain it into the sink
#[allow(clippy::too_many_arguments)]
async fn run_receiver(
    inner: Arc<EngineInner>,
    id: Uuid,
    peer: PeerId,
    mut sink: Box<dyn FileSink>,
    cipher: ChunkCipher,
    signals_in: mpsc::UnboundedReceiver<SignalPayload>,
    signals_out: mpsc::UnboundedSender<SignalPayload>,
    mut relay_rx: mpsc::UnboundedReceiver<RelayFrame>,
) {
    let pending = inner
        .connector
        .open(id, peer, ConnectorRole::Responder, signals_in, signals_out)
        .await;
    let selection = select_receiver_transport(
        id,
        pending,
        inner.config.negotiation_timeout,
        &mut relay_rx,
    )
    .await;

    let result = match selection {
        ReceiverSelection::Direct(transport) => {
            inner
                .registry
                .with_runtime(id, |runtime| runtime.transport = Some(Arc::clone(&transport)));
            if !inner.registry.set_status(id, TransferStatus::Transferring) {
                transport.close().await;
                return;
            }
            match transport.take_events() {
                Some(mut events) => {
                    drain_direct(&mut events, &cipher, &mut *sink, |bytes| {
                        inner.registry.update_progress(id, bytes)
                    })
                    .await
                }
                None => Err(EngineError::Transport(TransportError::Closed)),
            }
        }
        ReceiverSelection::Relay(first) => {
            if !inner.registry.set_status(id, TransferStatus::Transferring) {
                return;
            }
            drain_relay(&mut relay_rx, first, &cipher, &mut *sink, |bytes| {
                inner.registry.update_progress(id, bytes)
            })
            .await
        }
    };

    match result {
        Ok(total) => {
            debug!(%id, total, "receive complete");
            finish_from_task(&inner, id, TransferStatus::Completed).await;
        }
        Err(err) => {
            // the sink is dropped unclosed; a partial file is never
            // reported complete
            warn!(%id, error = %err, "receive failed");
            finish_from_task(&inner, id, TransferStatus::Failed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory::{MemorySink, MemorySource};
    use crate::keys::SharedSecret;
    use crate::negotiation::{DirectError, PendingDirect};
    use crate::signaling::SignalingError;
    use async_trait::async_trait;
    use ferry_common::envelope_type;
    use std::sync::Mutex;

    /// Secret provider scripted by the test
    struct StaticSecrets(Option<Vec<u8>>);

    impl SecretProvider for StaticSecrets {
        fn shared_secret(&self) -> Option<SharedSecret> {
            self.0.clone().map(SharedSecret::new)
        }
    }

    /// Records outbound envelopes
    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<Envelope>>,
    }

    impl RecordingChannel {
        fn sent_types(&self) -> Vec<&'static str> {
            self.sent
                .lock()
                .expect("sent lock poisoned")
                .iter()
                .map(envelope_type)
                .collect()
        }
    }

    #[async_trait]
    impl SignalingChannel for RecordingChannel {
        async fn send(&self, envelope: Envelope) -> Result<(), SignalingError> {
            self.sent.lock().expect("sent lock poisoned").push(envelope);
            Ok(())
        }
    }

    /// Connector whose establishment attempt never resolves
    struct NeverConnector;

    struct NeverPending;

    #[async_trait]
    impl PendingDirect for NeverPending {
        async fn ready(
            &mut self,
        ) -> Result<Arc<dyn crate::transport::DirectTransport>, DirectError> {
            std::future::pending().await
        }

        async fn abort(self: Box<Self>) {}
    }

    #[async_trait]
    impl PeerConnector for NeverConnector {
        async fn open(
            &self,
            _transfer_id: Uuid,
            _peer: PeerId,
            _role: ConnectorRole,
            _signals_in: mpsc::UnboundedReceiver<SignalPayload>,
            _signals_out: mpsc::UnboundedSender<SignalPayload>,
        ) -> Box<dyn PendingDirect> {
            Box::new(NeverPending)
        }
    }

    fn test_engine(
        secret: Option<Vec<u8>>,
    ) -> (TransferEngine, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::default());
        let engine = TransferEngine::new(
            EngineConfig {
                negotiation_timeout: Duration::from_millis(50),
                relay_chunk_size: 1024,
                ..EngineConfig::default()
            },
            Arc::clone(&channel) as Arc<dyn SignalingChannel>,
            Arc::new(NeverConnector),
            Arc::new(StaticSecrets(secret)),
        );
        (engine, channel)
    }

    fn inbound_offer(id: Uuid, size: u64) -> Envelope {
        Envelope::Offer {
            target: PeerId::new("me"),
            transfer_id: id,
            filename: "notes.txt".to_string(),
            size,
        }
    }

    #[tokio::test]
    async fn test_send_source_registers_and_offers() {
        let (engine, channel) = test_engine(Some(b"secret".to_vec()));
        let id = engine
            .send_source(
                PeerId::new("bob"),
                "Bob",
                "notes.txt",
                5,
                Box::new(MemorySource::new(b"hello".to_vec())),
            )
            .await
            .expect("send_source");

        let snapshot = engine.transfer(id).expect("snapshot");
        assert_eq!(snapshot.status, TransferStatus::Pending);
        assert_eq!(snapshot.direction, TransferDirection::Send);
        assert_eq!(channel.sent_types(), vec!["Offer"]);
    }

    #[tokio::test]
    async fn test_send_file_reads_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.bin");
        tokio::fs::write(&path, vec![0u8; 1234]).await.expect("write");

        let (engine, _channel) = test_engine(Some(b"secret".to_vec()));
        let id = engine
            .send_file(PeerId::new("bob"), "Bob", &path)
            .await
            .expect("send_file");

        let snapshot = engine.transfer(id).expect("snapshot");
        assert_eq!(snapshot.filename, "report.bin");
        assert_eq!(snapshot.size, 1234);
    }

    #[tokio::test]
    async fn test_inbound_offer_registers_pending_receive() {
        let (engine, _channel) = test_engine(Some(b"secret".to_vec()));
        let id = Uuid::new_v4();
        engine
            .handle_envelope(PeerId::new("alice"), "Alice", inbound_offer(id, 100))
            .await;

        let snapshot = engine.transfer(id).expect("snapshot");
        assert_eq!(snapshot.direction, TransferDirection::Receive);
        assert_eq!(snapshot.status, TransferStatus::Pending);
        assert_eq!(snapshot.peer_name, "Alice");
    }

    #[tokio::test]
    async fn test_accept_without_secret_fails_before_signal() {
        let (engine, channel) = test_engine(None);
        let id = Uuid::new_v4();
        engine
            .handle_envelope(PeerId::new("alice"), "Alice", inbound_offer(id, 100))
            .await;

        let (sink, handle) = MemorySink::new();
        let err = engine.accept(id, Box::new(sink)).await.expect_err("must fail");
        assert!(matches!(err, EngineError::Config(_)));
        assert_eq!(
            engine.transfer(id).expect("snapshot").status,
            TransferStatus::Failed
        );
        // no accept signal went out, and nothing touched the sink
        assert!(channel.sent_types().is_empty());
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_accept_requires_pending_receive() {
        let (engine, _channel) = test_engine(Some(b"secret".to_vec()));
        let id = engine
            .send_source(
                PeerId::new("bob"),
                "Bob",
                "notes.txt",
                5,
                Box::new(MemorySource::new(b"hello".to_vec())),
            )
            .await
            .expect("send_source");

        let (sink, _handle) = MemorySink::new();
        let err = engine.accept(id, Box::new(sink)).await.expect_err("must fail");
        assert!(matches!(err, EngineError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_reject_notifies_and_is_terminal() {
        let (engine, channel) = test_engine(Some(b"secret".to_vec()));
        let id = Uuid::new_v4();
        engine
            .handle_envelope(PeerId::new("alice"), "Alice", inbound_offer(id, 100))
            .await;

        engine.reject(id).await.expect("reject");
        assert_eq!(
            engine.transfer(id).expect("snapshot").status,
            TransferStatus::Rejected
        );
        assert_eq!(channel.sent_types(), vec!["Reject"]);

        // terminal: a second reject is an invalid operation
        assert!(engine.reject(id).await.is_err());
    }

    #[tokio::test]
    async fn test_remote_reject_marks_sender_rejected() {
        let (engine, _channel) = test_engine(Some(b"secret".to_vec()));
        let peer = PeerId::new("bob");
        let id = engine
            .send_source(
                peer.clone(),
                "Bob",
                "notes.txt",
                5,
                Box::new(MemorySource::new(b"hello".to_vec())),
            )
            .await
            .expect("send_source");

        engine
            .handle_envelope(
                peer,
                "Bob",
                Envelope::Reject {
                    target: PeerId::new("me"),
                    transfer_id: id,
                },
            )
            .await;
        assert_eq!(
            engine.transfer(id).expect("snapshot").status,
            TransferStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_envelopes_for_unknown_transfers_dropped() {
        let (engine, channel) = test_engine(Some(b"secret".to_vec()));
        let ghost = Uuid::new_v4();

        engine
            .handle_envelope(
                PeerId::new("alice"),
                "Alice",
                Envelope::Done {
                    target: PeerId::new("me"),
                    transfer_id: ghost,
                },
            )
            .await;
        engine
            .handle_envelope(
                PeerId::new("alice"),
                "Alice",
                Envelope::Cancel {
                    target: PeerId::new("me"),
                    transfer_id: ghost,
                },
            )
            .await;

        assert!(engine.transfers().is_empty());
        assert!(channel.sent_types().is_empty());
    }

    #[tokio::test]
    async fn test_envelope_from_wrong_peer_dropped() {
        let (engine, _channel) = test_engine(Some(b"secret".to_vec()));
        let id = Uuid::new_v4();
        engine
            .handle_envelope(PeerId::new("alice"), "Alice", inbound_offer(id, 100))
            .await;

        // mallory cannot cancel alice's transfer
        engine
            .handle_envelope(
                PeerId::new("mallory"),
                "Mallory",
                Envelope::Cancel {
                    target: PeerId::new("me"),
                    transfer_id: id,
                },
            )
            .await;
        assert_eq!(
            engine.transfer(id).expect("snapshot").status,
            TransferStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (engine, channel) = test_engine(Some(b"secret".to_vec()));
        let id = Uuid::new_v4();
        engine
            .handle_envelope(PeerId::new("alice"), "Alice", inbound_offer(id, 100))
            .await;

        engine.cancel(id).await;
        assert_eq!(
            engine.transfer(id).expect("snapshot").status,
            TransferStatus::Cancelled
        );
        assert_eq!(channel.sent_types(), vec!["Cancel"]);

        // second cancel: no status change, no second signal
        engine.cancel(id).await;
        assert_eq!(channel.sent_types(), vec!["Cancel"]);

        // unknown id: no-op
        engine.cancel(Uuid::new_v4()).await;
    }

    #[tokio::test]
    async fn test_remote_cancel_does_not_echo() {
        let (engine, channel) = test_engine(Some(b"secret".to_vec()));
        let id = Uuid::new_v4();
        engine
            .handle_envelope(PeerId::new("alice"), "Alice", inbound_offer(id, 100))
            .await;

        engine
            .handle_envelope(
                PeerId::new("alice"),
                "Alice",
                Envelope::Cancel {
                    target: PeerId::new("me"),
                    transfer_id: id,
                },
            )
            .await;
        assert_eq!(
            engine.transfer(id).expect("snapshot").status,
            TransferStatus::Cancelled
        );
        assert!(channel.sent_types().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_everything_active() {
        let (engine, _channel) = test_engine(Some(b"secret".to_vec()));
        let offer_id = Uuid::new_v4();
        engine
            .handle_envelope(PeerId::new("alice"), "Alice", inbound_offer(offer_id, 100))
            .await;
        let send_id = engine
            .send_source(
                PeerId::new("bob"),
                "Bob",
                "notes.txt",
                5,
                Box::new(MemorySource::new(b"hello".to_vec())),
            )
            .await
            .expect("send_source");

        engine.shutdown().await;
        for id in [offer_id, send_id] {
            assert_eq!(
                engine.transfer(id).expect("snapshot").status,
                TransferStatus::Cancelled
            );
        }
    }

    #[tokio::test]
    async fn test_invalid_envelope_dropped_at_boundary() {
        let (engine, _channel) = test_engine(Some(b"secret".to_vec()));
        // path traversal in the offered filename
        engine
            .handle_envelope(
                PeerId::new("alice"),
                "Alice",
                Envelope::Offer {
                    target: PeerId::new("me"),
                    transfer_id: Uuid::new_v4(),
                    filename: "../../etc/passwd".to_string(),
                    size: 100,
                },
            )
            .await;
        assert!(engine.transfers().is_empty());
    }
}
