//! Transport negotiation
//!
//! After an offer is accepted, both sides try to establish the direct
//! transport through an external connectivity layer while a single bounded
//! timer runs. Three outcomes race: the transport reports ready, the
//! connectivity layer reports a hard failure, or the timer fires. Failure
//! and timeout both resolve to the relay fallback; neither is a transfer
//! failure. Once made, the selection is final for the transfer's lifetime.
//!
//! The connectivity primitive itself (handshake exchange, trickled
//! candidates, NAT traversal) is not implemented here. It is consumed
//! through [`PeerConnector`], with its opaque payloads carried over the
//! signaling channel as `Envelope::Signal` messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use ferry_common::{PeerId, SignalPayload};

use crate::transport::DirectTransport;
use crate::transport::relay::RelayFrame;

/// Which side of the connectivity handshake this peer drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorRole {
    /// The sending side, which initiates the handshake
    Initiator,
    /// The receiving side, which answers it
    Responder,
}

/// External connectivity-establishment primitive
///
/// Injected by the host. `open` starts an establishment attempt for one
/// transfer: remote handshake/candidate payloads are delivered on
/// `signals_in`, and payloads pushed to `signals_out` are wrapped in
/// `Envelope::Signal` and sent to the peer by the engine.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn open(
        &self,
        transfer_id: Uuid,
        peer: PeerId,
        role: ConnectorRole,
        signals_in: mpsc::UnboundedReceiver<SignalPayload>,
        signals_out: mpsc::UnboundedSender<SignalPayload>,
    ) -> Box<dyn PendingDirect>;
}

/// An in-progress direct-transport establishment attempt
#[async_trait]
pub trait PendingDirect: Send {
    /// Resolves when the transport is ready, or with the connectivity
    /// layer's terminal failure
    async fn ready(&mut self) -> Result<Arc<dyn DirectTransport>, DirectError>;

    /// Release any half-established resources
    async fn abort(self: Box<Self>);
}

/// Terminal failure reported by the connectivity layer
///
/// Not a transfer failure: it resolves the negotiation to the relay path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectError {
    /// The peer could not be reached directly
    Unreachable,
    /// Establishment failed for another reason
    Failed(String),
}

impl std::fmt::Display for DirectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectError::Unreachable => write!(f, "peer unreachable"),
            DirectError::Failed(msg) => write!(f, "direct transport failed: {msg}"),
        }
    }
}

impl std::error::Error for DirectError {}

/// Outcome of the sender-side negotiation race
pub(crate) enum Selection {
    Direct(Arc<dyn DirectTransport>),
    Relay,
}

/// Outcome of the receiver-side negotiation race
///
/// Relay selection may carry the relay frame that decided the race, so it
/// is not lost to the receive loop.
pub(crate) enum ReceiverSelection {
    Direct(Arc<dyn DirectTransport>),
    Relay(Option<RelayFrame>),
}

/// Race direct readiness against the bounded negotiation timer
pub(crate) async fn select_transport(
    transfer_id: Uuid,
    mut pending: Box<dyn PendingDirect>,
    negotiation_timeout: Duration,
) -> Selection {
    let outcome = timeout(negotiation_timeout, pending.ready()).await;
    match outcome {
        Ok(Ok(transport)) => {
            debug!(%transfer_id, "direct transport ready, selected direct path");
            Selection::Direct(transport)
        }
        Ok(Err(err)) => {
            debug!(%transfer_id, %err, "direct transport failed, selected relay path");
            pending.abort().await;
            Selection::Relay
        }
        Err(_) => {
            debug!(%transfer_id, "negotiation timed out, selected relay path");
            pending.abort().await;
            Selection::Relay
        }
    }
}

/// What ended the receiver-side race, before the timer is applied
enum ReceiverRace {
    Ready(Arc<dyn DirectTransport>),
    Failed(DirectError),
    RelayTraffic(Option<RelayFrame>),
}

/// Receiver-side race: also resolved by the first relay chunk arriving,
/// which means the sender already chose the relay path
pub(crate) async fn select_receiver_transport(
    transfer_id: Uuid,
    mut pending: Box<dyn PendingDirect>,
    negotiation_timeout: Duration,
    relay_frames: &mut mpsc::UnboundedReceiver<RelayFrame>,
) -> ReceiverSelection {
    let race = async {
        tokio::select! {
            result = pending.ready() => match result {
                Ok(transport) => ReceiverRace::Ready(transport),
                Err(err) => ReceiverRace::Failed(err),
            },
            frame = relay_frames.recv() => ReceiverRace::RelayTraffic(frame),
        }
    };
    let outcome = timeout(negotiation_timeout, race).await;
    match outcome {
        Ok(ReceiverRace::Ready(transport)) => {
            debug!(%transfer_id, "direct transport ready, selected direct path");
            ReceiverSelection::Direct(transport)
        }
        Ok(ReceiverRace::Failed(err)) => {
            debug!(%transfer_id, %err, "direct transport failed, selected relay path");
            pending.abort().await;
            ReceiverSelection::Relay(None)
        }
        Ok(ReceiverRace::RelayTraffic(frame)) => {
            debug!(%transfer_id, "relay traffic arrived first, selected relay path");
            pending.abort().await;
            ReceiverSelection::Relay(frame)
        }
        Err(_) => {
            debug!(%transfer_id, "negotiation timed out, selected relay path");
            pending.abort().await;
            ReceiverSelection::Relay(None)
        }
    }
}
