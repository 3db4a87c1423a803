//! Ferry Transfer Engine
//!
//! Moves a user-selected file from one authenticated peer to another,
//! across an untrusted relay server. The engine negotiates how bytes move
//! (directly peer-to-peer, or through the relay as a fallback), seals
//! every chunk with authenticated encryption under a per-transfer key,
//! and tracks transfer lifecycle under partial failure.
//!
//! This is a library-level engine: no CLI, no UI. Hosts inject the
//! signaling channel, the connectivity primitive, and the shared-secret
//! provider, then observe [`Transfer`] snapshots.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ferry_common::PeerId;
//! use ferry_engine::{EngineConfig, TransferEngine};
//! # use ferry_engine::{PeerConnector, SecretProvider, SignalingChannel};
//! # async fn demo(
//! #     signaling: Arc<dyn SignalingChannel>,
//! #     connector: Arc<dyn PeerConnector>,
//! #     secrets: Arc<dyn SecretProvider>,
//! # ) -> Result<(), ferry_engine::EngineError> {
//! let engine = TransferEngine::new(EngineConfig::default(), signaling, connector, secrets);
//! let mut events = engine.subscribe();
//! let id = engine
//!     .send_file(PeerId::new("bob"), "Bob", "/home/alice/report.pdf")
//!     .await?;
//! while let Ok(snapshot) = events.recv().await {
//!     println!("{}: {}", snapshot.filename, snapshot.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod engine;
pub mod error;
pub mod io;
pub mod keys;
pub mod negotiation;
pub mod signaling;
pub mod transfer;
pub mod transport;

mod registry;

pub use codec::{ChunkCipher, CryptoError};
pub use engine::{EngineConfig, TransferEngine};
pub use error::EngineError;
pub use io::{FileSink, FileSource, FsSink, FsSource};
pub use keys::{SecretProvider, SharedSecret, TransferKey, derive_transfer_key};
pub use negotiation::{ConnectorRole, DirectError, PeerConnector, PendingDirect};
pub use signaling::{SignalingChannel, SignalingError};
pub use transfer::{Transfer, TransferDirection, TransferStatus};
pub use transport::{DirectTransport, TransportError, TransportEvent};
