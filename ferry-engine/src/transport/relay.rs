//! Streaming loops for the relay fallback path
//!
//! When no direct transport could be established, sealed chunks travel as
//! individual signaling messages through the relay server. The path is
//! message-oriented: each chunk is base64-encoded into its own envelope,
//! and an explicit `Done` envelope (not an in-band sentinel) terminates
//! the stream. There is no transport-level backpressure here; the sender
//! yields control every few chunks instead of watching a watermark.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::mpsc;
use uuid::Uuid;

use ferry_common::{Envelope, PeerId};

use crate::codec::ChunkCipher;
use crate::error::EngineError;
use crate::io::{FileSink, FileSource, read_full};
use crate::signaling::SignalingChannel;
use crate::transport::TransportError;

/// A relay-path message routed to one transfer's receive loop
///
/// Produced by the engine's envelope dispatch (already base64-decoded and
/// boundary-validated) and consumed by [`drain_relay`].
#[derive(Debug)]
pub(crate) enum RelayFrame {
    /// One sealed chunk with its explicit sequence index
    Chunk { index: u64, data: Vec<u8> },
    /// All chunks sent
    Done,
}

/// Read, seal and send every chunk as a relay envelope, then `Done`
///
/// Returns the total plaintext bytes sent. Yields to the runtime after
/// every `yield_every` chunks so a long transfer cannot starve other work
/// sharing the signaling connection.
pub(crate) async fn pump_relay(
    signaling: &dyn SignalingChannel,
    cipher: &ChunkCipher,
    source: &mut dyn FileSource,
    chunk_size: usize,
    yield_every: u64,
    target: &PeerId,
    transfer_id: Uuid,
    mut on_progress: impl FnMut(u64) + Send,
) -> Result<u64, EngineError> {
    let mut buf = vec![0u8; chunk_size];
    let mut index = 0u64;
    let mut total = 0u64;

    loop {
        let n = read_full(source, &mut buf).await?;
        if n == 0 {
            break;
        }

        let sealed = cipher.seal(index, &buf[..n])?;
        signaling
            .send(Envelope::Chunk {
                target: target.clone(),
                transfer_id,
                index,
                data: BASE64.encode(sealed),
            })
            .await?;

        index += 1;
        total += n as u64;
        on_progress(total);

        if yield_every > 0 && index % yield_every == 0 {
            tokio::task::yield_now().await;
        }
    }

    signaling
        .send(Envelope::Done {
            target: target.clone(),
            transfer_id,
        })
        .await?;
    Ok(total)
}

/// Open and write relay chunks until the `Done` message
///
/// `first` is the frame that triggered relay selection on the receiving
/// side, if one arrived before the negotiation race concluded. Chunks
/// carry explicit indices; the signaling channel is assumed ordered, so an
/// index that does not match the expected one means that assumption broke
/// and the transfer fails rather than corrupting the sink.
pub(crate) async fn drain_relay(
    frames: &mut mpsc::UnboundedReceiver<RelayFrame>,
    first: Option<RelayFrame>,
    cipher: &ChunkCipher,
    sink: &mut dyn FileSink,
    mut on_progress: impl FnMut(u64) + Send,
) -> Result<u64, EngineError> {
    let mut expected = 0u64;
    let mut total = 0u64;
    let mut pending = first;

    loop {
        let frame = match pending.take() {
            Some(frame) => frame,
            None => match frames.recv().await {
                Some(frame) => frame,
                None => return Err(EngineError::Transport(TransportError::Closed)),
            },
        };

        match frame {
            RelayFrame::Chunk { index, data } => {
                if index != expected {
                    return Err(EngineError::Transport(TransportError::OutOfOrder {
                        expected,
                        actual: index,
                    }));
                }
                let plaintext = cipher.open(index, &data)?;
                sink.write_all(&plaintext).await?;
                expected += 1;
                total += plaintext.len() as u64;
                on_progress(total);
            }
            RelayFrame::Done => {
                sink.close().await?;
                return Ok(total);
            }
        }
    }
}
