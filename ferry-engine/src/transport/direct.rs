//! Streaming loops for the direct peer-to-peer path
//!
//! The sender reads the file in fixed-size chunks, seals each one, and
//! pushes it as a frame, pausing above the high watermark so the outbound
//! queue never grows without bound. The receiver decodes frames strictly
//! in arrival order, opens each chunk under its expected index, and writes
//! plaintext to the sink. The terminal sentinel frame, not stream closure,
//! marks completion; a close without it fails the transfer.

use tokio::sync::mpsc;

use crate::codec::ChunkCipher;
use crate::error::EngineError;
use crate::io::{FileSink, FileSource, read_full};
use crate::transport::frame::{self, Frame, FrameDecoder};
use crate::transport::{DirectTransport, TransportError, TransportEvent};

/// Read, seal and push every chunk of `source`, then the sentinel
///
/// Returns the total plaintext bytes sent. `on_progress` is invoked with
/// the running total after every pushed chunk.
pub(crate) async fn pump_direct(
    transport: &dyn DirectTransport,
    cipher: &ChunkCipher,
    source: &mut dyn FileSource,
    chunk_size: usize,
    high_watermark: u64,
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

        // suspend above the high watermark until the queue drains below
        // the transport's low watermark
        while transport.buffered_bytes() > high_watermark {
            transport.buffer_low().await;
        }

        let sealed = cipher.seal(index, &buf[..n])?;
        transport.send(frame::encode_chunk(&sealed)).await?;

        index += 1;
        total += n as u64;
        on_progress(total);
    }

    // completion is only claimed after the sentinel reaches the wire
    transport.send(frame::encode_done()).await?;
    transport.flush().await?;
    Ok(total)
}

/// Decode, open and write inbound frames until the sentinel
///
/// Returns the total plaintext bytes written. The transport closing before
/// the sentinel is a transport error; so is anything the frame decoder
/// rejects.
pub(crate) async fn drain_direct(
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    cipher: &ChunkCipher,
    sink: &mut dyn FileSink,
    mut on_progress: impl FnMut(u64) + Send,
) -> Result<u64, EngineError> {
    let mut decoder = FrameDecoder::new();
    let mut index = 0u64;
    let mut total = 0u64;

    loop {
        match events.recv().await {
            Some(TransportEvent::Data(bytes)) => {
                decoder.push(&bytes);
                while let Some(frame) = decoder.next_frame().map_err(TransportError::from)? {
                    match frame {
                        Frame::Chunk(ciphertext) => {
                            let plaintext = cipher.open(index, &ciphertext)?;
                            sink.write_all(&plaintext).await?;
                            index += 1;
                            total += plaintext.len() as u64;
                            on_progress(total);
                        }
                        Frame::Done => {
                            sink.close().await?;
                            return Ok(total);
                        }
                    }
                }
            }
            Some(TransportEvent::Closed) | None => {
                return Err(EngineError::Transport(TransportError::Closed));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CryptoError;
    use crate::io::memory::{MemorySink, MemorySource};
    use crate::keys::{SharedSecret, derive_transfer_key};
    use crate::transport::mock::MockDirectTransport;
    use uuid::Uuid;

    fn test_cipher() -> ChunkCipher {
        let key = derive_transfer_key(
            &SharedSecret::new(*b"test pre-shared secret"),
            &Uuid::nil(),
        );
        ChunkCipher::new(&key)
    }

    #[tokio::test]
    async fn test_pump_and_drain_roundtrip() {
        let (sender_end, receiver_end) = MockDirectTransport::pair();
        let cipher = test_cipher();
        let payload: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();

        let mut source = MemorySource::new(payload.clone());
        let sent = pump_direct(&sender_end, &cipher, &mut source, 64 * 1024, 1024 * 1024, |_| {})
            .await
            .expect("pump");
        assert_eq!(sent, payload.len() as u64);

        let (mut sink, handle) = MemorySink::new();
        let mut events = receiver_end.take_events().expect("events");
        let cipher = test_cipher();
        let received = drain_direct(&mut events, &cipher, &mut sink, |_| {})
            .await
            .expect("drain");

        assert_eq!(received, payload.len() as u64);
        assert_eq!(handle.contents(), payload);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_pump_empty_file_sends_only_sentinel() {
        let (sender_end, receiver_end) = MockDirectTransport::pair();
        let cipher = test_cipher();

        let mut source = MemorySource::new(Vec::new());
        let sent = pump_direct(&sender_end, &cipher, &mut source, 64 * 1024, 1024 * 1024, |_| {})
            .await
            .expect("pump");
        assert_eq!(sent, 0);

        let (mut sink, handle) = MemorySink::new();
        let mut events = receiver_end.take_events().expect("events");
        let received = drain_direct(&mut events, &cipher, &mut sink, |_| {})
            .await
            .expect("drain");
        assert_eq!(received, 0);
        assert!(handle.is_closed());
        assert!(handle.is_empty());
    }

    #[tokio::test]
    async fn test_sender_respects_high_watermark() {
        let high_watermark: u64 = 4096;
        let low_mark: u64 = 1024;
        let chunk_size: usize = 1024;

        let (sender_end, _receiver_end) = MockDirectTransport::pair_with_backpressure(low_mark);
        let cipher = test_cipher();
        let payload = vec![0x5A; 32 * 1024];

        let pump_end = sender_end.clone();
        let pump = tokio::spawn(async move {
            let mut source = MemorySource::new(payload);
            pump_direct(&pump_end, &cipher, &mut source, chunk_size, high_watermark, |_| {}).await
        });

        // poll the queue while draining it; the sender checks the level
        // before each push, so it can sit at most one frame above the mark
        let frame_overhead = (chunk_size + 16 + 5) as u64;
        let mut max_observed = 0u64;
        while !pump.is_finished() {
            max_observed = max_observed.max(sender_end.buffered_bytes());
            sender_end.drain();
            tokio::task::yield_now().await;
        }

        pump.await.expect("join").expect("pump");
        assert!(
            max_observed <= high_watermark + frame_overhead,
            "queue grew to {max_observed}"
        );
    }

    #[tokio::test]
    async fn test_drain_fails_on_close_without_sentinel() {
        let (sender_end, receiver_end) = MockDirectTransport::pair();
        let cipher = test_cipher();

        let sealed = cipher.seal(0, b"only chunk").expect("seal");
        sender_end
            .send(frame::encode_chunk(&sealed))
            .await
            .expect("send");
        sender_end.close().await;

        let (mut sink, handle) = MemorySink::new();
        let mut events = receiver_end.take_events().expect("events");
        let err = drain_direct(&mut events, &cipher, &mut sink, |_| {})
            .await
            .expect_err("must fail");
        assert!(matches!(
            err,
            EngineError::Transport(TransportError::Closed)
        ));
        // the chunk that did arrive was written, but the sink is not complete
        assert_eq!(handle.contents(), b"only chunk");
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_drain_fails_on_tampered_chunk() {
        let (sender_end, receiver_end) = MockDirectTransport::pair();
        let cipher = test_cipher();

        let mut sealed = cipher.seal(0, b"chunk").expect("seal");
        sealed[0] ^= 0xFF;
        sender_end
            .send(frame::encode_chunk(&sealed))
            .await
            .expect("send");

        let (mut sink, handle) = MemorySink::new();
        let mut events = receiver_end.take_events().expect("events");
        let err = drain_direct(&mut events, &cipher, &mut sink, |_| {})
            .await
            .expect_err("must fail");
        assert!(matches!(
            err,
            EngineError::Crypto(CryptoError::AuthenticationFailed)
        ));
        // nothing of the corrupted chunk reaches the sink
        assert!(handle.is_empty());
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_progress_reports_running_total() {
        let (sender_end, _receiver_end) = MockDirectTransport::pair();
        let cipher = test_cipher();

        let mut totals = Vec::new();
        let mut source = MemorySource::new(vec![1u8; 2500]);
        pump_direct(&sender_end, &cipher, &mut source, 1000, 1024 * 1024, |t| {
            totals.push(t)
        })
        .await
        .expect("pump");
        assert_eq!(totals, vec![1000, 2000, 2500]);
    }
}
