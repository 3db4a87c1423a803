//! Framing for the direct byte-stream path
//!
//! The direct transport carries an ordered byte stream; frames delimit the
//! sealed chunks and the terminal sentinel within it. Wire format:
//!
//! ```text
//! [payload length: u32 BE][kind: u8][payload]
//! ```
//!
//! Kind 0 is a sealed chunk (payload = ciphertext, index implicit from
//! arrival order); kind 1 is the terminal sentinel with an empty payload.

use ferry_common::{CHUNK_TAG_LEN, DIRECT_CHUNK_SIZE};

/// Frame kind byte for a sealed chunk
const KIND_CHUNK: u8 = 0;

/// Frame kind byte for the terminal sentinel
const KIND_DONE: u8 = 1;

/// Frame header size: 4-byte length + 1-byte kind
const HEADER_LEN: usize = 5;

/// Largest payload a frame may carry (one maximal sealed chunk)
const MAX_PAYLOAD_LEN: usize = DIRECT_CHUNK_SIZE + CHUNK_TAG_LEN;

/// A decoded frame from the direct byte stream
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// One sealed chunk of ciphertext
    Chunk(Vec<u8>),
    /// No more chunks follow
    Done,
}

/// Encode a sealed chunk into a frame
pub fn encode_chunk(ciphertext: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    frame.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
    frame.push(KIND_CHUNK);
    frame.extend_from_slice(ciphertext);
    frame
}

/// Encode the terminal sentinel frame
pub fn encode_done() -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN);
    frame.extend_from_slice(&0u32.to_be_bytes());
    frame.push(KIND_DONE);
    frame
}

/// Incremental decoder over the inbound byte stream
///
/// The transport delivers arbitrary stream slices; the decoder buffers
/// them and yields complete frames in order.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed inbound bytes into the decoder
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len =
            u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(FrameError::TooLarge(len));
        }

        let kind = self.buf[4];
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let payload: Vec<u8> = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..HEADER_LEN + len);

        match kind {
            KIND_CHUNK => Ok(Some(Frame::Chunk(payload))),
            KIND_DONE => Ok(Some(Frame::Done)),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

/// Errors decoding the direct byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Declared payload length exceeds the maximum sealed chunk size
    TooLarge(usize),
    /// Unrecognized frame kind byte
    UnknownKind(u8),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooLarge(len) => write!(f, "frame payload of {len} bytes too large"),
            FrameError::UnknownKind(kind) => write!(f, "unknown frame kind {kind}"),
        }
    }
}

impl std::error::Error for FrameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_roundtrip() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode_chunk(b"sealed bytes"));

        let frame = decoder.next_frame().expect("decode").expect("frame");
        assert_eq!(frame, Frame::Chunk(b"sealed bytes".to_vec()));
        assert!(decoder.next_frame().expect("decode").is_none());
    }

    #[test]
    fn test_done_roundtrip() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode_done());
        assert_eq!(decoder.next_frame().expect("decode"), Some(Frame::Done));
    }

    #[test]
    fn test_partial_delivery() {
        let encoded = encode_chunk(&vec![0xCD; 1000]);
        let mut decoder = FrameDecoder::new();

        // drip the frame in three slices; nothing yields until complete
        decoder.push(&encoded[..3]);
        assert!(decoder.next_frame().expect("decode").is_none());
        decoder.push(&encoded[3..600]);
        assert!(decoder.next_frame().expect("decode").is_none());
        decoder.push(&encoded[600..]);
        assert_eq!(
            decoder.next_frame().expect("decode"),
            Some(Frame::Chunk(vec![0xCD; 1000]))
        );
    }

    #[test]
    fn test_coalesced_delivery() {
        // two chunks and the sentinel in a single slice
        let mut bytes = encode_chunk(b"first");
        bytes.extend_from_slice(&encode_chunk(b"second"));
        bytes.extend_from_slice(&encode_done());

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(
            decoder.next_frame().expect("decode"),
            Some(Frame::Chunk(b"first".to_vec()))
        );
        assert_eq!(
            decoder.next_frame().expect("decode"),
            Some(Frame::Chunk(b"second".to_vec()))
        );
        assert_eq!(decoder.next_frame().expect("decode"), Some(Frame::Done));
        assert!(decoder.next_frame().expect("decode").is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = ((MAX_PAYLOAD_LEN + 1) as u32).to_be_bytes().to_vec();
        bytes.push(0);
        decoder.push(&bytes);
        assert_eq!(
            decoder.next_frame(),
            Err(FrameError::TooLarge(MAX_PAYLOAD_LEN + 1))
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = 0u32.to_be_bytes().to_vec();
        bytes.push(9);
        decoder.push(&bytes);
        assert_eq!(decoder.next_frame(), Err(FrameError::UnknownKind(9)));
    }

    #[test]
    fn test_empty_chunk_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode_chunk(b""));
        assert_eq!(
            decoder.next_frame().expect("decode"),
            Some(Frame::Chunk(Vec::new()))
        );
    }
}
