//! File source and sink abstractions
//!
//! The sender reads the chosen file through a `FileSource`; the receiver
//! writes decrypted chunks through a `FileSink` over the user-chosen save
//! location. Filesystem-backed implementations are provided; hosts and
//! tests can inject their own (the integration tests use the in-memory
//! pair from [`memory`]).

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Sequential byte-stream source over a local file
#[async_trait]
pub trait FileSource: Send {
    /// Read up to `buf.len()` bytes; returns 0 at end of file
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the underlying handle
    async fn close(&mut self) -> io::Result<()>;
}

/// Sequential byte-stream sink over a save destination
#[async_trait]
pub trait FileSink: Send {
    /// Append `data` to the sink
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush and release the underlying handle, marking the sink complete
    async fn close(&mut self) -> io::Result<()>;
}

/// Fill `buf` from a source, stopping only at end of file
///
/// A single `read` may return fewer bytes than a full chunk; the sender
/// wants maximally sized chunks, so keep reading until the buffer is full
/// or the file ends. Returns the number of bytes placed in `buf`.
pub(crate) async fn read_full(source: &mut dyn FileSource, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// =============================================================================
// Filesystem implementations
// =============================================================================

/// `FileSource` over a local file via tokio
pub struct FsSource {
    file: File,
}

impl FsSource {
    /// Open an existing file for reading
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self { file })
    }
}

#[async_trait]
impl FileSource for FsSource {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf).await
    }

    async fn close(&mut self) -> io::Result<()> {
        // dropping the handle closes it; nothing buffered on the read side
        Ok(())
    }
}

/// `FileSink` over a local file via tokio
pub struct FsSink {
    file: File,
}

impl FsSink {
    /// Create (or truncate) the destination file
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path).await?;
        Ok(Self { file })
    }
}

#[async_trait]
impl FileSink for FsSink {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.file.flush().await
    }
}

// =============================================================================
// In-memory implementations
// =============================================================================

pub mod memory {
    //! In-memory source/sink for tests and hosts without a filesystem

    use std::io;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::{FileSink, FileSource};

    /// Source over an in-memory byte buffer
    pub struct MemorySource {
        data: Vec<u8>,
        pos: usize,
        /// When set, reads block after this offset until released
        gate: Option<(usize, Arc<Notify>)>,
    }

    impl MemorySource {
        /// Create a source over the given bytes
        pub fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                pos: 0,
                gate: None,
            }
        }

        /// Create a source that blocks once `limit` bytes have been read,
        /// until the returned notify is signalled
        ///
        /// Used by tests that need to freeze a sender mid-transfer.
        pub fn gated(data: Vec<u8>, limit: usize) -> (Self, Arc<Notify>) {
            let notify = Arc::new(Notify::new());
            let source = Self {
                data,
                pos: 0,
                gate: Some((limit, Arc::clone(&notify))),
            };
            (source, notify)
        }
    }

    #[async_trait]
    impl FileSource for MemorySource {
        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some((limit, notify)) = &self.gate {
                if self.pos >= *limit {
                    notify.notified().await;
                }
            }
            let remaining = &self.data[self.pos..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.pos += n;
            Ok(n)
        }

        async fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Shared view of a [`MemorySink`]'s contents
    #[derive(Clone, Default)]
    pub struct SinkHandle {
        inner: Arc<Mutex<SinkState>>,
    }

    #[derive(Default)]
    struct SinkState {
        data: Vec<u8>,
        closed: bool,
    }

    impl SinkHandle {
        /// Bytes written so far
        pub fn contents(&self) -> Vec<u8> {
            self.inner.lock().expect("sink state poisoned").data.clone()
        }

        /// Number of bytes written so far
        pub fn len(&self) -> usize {
            self.inner.lock().expect("sink state poisoned").data.len()
        }

        /// Whether the sink is empty
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Whether the sink was closed cleanly (transfer completed)
        pub fn is_closed(&self) -> bool {
            self.inner.lock().expect("sink state poisoned").closed
        }
    }

    /// Sink into an in-memory byte buffer, inspectable via [`SinkHandle`]
    pub struct MemorySink {
        handle: SinkHandle,
    }

    impl MemorySink {
        /// Create a sink and the handle observing it
        pub fn new() -> (Self, SinkHandle) {
            let handle = SinkHandle::default();
            (
                Self {
                    handle: handle.clone(),
                },
                handle,
            )
        }
    }

    #[async_trait]
    impl FileSink for MemorySink {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let mut state = self.handle.inner.lock().expect("sink state poisoned");
            if state.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
            }
            state.data.extend_from_slice(data);
            Ok(())
        }

        async fn close(&mut self) -> io::Result<()> {
            self.handle.inner.lock().expect("sink state poisoned").closed = true;
            Ok(())
        }
    }
}
