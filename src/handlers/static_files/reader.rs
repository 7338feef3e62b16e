use std::future::Future;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::{self, JoinHandle};
use tokio_util::io::ReaderStream;

use crate::common::BoxedBody;

use super::cache::EntryGuard;
use super::entry::EntrySource;

/// Upper bound on a single read dispatched to the blocking pool.
const STREAM_CHUNK_SIZE: u64 = 64 * 1024;

/// The contract both reader shapes satisfy: narrow the served window to
/// a byte range, then stream the window as bytes. Closing is the
/// reader's drop, which returns its claim on the cache entry even when
/// the response body is cancelled mid-stream.
#[async_trait]
pub(crate) trait EntryReader: AsyncRead + Send + Sync + Unpin {
    /// Restricts the reader to the inclusive `[start, end]` byte range.
    async fn update_byte_range(&mut self, start: u64, end: u64) -> io::Result<()>;
}

/// Builds the reader matching the entry's size class. On failure the
/// guard is dropped, returning the caller's reader claim.
pub(crate) async fn new_reader(guard: EntryGuard) -> io::Result<Box<dyn EntryReader>> {
    if guard.entry().is_big() {
        Ok(Box::new(BigFileReader::new(guard).await?))
    } else {
        Ok(Box::new(SmallFileReader::new(guard)))
    }
}

/// Wraps a reader into a response body stream of known length.
pub(crate) fn reader_body(reader: Box<dyn EntryReader>) -> BoxedBody {
    let stream = ReaderStream::new(reader).map(|chunk| chunk.map(Frame::data));
    BodyExt::boxed(StreamBody::new(stream))
}

enum ReadState {
    Idle,
    /// A positional read in flight on the blocking pool.
    Busy(JoinHandle<io::Result<Vec<u8>>>),
}

/// Serves small files by positional reads on the entry's shared handle,
/// and in-memory directory listings by slicing. No cursor is ever
/// mutated, so any number of small readers can share one handle.
pub(crate) struct SmallFileReader {
    guard: EntryGuard,
    pos: u64,
    /// Exclusive end of the served window.
    end: u64,
    state: ReadState,
    buffered: Bytes,
}

impl SmallFileReader {
    pub(crate) fn new(guard: EntryGuard) -> SmallFileReader {
        let end = guard.entry().content_length;
        SmallFileReader {
            guard,
            pos: 0,
            end,
            state: ReadState::Idle,
            buffered: Bytes::new(),
        }
    }
}

#[async_trait]
impl EntryReader for SmallFileReader {
    async fn update_byte_range(&mut self, start: u64, end: u64) -> io::Result<()> {
        self.pos = start;
        self.end = end + 1;
        Ok(())
    }
}

impl AsyncRead for SmallFileReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.buffered.is_empty() {
                let n = buf.remaining().min(this.buffered.len());
                let chunk = this.buffered.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            match &mut this.state {
                ReadState::Idle => {
                    if this.pos >= this.end {
                        return Poll::Ready(Ok(()));
                    }
                    let len = (this.end - this.pos).min(STREAM_CHUNK_SIZE) as usize;
                    match this.guard.entry().source {
                        EntrySource::DirIndex(ref body) => {
                            let start = this.pos as usize;
                            let chunk = body.slice(start..start + len);
                            this.buffered = chunk;
                            this.pos += len as u64;
                        }
                        EntrySource::File { ref file, .. } => {
                            let file = Arc::clone(file);
                            let pos = this.pos;
                            this.state = ReadState::Busy(task::spawn_blocking(move || {
                                let mut chunk = vec![0u8; len];
                                let n = file.read_at(&mut chunk, pos)?;
                                chunk.truncate(n);
                                Ok(chunk)
                            }));
                        }
                    }
                }
                ReadState::Busy(handle) => {
                    let read = ready!(Pin::new(handle).poll(cx)).map_err(io::Error::other);
                    this.state = ReadState::Idle;
                    let chunk = read??;
                    if chunk.is_empty() {
                        // the file shrank under us; the declared length
                        // can no longer be honored
                        return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
                    }
                    this.pos += chunk.len() as u64;
                    this.buffered = Bytes::from(chunk);
                }
            }
        }
    }
}

enum BigReadState {
    Idle,
    /// A sequential read in flight; the handle travels with the task and
    /// comes back when it completes.
    Busy(JoinHandle<(std::fs::File, io::Result<Vec<u8>>)>),
}

/// Serves big files through an independent OS handle, so range seeks
/// never race other readers of the same entry. Handles are vended from
/// the entry's pool when possible and returned to it rewound on drop.
pub(crate) struct BigFileReader {
    guard: EntryGuard,
    file: Option<std::fs::File>,
    remaining: u64,
    state: BigReadState,
    buffered: Bytes,
}

impl BigFileReader {
    pub(crate) async fn new(guard: EntryGuard) -> io::Result<BigFileReader> {
        let remaining = guard.entry().content_length;
        let file = match guard.entry().take_pooled_handle() {
            Some(file) => file,
            None => {
                let EntrySource::File { ref path, .. } = guard.entry().source else {
                    unreachable!("big readers are only built for file entries");
                };
                tokio::fs::File::open(path).await?.into_std().await
            }
        };
        Ok(BigFileReader {
            guard,
            file: Some(file),
            remaining,
            state: BigReadState::Idle,
            buffered: Bytes::new(),
        })
    }

    fn take_file(&mut self) -> io::Result<std::fs::File> {
        self.file
            .take()
            .ok_or_else(|| io::Error::other("big file handle lost after earlier failure"))
    }
}

#[async_trait]
impl EntryReader for BigFileReader {
    async fn update_byte_range(&mut self, start: u64, end: u64) -> io::Result<()> {
        let mut file = self.take_file()?;
        let (file, seeked) = task::spawn_blocking(move || {
            let res = file.seek(SeekFrom::Start(start));
            (file, res)
        })
        .await
        .map_err(io::Error::other)?;
        self.file = Some(file);
        seeked?;
        self.remaining = end - start + 1;
        self.buffered = Bytes::new();
        Ok(())
    }
}

impl AsyncRead for BigFileReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.buffered.is_empty() {
                let n = buf.remaining().min(this.buffered.len());
                let chunk = this.buffered.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            match &mut this.state {
                BigReadState::Idle => {
                    if this.remaining == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    let len = this.remaining.min(STREAM_CHUNK_SIZE) as usize;
                    let mut file = this.take_file()?;
                    this.state = BigReadState::Busy(task::spawn_blocking(move || {
                        let mut chunk = vec![0u8; len];
                        let res = file.read(&mut chunk).map(|n| {
                            chunk.truncate(n);
                            chunk
                        });
                        (file, res)
                    }));
                }
                BigReadState::Busy(handle) => {
                    let joined = ready!(Pin::new(handle).poll(cx)).map_err(io::Error::other);
                    this.state = BigReadState::Idle;
                    let (file, read) = joined?;
                    this.file = Some(file);
                    let chunk = read?;
                    if chunk.is_empty() {
                        return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
                    }
                    this.remaining -= chunk.len() as u64;
                    this.buffered = Bytes::from(chunk);
                }
            }
        }
    }
}

impl Drop for BigFileReader {
    fn drop(&mut self) {
        // Rewind and pool the handle for the next reader; a handle that
        // cannot rewind is closed instead. A handle still travelling
        // with an in-flight blocking read is closed by that task. The
        // guard then returns this reader's claim on the entry.
        if let Some(mut file) = self.file.take() {
            if file.seek(SeekFrom::Start(0)).is_ok() {
                self.guard.entry().pool_handle(file);
            }
        }
    }
}
