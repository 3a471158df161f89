use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::JoinHandle;

use crate::WindowError;
use crate::source::ReadAt;

/// Sequential reader over the `[start, limit)` range of a random-access source.
///
/// Never reads past `limit`, even when the source holds more data. If the
/// source ends before `limit`, the reader reports EOF early and the caller
/// sees fewer bytes than [`len`](Self::len).
///
/// The blocking [`io::Read`] impl reads inline. The [`AsyncRead`] impl runs
/// each positional read on the blocking pool, staging up to 64 KiB at a
/// time, so slow disks never stall the runtime.
pub struct WindowReader<S: ?Sized> {
    source: Arc<S>,
    start: u64,
    offset: u64,
    limit: u64,
    staged: Vec<u8>,
    staged_pos: usize,
    pending: Option<JoinHandle<io::Result<Vec<u8>>>>,
}

/// Largest single read handed to the blocking pool.
const STAGE_SIZE: usize = 64 * 1024;

impl<S: ReadAt + ?Sized> WindowReader<S> {
    pub fn new(source: Arc<S>, start: u64, limit: u64) -> Self {
        debug_assert!(start <= limit, "window start {start} past limit {limit}");
        Self {
            source,
            start,
            offset: start,
            limit,
            staged: Vec::new(),
            staged_pos: 0,
            pending: None,
        }
    }

    /// First byte offset of the window in the source.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Window length in bytes.
    pub fn len(&self) -> u64 {
        self.limit - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes left before the window is exhausted.
    pub fn remaining(&self) -> u64 {
        self.limit - self.offset + self.staged_len() as u64
    }

    /// Reads up to `min(buf.len(), remaining)` bytes. Returns 0 at the end
    /// of the window.
    pub fn read_window(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.staged_len() > 0 {
            return Ok(self.take_staged(buf));
        }

        let room = self.limit - self.offset;
        if room == 0 {
            return Ok(0);
        }

        let want = (buf.len() as u64).min(room) as usize;
        let n = self.source.read_at(&mut buf[..want], self.offset)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn staged_len(&self) -> usize {
        self.staged.len() - self.staged_pos
    }

    fn take_staged(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.staged_len());
        dst[..n].copy_from_slice(&self.staged[self.staged_pos..self.staged_pos + n]);
        self.staged_pos += n;
        if self.staged_pos == self.staged.len() {
            self.staged.clear();
            self.staged_pos = 0;
        }
        n
    }
}

impl<S: ReadAt + ?Sized + 'static> WindowReader<S> {
    fn spawn_read(&mut self) -> JoinHandle<io::Result<Vec<u8>>> {
        let want = (self.limit - self.offset).min(STAGE_SIZE as u64) as usize;
        let source = Arc::clone(&self.source);
        let offset = self.offset;
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; want];
            let n = source.read_at(&mut buf, offset)?;
            buf.truncate(n);
            Ok(buf)
        })
    }
}

impl<S: ReadAt + ?Sized> io::Read for WindowReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_window(buf)
    }
}

impl<S: ReadAt + ?Sized + 'static> AsyncRead for WindowReader<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if this.staged_len() > 0 {
                let room = buf.remaining().min(this.staged_len());
                let n = this.take_staged(buf.initialize_unfilled_to(room));
                buf.advance(n);
                return Poll::Ready(Ok(()));
            }

            let mut handle = match this.pending.take() {
                Some(handle) => handle,
                None if this.offset == this.limit => return Poll::Ready(Ok(())),
                None => this.spawn_read(),
            };

            let joined = match Pin::new(&mut handle).poll(cx) {
                Poll::Ready(joined) => joined,
                Poll::Pending => {
                    this.pending = Some(handle);
                    return Poll::Pending;
                }
            };
            let data = joined.map_err(io::Error::other)??;
            if data.is_empty() {
                // Source ended before the window did.
                return Poll::Ready(Ok(()));
            }
            this.offset += data.len() as u64;
            this.staged = data;
            this.staged_pos = 0;
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for WindowReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowReader")
            .field("start", &self.start)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}

/// Splits `[0, total_size)` into contiguous windows of `chunk_size` bytes.
///
/// The last window holds the remainder. An empty source yields no windows.
pub fn split<S: ReadAt + ?Sized>(
    source: Arc<S>,
    total_size: u64,
    chunk_size: u64,
) -> Result<Vec<WindowReader<S>>, WindowError> {
    if chunk_size < 1 {
        return Err(WindowError::InvalidChunkSize(chunk_size));
    }

    let count = sfs_protocol::chunk_count(total_size, chunk_size);
    let mut windows = Vec::with_capacity(count as usize);
    let mut offset = 0;
    while offset < total_size {
        let limit = (offset + chunk_size).min(total_size);
        windows.push(WindowReader::new(Arc::clone(&source), offset, limit));
        offset = limit;
    }
    Ok(windows)
}

/// Splits a whole file, using its current length as the total size.
///
/// Returns the windows and the file size.
pub fn split_file(
    file: std::fs::File,
    chunk_size: u64,
) -> Result<(Vec<WindowReader<std::fs::File>>, u64), WindowError> {
    let size = file.metadata()?.len();
    let windows = split(Arc::new(file), size, chunk_size)?;
    Ok((windows, size))
}
