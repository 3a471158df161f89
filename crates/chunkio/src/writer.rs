use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use sfs_protocol::Chunk;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::{JoinHandle, JoinSet};

use crate::WindowError;
use crate::source::WriteAt;

/// Result of a successful window write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every byte offered was committed.
    Complete(usize),
    /// The window filled up; only this many leading bytes were committed.
    Short(usize),
}

impl WriteOutcome {
    pub fn written(self) -> usize {
        match self {
            Self::Complete(n) | Self::Short(n) => n,
        }
    }

    pub fn is_short(self) -> bool {
        matches!(self, Self::Short(_))
    }
}

/// Sequential writer over the `[start, limit)` range of a positional sink.
///
/// Many writers may share one sink as long as their ranges do not overlap.
/// The [`AsyncWrite`] impl hands each write to the blocking pool and
/// reports its outcome on the next write, flush or shutdown.
pub struct WindowWriter<S: ?Sized> {
    sink: Arc<S>,
    start: u64,
    offset: u64,
    limit: u64,
    pending: Option<JoinHandle<(u64, io::Result<()>)>>,
}

impl<S: WriteAt + ?Sized> WindowWriter<S> {
    pub fn new(sink: Arc<S>, start: u64, limit: u64) -> Self {
        debug_assert!(start <= limit, "window start {start} past limit {limit}");
        Self {
            sink,
            start,
            offset: start,
            limit,
            pending: None,
        }
    }

    pub fn len(&self) -> u64 {
        self.limit - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes committed so far.
    pub fn written(&self) -> u64 {
        self.offset - self.start
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.offset
    }

    /// Commits as much of `buf` as fits in the window.
    ///
    /// Returns [`WriteOutcome::Short`] when `buf` is larger than the room
    /// left, and [`WindowError::EndOfWindow`] once the window is full. On an
    /// I/O error the bytes committed before it still count as written.
    pub fn write_window(&mut self, buf: &[u8]) -> Result<WriteOutcome, WindowError> {
        let (data, short) = self.clamp(buf)?;
        let (done, result) = commit(&*self.sink, data, self.offset);
        self.offset += done;
        result?;

        Ok(if short {
            WriteOutcome::Short(data.len())
        } else {
            WriteOutcome::Complete(data.len())
        })
    }

    fn clamp<'b>(&self, buf: &'b [u8]) -> Result<(&'b [u8], bool), WindowError> {
        let room = self.remaining();
        if room == 0 {
            return Err(WindowError::EndOfWindow);
        }
        Ok(if buf.len() as u64 > room {
            (&buf[..room as usize], true)
        } else {
            (buf, false)
        })
    }

    fn write_io(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_window(buf)
            .map(WriteOutcome::written)
            .map_err(window_to_io)
    }
}

impl<S: WriteAt + ?Sized + 'static> WindowWriter<S> {
    /// Waits for the write in flight, if any, and accounts for it.
    fn poll_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let Some(handle) = self.pending.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let joined = std::task::ready!(Pin::new(handle).poll(cx));
        self.pending = None;

        let (done, result) = joined.map_err(io::Error::other)?;
        self.offset += done;
        Poll::Ready(result)
    }
}

/// Writes all of `data` at `offset`, returning how much was committed
/// alongside the first error.
fn commit<S: WriteAt + ?Sized>(sink: &S, data: &[u8], offset: u64) -> (u64, io::Result<()>) {
    let mut done = 0;
    while done < data.len() {
        match sink.write_at(&data[done..], offset + done as u64) {
            Ok(0) => return (done as u64, Err(io::ErrorKind::WriteZero.into())),
            Ok(n) => done += n,
            Err(e) => return (done as u64, Err(e)),
        }
    }
    (done as u64, Ok(()))
}

fn window_to_io(err: WindowError) -> io::Error {
    match err {
        WindowError::EndOfWindow => io::Error::new(io::ErrorKind::WriteZero, "window is full"),
        WindowError::Io(e) => e,
        e => io::Error::other(e),
    }
}

impl<S: WriteAt + ?Sized> io::Write for WindowWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_io(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: WriteAt + ?Sized + 'static> AsyncWrite for WindowWriter<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        std::task::ready!(this.poll_pending(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let data = this.clamp(buf).map_err(window_to_io)?.0.to_vec();
        let accepted = data.len();
        let sink = Arc::clone(&this.sink);
        let offset = this.offset;
        this.pending = Some(tokio::task::spawn_blocking(move || {
            commit(&*sink, &data, offset)
        }));
        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_pending(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_pending(cx)
    }
}

/// Writes chunks into `sink` back to back, ordered by id, all concurrently.
///
/// Each chunk gets a window sized by its declared `size`, starting where the
/// previous id's window ends. A sink that cannot grow must already be large
/// enough for the sum of all sizes. Returns the total bytes written.
pub async fn write_chunks<S, B>(sink: Arc<S>, mut chunks: Vec<Chunk<B>>) -> Result<u64, WindowError>
where
    S: WriteAt + ?Sized + 'static,
    B: AsyncRead + Unpin + Send + 'static,
{
    chunks.sort_by_key(|c| c.id);

    let mut tasks = JoinSet::new();
    let mut offset = 0;
    for chunk in chunks {
        let mut window = WindowWriter::new(Arc::clone(&sink), offset, offset + chunk.size);
        offset += chunk.size;

        tasks.spawn(async move {
            let id = chunk.id;
            let mut body = chunk.body.take(chunk.size);
            let result = match tokio::io::copy(&mut body, &mut window).await {
                Ok(n) if n < chunk.size => Err(WindowError::ShortChunk {
                    id,
                    written: n,
                    expected: chunk.size,
                }),
                Ok(_) => Ok(()),
                Err(e) => Err(WindowError::Chunk {
                    id,
                    source: Box::new(e.into()),
                }),
            };
            (id, result)
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((id, Err(e))) => failures.push((id, e)),
            Err(e) => failures.push((u64::MAX, WindowError::Io(io::Error::other(e)))),
        }
    }

    failures.sort_by_key(|(id, _)| *id);
    let mut errors: Vec<WindowError> = failures.into_iter().map(|(_, e)| e).collect();
    match errors.len() {
        0 => Ok(offset),
        1 => Err(errors.remove(0)),
        _ => Err(WindowError::Aggregate(errors)),
    }
}
