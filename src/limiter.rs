// SPDX-License-Identifier: Apache-2.0

//! Rate limiting write filter.
//!
//! [`Limiter`] wraps a byte sink and only forwards a write when the token
//! bucket holds enough tokens to cover all of it. A write that cannot be
//! covered right now is rejected with [`Error::Throttled`]; it is never
//! queued, split or retried here.

use crate::config::{Config, Limit, REFILL_INTERVAL};
use crate::refill::RefillTask;
use crate::tokenbucket::TokenBucket;
use crate::Error;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tracing::{debug, trace};

/// Snapshot of a limiter's write counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Writes that passed the gate and were handed to the sink.
    pub writes_forwarded: u64,
    /// Writes rejected for lack of tokens.
    pub writes_throttled: u64,
    /// Bytes the sink reported as written.
    pub bytes_forwarded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    writes_forwarded: AtomicU64,
    writes_throttled: AtomicU64,
    bytes_forwarded: AtomicU64,
}

/// A write filter limiting the throughput into `W` to a fixed number of
/// bytes per second.
///
/// The bucket is full on construction, so up to one second's worth of bytes
/// may pass immediately. A background task tops it up to capacity once per
/// second for as long as the limiter lives; dropping the limiter stops it.
///
/// `Limiter<W>` implements [`io::Write`] when `W` does. When `&W` implements
/// [`io::Write`] (files, sockets, stdout), `&Limiter<W>` does as well and the
/// limiter can be shared between concurrent writers. With a tokio
/// [`AsyncWrite`] sink the limiter is itself an [`AsyncWrite`].
///
/// Throttled writes surface as [`io::ErrorKind::WouldBlock`] errors
/// carrying [`Error::Throttled`]; see [`Error::is_throttled`]. Sink errors
/// are returned unchanged.
#[derive(Debug)]
pub struct Limiter<W> {
    sink: W,
    bucket: Arc<TokenBucket>,
    counters: Counters,
    refill: RefillTask,
}

impl<W> Limiter<W> {
    /// Wraps `sink`, refilling from a dedicated background thread.
    ///
    /// # Errors
    ///
    /// Returns `Error::RefillSpawn` if the refill thread cannot be started.
    pub fn new(sink: W, limit: Limit) -> Result<Self, Error> {
        let bucket = Arc::new(TokenBucket::new(limit));
        let refill = RefillTask::spawn_thread(bucket.clone(), REFILL_INTERVAL)?;
        Ok(Self::assemble(sink, bucket, refill))
    }

    /// Wraps `sink`, refilling from a task spawned on `runtime`.
    pub fn with_runtime(sink: W, limit: Limit, runtime: &tokio::runtime::Handle) -> Self {
        let bucket = Arc::new(TokenBucket::new(limit));
        let refill = RefillTask::spawn_tokio(bucket.clone(), REFILL_INTERVAL, runtime);
        Self::assemble(sink, bucket, refill)
    }

    /// Wraps `sink` using the rate from `config`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidLimit` if the configured rate is zero, or
    /// `Error::RefillSpawn` if the refill thread cannot be started.
    pub fn from_config(sink: W, config: &Config) -> Result<Self, Error> {
        Self::new(sink, config.limit()?)
    }

    fn assemble(sink: W, bucket: Arc<TokenBucket>, refill: RefillTask) -> Self {
        debug!(bytes_per_second = bucket.capacity(), "rate limiter created");
        Limiter {
            sink,
            bucket,
            counters: Counters::default(),
            refill,
        }
    }

    /// Maximum burst in bytes, equal to the configured rate.
    pub fn capacity(&self) -> u64 {
        self.bucket.capacity()
    }

    /// Bytes that may be written right now.
    pub fn available(&self) -> u64 {
        self.bucket.available()
    }

    /// Returns a snapshot of the write counters.
    pub fn stats(&self) -> Stats {
        Stats {
            writes_forwarded: self.counters.writes_forwarded.load(Ordering::Relaxed),
            writes_throttled: self.counters.writes_throttled.load(Ordering::Relaxed),
            bytes_forwarded: self.counters.bytes_forwarded.load(Ordering::Relaxed),
        }
    }

    /// Gets a reference to the wrapped sink.
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Gets a mutable reference to the wrapped sink.
    ///
    /// Writes made directly to the sink bypass the limit.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    /// Stops the refill task and returns the wrapped sink.
    pub fn into_inner(self) -> W {
        let Limiter { sink, refill, .. } = self;
        refill.stop();
        sink
    }

    /// Reserves tokens for a write of `len` bytes.
    fn admit(&self, len: usize) -> Result<(), Error> {
        let requested = len as u64;
        self.bucket.try_acquire(requested).inspect_err(|_| {
            let _ = self.counters.writes_throttled.fetch_add(1, Ordering::Relaxed);
            trace!(requested, "write throttled");
        })
    }

    fn record(&self, result: &io::Result<usize>) {
        let _ = self.counters.writes_forwarded.fetch_add(1, Ordering::Relaxed);
        if let Ok(written) = result {
            let _ = self
                .counters
                .bytes_forwarded
                .fetch_add(*written as u64, Ordering::Relaxed);
        }
    }

    /// Returns true while the background refill is alive.
    pub fn is_refilling(&self) -> bool {
        self.refill.is_running()
    }
}

impl<W: io::Write> io::Write for Limiter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.admit(buf.len())?;
        let result = io::Write::write(&mut self.sink, buf);
        self.record(&result);
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.sink)
    }
}

impl<'a, W> io::Write for &'a Limiter<W>
where
    &'a W: io::Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let limiter: &'a Limiter<W> = *self;
        limiter.admit(buf.len())?;
        let mut sink = &limiter.sink;
        let result = io::Write::write(&mut sink, buf);
        limiter.record(&result);
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        let limiter: &'a Limiter<W> = *self;
        let mut sink = &limiter.sink;
        io::Write::flush(&mut sink)
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for Limiter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(err) = this.admit(buf.len()) {
            return Poll::Ready(Err(err.into()));
        }

        match Pin::new(&mut this.sink).poll_write(cx, buf) {
            Poll::Pending => {
                // Nothing reached the sink; the caller will poll again.
                let _ = this.bucket.refund(buf.len() as u64);
                Poll::Pending
            }
            Poll::Ready(result) => {
                this.record(&result);
                Poll::Ready(result)
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().sink).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().sink).poll_shutdown(cx)
    }
}
