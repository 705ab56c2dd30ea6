//! I/O wrapper that reports when a request has been written and when the
//! first byte of its response arrives.
//!
//! hyper gives no callback for either moment, so the wrapper watches the
//! socket instead: the first successful flush after request bytes were
//! written marks the request as written, and the first read that yields data
//! after that marks the first response byte.

use crate::trace::Trace;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

#[derive(Debug, Default)]
struct Exchange {
    trace: Option<Trace>,
    wrote_bytes: bool,
    request_written: bool,
    response_started: bool,
}

/// Shared between a connection and its [`TracedIo`] so that each request
/// sent over a kept-alive connection reports to its own trace.
#[derive(Debug, Clone, Default)]
pub struct ExchangeHandle(Arc<Mutex<Exchange>>);

impl ExchangeHandle {
    /// Starts observing a new request/response exchange.
    pub fn begin(&self, trace: Option<Trace>) {
        *self.lock() = Exchange {
            trace,
            ..Exchange::default()
        };
    }

    fn lock(&self) -> MutexGuard<'_, Exchange> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_write(&self) {
        let mut exchange = self.lock();
        if !exchange.request_written {
            exchange.wrote_bytes = true;
        }
    }

    fn on_flush(&self) {
        let trace = {
            let mut exchange = self.lock();
            if !exchange.wrote_bytes || exchange.request_written {
                return;
            }
            exchange.request_written = true;
            exchange.trace.clone()
        };
        if let Some(trace) = trace {
            trace.wrote_request();
        }
    }

    fn on_read(&self) {
        let trace = {
            let mut exchange = self.lock();
            if !exchange.request_written || exchange.response_started {
                return;
            }
            exchange.response_started = true;
            exchange.trace.clone()
        };
        if let Some(trace) = trace {
            trace.got_first_response_byte();
        }
    }
}

pub struct TracedIo<T> {
    inner: T,
    exchange: ExchangeHandle,
}

impl<T> TracedIo<T> {
    pub fn new(inner: T, exchange: ExchangeHandle) -> Self {
        Self { inner, exchange }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for TracedIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let res = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = res {
            if buf.filled().len() > before {
                self.exchange.on_read();
            }
        }
        res
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TracedIo<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let res = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = res {
            if n > 0 {
                self.exchange.on_write();
            }
        }
        res
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let res = Pin::new(&mut self.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(n)) = res {
            if n > 0 {
                self.exchange.on_write();
            }
        }
        res
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let res = Pin::new(&mut self.inner).poll_flush(cx);
        if let Poll::Ready(Ok(())) = res {
            self.exchange.on_flush();
        }
        res
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
