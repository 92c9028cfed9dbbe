// Transport wrapper that turns raw socket activity into the write/read side
// of the request lifecycle. hyper gives no callback for "request written" or
// "first response byte", so both are observed at the IO boundary.

use crate::timing::TraceHandle;
use std::io::IoSlice;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// The attempt currently served by a connection.
///
/// Keep-alive connections outlive attempts, so the slot is re-attached for
/// every request sent over the connection.
#[derive(Clone, Default, Debug)]
pub struct AttemptSlot {
    state: Arc<Mutex<AttemptState>>,
}

#[derive(Default, Debug)]
struct AttemptState {
    trace: Option<TraceHandle>,
    pending_write: bool,
    wrote_request: bool,
    first_byte: bool,
}

impl AttemptSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, trace: TraceHandle) {
        *self.lock() = AttemptState {
            trace: Some(trace),
            ..AttemptState::default()
        };
    }

    pub fn detach(&self) {
        *self.lock() = AttemptState::default();
    }

    fn on_write(&self, written: usize) {
        if written == 0 {
            return;
        }
        let mut state = self.lock();
        if !state.wrote_request {
            state.pending_write = true;
        }
    }

    fn on_flush(&self) {
        let trace = {
            let mut state = self.lock();
            if !state.pending_write || state.wrote_request {
                return;
            }
            state.pending_write = false;
            state.wrote_request = true;
            state.trace.clone()
        };
        if let Some(trace) = trace {
            trace!("request written");
            trace.emit(|t| t.wrote_request());
        }
    }

    fn on_read(&self, read: usize) {
        if read == 0 {
            return;
        }
        let trace = {
            let mut state = self.lock();
            if state.first_byte {
                return;
            }
            state.first_byte = true;
            state.trace.clone()
        };
        if let Some(trace) = trace {
            trace!("first response byte");
            trace.emit(|t| t.got_first_response_byte());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AttemptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct TracedIo<S> {
    inner: S,
    slot: AttemptSlot,
}

impl<S> TracedIo<S> {
    pub fn new(inner: S, slot: AttemptSlot) -> Self {
        Self { inner, slot }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TracedIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            this.slot.on_read(buf.filled().len() - before);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TracedIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            this.slot.on_write(n);
        }
        poll
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(n)) = poll {
            this.slot.on_write(n);
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        if let Poll::Ready(Ok(())) = poll {
            this.slot.on_flush();
        }
        poll
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
