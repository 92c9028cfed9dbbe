use std::sync::{Arc, Mutex, PoisonError};

/// Lifecycle events of one request attempt.
///
/// For a fresh TLS connection they arrive in declaration order. Any of them
/// may be skipped depending on the path the attempt takes.
pub trait Trace {
    fn dns_start(&mut self) {}

    fn dns_done(&mut self) {}

    fn connect_start(&mut self) {}

    fn connect_done(&mut self) {}

    fn tls_handshake_start(&mut self) {}

    fn tls_handshake_done(&mut self) {}

    /// A connection was handed to the attempt, either freshly dialed or
    /// taken from the pool.
    fn got_conn(&mut self, _info: GotConnInfo) {}

    /// The request head and body were written and flushed.
    fn wrote_request(&mut self) {}

    fn got_first_response_byte(&mut self) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GotConnInfo {
    pub reused: bool,
}

/// Cloneable handle delivering events to a shared [`Trace`].
#[derive(Clone)]
pub struct TraceHandle {
    inner: Arc<Mutex<dyn Trace + Send>>,
}

impl TraceHandle {
    pub fn new<T: Trace + Send + 'static>(inner: Arc<Mutex<T>>) -> Self {
        Self { inner }
    }

    pub fn emit(&self, event: impl FnOnce(&mut dyn Trace)) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        event(&mut *guard);
    }
}

impl std::fmt::Debug for TraceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log(Vec<&'static str>);

    impl Trace for Log {
        fn connect_start(&mut self) {
            self.0.push("connect_start");
        }

        fn got_conn(&mut self, info: GotConnInfo) {
            self.0.push(if info.reused { "reused" } else { "fresh" });
        }
    }

    #[test]
    fn unhandled_events_are_ignored() {
        let log = Arc::new(Mutex::new(Log::default()));
        let handle = TraceHandle::new(log.clone());

        handle.emit(|t| t.dns_start());
        handle.emit(|t| t.connect_start());
        handle.emit(|t| t.got_conn(GotConnInfo { reused: true }));
        handle.clone().emit(|t| t.got_first_response_byte());

        assert_eq!(log.lock().unwrap().0, vec!["connect_start", "reused"]);
    }
}
