//! Phase timestamps for a single HTTP request attempt.
//!
//! A [`TimingRecorder`] is attached to one attempt through the [`Trace`]
//! listener interface. Each lifecycle event stamps the current time from the
//! injected [`Clock`]; [`TimingRecorder::end`] is called once the response
//! body has been read and fills in the remaining durations.
//!
//! Phases the attempt never went through (a pooled connection, a literal IP
//! address, a transport that exposes no dial events) are collapsed onto the
//! first timestamp actually observed, so `dns_start` is always the epoch of
//! every cumulative duration.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub mod clock;
pub mod report;
pub mod trace;

pub use clock::{Clock, ManualClock, SystemClock};
pub use report::{Timeline, TimingReport};
pub use trace::{GotConnInfo, Trace, TraceHandle};

#[derive(Debug, Default, Clone)]
pub struct TimingRecorder<C = SystemClock> {
    clock: C,

    dns_start: Option<Instant>,
    dns_done: Option<Instant>,
    tcp_start: Option<Instant>,
    tcp_done: Option<Instant>,
    tls_start: Option<Instant>,
    tls_done: Option<Instant>,
    server_start: Option<Instant>,
    server_done: Option<Instant>,
    transfer_start: Option<Instant>,
    transfer_done: Option<Instant>,

    report: TimingReport,
}

impl TimingRecorder<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> TimingRecorder<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            dns_start: None,
            dns_done: None,
            tcp_start: None,
            tcp_done: None,
            tls_start: None,
            tls_done: None,
            server_start: None,
            server_done: None,
            transfer_start: None,
            transfer_done: None,
            report: TimingReport::default(),
        }
    }

    /// Sets the time when reading the response finished.
    ///
    /// Must be called exactly once, after the whole body has been consumed.
    /// If no lifecycle event ever fired there was no attempt to measure and
    /// `content_transfer` and `total` stay zero.
    pub fn end(&mut self, now: Instant) {
        self.transfer_done = Some(now);

        if self.dns_start.is_none() {
            return;
        }

        self.report.content_transfer = span(self.transfer_start, self.transfer_done);
        self.report.total = span(self.dns_start, self.transfer_done);
    }

    /// [`end`](Self::end) with the recorder's own clock.
    pub fn end_now(&mut self) {
        let now = self.clock.now();
        self.end(now);
    }

    pub fn report(&self) -> TimingReport {
        self.report
    }

    /// Moves the recorder behind a lock so the connection plumbing can
    /// deliver events from inside hyper's tasks.
    pub fn into_shared(self) -> SharedRecorder<C>
    where
        C: Send + 'static,
    {
        SharedRecorder {
            inner: Arc::new(Mutex::new(self)),
        }
    }

    /// Collapses the DNS and connect phases onto `at`.
    fn backfill_dial(&mut self, at: Instant) {
        self.dns_start = Some(at);
        self.dns_done = Some(at);
        self.tcp_start = Some(at);
        self.tcp_done = Some(at);
    }

    fn dial_unobserved(&self) -> bool {
        self.dns_start.is_none() && self.tcp_start.is_none()
    }
}

impl<C: Clock> Trace for TimingRecorder<C> {
    fn dns_start(&mut self) {
        self.dns_start = Some(self.clock.now());
    }

    fn dns_done(&mut self) {
        self.dns_done = Some(self.clock.now());
        self.report.dns_lookup = span(self.dns_start, self.dns_done);
        self.report.name_lookup = self.report.dns_lookup;
    }

    fn connect_start(&mut self) {
        let now = self.clock.now();
        self.tcp_start = Some(now);

        // Dialing a literal address: there was no lookup.
        if self.dns_start.is_none() {
            self.dns_start = Some(now);
            self.dns_done = Some(now);
        }
    }

    fn connect_done(&mut self) {
        self.tcp_done = Some(self.clock.now());
        self.report.tcp_connection = span(self.tcp_start, self.tcp_done);
        self.report.connect = span(self.dns_start, self.tcp_done);
    }

    fn tls_handshake_start(&mut self) {
        let now = self.clock.now();
        self.report.is_tls = true;
        self.tls_start = Some(now);

        if self.dial_unobserved() {
            self.backfill_dial(now);
        }
    }

    fn tls_handshake_done(&mut self) {
        self.tls_done = Some(self.clock.now());
        self.report.tls_handshake = span(self.tls_start, self.tls_done);
        self.report.pretransfer = span(self.dns_start, self.tls_done);
    }

    fn got_conn(&mut self, info: GotConnInfo) {
        // A pooled connection skips lookup, connect and handshake entirely.
        if info.reused {
            let now = self.clock.now();
            self.report.is_reused = true;
            self.backfill_dial(now);
            if self.report.is_tls {
                self.tls_start = Some(now);
                self.tls_done = Some(now);
            }
        }
    }

    fn wrote_request(&mut self) {
        let now = self.clock.now();
        self.server_start = Some(now);

        // The transport exposed no dial events at all.
        if self.dial_unobserved() {
            self.backfill_dial(now);
        }
    }

    fn got_first_response_byte(&mut self) {
        self.server_done = Some(self.clock.now());
        // No write observed (e.g. a reused connection with an opaque writer):
        // the server's share starts at the attempt epoch.
        let server_start = self.server_start.or(self.dns_start);
        self.report.server_processing = span(server_start, self.server_done);
        self.report.start_transfer = span(self.dns_start, self.server_done);
        self.transfer_start = self.server_done;
    }
}

/// A [`TimingRecorder`] shared with the connection plumbing.
#[derive(Debug)]
pub struct SharedRecorder<C = SystemClock> {
    inner: Arc<Mutex<TimingRecorder<C>>>,
}

impl<C> Clone for SharedRecorder<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Clock + Send + 'static> SharedRecorder<C> {
    pub fn trace_handle(&self) -> TraceHandle {
        TraceHandle::new(self.inner.clone())
    }

    pub fn end_now(&self) {
        self.lock().end_now();
    }

    pub fn report(&self) -> TimingReport {
        self.lock().report()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimingRecorder<C>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn span(from: Option<Instant>, to: Option<Instant>) -> Duration {
    match (from, to) {
        (Some(from), Some(to)) => to.saturating_duration_since(from),
        _ => Duration::ZERO,
    }
}
