//! Per-request latency recorder.
//!
//! [`RequestTimings`] turns the connection lifecycle events of one HTTP
//! request into phase durations (DNS lookup, TCP connection, TLS handshake,
//! server processing, content transfer) and a cumulative timeline anchored
//! at the start of the DNS lookup.
//!
//! Every mutator takes the instant of the event. The event binder in
//! [`crate::trace`] passes `Instant::now()`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Recorder shared between the caller and the trace installed on a request.
pub type SharedTimings = Arc<Mutex<RequestTimings>>;

#[derive(Debug, Default, Clone)]
pub struct RequestTimings {
    dns_lookup: Duration,
    tcp_connection: Duration,
    tls_handshake: Duration,
    server_processing: Duration,
    content_transfer: Option<Duration>,

    name_lookup: Duration,
    connect: Duration,
    pretransfer: Duration,
    start_transfer: Duration,
    total: Option<Duration>,

    dns_start: Option<Instant>,
    tcp_start: Option<Instant>,
    tls_start: Option<Instant>,
    server_start: Option<Instant>,
    server_done: Option<Instant>,
    transfer_start: Option<Instant>,

    is_tls: bool,
    is_reused: bool,
}

/// Elapsed time from `start` to `now`, zero when `start` never happened.
fn since(start: Option<Instant>, now: Instant) -> Duration {
    start.map_or(Duration::ZERO, |start| now.saturating_duration_since(start))
}

impl RequestTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedTimings {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn dns_start(&mut self, now: Instant) {
        self.dns_start = Some(now);
    }

    pub fn dns_done(&mut self, now: Instant) {
        self.dns_lookup = since(self.dns_start, now);
        self.name_lookup = since(self.dns_start, now);
    }

    pub fn connect_start(&mut self, now: Instant) {
        self.tcp_start = Some(now);

        // Connecting straight to an IP address skips the lookup.
        if self.dns_start.is_none() {
            self.dns_start = Some(now);
        }
    }

    pub fn connect_done(&mut self, now: Instant) {
        self.tcp_connection = since(self.tcp_start, now);
        self.connect = since(self.dns_start, now);
    }

    pub fn tls_handshake_start(&mut self, now: Instant) {
        self.is_tls = true;
        self.tls_start = Some(now);
    }

    pub fn tls_handshake_done(&mut self, now: Instant) {
        self.tls_handshake = since(self.tls_start, now);
        self.pretransfer = since(self.dns_start, now);
    }

    /// Notes whether the connection came out of the keep-alive pool. The
    /// start instants of a reused connection are filled in by
    /// [`wrote_request`](Self::wrote_request).
    pub fn got_conn(&mut self, reused: bool) {
        if reused {
            self.is_reused = true;
        }
    }

    pub fn wrote_request(&mut self, now: Instant) {
        self.server_start = Some(now);

        // No DNS or connect hook fired at all.
        if self.dns_start.is_none() && self.tcp_start.is_none() {
            self.dns_start = Some(now);
            self.tcp_start = Some(now);
        }

        // A reused connection has no lookup, connect or handshake of its own.
        if self.is_reused {
            self.dns_start = Some(now);
            self.tcp_start = Some(now);
            self.tls_start = Some(now);
        }

        if !self.is_tls {
            self.tls_handshake = Duration::ZERO;
            self.pretransfer = self.connect;
        }
    }

    pub fn got_first_response_byte(&mut self, now: Instant) {
        self.server_done = Some(now);
        self.server_processing = since(self.server_start, now);

        self.transfer_start = Some(now);
        self.start_transfer = since(self.dns_start, now);
    }

    /// Fixes the content transfer and total durations. Must be called once
    /// the response body has been read to the end; calling it earlier
    /// understates the transfer time.
    ///
    /// Does nothing when no event was ever recorded.
    pub fn end(&mut self, now: Instant) {
        if self.dns_start.is_none() {
            return;
        }
        self.content_transfer = Some(since(self.transfer_start, now));
        self.total = Some(since(self.dns_start, now));
    }

    pub fn is_finalized(&self) -> bool {
        self.total.is_some()
    }

    pub fn is_tls(&self) -> bool {
        self.is_tls
    }

    pub fn is_reused(&self) -> bool {
        self.is_reused
    }

    pub fn dns_lookup(&self) -> Duration {
        self.dns_lookup
    }

    pub fn tcp_connection(&self) -> Duration {
        self.tcp_connection
    }

    pub fn tls_handshake(&self) -> Duration {
        self.tls_handshake
    }

    pub fn server_processing(&self) -> Duration {
        self.server_processing
    }

    pub fn name_lookup(&self) -> Duration {
        self.name_lookup
    }

    pub fn connect(&self) -> Duration {
        self.connect
    }

    pub fn pretransfer(&self) -> Duration {
        self.pretransfer
    }

    pub fn start_transfer(&self) -> Duration {
        self.start_transfer
    }

    /// Content transfer time fixed by [`end`](Self::end), `None` before.
    pub fn measured_content_transfer(&self) -> Option<Duration> {
        self.content_transfer
    }

    /// Total time fixed by [`end`](Self::end), `None` before.
    pub fn measured_total(&self) -> Option<Duration> {
        self.total
    }

    /// Content transfer time. Before [`end`](Self::end) this is the time
    /// elapsed since the first response byte.
    pub fn content_transfer(&self) -> Duration {
        self.content_transfer_at(Instant::now())
    }

    pub fn content_transfer_at(&self, now: Instant) -> Duration {
        self.content_transfer
            .unwrap_or_else(|| since(self.server_done, now))
    }

    /// Total time. Before [`end`](Self::end) this is the time elapsed since
    /// the request started.
    pub fn total(&self) -> Duration {
        self.total_at(Instant::now())
    }

    pub fn total_at(&self, now: Instant) -> Duration {
        self.total.unwrap_or_else(|| since(self.dns_start, now))
    }

    /// Time from the start of the request until `t`.
    pub fn until(&self, t: Instant) -> Duration {
        since(self.dns_start, t)
    }
}
