//! Connection lifecycle hooks.
//!
//! A [`Trace`] travels with a request inside its `http::Extensions`. The
//! [`Client`](crate::http::Client) fires the hooks of that trace while it
//! resolves, connects, handshakes, writes the request and reads the
//! response. Each hook fires at most once per request, in the order they are
//! declared on [`ClientTrace`]. Hooks for phases that do not happen (no DNS
//! for an IP literal, no TLS for `http`, nothing but `got_conn` and later for
//! a pooled connection) are never called.

use crate::timing::{RequestTimings, SharedTimings};
use http::Request;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct DnsStartInfo {
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct DnsDoneInfo {
    pub addrs: Vec<SocketAddr>,
}

#[derive(Debug, Clone, Default)]
pub struct TlsDoneInfo {
    pub protocol_version: Option<String>,
    pub alpn_protocol: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct GotConnInfo {
    /// The connection came out of the keep-alive pool.
    pub reused: bool,
    /// How long a reused connection sat idle in the pool.
    pub idle_time: Option<Duration>,
}

/// Hooks fired for one outgoing request. All hooks default to doing nothing.
pub trait ClientTrace: Send + Sync {
    fn dns_start(&self, _info: &DnsStartInfo) {}

    fn dns_done(&self, _info: &DnsDoneInfo) {}

    fn connect_start(&self, _addr: SocketAddr) {}

    fn connect_done(&self, _addr: SocketAddr, _err: Option<&io::Error>) {}

    fn tls_handshake_start(&self) {}

    fn tls_handshake_done(&self, _info: &TlsDoneInfo) {}

    fn got_conn(&self, _info: &GotConnInfo) {}

    fn wrote_request(&self) {}

    fn got_first_response_byte(&self) {}
}

/// Cloneable handle to a [`ClientTrace`], stored as a request extension.
#[derive(Clone)]
pub struct Trace(Arc<dyn ClientTrace>);

impl Trace {
    pub fn new<T: ClientTrace + 'static>(hooks: T) -> Self {
        Self(Arc::new(hooks))
    }

    pub fn from_request<B>(req: &Request<B>) -> Option<Self> {
        req.extensions().get::<Trace>().cloned()
    }
}

impl Deref for Trace {
    type Target = dyn ClientTrace;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Trace")
    }
}

/// Installs `trace` on the request, replacing any trace already there.
pub fn with_trace<B>(mut req: Request<B>, trace: Trace) -> Request<B> {
    req.extensions_mut().insert(trace);
    req
}

/// Returns the request instrumented so that every lifecycle event is
/// recorded into `timings`.
pub fn with_timings<B>(req: Request<B>, timings: SharedTimings) -> Request<B> {
    with_trace(req, Trace::new(TimingsTrace::new(timings)))
}

/// Forwards each hook to a [`RequestTimings`] with the current instant.
pub struct TimingsTrace {
    timings: SharedTimings,
}

impl TimingsTrace {
    pub fn new(timings: SharedTimings) -> Self {
        Self { timings }
    }

    fn timings(&self) -> MutexGuard<'_, RequestTimings> {
        self.timings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClientTrace for TimingsTrace {
    fn dns_start(&self, info: &DnsStartInfo) {
        trace!("DNS lookup started for {}", info.host);
        self.timings().dns_start(Instant::now());
    }

    fn dns_done(&self, info: &DnsDoneInfo) {
        trace!("DNS lookup done: {:?}", info.addrs);
        self.timings().dns_done(Instant::now());
    }

    fn connect_start(&self, addr: SocketAddr) {
        trace!("Connecting to {}", addr);
        self.timings().connect_start(Instant::now());
    }

    fn connect_done(&self, addr: SocketAddr, err: Option<&io::Error>) {
        match err {
            Some(e) => debug!("Connect to {} failed: {}", addr, e),
            None => trace!("Connected to {}", addr),
        }
        self.timings().connect_done(Instant::now());
    }

    fn tls_handshake_start(&self) {
        trace!("TLS handshake started");
        self.timings().tls_handshake_start(Instant::now());
    }

    fn tls_handshake_done(&self, info: &TlsDoneInfo) {
        trace!(
            "TLS handshake done, version: {:?}, alpn: {:?}",
            info.protocol_version,
            info.alpn_protocol
        );
        self.timings().tls_handshake_done(Instant::now());
    }

    fn got_conn(&self, info: &GotConnInfo) {
        trace!("Got connection, reused: {}", info.reused);
        self.timings().got_conn(info.reused);
    }

    fn wrote_request(&self) {
        trace!("Request written");
        self.timings().wrote_request(Instant::now());
    }

    fn got_first_response_byte(&self) {
        trace!("First response byte");
        self.timings().got_first_response_byte(Instant::now());
    }
}
