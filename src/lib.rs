//! Latency breakdown of a single HTTP request: DNS lookup, TCP connection,
//! TLS handshake, server processing and content transfer.
//!
//! ```no_run
//! # async fn run() -> Result<(), anyhow::Error> {
//! use bytes::Bytes;
//! use http_body_util::{BodyExt, Full};
//! use httpstat::{tls::build_client_config, with_timings, Client, RequestTimings};
//! use std::time::Instant;
//!
//! let client = Client::new(build_client_config(None, false, 0)?);
//! let timings = RequestTimings::shared();
//! let req = hyper::Request::get("https://example.com/").body(Full::new(Bytes::new()))?;
//!
//! let res = client.request(with_timings(req, timings.clone())).await?;
//! res.into_body().collect().await?;
//!
//! let mut timings = timings.lock().unwrap();
//! timings.end(Instant::now());
//! println!("{}", timings);
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate tracing;

pub mod app;
pub mod cli;
pub mod http;
pub mod report;
pub mod timing;
pub mod tls;
pub mod trace;

pub use crate::http::Client;
pub use crate::report::Format;
pub use crate::timing::{RequestTimings, SharedTimings};
pub use crate::trace::{with_timings, with_trace, ClientTrace, Trace};
