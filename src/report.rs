use crate::timing::RequestTimings;
use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Placeholder for durations that were not measured because
/// [`RequestTimings::end`] was never called.
const UNMEASURED: &str = "-";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Fixed-width millisecond table
    #[default]
    Table,
    /// One line of `key: value ms` pairs
    Compact,
    /// JSON object, unmeasured values are null
    Json,
}

/// Millisecond summary used for the JSON output.
#[derive(Debug, Serialize)]
pub struct TimingSummary {
    pub dns_lookup_ms: u64,
    pub tcp_connection_ms: u64,
    pub tls_handshake_ms: u64,
    pub server_processing_ms: u64,
    pub content_transfer_ms: Option<u64>,
    pub name_lookup_ms: u64,
    pub connect_ms: u64,
    pub pretransfer_ms: u64,
    pub start_transfer_ms: u64,
    pub total_ms: Option<u64>,
    pub tls: bool,
    pub reused: bool,
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

impl From<&RequestTimings> for TimingSummary {
    fn from(t: &RequestTimings) -> Self {
        Self {
            dns_lookup_ms: millis(t.dns_lookup()),
            tcp_connection_ms: millis(t.tcp_connection()),
            tls_handshake_ms: millis(t.tls_handshake()),
            server_processing_ms: millis(t.server_processing()),
            content_transfer_ms: t.measured_content_transfer().map(millis),
            name_lookup_ms: millis(t.name_lookup()),
            connect_ms: millis(t.connect()),
            pretransfer_ms: millis(t.pretransfer()),
            start_transfer_ms: millis(t.start_transfer()),
            total_ms: t.measured_total().map(millis),
            tls: t.is_tls(),
            reused: t.is_reused(),
        }
    }
}

/// Millisecond value or the unmeasured marker, right-aligned to `width`.
struct Millis(Option<Duration>);

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(d) => fmt::Display::fmt(&d.as_millis(), f),
            None => f.pad(UNMEASURED),
        }
    }
}

impl fmt::Display for RequestTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transfer = Millis(self.measured_content_transfer());
        let total = Millis(self.measured_total());

        writeln!(f, "DNS lookup:        {:>8} ms", self.dns_lookup().as_millis())?;
        writeln!(f, "TCP connection:    {:>8} ms", self.tcp_connection().as_millis())?;
        writeln!(f, "TLS handshake:     {:>8} ms", self.tls_handshake().as_millis())?;
        writeln!(f, "Server processing: {:>8} ms", self.server_processing().as_millis())?;
        writeln!(f, "Content transfer:  {:>8} ms", transfer)?;
        writeln!(f)?;
        writeln!(f, "Name lookup:       {:>8} ms", self.name_lookup().as_millis())?;
        writeln!(f, "Connect:           {:>8} ms", self.connect().as_millis())?;
        writeln!(f, "Pre transfer:      {:>8} ms", self.pretransfer().as_millis())?;
        writeln!(f, "Start transfer:    {:>8} ms", self.start_transfer().as_millis())?;
        writeln!(f, "Total:             {:>8} ms", total)?;

        Ok(())
    }
}

/// Single-line rendering: `DNSLookup: 10 ms, TCPConnection: 20 ms, ...`.
pub struct Compact<'a>(pub &'a RequestTimings);

impl fmt::Display for Compact<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.0;
        let entries = [
            ("DNSLookup", Millis(Some(t.dns_lookup()))),
            ("TCPConnection", Millis(Some(t.tcp_connection()))),
            ("TLSHandshake", Millis(Some(t.tls_handshake()))),
            ("ServerProcessing", Millis(Some(t.server_processing()))),
            ("ContentTransfer", Millis(t.measured_content_transfer())),
            ("NameLookup", Millis(Some(t.name_lookup()))),
            ("Connect", Millis(Some(t.connect()))),
            ("Pretransfer", Millis(Some(t.pretransfer()))),
            ("StartTransfer", Millis(Some(t.start_transfer()))),
            ("Total", Millis(t.measured_total())),
        ];

        for (i, (key, value)) in entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {} ms", key, value)?;
        }
        Ok(())
    }
}

pub fn render(timings: &RequestTimings, format: Format) -> Result<String, anyhow::Error> {
    let s = match format {
        Format::Table => timings.to_string(),
        Format::Compact => Compact(timings).to_string(),
        Format::Json => serde_json::to_string_pretty(&TimingSummary::from(timings))?,
    };
    Ok(s)
}
