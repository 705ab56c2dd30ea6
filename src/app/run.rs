use crate::cli::app_config::Cli;
use crate::http::Client;
use crate::report::render;
use crate::timing::RequestTimings;
use crate::tls::build_client_config;
use crate::trace::with_timings;
use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::Request;
use std::path::Path;
use std::str::FromStr;
use std::sync::PoisonError;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout_at;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub async fn main_with_error() -> Result<(), anyhow::Error> {
    let cli: Cli = Cli::parse();
    init_tracing(cli.verbosity)?;

    do_request(cli).await
}

fn init_tracing(verbosity: u8) -> Result<(), anyhow::Error> {
    let log_level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper_util=off".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

pub async fn do_request(cli: Cli) -> Result<(), anyhow::Error> {
    let tls_config = build_client_config(
        cli.certificate_path_option.as_deref(),
        cli.skip_certificate_validate,
        cli.verbosity,
    )?;
    let client = Client::new(tls_config)
        .connect_timeout(Duration::from_secs(cli.connect_timeout))
        .request_timeout(Duration::from_secs(cli.timeout));

    for i in 0..cli.count {
        let timings = RequestTimings::shared();
        let request = with_timings(build_request(&cli)?, timings.clone());

        fetch(
            &client,
            request,
            cli.file_path_option.as_deref(),
            Duration::from_secs(cli.timeout),
        )
        .await?;

        let mut timings = timings.lock().unwrap_or_else(PoisonError::into_inner);
        timings.end(Instant::now());

        if cli.count > 1 {
            println!("Request {}/{}", i + 1, cli.count);
        }
        println!("{}", render(&timings, cli.format)?.trim_end());
        if i + 1 < cli.count {
            println!();
        }
    }

    Ok(())
}

/// Sends `request` and reads its body to the end, writing it to `file_path`
/// when given. The whole exchange, body included, must finish within
/// `limit`. Returns the number of body bytes received.
pub async fn fetch(
    client: &Client,
    request: Request<Full<Bytes>>,
    file_path: Option<&Path>,
    limit: Duration,
) -> Result<u64, anyhow::Error> {
    let deadline = tokio::time::Instant::now() + limit;

    let res = client.request(request).await?;
    info!("{:?} {}", res.version(), res.status());
    for (key, value) in res.headers().iter() {
        debug!("< {}: {}", key, value.to_str().unwrap_or("<binary>"));
    }

    let received = timeout_at(deadline, drain_body(res.into_body(), file_path))
        .await
        .map_err(|_| anyhow!("Request timed out after {:?}", limit))??;
    debug!("Received {} bytes of body", received);
    Ok(received)
}

fn build_request(cli: &Cli) -> Result<Request<Full<Bytes>>, anyhow::Error> {
    let mut method = String::from("GET");
    if cli.body_option.is_some() {
        method = String::from("POST");
    }
    if let Some(method_userdefined) = cli.method_option.as_ref() {
        method = method_userdefined.clone();
    }

    let mut request_builder = Request::builder().method(method.as_str()).uri(cli.url.as_str());

    let mut header_map = http::HeaderMap::new();
    if cli.body_option.is_some() {
        header_map.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("*/*"));
    let user_agent = cli
        .user_agent_option
        .as_deref()
        .unwrap_or(concat!("httpstat/", env!("CARGO_PKG_VERSION")));
    header_map.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);

    let mut user_headers = http::HeaderMap::new();
    for x in &cli.headers {
        let split: Vec<&str> = x.splitn(2, ':').collect();
        ensure!(split.len() == 2, "header error: '{}'", x);
        user_headers.append(
            HeaderName::from_str(split[0].trim())?,
            HeaderValue::from_str(split[1].trim_start())?,
        );
    }
    // A header given on the command line replaces the built-in one.
    for name in user_headers.keys() {
        header_map.remove(name);
    }
    header_map.extend(user_headers);

    if let Some(headers) = request_builder.headers_mut() {
        headers.extend(header_map);
    }

    let body = cli
        .body_option
        .as_ref()
        .map_or(Bytes::new(), |v| Bytes::from(v.clone()));
    let request = request_builder.body(Full::new(body))?;

    debug!(
        "> {} {} {:?}",
        request.method(),
        request.uri(),
        request.version()
    );
    for (key, value) in request.headers().iter() {
        debug!("> {}: {}", key, value.to_str()?);
    }

    Ok(request)
}

/// Reads the body to the end, writing it to `file_path` when given.
/// Returns the number of body bytes received.
async fn drain_body(mut body: Incoming, file_path: Option<&Path>) -> Result<u64, anyhow::Error> {
    let mut file = match file_path {
        Some(path) => Some(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to open or create file: {}", path.display()))?,
        ),
        None => None,
    };

    let mut received = 0;
    while let Some(frame) = body.frame().await {
        let frame = frame.context("Error while reading response body")?;
        if let Ok(data) = frame.into_data() {
            received += data.len() as u64;
            if let Some(f) = file.as_mut() {
                f.write_all(&data)
                    .await
                    .context("Error writing chunk to file")?;
            }
        }
    }
    if let Some(f) = file.as_mut() {
        f.flush().await?;
    }
    Ok(received)
}
