use crate::http::resolve::resolve;
use crate::http::traced_io::{ExchangeHandle, TracedIo};
use crate::trace::{DnsDoneInfo, DnsStartInfo, GotConnInfo, TlsDoneInfo, Trace};
use anyhow::Context;
use bytes::Bytes;
use http::header::{HeaderValue, HOST};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use pki_types::ServerName;
use rustls::ClientConfig;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::Instrument;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a pooled connection may take to become ready before a fresh one
/// is dialed instead.
const POOL_READY_TIMEOUT: Duration = Duration::from_millis(500);

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

type SendRequest = http1::SendRequest<Full<Bytes>>;

/// Scheme, host and port of a request; connections are pooled per origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Origin {
    https: bool,
    host: String,
    port: u16,
}

impl Origin {
    fn from_uri(uri: &Uri) -> Result<Self, anyhow::Error> {
        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            Some(other) => return Err(anyhow!("Unsupported scheme: {}", other)),
            None => return Err(anyhow!("Can not find scheme in the uri:{}.", uri)),
        };
        let host = uri
            .host()
            .ok_or(anyhow!("uri has no host: {}", uri))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        Ok(Self { https, host, port })
    }

    fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

struct Connection {
    sender: SendRequest,
    exchange: ExchangeHandle,
}

struct IdleConnection {
    conn: Connection,
    idle_since: Instant,
}

/// HTTP/1.1 client that reports connection lifecycle events to the
/// [`Trace`] attached to each request and keeps one idle connection per
/// origin alive for reuse.
pub struct Client {
    tls: TlsConnector,
    connect_timeout: Duration,
    request_timeout: Duration,
    idle: Mutex<HashMap<Origin, IdleConnection>>,
}

impl Client {
    pub fn new(tls_config: ClientConfig) -> Self {
        Self {
            tls: TlsConnector::from(Arc::new(tls_config)),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            idle: Mutex::new(HashMap::new()),
        }
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Sends `req` and returns once the response head has arrived. The body
    /// must be read to the end before the connection can serve another
    /// request.
    pub async fn request(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, anyhow::Error> {
        timeout(self.request_timeout, self.send(req))
            .await
            .map_err(|_| {
                anyhow!("Request timed out after {:?}", self.request_timeout)
            })?
    }

    async fn send(
        &self,
        mut req: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, anyhow::Error> {
        let origin = Origin::from_uri(req.uri())?;
        let trace = Trace::from_request(&req);
        into_origin_form(&mut req)?;

        let (conn, info) = match self.checkout(&origin).await {
            Some(idle) => {
                debug!("Reusing connection to {}:{}", origin.host, origin.port);
                let info = GotConnInfo {
                    reused: true,
                    idle_time: Some(idle.idle_since.elapsed()),
                };
                (idle.conn, info)
            }
            None => {
                let conn = self.connect(&origin, trace.as_ref()).await?;
                let info = GotConnInfo {
                    reused: false,
                    idle_time: None,
                };
                (conn, info)
            }
        };

        // A kept-alive connection the server has already closed can still
        // pass the readiness check; idempotent requests are then sent again
        // over a fresh connection.
        let retry = (info.reused && req.method().is_idempotent()).then(|| clone_request(&req));
        let res = match (self.exchange(&origin, conn, &info, trace.clone(), req).await, retry) {
            (Err(e), Some(req)) if is_stale_connection(&e) => {
                debug!("Kept-alive connection was closed ({}), dialing a new one", e);
                let conn = self.connect(&origin, trace.as_ref()).await?;
                let info = GotConnInfo {
                    reused: false,
                    idle_time: None,
                };
                self.exchange(&origin, conn, &info, trace, req).await
            }
            (res, _) => res,
        };
        res.context("Failed to execute request")
    }

    async fn exchange(
        &self,
        origin: &Origin,
        conn: Connection,
        info: &GotConnInfo,
        trace: Option<Trace>,
        req: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, hyper::Error> {
        conn.exchange.begin(trace.clone());
        if let Some(trace) = trace.as_ref() {
            trace.got_conn(info);
        }

        let Connection {
            mut sender,
            exchange,
        } = conn;
        let res = sender.send_request(req).await?;

        self.checkin(
            origin.clone(),
            IdleConnection {
                conn: Connection { sender, exchange },
                idle_since: Instant::now(),
            },
        );
        Ok(res)
    }

    fn idle(&self) -> MutexGuard<'_, HashMap<Origin, IdleConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn checkout(&self, origin: &Origin) -> Option<IdleConnection> {
        let mut idle = self.idle().remove(origin)?;
        if idle.conn.sender.is_closed() {
            return None;
        }
        match timeout(POOL_READY_TIMEOUT, idle.conn.sender.ready()).await {
            Ok(Ok(())) => Some(idle),
            Ok(Err(e)) => {
                debug!("Pooled connection is unusable: {}", e);
                None
            }
            Err(_) => {
                debug!("Pooled connection is still busy, dialing a new one");
                None
            }
        }
    }

    fn checkin(&self, origin: Origin, idle: IdleConnection) {
        self.idle().insert(origin, idle);
    }

    async fn connect(
        &self,
        origin: &Origin,
        trace: Option<&Trace>,
    ) -> Result<Connection, anyhow::Error> {
        let addrs = match origin.ip() {
            Some(ip) => vec![SocketAddr::new(ip, origin.port)],
            None => {
                if let Some(t) = trace {
                    t.dns_start(&DnsStartInfo {
                        host: origin.host.clone(),
                    });
                }
                let resolved = resolve(&origin.host, origin.port).await;
                if let Some(t) = trace {
                    let addrs = resolved.as_ref().ok().cloned().unwrap_or_default();
                    t.dns_done(&DnsDoneInfo { addrs });
                }
                resolved?
            }
        };

        let stream = self.connect_tcp(&addrs, trace).await?;
        let local_addr = stream.local_addr()?.to_string();
        let remote_addr = stream.peer_addr()?.to_string();

        let io: Box<dyn Io> = if origin.https {
            Box::new(self.handshake_tls(origin, stream, trace).await?)
        } else {
            Box::new(stream)
        };

        let exchange = ExchangeHandle::default();
        let io = TokioIo::new(TracedIo::new(io, exchange.clone()));
        let (sender, conn) = http1::handshake(io)
            .instrument(info_span!("Http Handshake"))
            .await?;
        tokio::task::spawn(
            async move {
                if let Err(err) = conn.await {
                    debug!("Connection closed: {:?}", err);
                }
            }
            .instrument(info_span!(
                "conn",
                localAddr = %local_addr,
                remoteAddr = %remote_addr,
            )),
        );

        Ok(Connection { sender, exchange })
    }

    async fn connect_tcp(
        &self,
        addrs: &[SocketAddr],
        trace: Option<&Trace>,
    ) -> Result<TcpStream, anyhow::Error> {
        let mut last_err = None;
        for &addr in addrs {
            if let Some(t) = trace {
                t.connect_start(addr);
            }
            let res = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(res) => res,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", self.connect_timeout),
                )),
            };
            if let Some(t) = trace {
                t.connect_done(addr, res.as_ref().err());
            }
            match res {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(anyhow!(e).context("Failed to connect")),
            None => Err(anyhow!("No address to connect to")),
        }
    }

    async fn handshake_tls(
        &self,
        origin: &Origin,
        stream: TcpStream,
        trace: Option<&Trace>,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, anyhow::Error> {
        let domain = ServerName::try_from(origin.host.as_str())
            .map_err(|e| anyhow!("{}", e))?
            .to_owned();

        if let Some(t) = trace {
            t.tls_handshake_start();
        }
        let res = self.tls.connect(domain, stream).await;
        if let Some(t) = trace {
            let info = match &res {
                Ok(tls_stream) => {
                    let (_, session) = tls_stream.get_ref();
                    TlsDoneInfo {
                        protocol_version: session.protocol_version().map(|v| format!("{:?}", v)),
                        alpn_protocol: session
                            .alpn_protocol()
                            .map(|p| String::from_utf8_lossy(p).into_owned()),
                    }
                }
                Err(_) => TlsDoneInfo::default(),
            };
            t.tls_handshake_done(&info);
        }
        res.context("TLS handshake failed")
    }
}

fn is_stale_connection(e: &hyper::Error) -> bool {
    e.is_incomplete_message() || e.is_closed() || e.is_canceled()
}

fn clone_request(req: &Request<Full<Bytes>>) -> Request<Full<Bytes>> {
    let mut copy = Request::new(req.body().clone());
    *copy.method_mut() = req.method().clone();
    *copy.uri_mut() = req.uri().clone();
    *copy.version_mut() = req.version();
    *copy.headers_mut() = req.headers().clone();
    *copy.extensions_mut() = req.extensions().clone();
    copy
}

/// Rewrites an absolute request URI to origin-form and sets `Host` from it.
fn into_origin_form<B>(req: &mut Request<B>) -> Result<(), anyhow::Error> {
    let uri = req.uri().clone();
    if !req.headers().contains_key(HOST) {
        let authority = uri.authority().ok_or(anyhow!("uri has no host: {}", uri))?;
        req.headers_mut()
            .insert(HOST, HeaderValue::from_str(authority.as_str())?);
    }
    let path = uri.path_and_query().map_or("/", |p| p.as_str());
    *req.uri_mut() = path.parse()?;
    Ok(())
}
