#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use httpstat::tls::build_client_config;
use httpstat::trace::{DnsDoneInfo, DnsStartInfo, GotConnInfo, TlsDoneInfo};
use httpstat::{Client, ClientTrace};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

pub const SERVER_DELAY: Duration = Duration::from_millis(20);

async fn serve<IO>(io: IO)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(|_req: Request<Incoming>| async move {
        tokio::time::sleep(SERVER_DELAY).await;
        Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"hello"))))
    });
    let _ = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await;
}

/// Plaintext server answering every request with `hello` after
/// [`SERVER_DELAY`].
pub async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream));
        }
    });
    addr
}

/// Same as [`spawn_server`] behind TLS.
pub async fn spawn_tls_server(acceptor: TlsAcceptor) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(tls_stream) = acceptor.accept(stream).await {
                    serve(tls_stream).await;
                }
            });
        }
    });
    addr
}

/// Reads one request head from a raw connection. Returns `false` once the
/// peer has closed it.
pub async fn read_head(stream: &mut TcpStream) -> bool {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    true
}

pub fn client() -> Client {
    Client::new(build_client_config(None, false, 0).unwrap())
}

pub fn client_trusting(ca_path: &Path) -> Client {
    Client::new(build_client_config(Some(ca_path), false, 0).unwrap())
}

pub fn get(url: &str) -> Request<Full<Bytes>> {
    Request::get(url).body(Full::new(Bytes::new())).unwrap()
}

pub async fn drain(res: Response<Incoming>) -> Bytes {
    res.into_body().collect().await.unwrap().to_bytes()
}

/// Records the name of every hook fired, in order.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl ClientTrace for Events {
    fn dns_start(&self, _info: &DnsStartInfo) {
        self.push("dns_start");
    }

    fn dns_done(&self, _info: &DnsDoneInfo) {
        self.push("dns_done");
    }

    fn connect_start(&self, _addr: SocketAddr) {
        self.push("connect_start");
    }

    fn connect_done(&self, _addr: SocketAddr, err: Option<&io::Error>) {
        self.push(if err.is_some() {
            "connect_failed"
        } else {
            "connect_done"
        });
    }

    fn tls_handshake_start(&self) {
        self.push("tls_start");
    }

    fn tls_handshake_done(&self, _info: &TlsDoneInfo) {
        self.push("tls_done");
    }

    fn got_conn(&self, info: &GotConnInfo) {
        self.push(format!("got_conn(reused={})", info.reused));
    }

    fn wrote_request(&self) {
        self.push("wrote_request");
    }

    fn got_first_response_byte(&self) {
        self.push("first_byte");
    }
}
