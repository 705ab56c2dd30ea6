mod common;

use common::{client, drain, get, read_head, spawn_server, Events, SERVER_DELAY};
use httpstat::app::run::fetch;
use httpstat::report::Compact;
use httpstat::{with_timings, with_trace, RequestTimings, Trace};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

#[tokio::test]
async fn test_direct_ip_event_order() {
    let addr = spawn_server().await;
    let client = client();
    let events = Events::default();

    let req = with_trace(get(&format!("http://{}/", addr)), Trace::new(events.clone()));
    let res = client.request(req).await.unwrap();
    assert_eq!(drain(res).await, "hello");

    assert_eq!(
        events.take(),
        vec![
            "connect_start",
            "connect_done",
            "got_conn(reused=false)",
            "wrote_request",
            "first_byte",
        ]
    );
}

#[tokio::test]
async fn test_hostname_fires_dns_events() {
    let addr = spawn_server().await;
    let client = client();
    let events = Events::default();

    let url = format!("http://localhost:{}/", addr.port());
    let req = with_trace(get(&url), Trace::new(events.clone()));
    let res = client.request(req).await.unwrap();
    drain(res).await;

    let events = events.take();
    assert_eq!(&events[..2], ["dns_start", "dns_done"]);
    // localhost may resolve to ::1 first, which the server does not listen on.
    assert!(events.contains(&"connect_done".to_string()));
    assert_eq!(
        &events[events.len() - 3..],
        ["got_conn(reused=false)", "wrote_request", "first_byte"]
    );
    assert!(!events.iter().any(|e| e.starts_with("tls")));
}

#[tokio::test]
async fn test_fresh_plaintext_timings() {
    let addr = spawn_server().await;
    let client = client();
    let timings = RequestTimings::shared();

    let req = with_timings(get(&format!("http://{}/", addr)), timings.clone());
    let res = client.request(req).await.unwrap();
    drain(res).await;

    let mut t = timings.lock().unwrap();
    assert!(!t.is_finalized());
    assert!(Compact(&t).to_string().contains("Total: - ms"));

    t.end(Instant::now());
    assert!(!t.is_tls());
    assert!(!t.is_reused());
    assert_eq!(t.dns_lookup(), Duration::ZERO);
    assert_eq!(t.tls_handshake(), Duration::ZERO);
    assert_eq!(t.pretransfer(), t.connect());
    assert!(t.server_processing() >= SERVER_DELAY);
    assert!(t.start_transfer() >= t.connect() + t.server_processing());
    assert!(t.total() >= t.start_transfer());
}

#[tokio::test]
async fn test_second_request_reuses_connection() {
    let addr = spawn_server().await;
    let client = client();
    let url = format!("http://{}/", addr);

    let first = RequestTimings::shared();
    let res = client
        .request(with_timings(get(&url), first.clone()))
        .await
        .unwrap();
    drain(res).await;
    first.lock().unwrap().end(Instant::now());

    let events = Events::default();
    let res = client
        .request(with_trace(get(&url), Trace::new(events.clone())))
        .await
        .unwrap();
    drain(res).await;
    assert_eq!(
        events.take(),
        vec!["got_conn(reused=true)", "wrote_request", "first_byte"]
    );

    let third = RequestTimings::shared();
    let res = client
        .request(with_timings(get(&url), third.clone()))
        .await
        .unwrap();
    drain(res).await;

    let first = first.lock().unwrap();
    assert!(!first.is_reused());

    let mut t = third.lock().unwrap();
    t.end(Instant::now());
    assert!(t.is_reused());
    assert_eq!(t.dns_lookup(), Duration::ZERO);
    assert_eq!(t.tcp_connection(), Duration::ZERO);
    assert_eq!(t.tls_handshake(), Duration::ZERO);
    assert_eq!(t.connect(), Duration::ZERO);
    assert!(t.server_processing() >= SERVER_DELAY);
    assert!(t.measured_total().unwrap() >= t.server_processing());
}

#[tokio::test]
async fn test_untraced_request_still_works() {
    let addr = spawn_server().await;
    let res = client()
        .request(get(&format!("http://{}/", addr)))
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(drain(res).await, "hello");
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let events = Events::default();
    let req = with_trace(get(&format!("http://{}/", addr)), Trace::new(events.clone()));
    assert!(client().request(req).await.is_err());
    assert_eq!(events.take(), vec!["connect_start", "connect_failed"]);
}

const HELLO: &[u8] = b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello";

#[tokio::test]
async fn test_timeout_covers_stalled_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_head(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 10\r\n\r\nhe")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let client = client();
    let req = get(&format!("http://{}/", addr));
    let res = tokio::time::timeout(
        Duration::from_secs(5),
        fetch(&client, req, None, Duration::from_millis(300)),
    )
    .await
    .expect("the request limit must also bound the body");

    let err = res.unwrap_err();
    assert!(err.to_string().contains("Request timed out"));
}

#[tokio::test]
async fn test_fetch_reads_whole_body() {
    let addr = spawn_server().await;
    let req = get(&format!("http://{}/", addr));
    let received = fetch(&client(), req, None, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(received, 5);
}

#[tokio::test]
async fn test_stale_kept_alive_connection_is_redialed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // The first connection answers once, then drops the next request.
        let (mut stream, _) = listener.accept().await.unwrap();
        read_head(&mut stream).await;
        stream.write_all(HELLO).await.unwrap();
        read_head(&mut stream).await;
        drop(stream);

        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                while read_head(&mut stream).await {
                    if stream.write_all(HELLO).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    let client = client();
    let url = format!("http://{}/", addr);
    let res = client.request(get(&url)).await.unwrap();
    assert_eq!(drain(res).await, "hello");

    let events = Events::default();
    let req = with_trace(get(&url), Trace::new(events.clone()));
    let res = client.request(req).await.unwrap();
    assert_eq!(drain(res).await, "hello");

    assert_eq!(
        events.take(),
        vec![
            "got_conn(reused=true)",
            "wrote_request",
            "connect_start",
            "connect_done",
            "got_conn(reused=false)",
            "wrote_request",
            "first_byte",
        ]
    );
}
