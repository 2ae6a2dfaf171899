//! End-to-end tests: a real server on an ephemeral port, driven by a tokio client

mod common;

use common::{exchange, header_value, host, split_response, Scratch, TestServer};
use lantern::config::{HostConfig, ServerConfig};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const INDEX: &[u8] = b"<html><body>hello</body></html>";

fn site(dir: &Scratch) -> HostConfig {
    dir.write("www/index.html", INDEX);
    dir.write("www/data.json", b"{\"ok\":true}");
    dir.write("secret.txt", b"top secret");
    dir.script(
        "www/cgi-bin/echo.sh",
        "printf 'Content-Type: text/plain\\r\\nX-Length: %s\\r\\n\\r\\n' \"$CONTENT_LENGTH\"\ncat\n",
    );
    dir.script("www/cgi-bin/redirect.sh", "printf 'Location: /index.html\\n\\n'\n");
    dir.script("www/cgi-bin/broken.sh", "printf 'no header terminator'\n");

    let mut cfg = host("site");
    cfg.root = Some(dir.path().join("www"));
    cfg.cgi = Some(dir.path().join("www/cgi-bin"));
    cfg
}

fn status_of(head: &str) -> u16 {
    head.split_whitespace().nth(1).unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_static_get() {
    let dir = Scratch::new("e2e-static");
    let server = TestServer::start(vec![site(&dir)]);

    let raw = exchange(server.addr, b"GET /index.html HTTP/1.0\r\nHost: site\r\n\r\n").await;
    let (head, body) = split_response(&raw);

    assert!(head.starts_with("HTTP/1.0 200 OK"));
    assert_eq!(header_value(&head, "Content-Type"), Some("text/html"));
    assert_eq!(
        header_value(&head, "Content-Length"),
        Some(INDEX.len().to_string().as_str())
    );
    assert_eq!(header_value(&head, "Connection"), Some("close"));
    assert_eq!(body, INDEX);

    server.stop();
}

#[tokio::test]
async fn test_head_matches_get_without_body() {
    let dir = Scratch::new("e2e-head");
    let server = TestServer::start(vec![site(&dir)]);

    let get = exchange(server.addr, b"GET /data.json HTTP/1.0\r\nHost: site\r\n\r\n").await;
    let head_only = exchange(server.addr, b"HEAD /data.json HTTP/1.0\r\nHost: site\r\n\r\n").await;
    let (get_head, get_body) = split_response(&get);
    let (head_head, head_body) = split_response(&head_only);

    assert_eq!(get_head, head_head);
    assert_eq!(header_value(&head_head, "Content-Length"), Some("11"));
    assert_eq!(get_body.len(), 11);
    assert!(head_body.is_empty());

    server.stop();
}

#[tokio::test]
async fn test_root_serves_index() {
    let dir = Scratch::new("e2e-index");
    let server = TestServer::start(vec![site(&dir)]);

    let raw = exchange(server.addr, b"GET / HTTP/1.0\r\nHost: site\r\n\r\n").await;
    let (head, body) = split_response(&raw);

    assert_eq!(status_of(&head), 200);
    assert_eq!(body, INDEX);

    server.stop();
}

#[tokio::test]
async fn test_traversal_is_404() {
    let dir = Scratch::new("e2e-traversal");
    let server = TestServer::start(vec![site(&dir)]);

    for request in [
        &b"GET /../secret.txt HTTP/1.0\r\nHost: site\r\n\r\n"[..],
        &b"GET /cgi-bin/../../secret.txt HTTP/1.0\r\nHost: site\r\n\r\n"[..],
    ] {
        let raw = exchange(server.addr, request).await;
        let (head, body) = split_response(&raw);
        assert_eq!(status_of(&head), 404);
        assert!(!String::from_utf8_lossy(&body).contains("top secret"));
    }

    server.stop();
}

#[tokio::test]
async fn test_request_split_across_writes() {
    let dir = Scratch::new("e2e-split");
    let server = TestServer::start(vec![site(&dir)]);

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    for part in [&b"GET /ind"[..], b"ex.html HT", b"TP/1.0\r\nHo", b"st: site\r\n", b"\r\n"] {
        stream.write_all(part).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let (head, body) = split_response(&raw);

    assert_eq!(status_of(&head), 200);
    assert_eq!(body, INDEX);

    server.stop();
}

#[tokio::test]
async fn test_cgi_post_echoes_body() {
    let dir = Scratch::new("e2e-cgi");
    let server = TestServer::start(vec![site(&dir)]);

    let raw = exchange(
        server.addr,
        b"POST /cgi-bin/echo.sh HTTP/1.0\r\nHost: site\r\nContent-Length: 10\r\n\r\n0123456789",
    )
    .await;
    let (head, body) = split_response(&raw);

    assert_eq!(status_of(&head), 200);
    assert_eq!(header_value(&head, "Content-Type"), Some("text/plain"));
    assert_eq!(header_value(&head, "X-Length"), Some("10"));
    assert_eq!(header_value(&head, "Content-Length"), Some("10"));
    assert_eq!(body, b"0123456789");

    server.stop();
}

#[tokio::test]
async fn test_cgi_body_sent_after_head() {
    let dir = Scratch::new("e2e-cgi-late");
    let server = TestServer::start(vec![site(&dir)]);

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"POST /cgi-bin/echo.sh HTTP/1.0\r\nHost: site\r\nContent-Length: 6\r\n\r\nabc")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(b"def").await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let (_, body) = split_response(&raw);

    assert_eq!(body, b"abcdef");

    server.stop();
}

#[tokio::test]
async fn test_cgi_get_without_body() {
    let dir = Scratch::new("e2e-cgi-get");
    let server = TestServer::start(vec![site(&dir)]);

    let raw = exchange(server.addr, b"GET /cgi-bin/echo.sh?x=1 HTTP/1.0\r\nHost: site\r\n\r\n").await;
    let (head, body) = split_response(&raw);

    assert_eq!(status_of(&head), 200);
    assert_eq!(header_value(&head, "X-Length"), Some("0"));
    assert!(body.is_empty());

    server.stop();
}

#[tokio::test]
async fn test_cgi_redirect_and_broken_output() {
    let dir = Scratch::new("e2e-cgi-status");
    let server = TestServer::start(vec![site(&dir)]);

    let raw = exchange(server.addr, b"GET /cgi-bin/redirect.sh HTTP/1.0\r\nHost: site\r\n\r\n").await;
    let (head, _) = split_response(&raw);
    assert_eq!(status_of(&head), 302);
    assert_eq!(header_value(&head, "Location"), Some("/index.html"));

    let raw = exchange(server.addr, b"GET /cgi-bin/broken.sh HTTP/1.0\r\nHost: site\r\n\r\n").await;
    let (head, _) = split_response(&raw);
    assert_eq!(status_of(&head), 500);

    server.stop();
}

#[tokio::test]
async fn test_unsupported_method_is_501() {
    let dir = Scratch::new("e2e-501");
    let server = TestServer::start(vec![site(&dir)]);

    let raw = exchange(server.addr, b"PUT /index.html HTTP/1.0\r\nHost: site\r\n\r\n").await;
    let (head, body) = split_response(&raw);

    assert_eq!(status_of(&head), 501);
    assert_eq!(body, b"501 Not Implemented\n");

    server.stop();
}

#[tokio::test]
async fn test_unknown_host_is_404() {
    let dir = Scratch::new("e2e-nohost");
    let server = TestServer::start(vec![site(&dir)]);

    let raw = exchange(server.addr, b"GET /index.html HTTP/1.0\r\nHost: other\r\n\r\n").await;
    let (head, _) = split_response(&raw);
    assert_eq!(status_of(&head), 404);

    server.stop();
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let dir = Scratch::new("e2e-413");
    let settings = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        max_body_bytes: 16,
        tick_millis: 50,
        ..ServerConfig::default()
    };
    let server = TestServer::start_with(settings, vec![site(&dir)]);

    let raw = exchange(
        server.addr,
        b"POST /cgi-bin/echo.sh HTTP/1.0\r\nHost: site\r\nContent-Length: 17\r\n\r\n",
    )
    .await;
    let (head, _) = split_response(&raw);
    assert_eq!(status_of(&head), 413);

    server.stop();
}

#[tokio::test]
async fn test_proxy_pipes_upstream_response() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = upstream.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(b"HTTP/1.0 203 Upstream\r\nX-Upstream: yes\r\n\r\nproxied body")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
        let _ = seen_tx.send(String::from_utf8_lossy(&request).into_owned());
    });

    // A document root is configured too; the proxy must win.
    let dir = Scratch::new("e2e-proxy");
    let mut cfg = site(&dir);
    cfg.name = "*".to_string();
    cfg.proxy = Some(upstream_addr.to_string());
    let server = TestServer::start(vec![cfg]);

    let raw = exchange(
        server.addr,
        b"GET /index.html?q=1 HTTP/1.0\r\nHost: anything\r\nConnection: keep-alive\r\n\r\n",
    )
    .await;

    assert_eq!(raw, b"HTTP/1.0 203 Upstream\r\nX-Upstream: yes\r\n\r\nproxied body");

    let seen = seen_rx.await.unwrap();
    assert!(seen.starts_with("GET /index.html?q=1 HTTP/1.0\r\n"));
    assert!(seen.contains("Host: anything\r\n"));
    assert!(seen.contains("Connection: close\r\n"));
    assert!(!seen.contains("keep-alive"));

    server.stop();
}

#[tokio::test]
async fn test_proxy_forwards_request_body() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = upstream.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        let head_end = loop {
            if let Some(i) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                break i + 4;
            }
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "upstream saw EOF inside the head");
            received.extend_from_slice(&buf[..n]);
        };
        let head = String::from_utf8_lossy(&received[..head_end]).into_owned();
        let length: usize = header_value(&head, "Content-Length").unwrap().parse().unwrap();
        while received.len() < head_end + length {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "upstream saw EOF inside the body");
            received.extend_from_slice(&buf[..n]);
        }
        let body = received[head_end..].to_vec();
        socket
            .write_all(format!("HTTP/1.0 200 OK\r\n\r\ngot {}", body.len()).as_bytes())
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
        let _ = seen_tx.send((head, length, body));
    });

    let mut cfg = host("*");
    cfg.proxy = Some(format!("http://{}", upstream_addr));
    let server = TestServer::start(vec![cfg]);

    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    let mut raw = format!(
        "POST /upload HTTP/1.0\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
        payload.len()
    )
    .into_bytes();
    raw.extend_from_slice(&payload);

    let response = exchange(server.addr, &raw).await;
    assert_eq!(response, format!("HTTP/1.0 200 OK\r\n\r\ngot {}", payload.len()).into_bytes());

    let (head, length, body) = seen_rx.await.unwrap();
    assert!(head.starts_with("POST /upload HTTP/1.0\r\n"));
    assert_eq!(length, payload.len());
    assert_eq!(body, payload);

    server.stop();
}

#[tokio::test]
async fn test_proxy_connect_failure_is_500() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let mut cfg = host("*");
    cfg.proxy = Some(closed.to_string());
    let server = TestServer::start(vec![cfg]);

    let raw = exchange(server.addr, b"GET / HTTP/1.0\r\nHost: x\r\n\r\n").await;
    let (head, _) = split_response(&raw);
    assert_eq!(status_of(&head), 500);

    server.stop();
}

#[tokio::test]
async fn test_idle_session_is_closed() {
    let settings = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        idle_timeout_secs: 1,
        tick_millis: 50,
        ..ServerConfig::default()
    };
    let server = TestServer::start_with(settings, vec![host("*")]);

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.0\r\n").await.unwrap();
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("idle session was never closed")
        .unwrap();

    assert!(raw.is_empty());

    server.stop();
}

#[tokio::test]
async fn test_slow_cgi_reader_is_not_idle() {
    let dir = Scratch::new("e2e-slow-cgi");
    dir.script(
        "www/cgi-bin/slow.sh",
        "sleep 0.6\nhead -c 30000 >/dev/null\nsleep 0.6\nhead -c 30000 >/dev/null\n\
         sleep 0.6\ncat >/dev/null\nprintf 'Content-Type: text/plain\\r\\n\\r\\ndone'\n",
    );
    let mut cfg = host("site");
    cfg.root = Some(dir.path().join("www"));
    cfg.cgi = Some(dir.path().join("www/cgi-bin"));

    let settings = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        idle_timeout_secs: 1,
        tick_millis: 50,
        ..ServerConfig::default()
    };
    let server = TestServer::start_with(settings, vec![cfg]);

    // Larger than a pipe buffer, so stdin keeps making progress as the script reads.
    let mut raw = b"POST /cgi-bin/slow.sh HTTP/1.0\r\nHost: site\r\nContent-Length: 300000\r\n\r\n".to_vec();
    raw.extend(std::iter::repeat_n(b'x', 300_000));

    let response = tokio::time::timeout(Duration::from_secs(10), exchange(server.addr, &raw))
        .await
        .expect("slow CGI request never finished");
    let (head, body) = split_response(&response);

    assert_eq!(status_of(&head), 200);
    assert_eq!(body, b"done");

    server.stop();
}

#[tokio::test]
async fn test_concurrent_clients() {
    let dir = Scratch::new("e2e-concurrent");
    let server = TestServer::start(vec![site(&dir)]);

    // A stalled client must not hold up the others.
    let mut stalled = TcpStream::connect(server.addr).await.unwrap();
    stalled.write_all(b"GET /index.html HTTP/1.0\r\n").await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            exchange(addr, b"GET /index.html HTTP/1.0\r\nHost: site\r\n\r\n").await
        }));
    }
    for task in tasks {
        let raw = task.await.unwrap();
        let (head, body) = split_response(&raw);
        assert_eq!(status_of(&head), 200);
        assert_eq!(body, INDEX);
    }

    stalled.write_all(b"Host: site\r\n\r\n").await.unwrap();
    let mut raw = Vec::new();
    stalled.read_to_end(&mut raw).await.unwrap();
    assert_eq!(split_response(&raw).1, INDEX);

    server.stop();
}
