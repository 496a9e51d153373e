//! End-to-end tests that talk raw HTTP/1.1 so request paths reach the
//! server exactly as written (no client-side dot-segment cleanup).

use dir_sv::config::{validate_root_directory, ServerConfig};
use dir_sv::server::run_server;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

/// A helper struct to manage a running test server.
struct TestServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
    temp_dir: TempDir,
}

impl TestServer {
    fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(10), Duration::from_secs(5))
    }

    /// Sets up and runs a server in a background thread for testing.
    fn with_timeouts(request_timeout: Duration, shutdown_grace: Duration) -> Self {
        let dir = tempdir().unwrap();

        let mut file = File::create(dir.path().join("test.txt")).unwrap();
        writeln!(file, "Hello from test file!").unwrap();

        let mut large = File::create(dir.path().join("large.bin")).unwrap();
        let pattern: Vec<u8> = (0..=255u8).collect();
        for _ in 0..1024 {
            large.write_all(&pattern).unwrap();
        }

        let subdir = dir.path().join("subdir");
        fs::create_dir(&subdir).unwrap();
        let mut nested = File::create(subdir.join("nested.txt")).unwrap();
        writeln!(nested, "Nested file content").unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        fs::create_dir(dir.path().join("with space")).unwrap();

        let config = ServerConfig {
            root: validate_root_directory(dir.path()).unwrap(),
            listen: Ipv4Addr::LOCALHOST.into(),
            port: 0,
            threads: 4,
            chunk_size: 1024,
            request_timeout,
            transfer_timeout: Duration::from_secs(10),
            shutdown_grace,
            check_mount: false,
        };

        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let (addr_tx, addr_rx) = mpsc::channel();

        let server_handle = thread::spawn(move || {
            if let Err(e) = run_server(config, Some(shutdown_rx), Some(addr_tx)) {
                eprintln!("Server thread failed: {}", e);
            }
        });

        let server_addr = addr_rx.recv().unwrap();

        TestServer {
            addr: server_addr,
            shutdown_tx,
            handle: Some(server_handle),
            temp_dir: dir,
        }
    }

    fn get(&self, path: &str) -> HttpResponse {
        HttpClient::request(self.addr, "GET", path, &[])
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shutdown_tx.send(()).ok();
            handle.join().unwrap();
        }
    }
}

/// Minimal raw HTTP client for testing
struct HttpClient;

impl HttpClient {
    fn request(
        addr: SocketAddr,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
    ) -> HttpResponse {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();

        let mut request = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", method, path, addr);
        for (name, value) in headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).unwrap();

        Self::read_response(stream)
    }

    fn read_response(mut stream: TcpStream) -> HttpResponse {
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).unwrap();

        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response head terminator");
        let head = String::from_utf8(raw[..split].to_vec()).unwrap();
        let body = raw[split + 4..].to_vec();

        let mut lines = head.split("\r\n");
        let status_code = lines
            .next()
            .unwrap()
            .split_whitespace()
            .nth(1)
            .unwrap()
            .parse::<u16>()
            .unwrap();

        let headers = lines
            .filter_map(|line| line.split_once(": "))
            .map(|(key, value)| (key.to_lowercase(), value.to_string()))
            .collect();

        HttpResponse {
            status_code,
            headers,
            body,
        }
    }
}

struct HttpResponse {
    status_code: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpResponse {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[test]
fn test_directory_listing() {
    let server = TestServer::new();
    let response = server.get("/");

    assert_eq!(response.status_code, 200);
    assert_eq!(response.headers["content-type"], "text/html; charset=utf-8");
    let body = response.text();
    assert!(body.contains("test.txt"));
    assert!(body.contains("href=\"/subdir/\""));
    assert!(body.contains("href=\"/with%20space/\""));
    assert!(body.contains("File Server - /"));
    assert!(!body.contains("<span class=\"name\">..</span>"));
}

#[test]
fn test_listing_order_is_stable() {
    let server = TestServer::new();
    let first = server.get("/").text();
    let second = server.get("/").text();

    let rows = |html: &str| -> Vec<String> {
        html.lines()
            .filter(|line| line.contains("class=\"file-link\""))
            .map(|line| line.trim().to_string())
            .collect()
    };
    assert_eq!(rows(&first), rows(&second));

    let empty = first.find("/empty/").unwrap();
    let subdir = first.find("/subdir/").unwrap();
    let spaced = first.find("/with%20space/").unwrap();
    let large = first.find("/large.bin").unwrap();
    let test = first.find("/test.txt").unwrap();
    assert!(empty < subdir && subdir < spaced && spaced < large && large < test);
}

#[test]
fn test_empty_directory_listing() {
    let server = TestServer::new();
    let response = server.get("/empty/");
    assert_eq!(response.status_code, 200);
    assert!(response.text().contains("0 entries"));
}

#[test]
fn test_nested_directory_access() {
    let server = TestServer::new();

    let response = server.get("/subdir/");
    assert_eq!(response.status_code, 200);
    let body = response.text();
    assert!(body.contains("nested.txt"));
    assert!(body.contains("href=\"/subdir/nested.txt\""));
    assert!(body.contains("<span class=\"name\">..</span>"));

    let response = server.get("/subdir/nested.txt");
    assert_eq!(response.status_code, 200);
    assert_eq!(response.text(), "Nested file content\n");

    let response = server.get("/with%20space/");
    assert_eq!(response.status_code, 200);
}

#[test]
fn test_path_traversal_security() {
    let server = TestServer::new();

    for path in [
        "/../escape",
        "/../../etc/passwd",
        "/../../../",
        "/subdir/../../outside.txt",
        "/%2e%2e/%2e%2e/etc/passwd",
        "//etc/passwd",
    ] {
        let response = server.get(path);
        assert_eq!(response.status_code, 403, "{path} must be forbidden");
        let root = server.temp_dir.path().to_string_lossy().into_owned();
        assert!(!response.text().contains(&root));
    }

    // Dot segments that stay inside the root are fine.
    assert_eq!(server.get("/subdir/../test.txt").status_code, 200);
}

#[test]
fn test_not_found() {
    let server = TestServer::new();
    let response = server.get("/nonexistent");
    assert_eq!(response.status_code, 404);
    assert!(response.text().contains("404"));
    assert!(response.text().contains("Not Found"));
}

#[test]
fn test_post_is_method_not_allowed_regardless_of_path() {
    let server = TestServer::new();
    for path in ["/", "/test.txt", "/../escape", "/missing"] {
        let response = HttpClient::request(server.addr, "POST", path, &[("Content-Length", "0")]);
        assert_eq!(response.status_code, 405, "POST {path}");
    }
}

#[test]
fn test_large_file_handling() {
    let server = TestServer::new();
    let response = server.get("/large.bin");

    assert_eq!(response.status_code, 200);
    assert_eq!(response.headers["content-length"], "262144");
    assert_eq!(response.headers["content-type"], "application/octet-stream");
    assert_eq!(response.body.len(), 262144);
    assert!(response.body.chunks(256).all(|chunk| chunk[0] == 0 && chunk[255] == 255));
}

#[test]
fn test_conditional_and_range_requests() {
    let server = TestServer::new();
    let response = server.get("/test.txt");
    let last_modified = response.headers["last-modified"].clone();
    assert_eq!(response.headers["accept-ranges"], "bytes");
    assert_eq!(response.headers["content-length"], "22");

    let response = HttpClient::request(
        server.addr,
        "GET",
        "/test.txt",
        &[("If-Modified-Since", &last_modified)],
    );
    assert_eq!(response.status_code, 304);
    assert!(response.body.is_empty());

    let response =
        HttpClient::request(server.addr, "GET", "/large.bin", &[("Range", "bytes=256-511")]);
    assert_eq!(response.status_code, 206);
    assert_eq!(response.headers["content-range"], "bytes 256-511/262144");
    assert_eq!(response.body, (0..=255u8).collect::<Vec<_>>());

    let response =
        HttpClient::request(server.addr, "GET", "/large.bin", &[("Range", "bytes=0-0,-1")]);
    assert_eq!(response.status_code, 206);
    assert!(response.headers["content-type"].starts_with("multipart/byteranges; boundary="));
    assert_eq!(
        response.headers["content-length"].parse::<usize>().unwrap(),
        response.body.len()
    );
    assert!(response.text().contains("Content-Range: bytes 262143-262143/262144"));
}

#[test]
fn test_http_compliance() {
    let server = TestServer::new();
    let response = server.get("/test.txt");

    assert_eq!(response.status_code, 200);
    assert!(response.headers.contains_key("content-type"));
    assert!(response.headers.contains_key("content-length"));
    assert!(response.headers.contains_key("date"));
    assert_eq!(response.headers["connection"], "close");
    assert!(response.headers["server"].starts_with("dir_sv/"));
}

#[test]
fn test_malformed_requests() {
    let server = TestServer::new();

    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(b"INVALID REQUEST\r\n\r\n").unwrap();
    let response = HttpClient::read_response(stream);
    assert_eq!(response.status_code, 400);

    // The server keeps serving after a bad request.
    assert_eq!(server.get("/test.txt").status_code, 200);
}

#[test]
fn test_empty_connection_is_harmless() {
    let server = TestServer::new();
    drop(TcpStream::connect(server.addr).unwrap());
    assert_eq!(server.get("/").status_code, 200);
}

#[test]
fn test_stalled_request_times_out() {
    let server = TestServer::with_timeouts(Duration::from_secs(1), Duration::from_secs(5));

    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(b"GET /test.txt HTTP/1.1\r\nHost: x\r\n").unwrap();

    let response = HttpClient::read_response(stream);
    assert_eq!(response.status_code, 408);
}

#[test]
fn test_trickled_request_head_times_out() {
    let server = TestServer::with_timeouts(Duration::from_secs(1), Duration::from_secs(5));

    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_millis(250))).unwrap();
    stream.write_all(b"GET /test.txt HTTP/1.1\r\nX-Slow: ").unwrap();

    // One byte every ~250ms keeps each individual read well under the timeout.
    let started = Instant::now();
    let mut received = Vec::new();
    let mut buffer = [0u8; 1024];
    while started.elapsed() < Duration::from_secs(6) {
        let _ = stream.write_all(b"a");
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => received.extend_from_slice(&buffer[..n]),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if !received.is_empty() {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    assert!(started.elapsed() < Duration::from_secs(4));
    let response = String::from_utf8_lossy(&received);
    assert!(response.starts_with("HTTP/1.1 408"), "got: {response}");

    // The worker was released and the server still answers.
    assert_eq!(server.get("/test.txt").status_code, 200);
}

#[test]
fn test_concurrent_requests() {
    let server = TestServer::new();
    let addr = server.addr;

    let handles: Vec<_> = (0..10)
        .map(|i| {
            thread::spawn(move || {
                let path = if i % 2 == 0 { "/test.txt" } else { "/" };
                HttpClient::request(addr, "GET", path, &[]).status_code
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 200);
    }
}

#[test]
fn test_shutdown_closes_lingering_connections() {
    let mut server = TestServer::with_timeouts(Duration::from_secs(30), Duration::from_millis(500));

    let mut lingering = TcpStream::connect(server.addr).unwrap();
    lingering.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    lingering.write_all(b"GET / HTTP/1.1\r\n").unwrap();
    // Give the pool a moment to pick the connection up.
    thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    server.shutdown_tx.send(()).unwrap();
    server.handle.take().unwrap().join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    let mut rest = Vec::new();
    let _ = lingering.read_to_end(&mut rest);
    assert!(rest.is_empty());
}
