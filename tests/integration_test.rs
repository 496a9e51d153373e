use dir_sv::config::{validate_root_directory, ServerConfig};
use dir_sv::error::AppError;
use dir_sv::server::run_server;
use reqwest::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, IF_MODIFIED_SINCE,
    LAST_MODIFIED, RANGE,
};
use std::fs::{self, File};
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::tempdir;

struct TestServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
    _temp_dir: tempfile::TempDir,
}

fn setup_test_server() -> TestServer {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("test.txt");
    let mut file = File::create(&file_path).unwrap();
    writeln!(file, "hello world").unwrap();
    fs::create_dir(dir.path().join("docs")).unwrap();
    File::create(dir.path().join("docs").join("guide.md")).unwrap();

    let config = ServerConfig {
        root: validate_root_directory(dir.path()).unwrap(),
        listen: Ipv4Addr::LOCALHOST.into(),
        port: 0, // Use port 0 to let the OS pick a free port
        threads: 2,
        chunk_size: 1024,
        request_timeout: Duration::from_secs(5),
        transfer_timeout: Duration::from_secs(10),
        shutdown_grace: Duration::from_secs(2),
        check_mount: false,
    };

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let (addr_tx, addr_rx) = mpsc::channel();

    let server_handle = thread::spawn(move || {
        if let Err(e) = run_server(config, Some(shutdown_rx), Some(addr_tx)) {
            eprintln!("Server thread failed: {e}");
        }
    });

    let server_addr = addr_rx.recv().unwrap();

    TestServer {
        addr: server_addr,
        shutdown_tx,
        handle: Some(server_handle),
        _temp_dir: dir,
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shutdown_tx.send(()).ok(); // Use ok() to avoid panic on shutdown
            handle.join().unwrap();
        }
    }
}

#[test]
fn test_server_requests() {
    let server = setup_test_server();
    let client = reqwest::blocking::Client::new();

    // 1. Directory listing
    let res = client
        .get(format!("http://{}/", server.addr))
        .send()
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(
        res.headers()[CACHE_CONTROL],
        "no-cache, no-store, must-revalidate"
    );
    let body = res.text().unwrap();
    assert!(body.contains("test.txt"));
    assert!(body.contains("href=\"/docs/\""));
    assert!(body.find("docs").unwrap() < body.find("test.txt").unwrap());

    // 2. File download
    let res = client
        .get(format!("http://{}/test.txt", server.addr))
        .send()
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()[CONTENT_LENGTH], "12");
    assert_eq!(res.headers()[ACCEPT_RANGES], "bytes");
    assert!(res.headers().contains_key(LAST_MODIFIED));
    assert_eq!(res.text().unwrap(), "hello world\n");

    // 3. Not found
    let res = client
        .get(format!("http://{}/not_found.txt", server.addr))
        .send()
        .unwrap();
    assert_eq!(res.status(), 404);
    assert!(res.text().unwrap().contains("404"));
}

#[test]
fn test_conditional_get_returns_not_modified() {
    let server = setup_test_server();
    let client = reqwest::blocking::Client::new();
    let url = format!("http://{}/test.txt", server.addr);

    let first = client.get(&url).send().unwrap();
    let last_modified = first.headers()[LAST_MODIFIED].clone();

    let res = client
        .get(&url)
        .header(IF_MODIFIED_SINCE, last_modified)
        .send()
        .unwrap();
    assert_eq!(res.status(), 304);
    assert!(res.bytes().unwrap().is_empty());
}

#[test]
fn test_range_request() {
    let server = setup_test_server();
    let client = reqwest::blocking::Client::new();

    let res = client
        .get(format!("http://{}/test.txt", server.addr))
        .header(RANGE, "bytes=6-10")
        .send()
        .unwrap();
    assert_eq!(res.status(), 206);
    assert_eq!(res.headers()[CONTENT_RANGE], "bytes 6-10/12");
    assert_eq!(res.text().unwrap(), "world");

    let res = client
        .get(format!("http://{}/test.txt", server.addr))
        .header(RANGE, "bytes=100-")
        .send()
        .unwrap();
    assert_eq!(res.status(), 416);
    assert_eq!(res.headers()[CONTENT_RANGE], "bytes */12");
}

#[test]
fn test_non_get_methods_are_rejected() {
    let server = setup_test_server();
    let client = reqwest::blocking::Client::new();

    for url in [
        format!("http://{}/test.txt", server.addr),
        format!("http://{}/docs/", server.addr),
        format!("http://{}/does/not/exist", server.addr),
    ] {
        let res = client.post(&url).body("payload").send().unwrap();
        assert_eq!(res.status(), 405);
        assert_eq!(res.headers()["allow"], "GET");
    }

    let res = client
        .delete(format!("http://{}/test.txt", server.addr))
        .send()
        .unwrap();
    assert_eq!(res.status(), 405);
}

#[test]
fn test_nested_listing_has_parent_link() {
    let server = setup_test_server();
    let body = reqwest::blocking::get(format!("http://{}/docs/", server.addr))
        .unwrap()
        .text()
        .unwrap();

    assert!(body.contains("guide.md"));
    assert!(body.contains("href=\"/docs/guide.md\""));
    assert!(body.contains("<span class=\"name\">..</span>"));
}

#[test]
fn test_bind_failure_is_reported() {
    let dir = tempdir().unwrap();
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let config = ServerConfig {
        root: validate_root_directory(dir.path()).unwrap(),
        listen: Ipv4Addr::LOCALHOST.into(),
        port,
        threads: 1,
        chunk_size: 1024,
        request_timeout: Duration::from_secs(1),
        transfer_timeout: Duration::from_secs(1),
        shutdown_grace: Duration::from_secs(1),
        check_mount: false,
    };

    let result = run_server(config, None, None);
    assert!(matches!(result, Err(AppError::Bind(..))));
}
