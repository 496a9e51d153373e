use crate::config::ServerConfig;
use crate::error::AppError;
use crate::response::create_error_response;
use crate::router::Router;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::{self, prelude::*, BufReader, ErrorKind};
use std::net::TcpStream;
use std::time::Instant;

const MAX_LINE_LENGTH: u64 = 8 * 1024;
const MAX_HEADERS: usize = 100;
const MAX_DISCARDED_BODY: u64 = 64 * 1024;

/// A parsed request head. Header names are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: HashMap<String, String>,
}

impl Request {
    pub fn new(method: &str, target: &str) -> Self {
        Request {
            method: method.to_string(),
            target: target.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Percent-decoded path of the target, without query or fragment.
    pub fn decoded_path(&self) -> Result<String, AppError> {
        let path = self
            .target
            .split(['?', '#'])
            .next()
            .unwrap_or_default();

        if !path.starts_with('/') {
            return Err(AppError::BadRequest);
        }

        urlencoding::decode(path)
            .map(|decoded| decoded.into_owned())
            .map_err(|_| AppError::BadRequest)
    }
}

/// Reads one request head. `Ok(None)` means the peer closed the connection
/// without sending anything.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Option<Request>, AppError> {
    let request_line = match read_line_limited(reader)? {
        Some(line) => line,
        None => return Ok(None),
    };

    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version), None) if version.starts_with("HTTP/") => {
            (method, target, version)
        }
        _ => return Err(AppError::BadRequest),
    };

    let mut request = Request {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers: HashMap::new(),
    };

    loop {
        let line = read_line_limited(reader)?.ok_or(AppError::BadRequest)?;
        if line.is_empty() {
            break;
        }
        if request.headers.len() >= MAX_HEADERS {
            return Err(AppError::BadRequest);
        }
        let (name, value) = line.split_once(':').ok_or(AppError::BadRequest)?;
        request
            .headers
            .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Ok(Some(request))
}

fn read_line_limited<R: BufRead>(reader: &mut R) -> Result<Option<String>, AppError> {
    let mut raw = Vec::new();
    let read = reader
        .take(MAX_LINE_LENGTH)
        .read_until(b'\n', &mut raw)
        .map_err(map_read_error)?;

    if read == 0 {
        return Ok(None);
    }
    if !raw.ends_with(b"\n") {
        // Either the line is too long or the peer stopped mid-line.
        return Err(AppError::BadRequest);
    }

    let line = String::from_utf8(raw).map_err(|_| AppError::BadRequest)?;
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn map_read_error(err: std::io::Error) -> AppError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => AppError::Timeout,
        _ => AppError::Io(err),
    }
}

/// Reads and drops a small request body so closing the socket does not
/// reset the connection before the client has read the response.
fn discard_body<R: BufRead>(reader: &mut R, request: &Request, log_prefix: &str) {
    let Some(length) = request
        .header("content-length")
        .and_then(|value| value.parse::<u64>().ok())
    else {
        return;
    };

    if length == 0 || length > MAX_DISCARDED_BODY {
        return;
    }

    if let Err(e) = std::io::copy(&mut reader.take(length), &mut std::io::sink()) {
        debug!("{log_prefix} Failed to discard request body: {e}");
    }
}

/// Reads from the socket against one deadline for the whole request head,
/// shrinking the socket timeout before every read so a client trickling
/// bytes cannot keep the connection open past it.
struct DeadlineReader<'a> {
    stream: &'a TcpStream,
    deadline: Instant,
}

impl Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::from(ErrorKind::TimedOut));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

/// Handles a single client connection: one request, one response.
pub fn handle_client(
    mut stream: TcpStream,
    router: &Router,
    config: &ServerConfig,
    log_prefix: &str,
) -> Result<(), AppError> {
    stream.set_write_timeout(Some(config.transfer_timeout))?;
    let read_deadline = Instant::now() + config.request_timeout;

    let parsed = {
        let mut reader = BufReader::new(DeadlineReader {
            stream: &stream,
            deadline: read_deadline,
        });
        let parsed = read_request(&mut reader);
        if let Ok(Some(request)) = &parsed {
            discard_body(&mut reader, request, log_prefix);
        }
        parsed
    };

    let response = match parsed {
        Ok(Some(request)) => {
            debug!(
                "{} Request line: {} {} {}",
                log_prefix, request.method, request.target, request.version
            );
            let response = router.handle(&request, log_prefix);
            info!(
                "{} {} {} -> {}",
                log_prefix, request.method, request.target, response.status_code
            );
            response
        }
        Ok(None) => {
            debug!("{log_prefix} Connection closed before a request was sent");
            return Ok(());
        }
        Err(e) => {
            warn!("{log_prefix} Failed to read request: {e}");
            create_error_response(&e, router.renderer())
        }
    };

    let transfer_deadline = Instant::now() + config.transfer_timeout;
    response.send(&mut stream, config.chunk_size, transfer_deadline, log_prefix)
}
