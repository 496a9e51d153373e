use crate::error::AppError;
use crate::templates::{get_error_description, PageRenderer};
use log::{debug, error, warn};
use std::fs::File;
use std::io::{prelude::*, SeekFrom};
use std::path::Path;
use std::time::{Instant, SystemTime};

pub const SERVER_NAME: &str = concat!("dir_sv/", env!("CARGO_PKG_VERSION"));

/// Native MIME type detection for common file types
pub fn get_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("xml") => "text/xml; charset=utf-8",
        Some("txt") | Some("log") => "text/plain; charset=utf-8",
        Some("md") => "text/markdown; charset=utf-8",
        Some("csv") => "text/csv; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("gz") => "application/gzip",
        Some("wasm") => "application/wasm",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}

pub fn status_text(status_code: u16) -> &'static str {
    match status_code {
        200 => "OK",
        206 => "Partial Content",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        412 => "Precondition Failed",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// A piece of a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyPart {
    Bytes(Vec<u8>),
    /// `len` bytes of the response's file, starting at `start`.
    Segment { start: u64, len: u64 },
}

impl BodyPart {
    fn len(&self) -> u64 {
        match self {
            BodyPart::Bytes(bytes) => bytes.len() as u64,
            BodyPart::Segment { len, .. } => *len,
        }
    }
}

#[derive(Debug)]
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    /// The file handle is owned by the response and closed when it drops,
    /// whichever way sending ends.
    File { file: File, parts: Vec<BodyPart> },
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Bytes(bytes) => bytes.len() as u64,
            Body::File { parts, .. } => parts.iter().map(BodyPart::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// HTTP response builder
#[derive(Debug)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    /// 304 responses describe a body they do not carry.
    pub omit_content_length: bool,
}

impl HttpResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            status_text: status_text(status_code).to_string(),
            headers: vec![
                ("Server".to_string(), SERVER_NAME.to_string()),
                ("Date".to_string(), httpdate::fmt_http_date(SystemTime::now())),
                ("Connection".to_string(), "close".to_string()),
            ],
            body: Body::Empty,
            omit_content_length: false,
        }
    }

    pub fn with_html_body(mut self, body: String) -> Self {
        self.headers.push((
            "Content-Type".to_string(),
            "text/html; charset=utf-8".to_string(),
        ));
        self.body = Body::Bytes(body.into_bytes());
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn add_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn without_content_length(mut self) -> Self {
        self.omit_content_length = true;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn head_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.status_text);
        if !self.omit_content_length {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");
        head.into_bytes()
    }

    /// Writes the response and streams any file body in `chunk_size` pieces.
    /// Gives up with `AppError::Timeout` once `transfer_deadline` passes.
    pub fn send<W: Write>(
        self,
        stream: &mut W,
        chunk_size: usize,
        transfer_deadline: Instant,
        log_prefix: &str,
    ) -> Result<(), AppError> {
        debug!(
            "{} Sending response - Status: {}, Body Length: {}",
            log_prefix,
            self.status_code,
            self.body.len()
        );

        stream.write_all(&self.head_bytes()).map_err(|e| {
            error!("{log_prefix} Failed to write response headers: {e}");
            AppError::Io(e)
        })?;

        match self.body {
            Body::Empty => {}
            Body::Bytes(bytes) => stream.write_all(&bytes)?,
            Body::File { mut file, parts } => {
                let mut buffer = vec![0; chunk_size.max(1)];
                for part in parts {
                    match part {
                        BodyPart::Bytes(bytes) => stream.write_all(&bytes)?,
                        BodyPart::Segment { start, len } => copy_segment(
                            &mut file,
                            stream,
                            start,
                            len,
                            &mut buffer,
                            transfer_deadline,
                            log_prefix,
                        )?,
                    }
                }
            }
        }

        stream.flush().map_err(|e| {
            error!("{log_prefix} Failed to flush response: {e}");
            AppError::Io(e)
        })?;

        Ok(())
    }
}

fn copy_segment<W: Write>(
    file: &mut File,
    stream: &mut W,
    start: u64,
    len: u64,
    buffer: &mut [u8],
    transfer_deadline: Instant,
    log_prefix: &str,
) -> Result<(), AppError> {
    file.seek(SeekFrom::Start(start))?;

    let mut bytes_remaining = len;
    while bytes_remaining > 0 {
        if Instant::now() >= transfer_deadline {
            warn!("{log_prefix} Transfer deadline exceeded with {bytes_remaining} bytes left");
            return Err(AppError::Timeout);
        }

        let to_read = bytes_remaining.min(buffer.len() as u64) as usize;
        let bytes_read = file.read(&mut buffer[..to_read])?;
        if bytes_read == 0 {
            // File shrank after Content-Length went out.
            return Err(AppError::InternalServerError(format!(
                "file ended with {bytes_remaining} bytes still announced"
            )));
        }
        stream.write_all(&buffer[..bytes_read])?;
        bytes_remaining -= bytes_read as u64;
    }

    Ok(())
}

/// Builds an error response for `err`, rendering the HTML error page.
/// Falls back to a minimal inline page if the template cannot be rendered.
pub fn create_error_response(err: &AppError, renderer: &dyn PageRenderer) -> HttpResponse {
    let status_code = err.status();
    let reason = status_text(status_code);
    let description = get_error_description(status_code);

    let page = renderer
        .render_error(status_code, reason, description)
        .unwrap_or_else(|e| {
            warn!("Error page rendering failed, using fallback: {e}");
            format!(
                r#"<!DOCTYPE html>
<html>
<head><title>Error {status_code}</title></head>
<body><h1>{status_code}</h1><p>{reason}</p><a href="/">Back to Files</a></body>
</html>"#
            )
        });

    let mut response = HttpResponse::new(status_code)
        .add_header("Cache-Control", "no-cache")
        .add_header("X-Content-Type-Options", "nosniff")
        .with_html_body(page);

    match err {
        AppError::MethodNotAllowed => response = response.add_header("Allow", "GET"),
        AppError::RangeNotSatisfiable(Some(size)) => {
            response = response.add_header("Content-Range", format!("bytes */{size}"))
        }
        _ => {}
    }

    response
}
