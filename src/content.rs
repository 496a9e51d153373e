//! File responses: validators, conditional requests and byte ranges.
//!
//! Precondition and range handling follow the usual static-file semantics:
//! `If-Match`/`If-Unmodified-Since` can fail with 412, `If-None-Match`/
//! `If-Modified-Since` can short-circuit to 304, `If-Range` decides whether a
//! `Range` header is honoured, and satisfiable ranges yield 206 with either a
//! single `Content-Range` or a `multipart/byteranges` body. No entity tags are
//! produced, so tag comparisons never match.

use crate::error::AppError;
use crate::http::Request;
use crate::response::{get_mime_type, Body, BodyPart, HttpResponse};
use log::debug;
use rand::Rng;
use std::fs::{File, Metadata};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An opened file and the metadata read from the same handle.
#[derive(Debug)]
pub struct FileDetails {
    pub path: PathBuf,
    pub file: File,
    pub metadata: Metadata,
}

impl FileDetails {
    pub fn open(path: PathBuf) -> Result<Self, AppError> {
        let file = File::open(&path).map_err(classify_open_error)?;
        let metadata = file.metadata()?;
        Ok(FileDetails {
            path,
            file,
            metadata,
        })
    }
}

fn classify_open_error(err: std::io::Error) -> AppError {
    match err.kind() {
        ErrorKind::NotFound => AppError::NotFound,
        ErrorKind::PermissionDenied => AppError::Forbidden,
        _ => AppError::Io(err),
    }
}

/// A satisfiable byte range, `length` bytes from `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn content_range(&self, size: u64) -> String {
        format!(
            "bytes {}-{}/{}",
            self.start,
            self.start + self.length - 1,
            size
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Serve the content; `honour_range` is false when `If-Range` failed.
    Proceed { honour_range: bool },
    NotModified,
    Failed,
}

/// Builds the response for an opened regular file.
pub fn serve_file(details: FileDetails, request: &Request) -> Result<HttpResponse, AppError> {
    let FileDetails {
        path,
        file,
        metadata,
    } = details;

    if metadata.is_dir() {
        return Err(AppError::BadRequest);
    }

    let size = metadata.len();
    let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
    let content_type = get_mime_type(&path);

    let response = HttpResponse::new(200)
        .add_header("Last-Modified", httpdate::fmt_http_date(modified))
        .add_header("Accept-Ranges", "bytes");

    let honour_range = match evaluate_preconditions(request, modified) {
        Precondition::Failed => return Err(AppError::PreconditionFailed),
        Precondition::NotModified => {
            debug!("Not modified: '{}'", path.display());
            let mut response = response.without_content_length();
            response.status_code = 304;
            response.status_text = "Not Modified".to_string();
            return Ok(response);
        }
        Precondition::Proceed { honour_range } => honour_range,
    };

    let ranges = match request.header("range").filter(|_| honour_range) {
        Some(header) => parse_range(header, size)?,
        None => Vec::new(),
    };
    // Overlapping ranges that add up to more than the file are not worth it.
    let ranges = if total_length(&ranges) > size {
        Vec::new()
    } else {
        ranges
    };

    match ranges.as_slice() {
        [] => Ok(response
            .add_header("Content-Type", content_type)
            .with_body(Body::File {
                file,
                parts: vec![BodyPart::Segment {
                    start: 0,
                    len: size,
                }],
            })),
        [range] => {
            let mut response = response
                .add_header("Content-Type", content_type)
                .add_header("Content-Range", range.content_range(size))
                .with_body(Body::File {
                    file,
                    parts: vec![BodyPart::Segment {
                        start: range.start,
                        len: range.length,
                    }],
                });
            response.status_code = 206;
            response.status_text = "Partial Content".to_string();
            Ok(response)
        }
        many => {
            let boundary = generate_boundary();
            let parts = multipart_parts(many, size, content_type, &boundary);
            let mut response = response
                .add_header(
                    "Content-Type",
                    format!("multipart/byteranges; boundary={boundary}"),
                )
                .with_body(Body::File { file, parts });
            response.status_code = 206;
            response.status_text = "Partial Content".to_string();
            Ok(response)
        }
    }
}

/// Evaluates the conditional request headers against `modified`.
pub fn evaluate_preconditions(request: &Request, modified: SystemTime) -> Precondition {
    let modified = truncate_to_seconds(modified);
    let dated = modified != UNIX_EPOCH;

    let mut matched = request.header("if-match").map(list_contains_wildcard);
    if matched.is_none() && dated {
        matched = request
            .header("if-unmodified-since")
            .and_then(parse_date)
            .map(|since| modified <= since);
    }
    if matched == Some(false) {
        return Precondition::Failed;
    }

    match request.header("if-none-match") {
        Some(value) => {
            if list_contains_wildcard(value) {
                return Precondition::NotModified;
            }
        }
        None => {
            let unchanged = dated
                && request
                    .header("if-modified-since")
                    .and_then(parse_date)
                    .is_some_and(|since| modified <= since);
            if unchanged {
                return Precondition::NotModified;
            }
        }
    }

    let honour_range = match request.header("if-range").map(str::trim) {
        None => true,
        Some(value) if value.starts_with('"') || value.starts_with("W/") => false,
        Some(value) => dated && parse_date(value).is_some_and(|date| date == modified),
    };

    Precondition::Proceed { honour_range }
}

/// Parses a `Range` header against a file of `size` bytes.
///
/// Ranges starting at or past the end are dropped; if nothing is left the
/// error carries `size` so the response can advertise it.
pub fn parse_range(header: &str, size: u64) -> Result<Vec<ByteRange>, AppError> {
    let specs = header
        .strip_prefix("bytes=")
        .ok_or(AppError::RangeNotSatisfiable(None))?;

    let mut ranges = Vec::new();
    let mut no_overlap = false;

    for spec in specs.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (start, end) = spec
            .split_once('-')
            .ok_or(AppError::RangeNotSatisfiable(None))?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            // Suffix range: the last `end` bytes.
            let suffix = parse_offset(end)?;
            if suffix == 0 || size == 0 {
                no_overlap = true;
                continue;
            }
            let suffix = suffix.min(size);
            ranges.push(ByteRange {
                start: size - suffix,
                length: suffix,
            });
            continue;
        }

        let start = parse_offset(start)?;
        if start >= size {
            no_overlap = true;
            continue;
        }

        let length = if end.is_empty() {
            size - start
        } else {
            let end = parse_offset(end)?;
            if start > end {
                return Err(AppError::RangeNotSatisfiable(None));
            }
            end.min(size - 1) - start + 1
        };
        ranges.push(ByteRange { start, length });
    }

    if no_overlap && ranges.is_empty() {
        return Err(AppError::RangeNotSatisfiable(Some(size)));
    }

    Ok(ranges)
}

fn parse_offset(value: &str) -> Result<u64, AppError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::RangeNotSatisfiable(None));
    }
    value
        .parse::<u64>()
        .map_err(|_| AppError::RangeNotSatisfiable(None))
}

fn total_length(ranges: &[ByteRange]) -> u64 {
    ranges
        .iter()
        .fold(0u64, |acc, range| acc.saturating_add(range.length))
}

fn multipart_parts(
    ranges: &[ByteRange],
    size: u64,
    content_type: &str,
    boundary: &str,
) -> Vec<BodyPart> {
    let mut parts = Vec::with_capacity(ranges.len() * 2 + 1);
    for (index, range) in ranges.iter().enumerate() {
        let separator = if index == 0 { "" } else { "\r\n" };
        let header = format!(
            "{separator}--{boundary}\r\nContent-Range: {}\r\nContent-Type: {content_type}\r\n\r\n",
            range.content_range(size)
        );
        parts.push(BodyPart::Bytes(header.into_bytes()));
        parts.push(BodyPart::Segment {
            start: range.start,
            len: range.length,
        });
    }
    parts.push(BodyPart::Bytes(format!("\r\n--{boundary}--\r\n").into_bytes()));
    parts
}

fn generate_boundary() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn list_contains_wildcard(value: &str) -> bool {
    value.split(',').any(|tag| tag.trim() == "*")
}

fn parse_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value.trim()).ok()
}

fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => UNIX_EPOCH + Duration::from_secs(elapsed.as_secs()),
        Err(_) => UNIX_EPOCH,
    }
}

