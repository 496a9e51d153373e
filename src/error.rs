use std::fmt;
use std::io::ErrorKind;

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    AddrParse(std::net::AddrParseError),
    DirectoryNotFound(String),
    NotADirectory(String),
    DirectoryUnreadable(String, std::io::Error),
    Bind(String, std::io::Error),
    Forbidden,
    NotFound,
    BadRequest,
    MethodNotAllowed,
    Timeout,
    PreconditionFailed,
    /// Carries the file size when the range failed to overlap the content.
    RangeNotSatisfiable(Option<u64>),
    StorageUnavailable(String),
    Render(String),
    InternalServerError(String),
}

impl AppError {
    /// HTTP status code a request failing with this error is answered with.
    pub fn status(&self) -> u16 {
        match self {
            AppError::Io(err) => match err.kind() {
                ErrorKind::NotFound | ErrorKind::NotADirectory => 404,
                ErrorKind::PermissionDenied => 403,
                ErrorKind::TimedOut | ErrorKind::WouldBlock => 408,
                _ => 500,
            },
            AppError::Forbidden => 403,
            AppError::NotFound => 404,
            AppError::BadRequest => 400,
            AppError::MethodNotAllowed => 405,
            AppError::Timeout => 408,
            AppError::PreconditionFailed => 412,
            AppError::RangeNotSatisfiable(_) => 416,
            AppError::StorageUnavailable(_) => 503,
            AppError::AddrParse(_)
            | AppError::DirectoryNotFound(_)
            | AppError::NotADirectory(_)
            | AppError::DirectoryUnreadable(..)
            | AppError::Bind(..)
            | AppError::Render(_)
            | AppError::InternalServerError(_) => 500,
        }
    }

    /// True for failures that point at the server rather than the client.
    pub fn is_server_fault(&self) -> bool {
        self.status() >= 500
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "IO error: {err}"),
            AppError::AddrParse(err) => write!(f, "Address parse error: {err}"),
            AppError::DirectoryNotFound(path) => write!(f, "Root directory does not exist: {path}"),
            AppError::NotADirectory(path) => write!(f, "Root path is not a directory: {path}"),
            AppError::DirectoryUnreadable(path, err) => {
                write!(f, "Cannot read root directory {path}: {err}")
            }
            AppError::Bind(addr, err) => write!(f, "Failed to listen on {addr}: {err}"),
            AppError::Forbidden => write!(f, "Forbidden"),
            AppError::NotFound => write!(f, "Not Found"),
            AppError::BadRequest => write!(f, "Bad request"),
            AppError::MethodNotAllowed => write!(f, "Method not allowed"),
            AppError::Timeout => write!(f, "Request timeout"),
            AppError::PreconditionFailed => write!(f, "Precondition failed"),
            AppError::RangeNotSatisfiable(_) => write!(f, "Range not satisfiable"),
            AppError::StorageUnavailable(msg) => {
                write!(f, "Storage temporarily unavailable: {msg}")
            }
            AppError::Render(msg) => write!(f, "Template rendering failed: {msg}"),
            AppError::InternalServerError(msg) => write!(f, "Internal server error: {msg}"),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<std::net::AddrParseError> for AppError {
    fn from(err: std::net::AddrParseError) -> Self {
        AppError::AddrParse(err)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Io(err) | AppError::DirectoryUnreadable(_, err) | AppError::Bind(_, err) => {
                Some(err)
            }
            AppError::AddrParse(err) => Some(err),
            _ => None,
        }
    }
}
