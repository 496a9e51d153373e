use crate::cli::Cli;
use crate::error::AppError;
use std::fs;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process-wide configuration, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Canonical absolute path of the served directory.
    pub root: PathBuf,
    pub listen: IpAddr,
    pub port: u16,
    pub threads: usize,
    pub chunk_size: usize,
    pub request_timeout: Duration,
    pub transfer_timeout: Duration,
    pub shutdown_grace: Duration,
    pub check_mount: bool,
}

impl ServerConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, AppError> {
        let root = validate_root_directory(&cli.root)?;
        let listen: IpAddr = cli.listen.trim().parse()?;

        Ok(ServerConfig {
            root,
            listen,
            port: cli.port,
            threads: cli.threads.max(1),
            chunk_size: cli.chunk_size.max(512),
            request_timeout: Duration::from_secs(cli.request_timeout.max(1)),
            transfer_timeout: Duration::from_secs(cli.transfer_timeout.max(1)),
            shutdown_grace: Duration::from_secs(cli.shutdown_grace),
            check_mount: cli.check_mount,
        })
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.port)
    }
}

/// Checks that `root` exists, is a directory and can be enumerated, and
/// returns its canonical form.
pub fn validate_root_directory(root: &Path) -> Result<PathBuf, AppError> {
    let shown = root.display().to_string();

    let metadata = fs::metadata(root).map_err(|e| match e.kind() {
        ErrorKind::NotFound => AppError::DirectoryNotFound(shown.clone()),
        _ => AppError::DirectoryUnreadable(shown.clone(), e),
    })?;

    if !metadata.is_dir() {
        return Err(AppError::NotADirectory(shown));
    }

    let canonical = root
        .canonicalize()
        .map_err(|e| AppError::DirectoryUnreadable(shown.clone(), e))?;

    // Listing permission is separate from stat permission.
    fs::read_dir(&canonical).map_err(|e| AppError::DirectoryUnreadable(shown, e))?;

    Ok(canonical)
}
