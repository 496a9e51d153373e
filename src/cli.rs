use clap::Parser;
use std::path::PathBuf;

// Command-line interface. Everything here is turned into an immutable
// `ServerConfig` once at startup; nothing reads these values at request time.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dir_sv",
    version,
    about = "A minimal HTTP server for browsing and downloading a directory tree.",
    long_about = "Serves a single directory tree over HTTP.\n Directory requests render an HTML listing (directories first, then files, sorted by name).\n File requests stream the file with Last-Modified, Content-Length and Accept-Ranges headers and honour If-Modified-Since and Range requests.\n Requests that would escape the root directory are answered with 403 Forbidden.\n Only GET is accepted; every other method is answered with 405 Method Not Allowed.\n\nExamples:\n  dir_sv --root /var/www --port 8080\n  dir_sv --root /home/user/documents\n  dir_sv --root /mnt/external-drive --check-mount\n"
)]
pub struct Cli {
    /// Root directory to serve
    #[arg(short, long, default_value = ".")]
    pub root: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// IP address to listen on (e.g. "127.0.0.1" for local only, "::" for all IPv6)
    #[arg(short, long, default_value = "0.0.0.0")]
    pub listen: String,

    /// Number of worker threads handling connections
    #[arg(short, long, default_value_t = 8)]
    pub threads: usize,

    /// Buffer size used when streaming files (in bytes)
    #[arg(long, default_value_t = 64 * 1024)]
    pub chunk_size: usize,

    /// Deadline for reading a request and for filesystem and rendering work (seconds)
    #[arg(long, default_value_t = 30)]
    pub request_timeout: u64,

    /// Deadline for transferring a file body (seconds)
    #[arg(long, default_value_t = 60)]
    pub transfer_timeout: u64,

    /// Time in-flight requests get to finish on shutdown (seconds)
    #[arg(long, default_value_t = 30)]
    pub shutdown_grace: u64,

    /// Check that the root is still readable before every request (stale network mounts answer 503)
    #[arg(long, default_value_t = false)]
    pub check_mount: bool,

    /// Enable verbose logging (log level: debug)
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, default_value_t = false, conflicts_with = "verbose")]
    pub quiet: bool,
}
