use crate::config::ServerConfig;
use crate::error::AppError;
use crate::fs::is_mount_point;
use crate::http::handle_client;
use crate::router::Router;
use log::{debug, error, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use threadpool::ThreadPool;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Connections currently being served, kept so shutdown can cut off the
/// ones that outlive the grace period.
#[derive(Default)]
struct ConnectionRegistry {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, TcpStream>>,
}

impl ConnectionRegistry {
    fn register(&self, stream: &TcpStream) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match stream.try_clone() {
            Ok(clone) => {
                self.lock().insert(id, clone);
            }
            Err(e) => warn!("Could not track connection for shutdown: {e}"),
        }
        id
    }

    fn release(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn close_all(&self) -> usize {
        let mut open = self.lock();
        for stream in open.values() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let closed = open.len();
        open.clear();
        closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, TcpStream>> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Binds the listener and serves connections until a message arrives on
/// `shutdown_rx` (or its sender is dropped).
///
/// `addr_tx`, when given, receives the bound address once the listener is
/// up; tests use it together with port 0.
pub fn run_server(
    config: ServerConfig,
    shutdown_rx: Option<mpsc::Receiver<()>>,
    addr_tx: Option<mpsc::Sender<SocketAddr>>,
) -> Result<(), AppError> {
    let bind_address = config.bind_address();
    let listener =
        TcpListener::bind(bind_address).map_err(|e| AppError::Bind(bind_address.to_string(), e))?;
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    if let Some(tx) = addr_tx {
        if tx.send(local_addr).is_err() {
            return Err(AppError::InternalServerError(
                "Failed to send server address to test thread".to_string(),
            ));
        }
    }

    info!("Serving directory: {}", config.root.display());
    if is_mount_point(&config.root) {
        info!("Detected mount point at: {}", config.root.display());
    }
    info!("Listening on: http://{local_addr}");

    let config = Arc::new(config);
    let router = Arc::new(Router::new(&config));
    let registry = Arc::new(ConnectionRegistry::default());
    let pool = ThreadPool::new(config.threads);

    'server_loop: loop {
        if let Some(ref rx) = shutdown_rx {
            match rx.try_recv() {
                Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                    info!("Shutdown signal received. Shutting down gracefully.");
                    break 'server_loop;
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    error!("Failed to configure connection from {peer}: {e}");
                    continue;
                }

                let router = Arc::clone(&router);
                let config = Arc::clone(&config);
                let registry = Arc::clone(&registry);
                let log_prefix = format!("[ReqID: {}][Peer: {peer}]", generate_request_id());

                pool.execute(move || {
                    let id = registry.register(&stream);
                    debug!("{log_prefix} Handling client connection");
                    match handle_client(stream, &router, &config, &log_prefix) {
                        Ok(()) => debug!("{log_prefix} Client handled successfully"),
                        Err(e) => warn!("{log_prefix} Connection ended with error: {e}"),
                    }
                    registry.release(id);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                error!("Error accepting connection: {e}");
            }
        }
    }

    // Stop accepting before draining.
    drop(listener);
    drain(&pool, &registry, config.shutdown_grace);

    info!("Server stopped gracefully.");
    Ok(())
}

fn drain(pool: &ThreadPool, registry: &ConnectionRegistry, grace: Duration) {
    let give_up_at = Instant::now() + grace;

    while pool.active_count() + pool.queued_count() > 0 {
        if Instant::now() >= give_up_at {
            let closed = registry.close_all();
            warn!(
                "Grace period of {}s elapsed, closed {} remaining connection(s)",
                grace.as_secs(),
                closed
            );
            return;
        }
        thread::sleep(ACCEPT_POLL_INTERVAL);
    }

    pool.join();
}

fn generate_request_id() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
