//! Per-request deadlines for blocking filesystem work.
//!
//! Blocking calls run on a short-lived worker thread whose result is raced
//! against the remaining time. When the deadline wins, the request's
//! [`CancelToken`] is tripped so cooperative work (directory enumeration)
//! stops early, and whatever the worker eventually produces is dropped,
//! releasing any file handle it opened.

use crate::error::AppError;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Instant,
    token: CancelToken,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
            token: CancelToken::new(),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Runs `work` on a worker thread and waits for it until the deadline.
    ///
    /// Returns `AppError::Timeout` once the deadline passes; the worker is
    /// left to finish on its own and its result is discarded.
    pub fn run<T, F>(&self, work: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T, AppError> + Send + 'static,
    {
        if self.is_expired() {
            self.token.cancel();
            return Err(AppError::Timeout);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let token = self.token.clone();
        thread::Builder::new()
            .name("fs-worker".to_string())
            .spawn(move || {
                let result = work(&token);
                if tx.send(result).is_err() {
                    debug!("Discarding result of abandoned filesystem work");
                }
            })?;

        match rx.recv_timeout(self.remaining()) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.token.cancel();
                Err(AppError::Timeout)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(AppError::InternalServerError(
                "filesystem worker exited without a result".to_string(),
            )),
        }
    }
}
