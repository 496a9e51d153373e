use crate::config::ServerConfig;
use crate::content::{serve_file, FileDetails};
use crate::deadline::Deadline;
use crate::error::AppError;
use crate::fs::check_mount_health;
use crate::http::Request;
use crate::listing::render_listing;
use crate::resolver::{is_within_root, PathResolver, ResolvedPath};
use crate::response::{create_error_response, HttpResponse};
use crate::templates::{PageRenderer, TemplateEngine};
use log::{debug, error, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// What a resolved path turned out to be on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Directory,
    File,
    Other,
}

/// Dispatches GET requests to the listing or file responder.
pub struct Router {
    resolver: PathResolver,
    renderer: Arc<dyn PageRenderer>,
    request_timeout: Duration,
    check_mount: bool,
}

impl Router {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_renderer(config, Arc::new(TemplateEngine::embedded()))
    }

    pub fn with_renderer(config: &ServerConfig, renderer: Arc<dyn PageRenderer>) -> Self {
        Router {
            resolver: PathResolver::new(config.root.clone()),
            renderer,
            request_timeout: config.request_timeout,
            check_mount: config.check_mount,
        }
    }

    pub fn renderer(&self) -> &dyn PageRenderer {
        self.renderer.as_ref()
    }

    /// Produces the response for `request`. Every failure becomes an error
    /// page; nothing here can take the server down.
    pub fn handle(&self, request: &Request, log_prefix: &str) -> HttpResponse {
        match self.route(request, log_prefix) {
            Ok(response) => response,
            Err(e) => {
                self.log_failure(&e, request, log_prefix);
                create_error_response(&e, self.renderer())
            }
        }
    }

    fn route(&self, request: &Request, log_prefix: &str) -> Result<HttpResponse, AppError> {
        if request.method != "GET" {
            return Err(AppError::MethodNotAllowed);
        }

        let request_path = request.decoded_path()?;
        let resolved = self.resolver.resolve(&request_path)?;
        let deadline = Deadline::after(self.request_timeout);

        if self.check_mount {
            let root = self.resolver.root().to_path_buf();
            deadline.run(move |_| check_mount_health(&root))?;
        }

        let kind = {
            let root = self.resolver.root().to_path_buf();
            let target = resolved.absolute.clone();
            deadline.run(move |_| inspect(&target, &root))?
        };
        debug!("{} '{}' resolved as {:?}", log_prefix, resolved.relative, kind);

        match kind {
            EntryKind::Directory => self.serve_directory(resolved, &deadline),
            EntryKind::File => {
                let target = resolved.absolute;
                let details = deadline.run(move |_| FileDetails::open(target))?;
                serve_file(details, request)
            }
            EntryKind::Other => Err(AppError::NotFound),
        }
    }

    fn serve_directory(
        &self,
        resolved: ResolvedPath,
        deadline: &Deadline,
    ) -> Result<HttpResponse, AppError> {
        let renderer = Arc::clone(&self.renderer);
        deadline.run(move |cancel| render_listing(&resolved, renderer.as_ref(), cancel))
    }

    fn log_failure(&self, err: &AppError, request: &Request, log_prefix: &str) {
        let raw = &request.target;
        match err {
            AppError::Forbidden => {
                warn!("{log_prefix} Access denied for request path: '{raw}'")
            }
            AppError::NotFound => debug!("{log_prefix} Not found: '{raw}'"),
            AppError::MethodNotAllowed => {
                debug!("{log_prefix} Method {} not allowed for '{raw}'", request.method)
            }
            AppError::Timeout => warn!("{log_prefix} Request timed out: '{raw}'"),
            AppError::Io(e) if err.status() == 403 => {
                warn!("{log_prefix} Permission denied for '{raw}': {e}")
            }
            e if e.is_server_fault() => error!("{log_prefix} Failed to serve '{raw}': {e}"),
            e => debug!("{log_prefix} Rejected '{raw}': {e}"),
        }
    }
}

/// Stats the target and re-checks containment on its canonical form so a
/// symlink inside the root cannot lead outside of it.
fn inspect(target: &Path, root: &Path) -> Result<EntryKind, AppError> {
    let metadata = fs::metadata(target)?;

    let canonical = target.canonicalize()?;
    if !is_within_root(&canonical, root) {
        warn!(
            "Symlink escape blocked: '{}' resolves outside the root",
            target.display()
        );
        return Err(AppError::Forbidden);
    }

    Ok(if metadata.is_dir() {
        EntryKind::Directory
    } else if metadata.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    })
}
