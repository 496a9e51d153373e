use crate::deadline::CancelToken;
use crate::error::AppError;
use crate::fs::{read_entries, DirectoryEntryView};
use crate::resolver::ResolvedPath;
use crate::response::HttpResponse;
use crate::templates::PageRenderer;
use log::debug;

/// Everything the directory template needs for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub title: String,
    /// Request-relative path of the directory, with a trailing `/`.
    pub current_path: String,
    /// One level up with a trailing `/`, empty at the root.
    pub parent_path: String,
    pub entries: Vec<DirectoryEntryView>,
}

impl ListingPage {
    pub fn new(request_path: &str, entries: Vec<DirectoryEntryView>) -> Self {
        let current_path = directory_path(request_path);
        ListingPage {
            title: format!("File Server - {current_path}"),
            parent_path: parent_path(&current_path),
            current_path,
            entries,
        }
    }
}

/// Enumerates and renders the directory at `resolved` into a complete
/// response. Nothing is returned unless rendering succeeded.
pub fn render_listing(
    resolved: &ResolvedPath,
    renderer: &dyn PageRenderer,
    cancel: &CancelToken,
) -> Result<HttpResponse, AppError> {
    let entries = read_entries(&resolved.absolute, cancel)?;
    debug!(
        "Rendering listing for '{}' with {} entries",
        resolved.relative,
        entries.len()
    );

    let page = ListingPage::new(&resolved.relative, entries);
    let html = renderer.render_listing(&page)?;

    Ok(HttpResponse::new(200)
        .add_header("Cache-Control", "no-cache, no-store, must-revalidate")
        .with_html_body(html))
}

/// `parent_path("/")` is empty; otherwise the path one segment up, always
/// with a trailing `/`.
pub fn parent_path(current_path: &str) -> String {
    if current_path.is_empty() || current_path == "/" {
        return String::new();
    }

    let trimmed = current_path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => format!("{}/", &trimmed[..index]),
    }
}

fn directory_path(request_path: &str) -> String {
    if request_path.is_empty() || request_path == "/" {
        "/".to_string()
    } else if request_path.ends_with('/') {
        request_path.to_string()
    } else {
        format!("{request_path}/")
    }
}
