//! Embedded HTML templates and the renderer built on them.

use crate::error::AppError;
use crate::listing::ListingPage;
use rust_embed::RustEmbed;
use std::collections::HashMap;

#[derive(RustEmbed)]
#[folder = "templates/"]
struct Assets;

pub const DIRECTORY_TEMPLATE: &str = "directory.html";
pub const ERROR_TEMPLATE: &str = "error.html";

/// Turns page models into HTML. Failures surface as `AppError::Render` and
/// must never be written out half-done.
pub trait PageRenderer: Send + Sync {
    fn render_listing(&self, page: &ListingPage) -> Result<String, AppError>;

    fn render_error(
        &self,
        status_code: u16,
        status_text: &str,
        description: &str,
    ) -> Result<String, AppError>;
}

/// Template loader and renderer for `{{NAME}}` style templates
pub struct TemplateEngine {
    templates: HashMap<String, String>,
}

impl TemplateEngine {
    /// Loads every template embedded in the binary.
    pub fn embedded() -> Self {
        let templates = Assets::iter()
            .filter_map(|name| {
                let file = Assets::get(&name)?;
                let content = String::from_utf8(file.data.into_owned()).ok()?;
                Some((name.into_owned(), content))
            })
            .collect();

        Self { templates }
    }

    /// An engine with explicitly provided templates.
    pub fn from_templates<I, K, V>(templates: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            templates: templates
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Substitutes every `{{NAME}}` in a single pass. A placeholder without
    /// a value is an error, so substituted text is never re-scanned.
    pub fn render(
        &self,
        template_name: &str,
        variables: &HashMap<&str, String>,
    ) -> Result<String, AppError> {
        let template = self
            .templates
            .get(template_name)
            .ok_or_else(|| AppError::Render(format!("template '{template_name}' not found")))?;

        let mut rendered = String::with_capacity(template.len());
        let mut rest = template.as_str();

        while let Some(start) = rest.find("{{") {
            rendered.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];
            let end = after_open.find("}}").ok_or_else(|| {
                AppError::Render(format!("unterminated placeholder in '{template_name}'"))
            })?;
            let key = after_open[..end].trim();
            let value = variables.get(key).ok_or_else(|| {
                AppError::Render(format!("unbound placeholder '{key}' in '{template_name}'"))
            })?;
            rendered.push_str(value);
            rest = &after_open[end + 2..];
        }
        rendered.push_str(rest);

        Ok(rendered)
    }
}

impl PageRenderer for TemplateEngine {
    fn render_listing(&self, page: &ListingPage) -> Result<String, AppError> {
        let mut variables = HashMap::new();
        variables.insert("TITLE", html_escape(&page.title));
        variables.insert("CURRENT_PATH", html_escape(&page.current_path));
        variables.insert("ENTRY_COUNT", page.entries.len().to_string());

        let parent_row = if page.parent_path.is_empty() {
            String::new()
        } else {
            format!(
                r#"                <tr class="directory">
                    <td><a href="{}" class="file-link"><span class="name">..</span></a></td>
                    <td class="size">-</td>
                    <td class="date">-</td>
                </tr>
"#,
                encode_href(&page.parent_path)
            )
        };
        variables.insert("PARENT_ROW", parent_row);

        let mut entries_html = String::new();
        for entry in &page.entries {
            let (type_class, suffix) = if entry.is_directory {
                ("directory", "/")
            } else {
                ("file", "")
            };
            let href = format!(
                "{}{}{}",
                encode_href(&page.current_path),
                urlencoding::encode(&entry.name),
                suffix
            );

            entries_html.push_str(&format!(
                r#"                <tr class="{}">
                    <td><a href="{}" class="file-link"><span class="name">{}</span></a></td>
                    <td class="size">{}</td>
                    <td class="date">{}</td>
                </tr>
"#,
                type_class,
                href,
                html_escape(&entry.name),
                entry.human_size,
                entry.formatted_time
            ));
        }
        variables.insert("ENTRIES", entries_html);

        self.render(DIRECTORY_TEMPLATE, &variables)
    }

    fn render_error(
        &self,
        status_code: u16,
        status_text: &str,
        description: &str,
    ) -> Result<String, AppError> {
        let mut variables = HashMap::new();
        variables.insert("STATUS_CODE", status_code.to_string());
        variables.insert("STATUS_TEXT", html_escape(status_text));
        variables.insert("DESCRIPTION", html_escape(description));

        self.render(ERROR_TEMPLATE, &variables)
    }
}

/// Percent-encodes each segment of a `/`-separated path, keeping the slashes.
pub fn encode_href(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Simple HTML entity escaping
pub fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Get human-friendly error descriptions
pub fn get_error_description(status_code: u16) -> &'static str {
    match status_code {
        400 => "The request could not be understood due to malformed syntax.",
        403 => "Access to this resource is forbidden.",
        404 => "The requested file or directory could not be found.",
        405 => "The request method is not allowed for this resource.",
        408 => "The server timed out while processing your request.",
        412 => "A precondition given in the request headers was not met.",
        416 => "The requested byte range cannot be served for this file.",
        500 => "An internal server error occurred while processing your request.",
        503 => "The storage behind this server is temporarily unavailable.",
        _ => "An unexpected error occurred while processing your request.",
    }
}
