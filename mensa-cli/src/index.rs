//! The `index.html` page listing every published document.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use mensa_core::{PortError, xml_escape};
use tokio::fs;

const TEMPLATE: &str = include_str!("../index.html");
const STATUS_URL: &str = "https://github.com/cvzi/mensa/actions/";

/// Write `index.html` into `out`, linking files below `base_url`.
///
/// # Errors
///
/// Returns [`PortError::Io`] if the directory cannot be listed or the page written.
pub(crate) async fn write_index(out: &Path, base_url: &str, errors: &[String]) -> Result<PathBuf, PortError> {
    let files = published_files(out).await?;
    let page = render(&files, base_url, errors);
    fs::create_dir_all(out).await?;
    let path = out.join("index.html");
    fs::write(&path, page).await?;
    Ok(path)
}

/// `.xml` and `.json` files below `out`, relative and with `/` separators.
async fn published_files(out: &Path) -> Result<Vec<String>, PortError> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let mut entries = match fs::read_dir(out.join(&relative)).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => continue,
            Err(error) => return Err(error.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = relative.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if matches!(path.extension().and_then(OsStr::to_str), Some("xml" | "json")) {
                let parts: Vec<_> = path
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy())
                    .collect();
                files.push(parts.join("/"));
            }
        }
    }
    Ok(files)
}

/// Sort by file name, then folder, so that `<parser>.json` precedes the parser's documents.
fn sort_key(file: &str) -> String {
    let mut parts = file.rsplit('/');
    let name = parts.next().unwrap_or_default().to_uppercase();
    let folder = parts.next().unwrap_or_default();
    format!("{name}{folder}")
}

fn render(files: &[String], base_url: &str, errors: &[String]) -> String {
    let base = if base_url.ends_with('/') {
        base_url.to_owned()
    } else {
        format!("{base_url}/")
    };

    let mut sorted: Vec<&String> = files.iter().collect();
    sorted.sort_by_cached_key(|file| sort_key(file));

    let mut lines = vec![String::from("<ol style=\"list-style-type:none\">")];
    let mut open = false;
    for file in sorted {
        let url = format!("{base}{file}");
        let href = xml_escape(&url);
        let label = xml_escape(file);
        if let Some(parser) = file.strip_suffix(".json") {
            if open {
                lines.push(String::from("</ul>"));
                lines.push(String::from("</li>"));
            }
            open = true;
            lines.push(format!(
                "<li><h3 id=\"{}\"><a href=\"{href}\">🐏 {label}</a></h3>",
                xml_escape(parser)
            ));
            lines.push(String::from("<ul style=\"list-style-type:none\">"));
        } else {
            let icon = if file.starts_with("meta/") { '🈺' } else { '🍱' };
            lines.push(format!("  <li><a href=\"{href}\">{icon} {label}</a></li>"));
        }
    }
    if open {
        lines.push(String::from("</ul>"));
        lines.push(String::from("</li>"));
    }
    lines.push(String::from("</ol>"));

    let mut status = format!("<h3><a href=\"{STATUS_URL}\">🗿 Parser status</a></h3>");
    if !errors.is_empty() {
        status.push_str("\n<pre>");
        status.push_str(&xml_escape(&errors.join("\n")));
        status.push_str("</pre>");
    }

    TEMPLATE
        .replace("{content}", &lines.join("\n"))
        .replace("{status}", &status)
}
