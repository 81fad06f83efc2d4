//! Archive asset inlining.
//!
//! Rewrites an archive's HTML so it can be shown as a single self-contained
//! document: same-archive images become `data:` URLs, stylesheet links
//! become inline `<style>` blocks, external scripts become inline scripts.
//! References that resolve to a path absent from the content map are left
//! unresolved rather than failing the render.

use crate::content::StoredFile;
use crate::error::{Result, SitedropError};
use crate::resolve::{base_dir_of, is_external, resolve_relative};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use std::collections::BTreeMap;

/// Inline same-archive assets into an HTML document.
///
/// `base_path` is the archive-internal path of the document being rendered;
/// references are resolved against its directory.
pub fn inline_assets(
    html: &str,
    base_path: &str,
    files: &BTreeMap<String, StoredFile>,
) -> Result<String> {
    let base_dir = base_dir_of(base_path);

    let settings = RewriteStrSettings {
        element_content_handlers: vec![
            element!("img", |el| {
                rewrite_image(el, &base_dir, files);
                Ok(())
            }),
            element!(r#"link[rel="stylesheet"]"#, |el| {
                if let Some(href) = el.get_attribute("href") {
                    if !is_external(&href) {
                        let path = resolve_relative(&base_dir, &href);
                        if let Some(css) = decode_text(files, &path) {
                            el.replace(&format!("<style>{css}</style>"), ContentType::Html);
                        }
                    }
                }
                Ok(())
            }),
            element!("script[src]", |el| {
                if let Some(src) = el.get_attribute("src") {
                    if !is_external(&src) {
                        let path = resolve_relative(&base_dir, &src);
                        if let Some(js) = decode_text(files, &path) {
                            el.replace(&format!("<script>{js}</script>"), ContentType::Html);
                        }
                    }
                }
                Ok(())
            }),
        ],
        ..RewriteStrSettings::default()
    };

    rewrite_str(html, settings).map_err(|err| SitedropError::Rewrite(err.to_string()))
}

fn rewrite_image(
    el: &mut lol_html::html_content::Element,
    base_dir: &str,
    files: &BTreeMap<String, StoredFile>,
) {
    let Some(src) = el.get_attribute("src") else {
        if el.get_attribute("alt").is_none() {
            let _ = el.set_attribute("alt", "Image with missing source");
        }
        return;
    };

    if src.is_empty() {
        el.remove_attribute("src");
        if el.get_attribute("alt").is_none() {
            let _ = el.set_attribute("alt", "Image with missing source");
        }
        return;
    }

    if is_external(&src) {
        return;
    }

    let path = resolve_relative(base_dir, &src);
    match files.get(&path) {
        Some(stored) => {
            let data_url = format!("data:{};base64,{}", stored.mime, stored.content);
            let _ = el.set_attribute("src", &data_url);
        }
        None => {
            // Unresolvable reference: drop the src, annotate instead of failing
            el.remove_attribute("src");
            let _ = el.set_attribute("alt", &format!("Missing image: {src}"));
        }
    }
}

/// Decode a stored file's base64 content as UTF-8 text. Undecodable content
/// is skipped with a warning; the original reference stays in place.
fn decode_text(files: &BTreeMap<String, StoredFile>, path: &str) -> Option<String> {
    let stored = files.get(path)?;
    match BASE64.decode(&stored.content) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) => {
            tracing::warn!("cannot decode stored file {path}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(mime: &str, bytes: &[u8]) -> StoredFile {
        StoredFile {
            mime: mime.to_string(),
            content: BASE64.encode(bytes),
        }
    }

    fn archive_files() -> BTreeMap<String, StoredFile> {
        let mut files = BTreeMap::new();
        files.insert("pages/pic.png".to_string(), stored("image/png", &[1, 2, 3]));
        files.insert("style.css".to_string(), stored("text/css", b"p{color:red}"));
        files.insert(
            "pages/app.js".to_string(),
            stored("text/javascript", b"console.log(1)"),
        );
        files
    }

    #[test]
    fn test_image_becomes_data_url() {
        let html = r#"<img src="./pic.png" alt="a">"#;
        let out = inline_assets(html, "pages/index.html", &archive_files()).unwrap();
        assert!(out.contains(&format!(
            "src=\"data:image/png;base64,{}\"",
            BASE64.encode([1, 2, 3])
        )));
    }

    #[test]
    fn test_missing_image_src_is_dropped_with_alt() {
        let html = r#"<img src="gone.png">"#;
        let out = inline_assets(html, "pages/index.html", &archive_files()).unwrap();
        assert!(!out.contains("src="));
        assert!(out.contains("Missing image: gone.png"));
    }

    #[test]
    fn test_external_references_untouched() {
        let html = r#"<img src="https://example.com/x.png"><img src="data:image/png;base64,AA">"#;
        let out = inline_assets(html, "pages/index.html", &archive_files()).unwrap();
        assert_eq!(out, html);
    }

    #[test]
    fn test_stylesheet_link_becomes_inline_style() {
        let html = r#"<link rel="stylesheet" href="../style.css">"#;
        let out = inline_assets(html, "pages/index.html", &archive_files()).unwrap();
        assert!(out.contains("<style>p{color:red}</style>"));
        assert!(!out.contains("<link"));
    }

    #[test]
    fn test_script_src_becomes_inline_script() {
        let html = r#"<script src="app.js"></script>"#;
        let out = inline_assets(html, "pages/index.html", &archive_files()).unwrap();
        assert!(out.contains("<script>console.log(1)</script>"));
        assert!(!out.contains("src="));
    }

    #[test]
    fn test_unresolved_stylesheet_left_in_place() {
        let html = r#"<link rel="stylesheet" href="nope.css">"#;
        let out = inline_assets(html, "pages/index.html", &archive_files()).unwrap();
        assert_eq!(out, html);
    }

    #[test]
    fn test_root_relative_reference() {
        let html = r#"<link rel="stylesheet" href="/style.css">"#;
        let out = inline_assets(html, "pages/index.html", &archive_files()).unwrap();
        assert!(out.contains("<style>p{color:red}</style>"));
    }
}
