//! HTML metadata extraction.
//!
//! Parses a document once and runs independent passes over the tree for
//! title, description, links, headings, images and the complexity scan.
//! Parse failure never propagates: the caller gets a degraded record with
//! the original markup and an error message, keeping ingestion resilient to
//! malformed input.

use crate::content::{Complexity, Heading, HtmlContent, HtmlMetadata, Image, Link};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

/// Raw HTML length beyond which a document counts as complex.
const COMPLEX_HTML_LEN: usize = 5000;
/// More elements with a `class` attribute than this counts as complex.
const COMPLEX_CLASS_COUNT: usize = 10;
/// More elements with an inline `style` attribute than this counts as complex.
const COMPLEX_STYLE_COUNT: usize = 5;
/// Description fallback is the first paragraph truncated to this many chars.
const DESCRIPTION_MAX_CHARS: usize = 150;

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<[a-z].*>").expect("tag pattern is valid"));

/// Heuristic check for HTML-looking text: contains a `<letter ...>` tag.
pub fn is_html(content: &str) -> bool {
    TAG_PATTERN.is_match(content)
}

/// Parse HTML and extract structured metadata.
///
/// Returns the parsed record on success, or the degraded
/// `{type: html, error, html}` record if extraction panics on malformed
/// input.
pub fn parse_html(html: &str) -> HtmlContent {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| extract(html)));
    match result {
        Ok((metadata, text_content)) => {
            HtmlContent::parsed(metadata, html.to_string(), text_content)
        }
        Err(_) => {
            tracing::error!("HTML parse panicked; storing degraded record");
            HtmlContent::failed("Failed to parse HTML content", html.to_string())
        }
    }
}

fn extract(html: &str) -> (HtmlMetadata, String) {
    let document = Html::parse_document(html);

    let metadata = HtmlMetadata {
        title: extract_title(&document),
        description: extract_description(&document),
        links: collect_links(&document),
        headings: collect_headings(&document),
        images: collect_images(&document),
        has_scripts: has_any(&document, "script"),
        has_styles: has_any(&document, "link[rel='stylesheet']") || has_any(&document, "style"),
        has_iframes: has_any(&document, "iframe"),
        complexity: Complexity::Simple,
    };

    let complexity = assess_complexity(&document, &metadata, html);
    let text_content = body_text(&document);

    (
        HtmlMetadata {
            complexity,
            ..metadata
        },
        text_content,
    )
}

/// First `<title>` text, else first `<h1>` text, else a fixed default.
fn extract_title(document: &Html) -> String {
    for selector in ["title", "h1"] {
        if let Some(text) = first_text(document, selector) {
            if !text.is_empty() {
                return text;
            }
        }
    }
    "Untitled Document".to_string()
}

/// `meta[name=description]` content, else the first paragraph truncated.
fn extract_description(document: &Html) -> String {
    if let Ok(selector) = Selector::parse("meta[name='description']") {
        if let Some(content) = document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("content"))
        {
            if !content.is_empty() {
                return content.to_string();
            }
        }
    }

    if let Some(paragraph) = first_text(document, "p") {
        return paragraph.chars().take(DESCRIPTION_MAX_CHARS).collect();
    }

    String::new()
}

fn collect_links(document: &Html) -> Vec<Link> {
    let Ok(selector) = Selector::parse("a") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|el| {
            let href = el.value().attr("href")?.to_string();
            let text = el.text().collect::<String>().trim().to_string();
            let text = if text.is_empty() { href.clone() } else { text };
            Some(Link { href, text })
        })
        .collect()
}

fn collect_headings(document: &Html) -> Vec<Heading> {
    let Ok(selector) = Selector::parse("h1, h2, h3, h4, h5, h6") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|el| {
            let level = el.value().name().strip_prefix('h')?.parse().ok()?;
            let text = el.text().collect::<String>().trim().to_string();
            Some(Heading { level, text })
        })
        .collect()
}

fn collect_images(document: &Html) -> Vec<Image> {
    let Ok(selector) = Selector::parse("img") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|el| Image {
            src: el.value().attr("src").unwrap_or("").to_string(),
            alt: el.value().attr("alt").unwrap_or("").to_string(),
        })
        .collect()
}

fn has_any(document: &Html, selector: &str) -> bool {
    Selector::parse(selector)
        .map(|sel| document.select(&sel).next().is_some())
        .unwrap_or(false)
}

fn assess_complexity(document: &Html, metadata: &HtmlMetadata, html: &str) -> Complexity {
    let class_count = count_matches(document, "[class]");
    let style_count = count_matches(document, "[style]");
    let has_data_attrs = document.root_element().descendants().any(|node| {
        node.value()
            .as_element()
            .map(|el| el.attrs().any(|(name, _)| name.starts_with("data-")))
            .unwrap_or(false)
    });

    let complex = metadata.has_scripts
        || metadata.has_styles
        || metadata.has_iframes
        || class_count > COMPLEX_CLASS_COUNT
        || style_count > COMPLEX_STYLE_COUNT
        || has_data_attrs
        || html.len() > COMPLEX_HTML_LEN;

    if complex {
        Complexity::Complex
    } else {
        Complexity::Simple
    }
}

fn count_matches(document: &Html, selector: &str) -> usize {
    Selector::parse(selector)
        .map(|sel| document.select(&sel).count())
        .unwrap_or(0)
}

fn body_text(document: &Html) -> String {
    let Ok(selector) = Selector::parse("body") else {
        return String::new();
    };
    document
        .select(&selector)
        .next()
        .map(|body| body.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b.*?</script>")
        .expect("script pattern is valid")
});
static ON_ATTR_DQUOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)on\w+="[^"]*""#).expect("attr pattern is valid"));
static ON_ATTR_SQUOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)on\w+='[^']*'").expect("attr pattern is valid"));
static ON_ATTR_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)on\w+=\w+").expect("attr pattern is valid"));

/// Best-effort strip of script tags and inline event handlers.
///
/// This is a pattern strip for display purposes, not a security boundary.
pub fn sanitize_html(html: &str) -> String {
    let html = SCRIPT_BLOCK.replace_all(html, "");
    let html = ON_ATTR_DQUOTE.replace_all(&html, "");
    let html = ON_ATTR_SQUOTE.replace_all(&html, "");
    ON_ATTR_BARE.replace_all(&html, "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_html() {
        assert!(is_html("<html><body>hi</body></html>"));
        assert!(is_html("<p>paragraph</p>"));
        assert!(is_html("<DIV>upper</DIV>"));
        assert!(!is_html("just text"));
        assert!(!is_html("{\"a\": 1}"));
    }

    #[test]
    fn test_title_from_title_tag() {
        let content = parse_html("<html><head><title>T</title></head><body></body></html>");
        assert_eq!(content.metadata().unwrap().title, "T");
    }

    #[test]
    fn test_title_falls_back_to_h1_then_default() {
        let content = parse_html("<html><body><h1>Heading Title</h1></body></html>");
        assert_eq!(content.metadata().unwrap().title, "Heading Title");

        let content = parse_html("<html><body><p>no title here</p></body></html>");
        assert_eq!(content.metadata().unwrap().title, "Untitled Document");
    }

    #[test]
    fn test_description_from_meta_then_paragraph() {
        let content = parse_html(
            "<html><head><meta name=\"description\" content=\"desc\"></head><body><p>para</p></body></html>",
        );
        assert_eq!(content.metadata().unwrap().description, "desc");

        let long = "x".repeat(200);
        let content = parse_html(&format!("<html><body><p>{long}</p></body></html>"));
        assert_eq!(content.metadata().unwrap().description.len(), 150);
    }

    #[test]
    fn test_links_headings_images() {
        let content = parse_html(
            "<html><body>\
             <a href=\"/a\">first</a><a href=\"/b\"></a>\
             <h2>Section</h2><h3>Sub</h3>\
             <img src=\"pic.png\" alt=\"a pic\"><img>\
             </body></html>",
        );
        let meta = content.metadata().unwrap();
        assert_eq!(meta.links.len(), 2);
        assert_eq!(meta.links[0].text, "first");
        // Empty anchor text falls back to the href
        assert_eq!(meta.links[1].text, "/b");
        assert_eq!(
            meta.headings,
            vec![
                Heading {
                    level: 2,
                    text: "Section".to_string()
                },
                Heading {
                    level: 3,
                    text: "Sub".to_string()
                }
            ]
        );
        assert_eq!(meta.images.len(), 2);
        assert_eq!(meta.images[0].src, "pic.png");
        assert_eq!(meta.images[1].src, "");
    }

    #[test]
    fn test_simple_document() {
        let content = parse_html("<html><body><p>plain</p></body></html>");
        let meta = content.metadata().unwrap();
        assert!(!meta.has_scripts);
        assert!(!meta.has_styles);
        assert!(!meta.has_iframes);
        assert_eq!(meta.complexity, Complexity::Simple);
    }

    #[test]
    fn test_scripts_make_document_complex() {
        let content = parse_html("<html><body><script>1</script></body></html>");
        let meta = content.metadata().unwrap();
        assert!(meta.has_scripts);
        assert_eq!(meta.complexity, Complexity::Complex);
    }

    #[test]
    fn test_styles_and_iframes_detected() {
        let content =
            parse_html("<html><head><style>p{}</style></head><body><iframe></iframe></body></html>");
        let meta = content.metadata().unwrap();
        assert!(meta.has_styles);
        assert!(meta.has_iframes);
        assert_eq!(meta.complexity, Complexity::Complex);
    }

    #[test]
    fn test_data_attributes_make_document_complex() {
        let content = parse_html("<html><body><div data-role=\"x\">y</div></body></html>");
        assert_eq!(content.metadata().unwrap().complexity, Complexity::Complex);
    }

    #[test]
    fn test_long_document_is_complex() {
        let body = "a".repeat(COMPLEX_HTML_LEN);
        let content = parse_html(&format!("<html><body><p>{body}</p></body></html>"));
        assert_eq!(content.metadata().unwrap().complexity, Complexity::Complex);
    }

    #[test]
    fn test_text_content_is_body_text() {
        let content = parse_html("<html><body><p>hello</p><p>world</p></body></html>");
        match content {
            HtmlContent::Parsed { text_content, .. } => {
                assert!(text_content.contains("hello"));
                assert!(text_content.contains("world"));
            }
            HtmlContent::Failed { .. } => panic!("expected parsed record"),
        }
    }

    #[test]
    fn test_sanitize_html_strips_scripts_and_handlers() {
        let dirty = "<div onclick=\"evil()\"><script>alert(1)</script><p onmouseover='x'>ok</p></div>";
        let clean = sanitize_html(dirty);
        assert!(!clean.contains("<script>"));
        assert!(!clean.contains("onclick"));
        assert!(!clean.contains("onmouseover"));
        assert!(clean.contains("<p >ok</p>"));
    }
}
