//! Data model for ingested content.
//!
//! The wire shape is consumed by external viewers and the download path, so
//! field names are fixed: `id`, `timestamp`, `content`, `content.type`,
//! `content.mainFile`, `content.files`, `content.fileContents`,
//! `content.metadata`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One persisted unit of ingested content. Immutable after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub content: Content,
}

impl Post {
    /// Create a post with a fresh id and the current time.
    pub fn new(content: Content) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            content,
        }
    }
}

/// Classified content of a post.
///
/// Serialized as a `type`-tagged object, except `Json` which is an untyped
/// value carrying no tag. Deserialization tries the tagged variants first;
/// anything without a recognized `type` key falls through to `Json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(TextContent),
    Html(HtmlContent),
    ZipArchive(ZipArchiveContent),
    Json(serde_json::Value),
}

impl Content {
    /// Wrap a plain text body.
    pub fn text(content: impl Into<String>) -> Self {
        Content::Text(TextContent {
            tag: TextTag::Text,
            content: content.into(),
        })
    }

    /// The `type` tag as seen on the wire, or "json" for untyped values.
    pub fn kind(&self) -> &'static str {
        match self {
            Content::Text(_) => "text",
            Content::Html(_) => "html",
            Content::ZipArchive(_) => "zip-archive",
            Content::Json(_) => "json",
        }
    }
}

/// `{ "type": "text", "content": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    tag: TextTag,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextTag {
    #[serde(rename = "text")]
    Text,
}

/// Parsed HTML, or the degraded record kept when parsing fails.
///
/// Both cases serialize with `"type": "html"`; they are told apart by the
/// presence of `metadata` versus `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HtmlContent {
    Parsed {
        #[serde(rename = "type")]
        tag: HtmlTag,
        metadata: HtmlMetadata,
        html: String,
        #[serde(rename = "textContent")]
        text_content: String,
    },
    Failed {
        #[serde(rename = "type")]
        tag: HtmlTag,
        error: String,
        html: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtmlTag {
    #[serde(rename = "html")]
    Html,
}

impl HtmlContent {
    pub fn parsed(metadata: HtmlMetadata, html: String, text_content: String) -> Self {
        HtmlContent::Parsed {
            tag: HtmlTag::Html,
            metadata,
            html,
            text_content,
        }
    }

    pub fn failed(error: impl Into<String>, html: String) -> Self {
        HtmlContent::Failed {
            tag: HtmlTag::Html,
            error: error.into(),
            html,
        }
    }

    pub fn html(&self) -> &str {
        match self {
            HtmlContent::Parsed { html, .. } | HtmlContent::Failed { html, .. } => html,
        }
    }

    pub fn metadata(&self) -> Option<&HtmlMetadata> {
        match self {
            HtmlContent::Parsed { metadata, .. } => Some(metadata),
            HtmlContent::Failed { .. } => None,
        }
    }
}

/// Structured metadata extracted from an HTML document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtmlMetadata {
    pub title: String,
    pub description: String,
    pub links: Vec<Link>,
    pub headings: Vec<Heading>,
    pub images: Vec<Image>,
    pub has_scripts: bool,
    pub has_styles: bool,
    pub has_iframes: bool,
    pub complexity: Complexity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    /// Heading level, 1-6.
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub src: String,
    pub alt: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Complexity {
    #[default]
    #[serde(rename = "simple")]
    Simple,
    #[serde(rename = "complex")]
    Complex,
}

/// Portable record of an uploaded ZIP archive.
///
/// Binary entry contents are inlined as base64 in `file_contents`, keyed by
/// each entry's original forward-slash internal path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipArchiveContent {
    #[serde(rename = "type")]
    tag: ZipArchiveTag,
    pub main_file: String,
    pub files: Vec<FileEntry>,
    pub file_contents: BTreeMap<String, StoredFile>,
    pub html: HtmlContent,
    pub metadata: ArchiveMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZipArchiveTag {
    #[serde(rename = "zip-archive")]
    ZipArchive,
}

impl ZipArchiveContent {
    pub fn new(
        main_file: String,
        files: Vec<FileEntry>,
        file_contents: BTreeMap<String, StoredFile>,
        html: HtmlContent,
        metadata: ArchiveMetadata,
    ) -> Self {
        Self {
            tag: ZipArchiveTag::ZipArchive,
            main_file,
            files,
            file_contents,
            html,
            metadata,
        }
    }
}

/// Per-entry metadata for a non-directory ZIP entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub mime: String,
    pub size: u64,
}

/// One entry's raw bytes, base64 encoded, with its classified MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    #[serde(rename = "type")]
    pub mime: String,
    /// Base64 of the raw entry bytes.
    pub content: String,
}

/// Aggregate metadata for an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub filename: String,
    pub size: u64,
    pub file_count: usize,
    pub html_files: Vec<String>,
    pub js_files: Vec<String>,
    pub css_files: Vec<String>,
}
