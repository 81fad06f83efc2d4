//! Error taxonomy for ingestion and storage.
//!
//! Format-detection ambiguity never surfaces here: the classifier degrades
//! HTML -> JSON -> plain text instead of failing. The variants below are the
//! structural failures that do reject a request, plus wrappers for the
//! storage engine and codec layers.

use thiserror::Error;

/// Errors produced by the ingestion and storage core.
#[derive(Debug, Error)]
pub enum SitedropError {
    /// Malformed JSON where strict parsing was requested
    /// (declared `application/json` bodies and `json` form fields).
    #[error("malformed JSON payload: {0}")]
    Parse(#[source] serde_json::Error),

    /// The first four bytes do not carry a PK ZIP signature.
    #[error("the uploaded file is not a valid ZIP archive")]
    InvalidArchive,

    /// Payload exceeds the ZIP size bound, checked before decompression.
    #[error("ZIP file too large: maximum size is {limit_mib}MB")]
    PayloadTooLarge { size: usize, limit_mib: usize },

    /// A ZIP archive with no `.html`/`.htm` entry is not ingestible.
    #[error("no HTML files found in the ZIP archive")]
    NoHtmlInArchive,

    /// Lookup by an id the store does not hold.
    #[error("content not found: {0}")]
    NotFound(String),

    /// Download requested for a post that is not a ZIP archive.
    #[error("content {0} is not a ZIP archive")]
    NotAnArchive(String),

    /// Render requested for a post carrying no HTML document.
    #[error("content {0} has no HTML document to render")]
    NotRenderable(String),

    /// Malformed multipart/form-data body.
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] multer::Error),

    /// The payload passed the magic-number check but the archive could not
    /// be decoded.
    #[error("failed to process ZIP file: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Stored base64 content failed to decode when rebuilding an archive.
    #[error("corrupted archive data: {0}")]
    Base64(#[from] base64::DecodeError),

    /// HTML rewriting failed while inlining archive assets.
    #[error("failed to rewrite HTML: {0}")]
    Rewrite(String),

    /// Underlying key-value storage failure.
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl SitedropError {
    /// Short machine-readable code for the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            SitedropError::Parse(_) => "parse_error",
            SitedropError::InvalidArchive => "invalid_archive",
            SitedropError::PayloadTooLarge { .. } => "payload_too_large",
            SitedropError::NoHtmlInArchive => "no_html_in_archive",
            SitedropError::NotFound(_) => "not_found",
            SitedropError::NotAnArchive(_) => "not_an_archive",
            SitedropError::NotRenderable(_) => "not_renderable",
            SitedropError::Multipart(_) => "invalid_multipart",
            SitedropError::Zip(_) => "zip_error",
            SitedropError::Base64(_) => "corrupt_data",
            SitedropError::Rewrite(_) => "rewrite_error",
            SitedropError::Storage(_) => "storage_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, SitedropError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_short_and_human_readable() {
        let err = SitedropError::PayloadTooLarge {
            size: 11 * 1024 * 1024,
            limit_mib: 10,
        };
        assert_eq!(err.to_string(), "ZIP file too large: maximum size is 10MB");

        let err = SitedropError::NotFound("abc".to_string());
        assert_eq!(err.to_string(), "content not found: abc");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SitedropError::InvalidArchive.code(), "invalid_archive");
        assert_eq!(SitedropError::NoHtmlInArchive.code(), "no_html_in_archive");
        assert_eq!(
            SitedropError::NotAnArchive("x".into()).code(),
            "not_an_archive"
        );
    }
}
