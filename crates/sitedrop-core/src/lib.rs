//! sitedrop-core: Core library for the sitedrop content drop box
//!
//! This crate provides:
//! - Request body classification (JSON, HTML, ZIP archives, plain text)
//! - HTML metadata extraction and sanitization
//! - ZIP archive unpacking into portable records and rebuilding for download
//! - Same-archive asset inlining for self-contained rendering
//! - A bounded, ordered post store over a pluggable key-value engine, with
//!   synchronous subscriber fan-out

pub mod archive;
pub mod classify;
pub mod content;
pub mod error;
pub mod html_meta;
pub mod kv;
pub mod render;
pub mod resolve;
pub mod store;

// Re-exports
pub use archive::{
    extract_zip, has_zip_magic, mime_for_path, rebuild_zip, DEFAULT_ARCHIVE_NAME, MAX_ZIP_BYTES,
};
pub use classify::{classify, classify_text};
pub use content::{
    ArchiveMetadata, Complexity, Content, FileEntry, Heading, HtmlContent, HtmlMetadata, Image,
    Link, Post, StoredFile, TextContent, ZipArchiveContent,
};
pub use error::{Result, SitedropError};
pub use html_meta::{is_html, parse_html, sanitize_html};
pub use kv::{Kv, MemoryKv, SqliteKv};
pub use render::inline_assets;
pub use resolve::{base_dir_of, is_external, resolve_relative};
pub use store::{
    Pagination, PostPage, PostStore, StoreStats, Subscription, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
    MAX_POSTS,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports_compile() {
        let _ = MAX_POSTS;
        let _ = MAX_ZIP_BYTES;
        let _ = DEFAULT_PAGE_SIZE;

        let store = PostStore::new(Box::new(MemoryKv::new()));
        let post = store.add(Post::new(Content::text("hello"))).unwrap();
        assert_eq!(post.content.kind(), "text");

        let _classify_text_fn: fn(&str) -> Content = classify_text;
        let _is_html_fn: fn(&str) -> bool = is_html;
        let _magic_fn: fn(&[u8]) -> bool = has_zip_magic;
        let _resolve_fn: fn(&str, &str) -> String = resolve_relative;
    }
}
