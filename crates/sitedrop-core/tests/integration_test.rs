//! Integration tests for sitedrop-core
//!
//! These tests verify end-to-end functionality:
//! - Classify an uploaded body and store the resulting post
//! - Page through stored posts
//! - Rebuild a downloadable archive from a stored record
//! - Persist posts across a database reopen

use bytes::Bytes;
use sitedrop_core::{
    classify, extract_zip, has_zip_magic, inline_assets, rebuild_zip, Content, MemoryKv, Post,
    PostStore, SitedropError, SqliteKv,
};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Build a small site archive with an index page, a stylesheet and an image.
fn site_zip() -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    writer.start_file("index.html", options).unwrap();
    writer
        .write_all(
            b"<html><head><title>Demo Site</title>\
              <link rel=\"stylesheet\" href=\"css/style.css\"></head>\
              <body><h1>Demo</h1><img src=\"img/logo.png\"></body></html>",
        )
        .unwrap();

    writer.start_file("css/style.css", options).unwrap();
    writer.write_all(b"h1{color:blue}").unwrap();

    writer.start_file("img/logo.png", options).unwrap();
    writer.write_all(&[0x89, 0x50, 0x4E, 0x47]).unwrap();

    writer.finish().unwrap().into_inner()
}

fn memory_store() -> PostStore {
    PostStore::new(Box::new(MemoryKv::new()))
}

#[tokio::test]
async fn test_ingest_zip_and_download_round_trip() {
    let store = memory_store();

    let content = classify("application/zip", Bytes::from(site_zip()))
        .await
        .unwrap();
    let post = store.add(Post::new(content)).unwrap();

    let fetched = store.get(&post.id).unwrap();
    let Content::ZipArchive(archive) = &fetched.content else {
        panic!("expected a zip-archive post");
    };
    assert_eq!(archive.main_file, "index.html");
    assert_eq!(archive.metadata.file_count, 3);
    assert_eq!(archive.html.metadata().unwrap().title, "Demo Site");

    let rebuilt = rebuild_zip(archive).unwrap();
    assert!(has_zip_magic(&rebuilt));
    let reread = extract_zip(&rebuilt, Some(&archive.metadata.filename)).unwrap();
    assert_eq!(reread.file_contents, archive.file_contents);
}

#[tokio::test]
async fn test_ingest_html_and_page_through() {
    let store = memory_store();

    for i in 0..25 {
        let body = format!("<html><title>Page {i}</title><body><p>body {i}</p></body></html>");
        let content = classify("text/html", Bytes::from(body)).await.unwrap();
        store.add(Post::new(content)).unwrap();
    }

    let page1 = store.get_page(1, 10).unwrap();
    assert_eq!(page1.posts.len(), 10);
    assert_eq!(page1.pagination.total_posts, 25);
    assert_eq!(page1.pagination.total_pages, 3);
    assert!(page1.pagination.has_more);

    // Newest first: page 1 starts with the last ingested document
    let Content::Html(html) = &page1.posts[0].content else {
        panic!("expected an html post");
    };
    assert_eq!(html.metadata().unwrap().title, "Page 24");

    let page3 = store.get_page(3, 10).unwrap();
    assert_eq!(page3.posts.len(), 5);
    assert!(!page3.pagination.has_more);
}

#[tokio::test]
async fn test_stored_archive_renders_self_contained() {
    let content = classify("application/zip", Bytes::from(site_zip()))
        .await
        .unwrap();
    let Content::ZipArchive(archive) = content else {
        panic!("expected a zip-archive");
    };

    let rendered =
        inline_assets(archive.html.html(), &archive.main_file, &archive.file_contents).unwrap();
    assert!(rendered.contains("<style>h1{color:blue}</style>"));
    assert!(rendered.contains("data:image/png;base64,"));
    assert!(!rendered.contains("href=\"css/style.css\""));
}

#[tokio::test]
async fn test_subscriber_sees_live_ingestion() {
    let store = memory_store();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = Arc::clone(&seen);
    let _sub = store.subscribe(move |post| {
        seen_clone.lock().unwrap().push(post.content.kind());
    });

    let content = classify("text/plain", Bytes::from_static(b"note to self"))
        .await
        .unwrap();
    store.add(Post::new(content)).unwrap();

    let content = classify("application/json", Bytes::from_static(b"{\"n\":1}"))
        .await
        .unwrap();
    store.add(Post::new(content)).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["text", "json"]);
}

#[test]
fn test_posts_survive_database_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("sitedrop.db");

    let id = {
        let store = PostStore::new(Box::new(SqliteKv::new(&db_path).unwrap()));
        let post = store.add(Post::new(Content::text("durable"))).unwrap();
        store.add(Post::new(Content::text("also durable"))).unwrap();
        post.id
    };

    let store = PostStore::new(Box::new(SqliteKv::new(&db_path).unwrap()));
    assert_eq!(store.count().unwrap(), 2);
    let post = store.get(&id).unwrap();
    match post.content {
        Content::Text(text) => assert_eq!(text.content, "durable"),
        other => panic!("expected text, got {}", other.kind()),
    }
}

#[tokio::test]
async fn test_error_taxonomy_end_to_end() {
    let store = memory_store();

    let err = classify("application/zip", Bytes::from_static(b"not a zip"))
        .await
        .unwrap_err();
    assert!(matches!(err, SitedropError::InvalidArchive));
    assert_eq!(err.code(), "invalid_archive");

    let err = classify("application/json", Bytes::from_static(b"{broken"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "parse_error");

    let err = store.get("no-such-id").unwrap_err();
    assert_eq!(err.code(), "not_found");
}
