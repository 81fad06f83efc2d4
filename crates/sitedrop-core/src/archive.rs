//! ZIP archive extraction and reconstruction.
//!
//! An uploaded archive is unpacked into a portable record: per-entry
//! metadata, a base64 content map keyed by original entry path, the parsed
//! main HTML document, and aggregate metadata. The reverse direction
//! ([`rebuild_zip`]) reassembles a ZIP byte stream from a stored record for
//! downloads.

use crate::content::{ArchiveMetadata, FileEntry, StoredFile, ZipArchiveContent};
use crate::error::{Result, SitedropError};
use crate::html_meta::parse_html;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Maximum accepted ZIP payload, checked before decompression.
pub const MAX_ZIP_BYTES: usize = 10 * 1024 * 1024;
const MAX_ZIP_MIB: usize = MAX_ZIP_BYTES / (1024 * 1024);

/// Filename recorded when a direct upload carries no name.
pub const DEFAULT_ARCHIVE_NAME: &str = "uploaded.zip";

/// MIME classification by filename suffix. Unlisted extensions fall back to
/// `application/octet-stream`.
const MIME_TABLE: &[(&str, &str)] = &[
    (".html", "text/html"),
    (".htm", "text/html"),
    (".css", "text/css"),
    (".js", "text/javascript"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".svg", "image/svg+xml"),
];

/// Classify an archive entry's MIME type purely by its path suffix.
pub fn mime_for_path(path: &str) -> &'static str {
    for (suffix, mime) in MIME_TABLE {
        if path.ends_with(suffix) {
            return mime;
        }
    }
    "application/octet-stream"
}

/// Check the 4-byte PK signature: `50 4B`, then one of `03/05/07`, then one
/// of `04/06/08` (local file header, end of central directory, or spanned
/// marker).
pub fn has_zip_magic(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    data[0] == 0x50
        && data[1] == 0x4B
        && matches!(data[2], 0x03 | 0x05 | 0x07)
        && matches!(data[3], 0x04 | 0x06 | 0x08)
}

/// Unpack a ZIP payload into an archive record.
///
/// Size and magic-number preconditions are checked before the decompressor
/// runs. Entries that individually fail to decompress are logged and
/// skipped; an archive with no readable HTML entry is rejected with
/// `NoHtmlInArchive`.
pub fn extract_zip(data: &[u8], filename: Option<&str>) -> Result<ZipArchiveContent> {
    if data.len() > MAX_ZIP_BYTES {
        return Err(SitedropError::PayloadTooLarge {
            size: data.len(),
            limit_mib: MAX_ZIP_MIB,
        });
    }
    if !has_zip_magic(data) {
        return Err(SitedropError::InvalidArchive);
    }

    let mut archive = ZipArchive::new(Cursor::new(data))?;

    let mut files: Vec<FileEntry> = Vec::new();
    let mut file_contents: BTreeMap<String, StoredFile> = BTreeMap::new();
    let mut html_files: Vec<String> = Vec::new();
    let mut js_files: Vec<String> = Vec::new();
    let mut css_files: Vec<String> = Vec::new();
    // Raw bytes of the entry selected as the main document.
    let mut raw: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("skipping unreadable ZIP entry {index}: {err}");
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let path = entry.name().to_string();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        if let Err(err) = entry.read_to_end(&mut bytes) {
            tracing::warn!("skipping ZIP entry {path}: {err}");
            continue;
        }

        let mime = mime_for_path(&path);
        match mime {
            "text/html" => html_files.push(path.clone()),
            "text/javascript" => js_files.push(path.clone()),
            "text/css" => css_files.push(path.clone()),
            _ => {}
        }

        files.push(FileEntry {
            path: path.clone(),
            mime: mime.to_string(),
            size: bytes.len() as u64,
        });
        file_contents.insert(
            path.clone(),
            StoredFile {
                mime: mime.to_string(),
                content: BASE64.encode(&bytes),
            },
        );
        raw.insert(path, bytes);
    }

    if html_files.is_empty() {
        return Err(SitedropError::NoHtmlInArchive);
    }

    let main_file = select_main_file(&html_files);
    let main_bytes = raw.get(&main_file).map(Vec::as_slice).unwrap_or_default();
    let html = parse_html(&String::from_utf8_lossy(main_bytes));

    tracing::debug!(
        "extracted ZIP: {} files, {} HTML, main {main_file}",
        files.len(),
        html_files.len()
    );

    let file_count = files.len();
    Ok(ZipArchiveContent::new(
        main_file,
        files,
        file_contents,
        html,
        ArchiveMetadata {
            filename: filename.unwrap_or(DEFAULT_ARCHIVE_NAME).to_string(),
            size: data.len() as u64,
            file_count,
            html_files,
            js_files,
            css_files,
        },
    ))
}

/// The entry whose path ends in `index.html` (either separator, or the bare
/// root file) wins; otherwise the first HTML entry in enumeration order.
fn select_main_file(html_files: &[String]) -> String {
    html_files
        .iter()
        .find(|path| {
            path.ends_with("/index.html")
                || path.ends_with("\\index.html")
                || path.as_str() == "index.html"
        })
        .unwrap_or(&html_files[0])
        .clone()
}

/// Reassemble a ZIP byte stream from a stored archive record, writing each
/// entry at its original path.
pub fn rebuild_zip(content: &ZipArchiveContent) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    for (path, stored) in &content.file_contents {
        let bytes = BASE64.decode(&stored.content)?;
        writer.start_file(path.as_str(), options)?;
        writer
            .write_all(&bytes)
            .map_err(|err| SitedropError::Zip(zip::result::ZipError::Io(err)))?;
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}
