//! Request body classification.
//!
//! Turns a raw body plus its `Content-Type` header into a typed
//! [`Content`] value. Dispatch is header-first, with magic-byte sniffing
//! for untyped bytes and a text fallback chain (HTML, then JSON, then
//! plain text) for everything that is not an archive or a declared JSON
//! document.

use crate::archive::{extract_zip, has_zip_magic};
use crate::content::Content;
use crate::error::{Result, SitedropError};
use crate::html_meta::{is_html, parse_html};
use bytes::Bytes;
use futures_util::stream;
use serde_json::Value;

/// Multipart field names checked, in order, when picking the upload field.
/// `file` is the canonical name; the rest are accepted as aliases.
const UPLOAD_FIELD_NAMES: &[&str] = &["file", "zipFile", "html", "zip", "archive", "upload"];

/// Field holding a raw JSON document when a multipart request has no file.
const JSON_FIELD_NAME: &str = "json";

/// Classify a request body by its `Content-Type` header.
///
/// Async because multipart bodies are parsed through a streaming
/// decoder; every other branch completes synchronously.
pub async fn classify(content_type: &str, body: Bytes) -> Result<Content> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match media_type.as_str() {
        "application/json" => {
            let value: Value = serde_json::from_slice(&body).map_err(SitedropError::Parse)?;
            Ok(Content::Json(value))
        }
        "multipart/form-data" => classify_multipart(content_type, body).await,
        "application/zip" | "application/x-zip-compressed" => {
            Ok(Content::ZipArchive(extract_zip(&body, None)?))
        }
        "application/octet-stream" => {
            if has_zip_magic(&body) {
                Ok(Content::ZipArchive(extract_zip(&body, None)?))
            } else {
                Ok(classify_text(&decode_text(&body)))
            }
        }
        _ => Ok(classify_text(&decode_text(&body))),
    }
}

/// Classify decoded text: HTML-looking markup first, then a JSON document,
/// then plain text.
pub fn classify_text(text: &str) -> Content {
    if is_html(text) {
        return Content::Html(parse_html(text));
    }
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Content::Json(value);
    }
    Content::text(text)
}

struct UploadField {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

async fn classify_multipart(content_type: &str, body: Bytes) -> Result<Content> {
    let boundary = multer::parse_boundary(content_type)?;
    let body_stream = stream::once(async move { Ok::<Bytes, std::convert::Infallible>(body) });
    let mut multipart = multer::Multipart::new(body_stream, boundary);

    let mut fields: Vec<UploadField> = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        fields.push(UploadField {
            name: field.name().unwrap_or("").to_string(),
            filename: field.file_name().map(str::to_string),
            content_type: field.content_type().map(|mime| mime.to_string()),
            data: field.bytes().await?,
        });
    }

    let Some(upload) = pick_upload_field(&fields) else {
        return classify_form_fields(&fields);
    };

    if is_zip_upload(upload) {
        let content = extract_zip(&upload.data, upload.filename.as_deref())?;
        return Ok(Content::ZipArchive(content));
    }

    Ok(classify_text(&decode_text(&upload.data)))
}

/// Pick the uploaded file: the first known field name carrying a filename,
/// else any field carrying one.
fn pick_upload_field<'a>(fields: &'a [UploadField]) -> Option<&'a UploadField> {
    for name in UPLOAD_FIELD_NAMES {
        if let Some(field) = fields
            .iter()
            .find(|f| f.name == *name && f.filename.is_some())
        {
            return Some(field);
        }
    }
    fields.iter().find(|f| f.filename.is_some())
}

/// A multipart file is routed to archive extraction only on its declared
/// name or MIME type; undeclared binary data falls through to the text
/// chain even when its bytes look like a ZIP.
fn is_zip_upload(field: &UploadField) -> bool {
    if let Some(filename) = &field.filename {
        if filename.to_ascii_lowercase().ends_with(".zip") {
            return true;
        }
    }
    if let Some(content_type) = &field.content_type {
        if content_type == "application/zip" || content_type == "application/x-zip-compressed" {
            return true;
        }
    }
    false
}

/// A multipart request without a file: a `json` field is parsed strictly,
/// otherwise the form fields are stored as a flat string map.
fn classify_form_fields(fields: &[UploadField]) -> Result<Content> {
    if let Some(field) = fields.iter().find(|f| f.name == JSON_FIELD_NAME) {
        let value: Value = serde_json::from_slice(&field.data).map_err(SitedropError::Parse)?;
        return Ok(Content::Json(value));
    }

    let map: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| {
            (
                f.name.clone(),
                Value::String(decode_text(&f.data)),
            )
        })
        .collect();
    Ok(Content::Json(Value::Object(map)))
}

/// Decode bytes as text: UTF-8 when valid, otherwise the detected legacy
/// encoding.
fn decode_text(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let (decoded, actual, _had_errors) = encoding.decode(bytes);
    tracing::debug!("decoded non-UTF-8 body as {}", actual.name());
    decoded.into_owned()
}
