//! Relative path resolution inside an archive.
//!
//! References found in an archive's HTML (`href`/`src` attributes) are
//! resolved against the directory of the file that contains them, producing
//! keys into the archive's content map. Absolute URLs and `data:` URIs are
//! never resolved; callers check [`is_external`] first.

/// True for references that must be used as-is (absolute URLs, `data:` URIs).
pub fn is_external(reference: &str) -> bool {
    reference.starts_with("http") || reference.starts_with("data:")
}

/// Directory component of an archive-internal path, with trailing slash.
/// Returns the empty string for a root-level file.
pub fn base_dir_of(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..=idx].to_string(),
        None => String::new(),
    }
}

/// Resolve a reference against a base directory (trailing slash, possibly
/// empty for the archive root).
///
/// - `./x` drops the prefix and appends to the base directory
/// - `../x` walks up one base segment per leading `..`; walking past the
///   root is a no-op
/// - `/x` is archive-root-relative (leading slash stripped)
/// - anything else appends to the base directory
pub fn resolve_relative(base_dir: &str, reference: &str) -> String {
    if let Some(rest) = reference.strip_prefix("./") {
        return format!("{base_dir}{rest}");
    }

    if reference.starts_with("../") {
        let mut parts: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
        for part in reference.split('/') {
            match part {
                ".." => {
                    parts.pop();
                }
                "." | "" => {}
                other => parts.push(other),
            }
        }
        return parts.join("/");
    }

    if let Some(rest) = reference.strip_prefix('/') {
        return rest.to_string();
    }

    format!("{base_dir}{reference}")
}
