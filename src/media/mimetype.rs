use std::path::Path;
use anyhow::{Result, Context};

const UNKNOWN: &str = "application/octet-stream";

/// Sniffs the container from the file's magic bytes.
pub fn detect_mimetype(path: &Path) -> Result<&'static str> {
    let kind = infer::get_from_path(path)
        .with_context(|| format!("Failed to read {:?} for mimetype detection", path))?;
    Ok(kind.map_or(UNKNOWN, |k| k.mime_type()))
}

/// Only `video/*` inputs are worth spawning a decoder for.
pub fn is_video(media_type: &str) -> bool {
    media_type.starts_with("video/")
}
