//! Upload media kinds, field validation, and tag normalization.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum accepted upload size (2 GiB).
pub const MAX_UPLOAD_SIZE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Length of a hex-encoded SHA-256 checksum.
pub const CHECKSUM_HEX_LEN: usize = 64;

/// Maximum number of tags per upload.
pub const MAX_TAGS: usize = 32;

/// Maximum length of a single tag.
pub const MAX_TAG_LEN: usize = 64;

/// Maximum length of a storage path or original file name.
const MAX_PATH_LEN: usize = 1024;

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// Infer the media kind from a MIME type such as `image/png`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let top = mime.split('/').next()?.trim().to_ascii_lowercase();
        match top.as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            _ => Err(CoreError::Validation(format!(
                "Invalid media kind '{s}'. Must be one of: image, video"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a hex SHA-256 checksum. Accepts either case.
pub fn validate_checksum(checksum: &str) -> Result<(), CoreError> {
    if checksum.len() != CHECKSUM_HEX_LEN {
        return Err(CoreError::Validation(format!(
            "checksum must be {CHECKSUM_HEX_LEN} hex characters, got {}",
            checksum.len()
        )));
    }
    if !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CoreError::Validation(
            "checksum must contain only hex digits".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_size(size_bytes: u64) -> Result<(), CoreError> {
    if size_bytes == 0 {
        return Err(CoreError::Validation("upload must not be empty".to_string()));
    }
    if size_bytes > MAX_UPLOAD_SIZE_BYTES {
        return Err(CoreError::Validation(format!(
            "upload size {size_bytes} exceeds maximum of {MAX_UPLOAD_SIZE_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Validate a storage path handed over by the upload collaborator.
pub fn validate_storage_path(path: &str) -> Result<(), CoreError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(
            "storage path must not be empty".to_string(),
        ));
    }
    if trimmed.len() > MAX_PATH_LEN {
        return Err(CoreError::Validation(format!(
            "storage path must not exceed {MAX_PATH_LEN} characters"
        )));
    }
    if trimmed.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(CoreError::Validation(format!(
            "storage path '{trimmed}' must not contain '..' segments"
        )));
    }
    Ok(())
}

/// Trim, drop empties, deduplicate and sort a tag list, then validate it.
pub fn normalize_tags<I, S>(tags: I) -> Result<Vec<String>, CoreError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let set: BTreeSet<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    if set.len() > MAX_TAGS {
        return Err(CoreError::Validation(format!(
            "An upload may have at most {MAX_TAGS} tags"
        )));
    }
    if let Some(long) = set.iter().find(|t| t.chars().count() > MAX_TAG_LEN) {
        return Err(CoreError::Validation(format!(
            "Tag \"{long}\" exceeds {MAX_TAG_LEN} characters"
        )));
    }
    Ok(set.into_iter().collect())
}
