//! Pulls the IAM template out of a zipped pipeline artifact.

use std::io::{Cursor, Read};
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tracing::{error, info, warn};

use super::BlobStore;
use crate::models::job::S3Location;

/// Default naming convention for IAM templates inside an artifact.
pub const DEFAULT_TEMPLATE_PATTERN: &str = r"Role.*\.yaml";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("artifact is not a readable archive: {0}")]
    UnreadableArtifact(#[from] zip::result::ZipError),

    #[error("entry {path} is not readable text: {source}")]
    UnreadableEntry {
        path: String,
        source: std::io::Error,
    },
}

/// The template selected from one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub path: String,
    pub body: String,
    /// Every matching entry, in archive order. The first one is `path`.
    pub matched: Vec<String>,
}

impl Extraction {
    pub fn is_ambiguous(&self) -> bool {
        self.matched.len() > 1
    }
}

/// Scan the archive in `blob` for entries whose path matches `pattern` and
/// return the text of the first one.
///
/// Only central directory names are scanned; the selected entry is the only
/// one opened, so unreadable entries elsewhere in the archive do not matter.
pub fn extract(blob: &[u8], pattern: &Regex) -> Result<Option<Extraction>, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(blob))?;

    let mut matched = Vec::new();
    let mut first_index = None;
    for i in 0..archive.len() {
        let Some(name) = archive.name_for_index(i) else {
            continue;
        };
        if name.ends_with('/') || !pattern.is_match(name) {
            continue;
        }
        info!(path = name, "found template match");
        first_index.get_or_insert(i);
        matched.push(name.to_string());
    }

    let Some(index) = first_index else {
        return Ok(None);
    };

    if matched.len() > 1 {
        warn!(
            pattern = pattern.as_str(),
            files = ?matched,
            "multiple files match the template pattern; only using the first"
        );
    }

    let mut entry = archive.by_index(index)?;
    let mut body = String::new();
    entry
        .read_to_string(&mut body)
        .map_err(|source| ExtractError::UnreadableEntry {
            path: matched[0].clone(),
            source,
        })?;

    Ok(Some(Extraction {
        path: matched[0].clone(),
        body,
        matched,
    }))
}

/// Fetches artifacts and extracts their candidate template.
pub struct ArtifactExtractor {
    blobs: Arc<dyn BlobStore>,
    pattern: Regex,
}

impl ArtifactExtractor {
    pub fn new(blobs: Arc<dyn BlobStore>, pattern: Regex) -> Self {
        Self { blobs, pattern }
    }

    /// `None` when the artifact has no matching file, or cannot be read at all.
    pub async fn candidate_template(&self, location: &S3Location) -> Option<Extraction> {
        let blob = match self.blobs.fetch(location).await {
            Ok(b) => b,
            Err(e) => {
                error!(artifact = %location, "unable to read artifact: {:#}", e);
                return None;
            }
        };

        match extract(&blob, &self.pattern) {
            Ok(Some(extraction)) => Some(extraction),
            Ok(None) => {
                info!(
                    artifact = %location,
                    pattern = self.pattern.as_str(),
                    "no file matching the template pattern was found"
                );
                None
            }
            Err(e) => {
                error!(artifact = %location, "unable to unpack artifact: {}", e);
                None
            }
        }
    }
}
