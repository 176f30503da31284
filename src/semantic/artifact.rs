//! Embeddings artifact codec.
//!
//! The artifact is a JSON array of [`EmbeddingItem`] records, optionally
//! gzip-compressed. Compressed input is detected by its magic bytes; output
//! is compressed when the target path ends in `.gz`. Records that do not
//! decode are logged and skipped.

use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

use crate::semantic::types::EmbeddingItem;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Errors that can occur while reading or writing the artifact.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Embeddings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Embeddings file is not a valid array (found {0})")]
    NotAnArray(&'static str),
}

/// Decode an artifact from raw (possibly gzip-compressed) bytes.
pub fn decode(bytes: &[u8]) -> Result<Vec<EmbeddingItem>, ArtifactError> {
    let value: Value = if bytes.starts_with(&GZIP_MAGIC) {
        let mut json = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut json)?;
        serde_json::from_slice(&json)?
    } else {
        serde_json::from_slice(bytes)?
    };

    let records = match value {
        Value::Array(records) => records,
        Value::Object(_) => return Err(ArtifactError::NotAnArray("object")),
        Value::String(_) => return Err(ArtifactError::NotAnArray("string")),
        Value::Number(_) => return Err(ArtifactError::NotAnArray("number")),
        Value::Bool(_) => return Err(ArtifactError::NotAnArray("bool")),
        Value::Null => return Err(ArtifactError::NotAnArray("null")),
    };

    let total = records.len();
    let items: Vec<EmbeddingItem> = records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match serde_json::from_value(record) {
            Ok(item) => Some(item),
            Err(e) => {
                log::warn!("skipping embeddings record #{index}: {e}");
                None
            }
        })
        .collect();

    if items.len() < total {
        log::warn!("kept {} of {} embeddings records", items.len(), total);
    }

    Ok(items)
}

/// Encode items as JSON, gzip-compressed when `gzip` is set.
pub fn encode(items: &[EmbeddingItem], gzip: bool) -> Result<Vec<u8>, ArtifactError> {
    let json = serde_json::to_vec(items)?;
    if !gzip {
        return Ok(json);
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Write the artifact to `path`, creating parent directories.
///
/// Uses atomic write: temp file -> rename
pub fn write(path: &Path, items: &[EmbeddingItem]) -> Result<(), ArtifactError> {
    let gzip = path.extension().is_some_and(|ext| ext == "gz");
    let bytes = encode(items, gzip)?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(&bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| ArtifactError::Io(e.error))?;

    Ok(())
}
