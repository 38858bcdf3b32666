//! # Configuration and Message Loading
//!
//! Reads the TOML configuration and the JSON message descriptors from disk.
//! Every path is canonicalized and size-checked before it is read.

use mailscore_core::{Message, ScoreConfig, ScoreError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum configuration file size (1 MB).
pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Maximum message descriptor file size (16 MB).
pub const MAX_MESSAGE_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), ScoreError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ScoreError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(ScoreError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize a path and make sure it names a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, ScoreError> {
    let canonical = path.canonicalize().map_err(|e| {
        ScoreError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(ScoreError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

fn read_bounded(path: &Path, max_size: u64) -> Result<String, ScoreError> {
    let path = validate_file_path(path)?;
    validate_file_size(&path, max_size)?;
    std::fs::read_to_string(&path)
        .map_err(|e| ScoreError::IoError(format!("Cannot read '{}': {}", path.display(), e)))
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Parse a TOML configuration document.
pub fn parse_config(text: &str) -> Result<ScoreConfig, ScoreError> {
    toml::from_str(text).map_err(|e| ScoreError::InvalidConfig(e.to_string()))
}

/// Load the configuration file, or the built-in defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<ScoreConfig, ScoreError> {
    match path {
        Some(path) => {
            let config = parse_config(&read_bounded(path, MAX_CONFIG_FILE_SIZE)?)?;
            tracing::debug!(path = %path.display(), metrics = config.metrics.len(), "configuration loaded");
            Ok(config)
        }
        None => {
            tracing::debug!("no configuration file given, using defaults");
            Ok(ScoreConfig::default())
        }
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum MessageFile {
    One(Message),
    Many(Vec<Message>),
}

/// Parse one descriptor or an array of descriptors.
pub fn parse_messages(text: &str) -> Result<Vec<Message>, ScoreError> {
    let file: MessageFile = serde_json::from_str(text)
        .map_err(|e| ScoreError::SerializationError(format!("Invalid message JSON: {}", e)))?;
    Ok(match file {
        MessageFile::One(message) => vec![message],
        MessageFile::Many(messages) => messages,
    })
}

/// Load every descriptor from the given files, in order.
pub fn load_messages(paths: &[PathBuf]) -> Result<Vec<Message>, ScoreError> {
    let mut messages = Vec::new();
    for path in paths {
        messages.extend(parse_messages(&read_bounded(path, MAX_MESSAGE_FILE_SIZE)?)?);
    }
    Ok(messages)
}
