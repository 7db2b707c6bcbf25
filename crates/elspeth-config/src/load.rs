// elspeth-config/src/load.rs
// ============================================================================
// Module: Elspeth Settings Loading
// Description: YAML front door for pipeline settings.
// Purpose: Load and validate settings files with strict size limits.
// Dependencies: crate::{settings, validate}, serde_yaml, thiserror
// ============================================================================

//! ## Overview
//! The CLI loads settings from a YAML file. Loading fails closed: missing
//! files, oversized files, parse failures, and validation defects all abort
//! before any plugin is instantiated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::settings::PipelineSettings;
use crate::validate::SettingsError;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum settings file size in bytes.
pub const MAX_SETTINGS_FILE_SIZE: u64 = 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading settings from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The settings file does not exist.
    #[error("settings file not found: {path}")]
    NotFound {
        /// Requested path.
        path: String,
    },
    /// The settings file exceeds the size limit.
    #[error("settings file exceeds size limit: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: u64,
        /// Actual file size in bytes.
        actual_bytes: u64,
    },
    /// The settings file could not be read.
    #[error("failed to read settings file {path}: {message}")]
    Io {
        /// Requested path.
        path: String,
        /// Underlying error description.
        message: String,
    },
    /// The settings file failed to parse.
    #[error("failed to parse settings file {path}: {message}")]
    Parse {
        /// Requested path.
        path: String,
        /// Underlying error description.
        message: String,
    },
    /// The parsed settings failed validation.
    #[error("invalid settings: {0}")]
    Invalid(#[from] SettingsError),
}

// ============================================================================
// SECTION: Loading
// ============================================================================

/// Loads and validates pipeline settings from a YAML file.
///
/// # Errors
///
/// Returns [`LoadError`] when the file is missing, oversized, unreadable,
/// unparsable, or fails validation.
pub fn load_settings(path: &Path) -> Result<PipelineSettings, LoadError> {
    let display = path.display().to_string();
    let metadata = fs::metadata(path).map_err(|_| LoadError::NotFound {
        path: display.clone(),
    })?;
    if metadata.len() > MAX_SETTINGS_FILE_SIZE {
        return Err(LoadError::TooLarge {
            max_bytes: MAX_SETTINGS_FILE_SIZE,
            actual_bytes: metadata.len(),
        });
    }
    let text = fs::read_to_string(path).map_err(|err| LoadError::Io {
        path: display.clone(),
        message: err.to_string(),
    })?;
    let settings: PipelineSettings =
        serde_yaml::from_str(&text).map_err(|err| LoadError::Parse {
            path: display,
            message: err.to_string(),
        })?;
    settings.validate()?;
    Ok(settings)
}
