// elspeth-plugins/src/registry.rs
// ============================================================================
// Module: Elspeth Plugin Registry
// Description: Maps plugin names from settings to built-in instances.
// Purpose: Let the CLI assemble a plugin set from resolved settings.
// Dependencies: crate::{gate, sink, source, transform}, elspeth-core
// ============================================================================

//! ## Overview
//! The registry resolves the plugin names declared in settings to built-in
//! instances. Unknown names fail closed with the list of known plugins, the
//! same shape route-validation errors take.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::GatePlugin;
use elspeth_core::SinkPlugin;
use elspeth_core::SourcePlugin;
use elspeth_core::TransformPlugin;
use serde_json::Value;
use thiserror::Error;

use crate::gate::ForkGate;
use crate::gate::ThresholdGate;
use crate::sink::FileSink;
use crate::sink::LogSink;
use crate::sink::MemorySink;
use crate::source::CsvSource;
use crate::source::InlineSource;
use crate::transform::BatchCollectTransform;
use crate::transform::PassthroughTransform;
use crate::transform::RenameTransform;
use crate::transform::UppercaseTransform;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while resolving plugin names.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The plugin name is not a known built-in.
    #[error("unknown {kind} plugin `{name}`; available: {available:?}")]
    Unknown {
        /// Capability kind label.
        kind: &'static str,
        /// Requested plugin name.
        name: String,
        /// Known plugin names for the capability.
        available: &'static [&'static str],
    },
    /// The plugin rejected its configuration.
    #[error("plugin `{name}` rejected its config: {message}")]
    InvalidConfig {
        /// Requested plugin name.
        name: String,
        /// Rejection description.
        message: String,
    },
}

/// Folds a plugin config rejection into a registry error.
fn invalid_config(name: &str, error: &elspeth_core::PluginError) -> RegistryError {
    RegistryError::InvalidConfig {
        name: name.to_string(),
        message: error.to_string(),
    }
}

// ============================================================================
// SECTION: Builders
// ============================================================================

/// Builds a source plugin from its name and resolved configuration.
///
/// # Errors
///
/// Returns [`RegistryError`] for unknown names or rejected configs.
pub fn build_source(name: &str, config: &Value) -> Result<Box<dyn SourcePlugin>, RegistryError> {
    match name {
        "inline" => Ok(Box::new(
            InlineSource::from_config(config).map_err(|err| invalid_config(name, &err))?,
        )),
        "csv" => Ok(Box::new(
            CsvSource::from_config(config).map_err(|err| invalid_config(name, &err))?,
        )),
        other => Err(RegistryError::Unknown {
            kind: "source",
            name: other.to_string(),
            available: &["inline", "csv"],
        }),
    }
}

/// Builds a transform plugin from its name and resolved configuration.
///
/// # Errors
///
/// Returns [`RegistryError`] for unknown names or rejected configs.
pub fn build_transform(
    name: &str,
    config: &Value,
) -> Result<Box<dyn TransformPlugin>, RegistryError> {
    match name {
        "passthrough" => Ok(Box::new(PassthroughTransform::new())),
        "rename" => Ok(Box::new(
            RenameTransform::from_config(config).map_err(|err| invalid_config(name, &err))?,
        )),
        "uppercase" => Ok(Box::new(
            UppercaseTransform::from_config(config).map_err(|err| invalid_config(name, &err))?,
        )),
        "batch_collect" => Ok(Box::new(BatchCollectTransform::new())),
        other => Err(RegistryError::Unknown {
            kind: "transform",
            name: other.to_string(),
            available: &["passthrough", "rename", "uppercase", "batch_collect"],
        }),
    }
}

/// Builds a gate plugin from its name and resolved configuration.
///
/// # Errors
///
/// Returns [`RegistryError`] for unknown names or rejected configs.
pub fn build_gate(name: &str, config: &Value) -> Result<Box<dyn GatePlugin>, RegistryError> {
    match name {
        "threshold" => Ok(Box::new(
            ThresholdGate::from_config(config).map_err(|err| invalid_config(name, &err))?,
        )),
        "fork" => Ok(Box::new(
            ForkGate::from_config(config).map_err(|err| invalid_config(name, &err))?,
        )),
        other => Err(RegistryError::Unknown {
            kind: "gate",
            name: other.to_string(),
            available: &["threshold", "fork"],
        }),
    }
}

/// Builds a sink plugin from its name, sink label, and configuration.
///
/// # Errors
///
/// Returns [`RegistryError`] for unknown names or rejected configs.
pub fn build_sink(
    name: &str,
    label: &str,
    config: &Value,
) -> Result<Box<dyn SinkPlugin>, RegistryError> {
    match name {
        "file" => Ok(Box::new(
            FileSink::from_config(config).map_err(|err| invalid_config(name, &err))?,
        )),
        "memory" => Ok(Box::new(MemorySink::new(label))),
        "log" => Ok(Box::new(LogSink::new(label))),
        other => Err(RegistryError::Unknown {
            kind: "sink",
            name: other.to_string(),
            available: &["file", "memory", "log"],
        }),
    }
}
