// elspeth-config/src/lib.rs
// ============================================================================
// Module: Elspeth Configuration Library
// Description: Resolved pipeline settings model and validation.
// Purpose: Provide strict, fail-closed settings the engine consumes directly.
// Dependencies: crate::{load, settings, validate}
// ============================================================================

//! ## Overview
//! Configuration reaches the engine as a resolved in-memory
//! [`PipelineSettings`] value. This crate defines that model, the YAML front
//! door used by the CLI, and the fail-closed validation that rejects unknown
//! sink references, unparsable gate predicates, and out-of-range limits
//! before any row is processed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod load;
pub mod settings;
pub mod validate;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use load::LoadError;
pub use load::MAX_SETTINGS_FILE_SIZE;
pub use load::load_settings;
pub use settings::AggregationSettings;
pub use settings::CheckpointPolicy;
pub use settings::CheckpointSettings;
pub use settings::CoalescePolicy;
pub use settings::CoalesceSettings;
pub use settings::CollisionPolicy;
pub use settings::GateSettings;
pub use settings::MergeStrategy;
pub use settings::PipelineSettings;
pub use settings::RetrySettings;
pub use settings::RouteTarget;
pub use settings::SinkSettings;
pub use settings::SourceSettings;
pub use settings::StepSettings;
pub use settings::TransformSettings;
pub use settings::TriggerSettings;
pub use validate::SettingsError;
