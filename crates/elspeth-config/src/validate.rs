// elspeth-config/src/validate.rs
// ============================================================================
// Module: Elspeth Settings Validation
// Description: Fail-closed validation of resolved pipeline settings.
// Purpose: Reject broken pipelines before any plugin is instantiated.
// Dependencies: crate::settings, elspeth-core, elspeth-expr, thiserror
// ============================================================================

//! ## Overview
//! Validation runs before graph construction and fails closed: unknown sink
//! references, unparsable gate predicates, empty coalesces, and out-of-range
//! limits all abort the run at initialisation with errors naming the
//! offending element and the available alternatives.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::OnErrorPolicy;
use elspeth_expr::ParseError;
use elspeth_expr::parse_predicate;
use thiserror::Error;

use crate::settings::CoalescePolicy;
use crate::settings::GateSettings;
use crate::settings::PipelineSettings;
use crate::settings::RouteTarget;
use crate::settings::StepSettings;
use crate::settings::TriggerSettings;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum number of steps in one pipeline.
pub const MAX_STEPS: usize = 256;
/// Maximum number of sinks in one pipeline.
pub const MAX_SINKS: usize = 64;
/// Maximum number of branches in one fork.
pub const MAX_FORK_BRANCHES: usize = 32;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by settings validation.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The pipeline declares no sinks.
    #[error("pipeline `{pipeline}` declares no sinks")]
    NoSinks {
        /// Pipeline name.
        pipeline: String,
    },
    /// The default sink is not a declared sink.
    #[error("default sink `{sink}` is not declared; available sinks: {available:?}")]
    UnknownDefaultSink {
        /// The undeclared sink name.
        sink: String,
        /// Declared sink names.
        available: Vec<String>,
    },
    /// A gate route targets an undeclared sink.
    #[error(
        "gate `{gate}` routes label `{label}` to unknown sink `{sink}`; available sinks: \
         {available:?}"
    )]
    UnknownRouteSink {
        /// Gate name.
        gate: String,
        /// Route label.
        label: String,
        /// The undeclared sink name.
        sink: String,
        /// Declared sink names.
        available: Vec<String>,
    },
    /// The source quarantine destination is not a declared sink.
    #[error("quarantine sink `{sink}` is not declared; available sinks: {available:?}")]
    UnknownQuarantineSink {
        /// The undeclared sink name.
        sink: String,
        /// Declared sink names.
        available: Vec<String>,
    },
    /// An on-error policy routes to an undeclared sink.
    #[error("transform `{transform}` routes errors to unknown sink `{sink}`")]
    UnknownOnErrorSink {
        /// Transform plugin name.
        transform: String,
        /// The undeclared sink name.
        sink: String,
    },
    /// A config gate predicate failed to parse.
    #[error("gate `{gate}` has an invalid condition: {source}")]
    InvalidCondition {
        /// Gate name.
        gate: String,
        /// Parse failure.
        source: ParseError,
    },
    /// An aggregation condition trigger failed to parse.
    #[error("aggregation `{aggregation}` has an invalid trigger condition: {source}")]
    InvalidTriggerCondition {
        /// Aggregation name.
        aggregation: String,
        /// Parse failure.
        source: ParseError,
    },
    /// A gate declares neither a condition nor a plugin, or both.
    #[error("gate `{gate}` must declare exactly one of `condition` or `plugin`")]
    AmbiguousGate {
        /// Gate name.
        gate: String,
    },
    /// A fork gate declares no branches.
    #[error("gate `{gate}` routes to fork but declares no branches")]
    EmptyFork {
        /// Gate name.
        gate: String,
    },
    /// A coalesce declares no incoming branches.
    #[error("coalesce `{coalesce}` declares no branches")]
    EmptyCoalesce {
        /// Coalesce name.
        coalesce: String,
    },
    /// A quorum policy is out of range for the declared branches.
    #[error("coalesce `{coalesce}` quorum {quorum} is out of range for {branches} branches")]
    QuorumOutOfRange {
        /// Coalesce name.
        coalesce: String,
        /// Declared quorum.
        quorum: usize,
        /// Number of declared branches.
        branches: usize,
    },
    /// A select-branch policy names an undeclared branch.
    #[error("coalesce `{coalesce}` selects unknown branch `{branch}`")]
    UnknownSelectedBranch {
        /// Coalesce name.
        coalesce: String,
        /// The undeclared branch name.
        branch: String,
    },
    /// A count trigger is zero.
    #[error("aggregation `{aggregation}` declares a zero count trigger")]
    ZeroCountTrigger {
        /// Aggregation name.
        aggregation: String,
    },
    /// A step or sink limit was exceeded.
    #[error("pipeline `{pipeline}` exceeds the {what} limit ({actual} > {max})")]
    LimitExceeded {
        /// Pipeline name.
        pipeline: String,
        /// Limited quantity label.
        what: &'static str,
        /// Actual count.
        actual: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// Two steps share a name.
    #[error("pipeline `{pipeline}` declares duplicate step name `{name}`")]
    DuplicateStepName {
        /// Pipeline name.
        pipeline: String,
        /// Duplicated name.
        name: String,
    },
}

// ============================================================================
// SECTION: Validation
// ============================================================================

impl PipelineSettings {
    /// Validates the settings, failing closed on the first defect.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] describing the defect and, for unknown sink
    /// references, the declared alternatives.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let available: Vec<String> = self.sinks.keys().cloned().collect();

        if available.is_empty() {
            return Err(SettingsError::NoSinks {
                pipeline: self.name.clone(),
            });
        }
        if self.steps.len() > MAX_STEPS {
            return Err(SettingsError::LimitExceeded {
                pipeline: self.name.clone(),
                what: "step",
                actual: self.steps.len(),
                max: MAX_STEPS,
            });
        }
        if self.sinks.len() > MAX_SINKS {
            return Err(SettingsError::LimitExceeded {
                pipeline: self.name.clone(),
                what: "sink",
                actual: self.sinks.len(),
                max: MAX_SINKS,
            });
        }
        if !self.sinks.contains_key(&self.default_sink) {
            return Err(SettingsError::UnknownDefaultSink {
                sink: self.default_sink.clone(),
                available,
            });
        }
        if let Some(quarantine) = &self.source.quarantine_sink {
            if !self.sinks.contains_key(quarantine) {
                return Err(SettingsError::UnknownQuarantineSink {
                    sink: quarantine.clone(),
                    available,
                });
            }
        }

        self.validate_step_names()?;

        for step in &self.steps {
            match step {
                StepSettings::Transform(transform) => {
                    if let OnErrorPolicy::RouteTo {
                        sink,
                    } = &transform.on_error
                    {
                        if !self.sinks.contains_key(sink.as_str()) {
                            return Err(SettingsError::UnknownOnErrorSink {
                                transform: transform.plugin.clone(),
                                sink: sink.as_str().to_string(),
                            });
                        }
                    }
                }
                StepSettings::Gate(gate) => self.validate_gate(gate, &available)?,
                StepSettings::Aggregation(aggregation) => {
                    validate_trigger(&aggregation.trigger, &aggregation.name)?;
                }
                StepSettings::Coalesce(coalesce) => {
                    if coalesce.branches.is_empty() {
                        return Err(SettingsError::EmptyCoalesce {
                            coalesce: coalesce.name.clone(),
                        });
                    }
                    match &coalesce.policy {
                        CoalescePolicy::Quorum(quorum) => {
                            if *quorum == 0 || *quorum > coalesce.branches.len() {
                                return Err(SettingsError::QuorumOutOfRange {
                                    coalesce: coalesce.name.clone(),
                                    quorum: *quorum,
                                    branches: coalesce.branches.len(),
                                });
                            }
                        }
                        CoalescePolicy::SelectBranch(branch) => {
                            if !coalesce.branches.contains(branch) {
                                return Err(SettingsError::UnknownSelectedBranch {
                                    coalesce: coalesce.name.clone(),
                                    branch: branch.clone(),
                                });
                            }
                        }
                        CoalescePolicy::RequireAll | CoalescePolicy::BestEffort => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// Validates one gate's shape, routes, and predicate.
    fn validate_gate(
        &self,
        gate: &GateSettings,
        available: &[String],
    ) -> Result<(), SettingsError> {
        if gate.condition.is_some() == gate.plugin.is_some() {
            return Err(SettingsError::AmbiguousGate {
                gate: gate.name.clone(),
            });
        }
        if let Some(condition) = &gate.condition {
            parse_predicate(condition).map_err(|source| SettingsError::InvalidCondition {
                gate: gate.name.clone(),
                source,
            })?;
        }
        let mut forks = false;
        for (label, target) in &gate.routes {
            match target {
                RouteTarget::Continue => {}
                RouteTarget::Fork => forks = true,
                RouteTarget::Sink(sink) => {
                    if !self.sinks.contains_key(sink) {
                        return Err(SettingsError::UnknownRouteSink {
                            gate: gate.name.clone(),
                            label: label.clone(),
                            sink: sink.clone(),
                            available: available.to_vec(),
                        });
                    }
                }
            }
        }
        if forks && gate.fork_to.is_empty() {
            return Err(SettingsError::EmptyFork {
                gate: gate.name.clone(),
            });
        }
        if gate.fork_to.len() > MAX_FORK_BRANCHES {
            return Err(SettingsError::LimitExceeded {
                pipeline: self.name.clone(),
                what: "fork branch",
                actual: gate.fork_to.len(),
                max: MAX_FORK_BRANCHES,
            });
        }
        Ok(())
    }

    /// Rejects duplicate names among named steps.
    fn validate_step_names(&self) -> Result<(), SettingsError> {
        let mut seen: Vec<&str> = Vec::new();
        for step in &self.steps {
            let name = match step {
                StepSettings::Transform(_) => continue,
                StepSettings::Gate(gate) => gate.name.as_str(),
                StepSettings::Aggregation(aggregation) => aggregation.name.as_str(),
                StepSettings::Coalesce(coalesce) => coalesce.name.as_str(),
            };
            if seen.contains(&name) {
                return Err(SettingsError::DuplicateStepName {
                    pipeline: self.name.clone(),
                    name: name.to_string(),
                });
            }
            seen.push(name);
        }
        Ok(())
    }
}

/// Validates one trigger tree.
fn validate_trigger(trigger: &TriggerSettings, aggregation: &str) -> Result<(), SettingsError> {
    match trigger {
        TriggerSettings::Count(count) => {
            if *count == 0 {
                return Err(SettingsError::ZeroCountTrigger {
                    aggregation: aggregation.to_string(),
                });
            }
            Ok(())
        }
        TriggerSettings::TimeoutSeconds(_) => Ok(()),
        TriggerSettings::Condition(condition) => parse_predicate(condition)
            .map(|_| ())
            .map_err(|source| SettingsError::InvalidTriggerCondition {
                aggregation: aggregation.to_string(),
                source,
            }),
        TriggerSettings::AnyOf(inner) => {
            for trigger in inner {
                validate_trigger(trigger, aggregation)?;
            }
            Ok(())
        }
    }
}
