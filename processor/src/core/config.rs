//! Processor configuration
//!
//! JSON config file, compiled into immutable transform rules. Priority
//! (lowest to highest): config file, then CLI arguments (which include env
//! var fallbacks via clap).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use opentelemetry_proto::tonic::metrics::v1::AggregationTemporality;
use serde::Deserialize;
use thiserror::Error;

use super::cli::CliConfig;
use crate::domain::metrics::{
    AggregationType, LabelOperation, MetricFilter, StringMatcher, SubmatchCase, TransformAction,
    TransformRule,
};

// ============================================================================
// ERRORS
// ============================================================================

/// Invalid transform configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("transforms[{index}]: missing required field \"{field}\"")]
    MissingField { index: usize, field: &'static str },

    #[error("transforms[{index}]: invalid regexp {pattern:?}: {source}")]
    InvalidRegex {
        index: usize,
        pattern: String,
        source: regex::Error,
    },

    #[error("transforms[{index}]: action \"combine\" requires match_type \"regexp\"")]
    CombineRequiresRegexp { index: usize },

    #[error("transforms[{index}].operations[{operation}]: missing required field \"{field}\"")]
    MissingOperationField {
        index: usize,
        operation: usize,
        field: &'static str,
    },

    #[error("transforms[{index}].operations[{operation}]: experimental_scale must be non-zero")]
    ZeroScale { index: usize, operation: usize },

    #[error("batch_per_resource.attribute_key must not be empty")]
    EmptyAttributeKey,
}

// ============================================================================
// FILE CONFIG
// ============================================================================

/// How `include` and label values are matched
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Strict,
    Regexp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalityFileConfig {
    Cumulative,
    Delta,
}

impl From<TemporalityFileConfig> for i32 {
    fn from(value: TemporalityFileConfig) -> Self {
        match value {
            TemporalityFileConfig::Cumulative => AggregationTemporality::Cumulative as i32,
            TemporalityFileConfig::Delta => AggregationTemporality::Delta as i32,
        }
    }
}

/// One value rewrite of an `update_label` operation
#[derive(Debug, Clone, Deserialize)]
pub struct ValueActionFileConfig {
    pub value: String,
    pub new_value: String,
}

/// Label operation section (from JSON config file), tagged by `action`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperationFileConfig {
    UpdateLabel {
        label: Option<String>,
        new_label: Option<String>,
        #[serde(default)]
        value_actions: Vec<ValueActionFileConfig>,
    },
    AggregateLabels {
        #[serde(default)]
        label_set: Vec<String>,
        aggregation_type: Option<AggregationType>,
    },
    AggregateLabelValues {
        label: Option<String>,
        #[serde(default)]
        aggregated_values: Vec<String>,
        new_value: Option<String>,
        aggregation_type: Option<AggregationType>,
    },
    AddLabel {
        new_label: Option<String>,
        new_value: Option<String>,
    },
    DeleteLabelValue {
        label: Option<String>,
        label_value: Option<String>,
    },
    ToggleScalarDataType {
        aggregation_temporality: Option<TemporalityFileConfig>,
        is_monotonic: Option<bool>,
    },
    ExperimentalScaleValue {
        experimental_scale: Option<f64>,
    },
}

/// Transform rule section (from JSON config file)
#[derive(Debug, Clone, Deserialize)]
pub struct TransformFileConfig {
    pub include: Option<String>,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default)]
    pub experimental_match_labels: BTreeMap<String, String>,
    pub action: TransformAction,
    pub new_name: Option<String>,
    #[serde(default)]
    pub group_resource_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub aggregation_type: AggregationType,
    #[serde(default)]
    pub submatch_case: SubmatchCase,
    #[serde(default)]
    pub operations: Vec<OperationFileConfig>,
}

/// Batch regrouping section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BatchPerResourceFileConfig {
    pub attribute_key: Option<String>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub transforms: Vec<TransformFileConfig>,
    pub batch_per_resource: Option<BatchPerResourceFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Compile every transform section, in order
    pub fn build_rules(&self) -> Result<Vec<TransformRule>, ConfigError> {
        self.transforms
            .iter()
            .enumerate()
            .map(|(index, transform)| transform.compile(index))
            .collect()
    }
}

fn compile_matcher(
    index: usize,
    match_type: MatchType,
    value: &str,
) -> Result<StringMatcher, ConfigError> {
    match match_type {
        MatchType::Strict => Ok(StringMatcher::Strict(value.to_string())),
        MatchType::Regexp => {
            StringMatcher::regexp(value).map_err(|source| ConfigError::InvalidRegex {
                index,
                pattern: value.to_string(),
                source,
            })
        }
    }
}

impl TransformFileConfig {
    /// Validate and compile into a rule; `index` locates errors
    pub fn compile(&self, index: usize) -> Result<TransformRule, ConfigError> {
        let include = self
            .include
            .as_deref()
            .ok_or(ConfigError::MissingField {
                index,
                field: "include",
            })?;

        let needs_new_name = matches!(
            self.action,
            TransformAction::Insert | TransformAction::Combine
        );
        if needs_new_name && self.new_name.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::MissingField {
                index,
                field: "new_name",
            });
        }
        if self.action == TransformAction::Combine && self.match_type != MatchType::Regexp {
            return Err(ConfigError::CombineRequiresRegexp { index });
        }
        if self.action == TransformAction::Group && self.group_resource_labels.is_empty() {
            return Err(ConfigError::MissingField {
                index,
                field: "group_resource_labels",
            });
        }

        let mut filter = match self.match_type {
            MatchType::Strict => MetricFilter::strict(include),
            MatchType::Regexp => {
                MetricFilter::regexp(include).map_err(|source| ConfigError::InvalidRegex {
                    index,
                    pattern: include.to_string(),
                    source,
                })?
            }
        };
        for (key, value) in &self.experimental_match_labels {
            filter = filter.with_attribute(key, compile_matcher(index, self.match_type, value)?);
        }

        let mut rule = TransformRule::new(self.action, filter)
            .with_submatch_case(self.submatch_case)
            .with_aggregation(self.aggregation_type);
        if let Some(new_name) = self.new_name.as_deref().filter(|n| !n.is_empty()) {
            rule = rule.with_new_name(new_name);
        }
        for (key, value) in &self.group_resource_labels {
            rule = rule.with_group_resource_label(key, value);
        }
        for (operation, config) in self.operations.iter().enumerate() {
            rule = rule.with_operation(config.compile(index, operation)?);
        }
        Ok(rule)
    }
}

impl OperationFileConfig {
    fn compile(&self, index: usize, operation: usize) -> Result<LabelOperation, ConfigError> {
        let required = |value: Option<&String>, field: &'static str| {
            value.cloned().ok_or(ConfigError::MissingOperationField {
                index,
                operation,
                field,
            })
        };

        Ok(match self {
            Self::UpdateLabel {
                label,
                new_label,
                value_actions,
            } => LabelOperation::UpdateLabel {
                label: required(label.as_ref(), "label")?,
                new_label: new_label.clone().filter(|l| !l.is_empty()),
                value_actions: value_actions
                    .iter()
                    .map(|a| (a.value.clone(), a.new_value.clone()))
                    .collect::<HashMap<_, _>>(),
            },
            Self::AggregateLabels {
                label_set,
                aggregation_type,
            } => {
                if label_set.is_empty() {
                    return Err(ConfigError::MissingOperationField {
                        index,
                        operation,
                        field: "label_set",
                    });
                }
                LabelOperation::AggregateLabels {
                    label_set: label_set.iter().cloned().collect::<BTreeSet<_>>(),
                    aggregation: aggregation_type.ok_or(ConfigError::MissingOperationField {
                        index,
                        operation,
                        field: "aggregation_type",
                    })?,
                }
            }
            Self::AggregateLabelValues {
                label,
                aggregated_values,
                new_value,
                aggregation_type,
            } => {
                if aggregated_values.is_empty() {
                    return Err(ConfigError::MissingOperationField {
                        index,
                        operation,
                        field: "aggregated_values",
                    });
                }
                LabelOperation::AggregateLabelValues {
                    label: required(label.as_ref(), "label")?,
                    aggregated_values: aggregated_values.iter().cloned().collect(),
                    new_value: required(new_value.as_ref(), "new_value")?,
                    aggregation: aggregation_type.ok_or(ConfigError::MissingOperationField {
                        index,
                        operation,
                        field: "aggregation_type",
                    })?,
                }
            }
            Self::AddLabel {
                new_label,
                new_value,
            } => LabelOperation::AddLabel {
                new_label: required(new_label.as_ref(), "new_label")?,
                new_value: required(new_value.as_ref(), "new_value")?,
            },
            Self::DeleteLabelValue { label, label_value } => LabelOperation::DeleteLabelValue {
                label: required(label.as_ref(), "label")?,
                label_value: required(label_value.as_ref(), "label_value")?,
            },
            Self::ToggleScalarDataType {
                aggregation_temporality,
                is_monotonic,
            } => LabelOperation::ToggleScalarDataType {
                aggregation_temporality: aggregation_temporality
                    .unwrap_or(TemporalityFileConfig::Cumulative)
                    .into(),
                is_monotonic: is_monotonic.unwrap_or(false),
            },
            Self::ExperimentalScaleValue { experimental_scale } => match experimental_scale {
                None => {
                    return Err(ConfigError::MissingOperationField {
                        index,
                        operation,
                        field: "experimental_scale",
                    });
                }
                Some(factor) if *factor == 0.0 => {
                    return Err(ConfigError::ZeroScale { index, operation });
                }
                Some(factor) => LabelOperation::ScaleValue { factor: *factor },
            },
        })
    }
}

// ============================================================================
// FINAL CONFIG
// ============================================================================

/// Final merged configuration
#[derive(Debug, Clone)]
pub struct ReshapeConfig {
    pub input: PathBuf,
    pub transforms: Vec<TransformRule>,
    pub attribute_key: Option<String>,
}

impl ReshapeConfig {
    /// Load configuration from the config file (if any) and CLI arguments
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let file_config = match &cli.config {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                let config = FileConfig::load_from_file(path)?;
                config.warn_unknown_fields();
                config
            }
            None => FileConfig::default(),
        };

        let transforms = file_config
            .build_rules()
            .context("Invalid transform configuration")?;

        let attribute_key = cli.attribute_key.clone().or_else(|| {
            file_config
                .batch_per_resource
                .as_ref()
                .and_then(|b| b.attribute_key.clone())
        });

        let config = Self {
            input: cli.input.clone(),
            transforms,
            attribute_key,
        };
        config.validate()?;

        tracing::debug!(
            transforms = config.transforms.len(),
            attribute_key = ?config.attribute_key,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.attribute_key.as_deref() == Some("") {
            return Err(ConfigError::EmptyAttributeKey.into());
        }
        Ok(())
    }
}
