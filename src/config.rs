use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use jsonschema::{JSONSchema, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    decision::PipelineLimits,
    ledger::LedgerEntry,
    oracle::rule_based::DEFAULT_CHURN_THRESHOLD,
    types::{Treatment, TreatmentId},
};

pub const SCHEMA_FILE_NAME: &str = "cvm-decision.schema.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub treatments: BTreeMap<TreatmentId, Treatment>,
    #[serde(default)]
    pub constraints: BTreeMap<TreatmentId, ConstraintConfig>,
    #[serde(default)]
    pub custom_treatments: Vec<CustomTreatmentSource>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_enabled_true() -> bool {
    true
}

fn default_max_alternative_searches() -> u32 {
    1
}

fn default_oracle_timeout_ms() -> u64 {
    30_000
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}

fn default_max_concurrency() -> usize {
    8
}

fn default_churn_threshold() -> f64 {
    DEFAULT_CHURN_THRESHOLD
}

fn default_credential_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

fn default_profile_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_permissions_path() -> PathBuf {
    PathBuf::from("./data/permissions.json")
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_logging_filter() -> String {
    "info".to_string()
}

fn default_logging_rotation() -> LoggingRotation {
    LoggingRotation::Daily
}

fn default_logging_retention_days() -> usize {
    14
}

/// Daily capacity for one configured treatment. `remaining_availability` defaults to the full
/// quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintConfig {
    pub max_per_day: u32,
    #[serde(default)]
    pub remaining_availability: Option<u32>,
    #[serde(default)]
    pub cost_per_contact_pounds: f64,
    #[serde(default)]
    pub priority: i32,
}

impl ConstraintConfig {
    pub fn to_entry(&self, treatment_id: &str) -> LedgerEntry {
        LedgerEntry::new(treatment_id, self.max_per_day)
            .with_remaining(self.remaining_availability.unwrap_or(self.max_per_day))
            .with_cost(self.cost_per_contact_pounds)
            .with_priority(self.priority)
    }
}

/// A custom treatment given either as free text or as a structured object. An `id` key on the
/// object pins the treatment id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomTreatmentSource {
    Text(String),
    Structured(Map<String, Value>),
}

impl CustomTreatmentSource {
    pub fn treatment_id(&self) -> Option<&str> {
        match self {
            CustomTreatmentSource::Text(_) => None,
            CustomTreatmentSource::Structured(fields) => fields.get("id").and_then(Value::as_str),
        }
    }

    pub fn text(&self) -> String {
        match self {
            CustomTreatmentSource::Text(text) => text.clone(),
            CustomTreatmentSource::Structured(fields) => Value::Object(fields.clone()).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_alternative_searches")]
    pub max_alternative_searches: u32,
    #[serde(default = "default_oracle_timeout_ms")]
    pub oracle_timeout_ms: u64,
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_alternative_searches: default_max_alternative_searches(),
            oracle_timeout_ms: default_oracle_timeout_ms(),
            provider_timeout_ms: default_provider_timeout_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn limits(&self) -> PipelineLimits {
        PipelineLimits {
            max_alternative_searches: self.max_alternative_searches.max(1),
            oracle_timeout: Duration::from_millis(self.oracle_timeout_ms.max(1)),
            provider_timeout: Duration::from_millis(self.provider_timeout_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OracleConfig {
    RuleBased {
        #[serde(default = "default_churn_threshold")]
        churn_threshold: f64,
    },
    OpenaiCompatible(OpenAiCompatibleOracleConfig),
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig::RuleBased {
            churn_threshold: default_churn_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatibleOracleConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token. `None` sends no authorization header.
    #[serde(default = "default_credential_env")]
    pub credential_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,
    #[serde(default = "default_permissions_path")]
    pub permissions_path: PathBuf,
    /// Index the profile directory once and serve later fetches from memory.
    #[serde(default = "default_enabled_true")]
    pub cache_profiles: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            profile_dir: default_profile_dir(),
            permissions_path: default_permissions_path(),
            cache_profiles: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingRotation {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_enabled_true")]
    pub file_enabled: bool,
    #[serde(default = "default_logging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_logging_filter")]
    pub filter: String,
    #[serde(default = "default_logging_rotation")]
    pub rotation: LoggingRotation,
    #[serde(default = "default_logging_retention_days")]
    pub retention_days: usize,
    #[serde(default = "default_enabled_true")]
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_enabled: true,
            dir: default_logging_dir(),
            filter: default_logging_filter(),
            rotation: default_logging_rotation(),
            retention_days: default_logging_retention_days(),
            stderr_warn_enabled: true,
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config_value: Value = json5::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        let config_base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let schema_path = resolve_schema_path(config_base, &config_value)?;
        validate_against_schema(&config_value, &schema_path)?;

        let mut config: Config =
            serde_json::from_value(config_value).context("failed to deserialize config")?;

        config.data.profile_dir = resolve_relative(config_base, &config.data.profile_dir);
        config.data.permissions_path = resolve_relative(config_base, &config.data.permissions_path);
        config.logging.dir = resolve_relative(config_base, &config.logging.dir);

        Ok(config)
    }

    /// Configured treatments with ids filled in from their map keys.
    pub fn treatment_definitions(&self) -> Vec<Treatment> {
        self.treatments
            .iter()
            .map(|(id, treatment)| {
                let mut treatment = treatment.clone();
                treatment.id = id.clone();
                treatment
            })
            .collect()
    }

    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.constraints
            .iter()
            .map(|(id, constraint)| constraint.to_entry(id))
            .collect()
    }
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn resolve_schema_path(config_base: &Path, config_value: &Value) -> Result<PathBuf> {
    if let Some(path_text) = config_value.get("$schema").and_then(|value| value.as_str()) {
        return Ok(resolve_relative(config_base, Path::new(path_text)));
    }

    let local_default = config_base.join(SCHEMA_FILE_NAME);
    if local_default.exists() {
        return Ok(local_default);
    }

    Err(anyhow!(
        "unable to resolve schema path: expected $schema in config or {} next to it",
        SCHEMA_FILE_NAME
    ))
}

fn validate_against_schema(config_value: &Value, schema_path: &Path) -> Result<()> {
    let schema_content = fs::read_to_string(schema_path)
        .with_context(|| format!("failed to read schema {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&schema_content)
        .with_context(|| format!("failed to parse schema {}", schema_path.display()))?;

    let compiled =
        JSONSchema::compile(&schema).map_err(|e| anyhow!("failed to compile schema: {e}"))?;

    match compiled.validate(config_value) {
        Ok(()) => Ok(()),
        Err(errors_iter) => {
            let validation_errors: Vec<ValidationError> = errors_iter.collect();
            let messages: Vec<String> = validation_errors
                .into_iter()
                .map(|error| error.to_string())
                .collect();
            Err(anyhow!("config validation failed: {}", messages.join("; ")))
        }
    }
}
