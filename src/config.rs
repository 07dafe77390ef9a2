use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::error::ConfigError;

/// How hard failures (an unresolved variable without a default) are handled.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ErrorStrategy {
    /// Abort the render and return the error.
    #[default]
    Throw,
    /// Emit `{{path}}` and continue.
    Placeholder,
}

/// What `execute` does when an include names an unregistered template.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MissingIncludePolicy {
    #[default]
    Error,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub error_strategy: ErrorStrategy,

    #[serde(default)]
    pub missing_include: MissingIncludePolicy,

    #[serde(default = "default_max_include_depth")]
    pub max_include_depth: usize,

    /// Total loop iterations allowed in a single render.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,

    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,

    #[serde(default, with = "duration_ms_opt")]
    pub render_timeout: Option<Duration>,

    /// When set, only these environment variables are visible to `prompty.env`.
    #[serde(default)]
    pub allowed_env_vars: Option<Vec<String>>,

    #[serde(default)]
    pub suggestions: SuggestionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionConfig {
    #[serde(default = "default_max_distance")]
    pub max_distance: usize,

    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            max_distance: default_max_distance(),
            max_suggestions: default_max_suggestions(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            error_strategy: ErrorStrategy::default(),
            missing_include: MissingIncludePolicy::default(),
            max_include_depth: default_max_include_depth(),
            max_loop_iterations: default_max_loop_iterations(),
            max_nesting_depth: default_max_nesting_depth(),
            render_timeout: None,
            allowed_env_vars: None,
            suggestions: SuggestionConfig::default(),
        }
    }
}

impl EngineConfig {
    // JSONファイルから設定を読み込む
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        from_file(path)
    }

    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_strategy = strategy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("max_include_depth", self.max_include_depth),
            ("max_loop_iterations", self.max_loop_iterations),
            ("max_nesting_depth", self.max_nesting_depth),
        ];
        for (field, limit) in limits {
            if limit == 0 {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn env_allowed(&self, name: &str) -> bool {
        match &self.allowed_env_vars {
            Some(allowed) => allowed.iter().any(|n| n == name),
            None => true,
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader).map_err(|e| ConfigError::Parse {
        message: e.to_string(),
    })?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, ConfigError> {
    let config = serde_json::from_str(s).map_err(|e| ConfigError::Parse {
        message: e.to_string(),
    })?;
    Ok(config)
}

// デフォルト値の定義
fn default_max_include_depth() -> usize {
    10
}
fn default_max_loop_iterations() -> usize {
    10_000
}
fn default_max_nesting_depth() -> usize {
    128
}
fn default_max_distance() -> usize {
    3
}
fn default_max_suggestions() -> usize {
    3
}

// Option<Duration>をミリ秒でシリアライズ/デシリアライズ
mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
