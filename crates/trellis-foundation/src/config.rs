//! Engine configuration
//!
//! [`EngineConfig`] can be built in code or loaded from YAML, TOML, JSON,
//! INI, RON or JSON5 files. File contents go through `${VAR}` / `$VAR`
//! environment substitution before parsing, several files can be layered
//! (later wins), and `TRELLIS_*` environment variables override file values
//! (`TRELLIS_MAX_STEPS`, `TRELLIS_LOGGING__LEVEL`, ...).

use std::path::Path;

use config::{Config as Cfg, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "TRELLIS";

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Error-stack backed result alias for configuration loading.
pub type ConfigResult<T> = Result<T, Report<ConfigError>>;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Dispatch engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on node invocations per run, branches included.
    pub max_steps: u32,
    /// Node invocations allowed to run concurrently inside forks.
    pub max_parallelism: usize,
    /// Default join barrier timeout in milliseconds, 0 for none.
    pub join_timeout_ms: u64,
    /// Resume states recorded at an incompatible workflow version as-is.
    pub allow_version_mismatch: bool,
    /// Check that a resumed state points at a node of the current graph.
    pub validate_on_resume: bool,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            max_parallelism: 10,
            join_timeout_ms: 0,
            allow_version_mismatch: false,
            validate_on_resume: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    pub fn with_join_timeout_ms(mut self, join_timeout_ms: u64) -> Self {
        self.join_timeout_ms = join_timeout_ms;
        self
    }

    pub fn with_allow_version_mismatch(mut self, allow: bool) -> Self {
        self.allow_version_mismatch = allow;
        self
    }

    pub fn with_validate_on_resume(mut self, validate: bool) -> Self {
        self.validate_on_resume = validate;
        self
    }

    /// Join timeout as a duration, `None` when disabled.
    pub fn join_timeout(&self) -> Option<std::time::Duration> {
        (self.join_timeout_ms > 0).then(|| std::time::Duration::from_millis(self.join_timeout_ms))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_steps == 0 {
            return Err(Report::new(ConfigError::Invalid(
                "max_steps must be greater than 0".to_string(),
            )));
        }
        if self.max_parallelism == 0 {
            return Err(Report::new(ConfigError::Invalid(
                "max_parallelism must be greater than 0".to_string(),
            )));
        }
        Ok(())
    }

    /// Load from a file with `TRELLIS_*` environment overrides, then validate.
    pub fn load(path: &str) -> ConfigResult<Self> {
        let config: Self = load_with_env(path, ENV_PREFIX)?;
        config.validate().attach(format!("while loading {path}"))?;
        Ok(config)
    }

    /// Load several files, later ones overriding earlier ones, then validate.
    pub fn load_layered(paths: &[&str]) -> ConfigResult<Self> {
        let config: Self = load_merged(paths)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a string in the given format, then validate.
    pub fn from_content(content: &str, format: FileFormat) -> ConfigResult<Self> {
        let config: Self = from_str(content, format)?;
        config.validate()?;
        Ok(config)
    }
}

/// Detect configuration format from file extension
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            Report::new(ConfigError::UnsupportedFormat(
                "No file extension found".to_string(),
            ))
        })?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(Report::new(ConfigError::UnsupportedFormat(ext.to_string()))),
    }
}

/// Substitute environment variables in a string
///
/// Supports `${VAR_NAME}` and `$VAR_NAME`. Unknown variables are left as
/// written.
pub fn substitute_env_vars(content: &str) -> ConfigResult<String> {
    let braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| Report::new(ConfigError::Parse(e.to_string())))?;
    let simple = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b")
        .map_err(|e| Report::new(ConfigError::Parse(e.to_string())))?;

    let expand = |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    };

    let result = braced.replace_all(content, expand).to_string();
    Ok(simple.replace_all(&result, expand).to_string())
}

fn read_file(path: &str) -> ConfigResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Report::new(ConfigError::Io(e)))
        .attach(format!("reading {path}"))
}

fn deserialize<T: DeserializeOwned>(config: Cfg) -> ConfigResult<T> {
    config
        .try_deserialize()
        .map_err(|e| Report::new(ConfigError::Serialization(e.to_string())))
}

/// Load configuration from a file
pub fn load_config<T>(path: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = substitute_env_vars(&read_file(path)?)?;

    let config = Cfg::builder()
        .add_source(File::from_str(&content, format))
        .build()
        .map_err(|e| Report::new(ConfigError::Parse(e.to_string())))
        .attach(format!("parsing {path}"))?;

    deserialize(config)
}

/// Load configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let content = substitute_env_vars(content)?;

    let config = Cfg::builder()
        .add_source(File::from_str(&content, format))
        .build()
        .map_err(|e| Report::new(ConfigError::Parse(e.to_string())))?;

    deserialize(config)
}

/// Load configuration from multiple files with later files overriding earlier ones
pub fn load_merged<T>(paths: &[&str]) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();

    for path in paths {
        let format = detect_format(path)?;
        let content = substitute_env_vars(&read_file(path)?)?;
        builder = builder.add_source(File::from_str(&content, format));
    }

    let config = builder
        .build()
        .map_err(|e| Report::new(ConfigError::Parse(e.to_string())))?;

    deserialize(config)
}

/// Load configuration with environment variable overrides
///
/// Variables use the given prefix and `__` for nesting, e.g.
/// `TRELLIS_LOGGING__LEVEL=debug`.
pub fn load_with_env<T>(path: &str, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = substitute_env_vars(&read_file(path)?)?;

    let config = Cfg::builder()
        .add_source(File::from_str(&content, format))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| Report::new(ConfigError::Parse(e.to_string())))
        .attach(format!("parsing {path}"))?;

    deserialize(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(ext: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{ext}"))
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_steps, 1000);
        assert_eq!(config.max_parallelism, 10);
        assert_eq!(config.join_timeout(), None);
        assert!(!config.allow_version_mismatch);
        assert!(config.validate_on_resume);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("engine.toml").unwrap(), FileFormat::Toml);
        assert_eq!(detect_format("engine.YML").unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format("engine.json5").unwrap(), FileFormat::Json5);
        assert!(detect_format("engine.xml").is_err());
        assert!(detect_format("engine").is_err());
    }

    #[test]
    fn test_from_toml_keeps_defaults_for_missing_fields() {
        let toml = r#"
max_steps = 50
join_timeout_ms = 2000

[logging]
json = true
"#;
        let config = EngineConfig::from_content(toml, FileFormat::Toml).unwrap();
        assert_eq!(config.max_steps, 50);
        assert_eq!(config.max_parallelism, 10);
        assert_eq!(
            config.join_timeout(),
            Some(std::time::Duration::from_millis(2000))
        );
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_content(r#"{ "max_parallelism": 0 }"#, FileFormat::Json)
            .unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Invalid(_)));
    }

    #[test]
    fn test_substitute_env_vars() {
        // SAFETY: test-local variable names
        unsafe {
            std::env::set_var("TRELLIS_TEST_LEVEL", "debug");
        }
        let out = substitute_env_vars("a=${TRELLIS_TEST_LEVEL} b=$TRELLIS_TEST_LEVEL c=$UNSET_TRELLIS_VAR")
            .unwrap();
        assert_eq!(out, "a=debug b=debug c=$UNSET_TRELLIS_VAR");
    }

    #[test]
    fn test_load_merged_later_wins() {
        let base = write_temp("toml", "max_steps = 10\nmax_parallelism = 2\n");
        let local = write_temp("json", r#"{ "max_steps": 20 }"#);

        let config = EngineConfig::load_layered(&[
            base.path().to_str().unwrap(),
            local.path().to_str().unwrap(),
        ])
        .unwrap();
        assert_eq!(config.max_steps, 20);
        assert_eq!(config.max_parallelism, 2);
    }

    #[test]
    fn test_missing_file_reports_io() {
        let err = load_config::<EngineConfig>("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Io(_)));
    }
}
