//! Dispatch configuration.
//!
//! Loads [`DispatchConfig`] from a TOML file (`cldispatch.toml`) with
//! environment variable overrides via `CLDISPATCH_*` prefixed variables.
//! Every field has a default, so a partial file (or none at all) is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::kernels::ADD_ENTRY_POINT;
use crate::platform::{BackendKind, DeviceFilter};

/// Platform and device selection (`[selection]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Zero-based platform index.
    /// Override: `CLDISPATCH_PLATFORM_INDEX`
    pub platform_index: usize,

    /// Zero-based index among the devices that pass the filters.
    /// Override: `CLDISPATCH_DEVICE_INDEX`
    pub device_index: usize,

    /// Device class to enumerate.
    /// Override: `CLDISPATCH_DEVICE_TYPE`
    pub device_type: DeviceFilter,

    /// Case-insensitive substring the device name must contain.
    /// Override: `CLDISPATCH_DEVICE_NAME`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self { platform_index: 0, device_index: 0, device_type: DeviceFilter::All, name_contains: None }
    }
}

/// Program build policy (`[build]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Options handed to the device compiler.
    /// Override: `CLDISPATCH_BUILD_OPTIONS`
    pub options: String,

    /// Stop on a failed build. When false the failure is logged and the
    /// program is kept in a non-executable state.
    /// Override: `CLDISPATCH_FAIL_ON_BUILD_ERROR`
    pub fail_on_error: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { options: String::new(), fail_on_error: true }
    }
}

/// The vector-addition run (`[run]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Kernel source file.
    /// Override: `CLDISPATCH_KERNEL_PATH`
    pub kernel_path: PathBuf,

    /// Override: `CLDISPATCH_ENTRY_POINT`
    pub entry_point: String,

    /// Length of the operand arrays.
    /// Override: `CLDISPATCH_ELEMENTS`
    pub element_count: usize,

    /// Number of work-items launched.
    /// Override: `CLDISPATCH_GLOBAL_SIZE`
    pub global_work_size: usize,

    /// Elements of each array printed after the run.
    pub display_count: usize,

    /// Allocate inputs read-only and the output write-only.
    /// Override: `CLDISPATCH_STRICT_ACCESS`
    pub strict_access: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            kernel_path: PathBuf::from("add.cl"),
            entry_point: ADD_ENTRY_POINT.to_string(),
            element_count: 100,
            global_work_size: 10,
            display_count: 30,
            strict_access: false,
        }
    }
}

/// Log output (`[logging]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `cldispatch_opencl=debug`.
    /// Override: `CLDISPATCH_LOG_LEVEL`
    pub level: String,

    /// One of `pretty`, `compact`, `json`.
    /// Override: `CLDISPATCH_LOG_FORMAT`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string(), format: "compact".to_string() }
    }
}

pub const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Runtime servicing the pipeline.
    /// Override: `CLDISPATCH_BACKEND`
    pub backend: BackendKind,
    pub selection: SelectionConfig,
    pub build: BuildConfig,
    pub run: RunConfig,
    pub logging: LoggingConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::preferred(),
            selection: SelectionConfig::default(),
            build: BuildConfig::default(),
            run: RunConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Errors that can occur when loading or validating a [`DispatchConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

fn env_override<T, E>(key: &str, parse: impl FnOnce(&str) -> Result<T, E>) -> Result<Option<T>, ConfigError>
where
    E: ToString,
{
    match std::env::var(key) {
        Ok(value) => parse(&value).map(Some).map_err(|e| ConfigError::EnvOverride {
            key: key.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(None),
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got '{other}'")),
    }
}

impl DispatchConfig {
    /// The default configuration as TOML.
    pub fn default_toml() -> Result<String, ConfigError> {
        Self::default().to_toml()
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields, then apply environment variable overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&contents)
    }

    /// Load from a TOML string, then apply environment overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: DispatchConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.element_count == 0 {
            return Err(ConfigError::Validation("run.element_count must be > 0".into()));
        }
        if i32::try_from(self.run.element_count).is_err() {
            return Err(ConfigError::Validation(format!(
                "run.element_count must be <= {}, got {}",
                i32::MAX,
                self.run.element_count
            )));
        }
        if self.run.global_work_size == 0 {
            return Err(ConfigError::Validation("run.global_work_size must be > 0".into()));
        }
        if self.run.entry_point.trim().is_empty() {
            return Err(ConfigError::Validation("run.entry_point must not be empty".into()));
        }
        if self.run.kernel_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation("run.kernel_path must not be empty".into()));
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.format must be one of {}, got '{}'",
                LOG_FORMATS.join(", "),
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Apply `CLDISPATCH_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_override("CLDISPATCH_BACKEND", str::parse::<BackendKind>)? {
            self.backend = v;
        }
        if let Some(v) = env_override("CLDISPATCH_PLATFORM_INDEX", str::parse::<usize>)? {
            self.selection.platform_index = v;
        }
        if let Some(v) = env_override("CLDISPATCH_DEVICE_INDEX", str::parse::<usize>)? {
            self.selection.device_index = v;
        }
        if let Some(v) = env_override("CLDISPATCH_DEVICE_TYPE", str::parse::<DeviceFilter>)? {
            self.selection.device_type = v;
        }
        if let Some(v) = env_override("CLDISPATCH_DEVICE_NAME", |s| Ok::<_, String>(s.to_string()))? {
            self.selection.name_contains = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = env_override("CLDISPATCH_BUILD_OPTIONS", |s| Ok::<_, String>(s.to_string()))? {
            self.build.options = v;
        }
        if let Some(v) = env_override("CLDISPATCH_FAIL_ON_BUILD_ERROR", parse_bool)? {
            self.build.fail_on_error = v;
        }
        if let Some(v) = env_override("CLDISPATCH_KERNEL_PATH", |s| Ok::<_, String>(PathBuf::from(s)))? {
            self.run.kernel_path = v;
        }
        if let Some(v) = env_override("CLDISPATCH_ENTRY_POINT", |s| Ok::<_, String>(s.to_string()))? {
            self.run.entry_point = v;
        }
        if let Some(v) = env_override("CLDISPATCH_ELEMENTS", str::parse::<usize>)? {
            self.run.element_count = v;
        }
        if let Some(v) = env_override("CLDISPATCH_GLOBAL_SIZE", str::parse::<usize>)? {
            self.run.global_work_size = v;
        }
        if let Some(v) = env_override("CLDISPATCH_STRICT_ACCESS", parse_bool)? {
            self.run.strict_access = v;
        }
        if let Some(v) = env_override("CLDISPATCH_LOG_LEVEL", |s| Ok::<_, String>(s.to_string()))? {
            self.logging.level = v;
        }
        if let Some(v) = env_override("CLDISPATCH_LOG_FORMAT", |s| Ok::<_, String>(s.to_lowercase()))? {
            self.logging.format = v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: [&str; 14] = [
        "CLDISPATCH_BACKEND",
        "CLDISPATCH_PLATFORM_INDEX",
        "CLDISPATCH_DEVICE_INDEX",
        "CLDISPATCH_DEVICE_TYPE",
        "CLDISPATCH_DEVICE_NAME",
        "CLDISPATCH_BUILD_OPTIONS",
        "CLDISPATCH_FAIL_ON_BUILD_ERROR",
        "CLDISPATCH_KERNEL_PATH",
        "CLDISPATCH_ENTRY_POINT",
        "CLDISPATCH_ELEMENTS",
        "CLDISPATCH_GLOBAL_SIZE",
        "CLDISPATCH_STRICT_ACCESS",
        "CLDISPATCH_LOG_LEVEL",
        "CLDISPATCH_LOG_FORMAT",
    ];

    /// Run `f` with only `set` among the `CLDISPATCH_*` variables defined.
    fn with_env<R>(set: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let vars: Vec<(&str, Option<&str>)> = ALL_VARS
            .iter()
            .map(|k| (*k, set.iter().find(|(s, _)| s == k).map(|(_, v)| *v)))
            .collect();
        temp_env::with_vars(vars, f)
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = DispatchConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.run.element_count, 100);
        assert_eq!(cfg.run.global_work_size, 10);
        assert_eq!(cfg.run.display_count, 30);
        assert_eq!(cfg.run.entry_point, "simple_add");
        assert!(cfg.build.fail_on_error);
    }

    #[test]
    #[serial(cldispatch_env)]
    fn default_toml_round_trips() {
        let toml_str = DispatchConfig::default_toml().unwrap();
        let cfg = with_env(&[], || DispatchConfig::from_toml(&toml_str)).unwrap();
        assert_eq!(cfg, DispatchConfig::default());
    }

    #[test]
    #[serial(cldispatch_env)]
    fn partial_file_keeps_defaults() {
        let cfg = with_env(&[], || {
            DispatchConfig::from_toml(
                r#"
backend = "reference"

[selection]
device_type = "gpu"
name_contains = "radeon"

[run]
global_work_size = 100
"#,
            )
        })
        .unwrap();
        assert_eq!(cfg.backend, BackendKind::Reference);
        assert_eq!(cfg.selection.device_type, DeviceFilter::Gpu);
        assert_eq!(cfg.selection.name_contains.as_deref(), Some("radeon"));
        assert_eq!(cfg.run.global_work_size, 100);
        assert_eq!(cfg.run.element_count, 100);
        assert_eq!(cfg.logging, LoggingConfig::default());
    }

    #[test]
    #[serial(cldispatch_env)]
    fn unknown_backend_is_parse_error() {
        let err = with_env(&[], || DispatchConfig::from_toml("backend = \"cuda\"")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_rejects_zero_global_size() {
        let mut cfg = DispatchConfig::default();
        cfg.run.global_work_size = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("global_work_size must be > 0"));
    }

    #[test]
    fn validation_rejects_oversized_element_count() {
        let mut cfg = DispatchConfig::default();
        cfg.run.element_count = i32::MAX as usize + 1;
        assert!(cfg.validate().unwrap_err().to_string().contains("element_count"));
    }

    #[test]
    fn validation_rejects_unknown_log_format() {
        let mut cfg = DispatchConfig::default();
        cfg.logging.format = "xml".into();
        assert!(cfg.validate().unwrap_err().to_string().contains("logging.format"));
    }

    #[test]
    #[serial(cldispatch_env)]
    fn env_overrides_apply() {
        let cfg = with_env(
            &[
                ("CLDISPATCH_BACKEND", "reference"),
                ("CLDISPATCH_DEVICE_TYPE", "cpu"),
                ("CLDISPATCH_ELEMENTS", "64"),
                ("CLDISPATCH_STRICT_ACCESS", "yes"),
                ("CLDISPATCH_FAIL_ON_BUILD_ERROR", "0"),
                ("CLDISPATCH_DEVICE_NAME", "Host"),
                ("CLDISPATCH_LOG_FORMAT", "JSON"),
            ],
            DispatchConfig::from_env,
        )
        .unwrap();
        assert_eq!(cfg.backend, BackendKind::Reference);
        assert_eq!(cfg.selection.device_type, DeviceFilter::Cpu);
        assert_eq!(cfg.run.element_count, 64);
        assert!(cfg.run.strict_access);
        assert!(!cfg.build.fail_on_error);
        assert_eq!(cfg.selection.name_contains.as_deref(), Some("Host"));
        assert_eq!(cfg.logging.format, "json");
    }

    #[test]
    #[serial(cldispatch_env)]
    fn invalid_env_override_names_the_key() {
        let err = with_env(&[("CLDISPATCH_GLOBAL_SIZE", "ten")], DispatchConfig::from_env)
            .unwrap_err();
        match err {
            ConfigError::EnvOverride { key, value, .. } => {
                assert_eq!(key, "CLDISPATCH_GLOBAL_SIZE");
                assert_eq!(value, "ten");
            }
            other => panic!("expected EnvOverride, got: {other}"),
        }
    }

    #[test]
    #[serial(cldispatch_env)]
    fn env_overrides_beat_file_values() {
        let cfg = with_env(&[("CLDISPATCH_GLOBAL_SIZE", "50")], || {
            DispatchConfig::from_toml("[run]\nglobal_work_size = 5\n")
        })
        .unwrap();
        assert_eq!(cfg.run.global_work_size, 50);
    }

    #[test]
    #[serial(cldispatch_env)]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cldispatch.toml");
        std::fs::write(&path, "[build]\noptions = \"-cl-std=CL1.2\"\n").unwrap();
        let cfg = with_env(&[], || DispatchConfig::load(&path)).unwrap();
        assert_eq!(cfg.build.options, "-cl-std=CL1.2");

        let missing = with_env(&[], || DispatchConfig::load(&dir.path().join("nope.toml")));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Ok(true));
        assert_eq!(parse_bool("off"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }
}
