//! Configuration loading and settings resolution.
//!
//! Lint settings resolve in three layers, each a shallow field-by-field
//! override of the one below:
//!
//! 1. built-in defaults ([`LintSettings::default`])
//! 2. the `[lint]` table of `~/.tsqlls/config.toml`
//! 3. the `tsqllint` section the editor returns from `workspace/configuration`
//!
//! A field that fails to parse or validate is skipped with a warning; the
//! lower layer's value stays in effect.
//!
//! ```toml
//! [lint]
//! run_on_save = true
//! run_on_type = true
//! debounce_ms = 300
//! timeout_ms = 15000
//! path = "${HOME}/.dotnet/tools/tsqllint"
//! config_path = "${HOME}/.tsqllintrc"
//!
//! [log]
//! level = "debug"
//! ```

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tsqlls_types::{LintSettings, LintSettingsBuilder};

/// Settings section requested from the editor.
pub const HOST_SECTION: &str = "tsqllint";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Contents of the server's own TOML config file.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    pub lint: Option<LintOverrides>,
    pub log: Option<LogConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset (e.g. "debug").
    pub level: Option<String>,
}

/// One override layer. `None` means "keep the lower layer's value".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LintOverrides {
    pub run_on_save: Option<bool>,
    pub run_on_type: Option<bool>,
    pub debounce_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub path: Option<String>,
    pub config_path: Option<String>,
}

impl LintOverrides {
    /// Read the editor's settings object (camelCase keys).
    ///
    /// Anything that is not an object yields no overrides. Fields of the wrong
    /// type are skipped individually; `null` counts as absent.
    #[must_use]
    pub fn from_host(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            if !value.is_null() {
                tracing::warn!("Ignoring non-object {HOST_SECTION} settings: {value}");
            }
            return Self::default();
        };

        fn field<T: DeserializeOwned>(
            object: &serde_json::Map<String, Value>,
            key: &str,
        ) -> Option<T> {
            let raw = object.get(key).filter(|v| !v.is_null())?;
            match serde_json::from_value(raw.clone()) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(key, "Ignoring invalid {HOST_SECTION} setting: {e}");
                    None
                }
            }
        }

        Self {
            run_on_save: field(object, "runOnSave"),
            run_on_type: field(object, "runOnType"),
            debounce_ms: field(object, "debounceMs"),
            timeout_ms: field(object, "timeoutMs"),
            path: field(object, "path"),
            config_path: field(object, "configPath"),
        }
    }

    /// Override `base` field by field.
    #[must_use]
    pub fn apply_to(&self, base: &LintSettings) -> LintSettings {
        let mut settings = base.clone();
        if let Some(value) = self.run_on_save {
            settings = with_field(settings, "run_on_save", |b| b.run_on_save(value));
        }
        if let Some(value) = self.run_on_type {
            settings = with_field(settings, "run_on_type", |b| b.run_on_type(value));
        }
        if let Some(value) = self.debounce_ms {
            settings = with_field(settings, "debounce_ms", |b| b.debounce_ms(value));
        }
        if let Some(value) = self.timeout_ms {
            settings = with_field(settings, "timeout_ms", |b| b.timeout_ms(value));
        }
        if let Some(value) = &self.path {
            let expanded = expand_env_vars(value);
            settings = with_field(settings, "path", |b| b.path(Some(expanded)));
        }
        if let Some(value) = &self.config_path {
            let expanded = expand_env_vars(value);
            settings = with_field(settings, "config_path", |b| b.config_path(Some(expanded)));
        }
        settings
    }
}

fn with_field(
    current: LintSettings,
    field: &str,
    apply: impl FnOnce(LintSettingsBuilder) -> LintSettingsBuilder,
) -> LintSettings {
    match apply(current.to_builder()).build() {
        Ok(next) => next,
        Err(e) => {
            tracing::warn!(field, "Ignoring setting: {e}");
            current
        }
    }
}

/// Resolve the effective settings from the file layer and the editor's layer.
#[must_use]
pub fn resolve_settings(file: Option<&ServerConfig>, host: Option<&Value>) -> LintSettings {
    let mut settings = LintSettings::default();
    if let Some(lint) = file.and_then(|config| config.lint.as_ref()) {
        settings = lint.apply_to(&settings);
    }
    if let Some(host) = host {
        settings = LintOverrides::from_host(host).apply_to(&settings);
    }
    settings
}

/// Replace `${VAR}` with the variable's value (empty when unset).
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl ServerConfig {
    /// Load `~/.tsqlls/config.toml`. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map(Some).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Filter directive from `[log] level`, if set.
    #[must_use]
    pub fn log_level(&self) -> Option<&str> {
        self.log.as_ref().and_then(|log| log.level.as_deref())
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tsqlls").join("config.toml"))
}
