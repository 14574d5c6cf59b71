//! Resolved lint settings shared across crates.
//!
//! `LintSettings` is the fully-merged, validated view. The layered overrides
//! (config file, host settings) live in `tsqlls-config`, which resolves them
//! into this type at the boundary.

use std::time::Duration;

use serde::Deserialize;

/// Lint when a document is saved.
pub const DEFAULT_RUN_ON_SAVE: bool = true;
/// Lint while typing (debounced).
pub const DEFAULT_RUN_ON_TYPE: bool = false;
/// Quiet period after the last edit before a run starts.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
/// Upper bound on a single run.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("timeoutMs must be greater than zero")]
    ZeroTimeout,
    #[error("path must not be empty")]
    EmptyPath,
    #[error("configPath must not be empty")]
    EmptyConfigPath,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLintSettings {
    #[serde(default = "default_run_on_save")]
    run_on_save: bool,
    #[serde(default)]
    run_on_type: bool,
    #[serde(default = "default_debounce_ms")]
    debounce_ms: u64,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    config_path: Option<String>,
}

const fn default_run_on_save() -> bool {
    DEFAULT_RUN_ON_SAVE
}

const fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Validated lint settings.
///
/// Invariant: `timeout_ms > 0`, and `path`/`config_path` are either absent or
/// non-blank (enforced in [`LintSettings::builder`] and via `#[serde(try_from)]`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawLintSettings")]
pub struct LintSettings {
    run_on_save: bool,
    run_on_type: bool,
    debounce_ms: u64,
    timeout_ms: u64,
    path: Option<String>,
    config_path: Option<String>,
}

impl TryFrom<RawLintSettings> for LintSettings {
    type Error = SettingsError;

    fn try_from(raw: RawLintSettings) -> Result<Self, Self::Error> {
        LintSettings::builder()
            .run_on_save(raw.run_on_save)
            .run_on_type(raw.run_on_type)
            .debounce_ms(raw.debounce_ms)
            .timeout_ms(raw.timeout_ms)
            .path(raw.path)
            .config_path(raw.config_path)
            .build()
    }
}

impl Default for LintSettings {
    fn default() -> Self {
        Self {
            run_on_save: DEFAULT_RUN_ON_SAVE,
            run_on_type: DEFAULT_RUN_ON_TYPE,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            path: None,
            config_path: None,
        }
    }
}

impl LintSettings {
    /// Start from the defaults and override field by field.
    #[must_use]
    pub fn builder() -> LintSettingsBuilder {
        LintSettingsBuilder {
            settings: Self::default(),
        }
    }

    /// Continue overriding from an already-validated value.
    #[must_use]
    pub fn to_builder(&self) -> LintSettingsBuilder {
        LintSettingsBuilder {
            settings: self.clone(),
        }
    }

    #[must_use]
    pub fn run_on_save(&self) -> bool {
        self.run_on_save
    }

    #[must_use]
    pub fn run_on_type(&self) -> bool {
        self.run_on_type
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Explicit tsqllint executable, if configured.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// tsqllint config file passed with `-c`, if configured.
    #[must_use]
    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }
}

/// Field-by-field override of [`LintSettings`]; validation happens in `build`.
#[derive(Debug, Clone)]
pub struct LintSettingsBuilder {
    settings: LintSettings,
}

impl LintSettingsBuilder {
    pub fn run_on_save(mut self, value: bool) -> Self {
        self.settings.run_on_save = value;
        self
    }

    pub fn run_on_type(mut self, value: bool) -> Self {
        self.settings.run_on_type = value;
        self
    }

    pub fn debounce_ms(mut self, value: u64) -> Self {
        self.settings.debounce_ms = value;
        self
    }

    pub fn timeout_ms(mut self, value: u64) -> Self {
        self.settings.timeout_ms = value;
        self
    }

    pub fn path(mut self, value: Option<String>) -> Self {
        self.settings.path = value;
        self
    }

    pub fn config_path(mut self, value: Option<String>) -> Self {
        self.settings.config_path = value;
        self
    }

    pub fn build(self) -> Result<LintSettings, SettingsError> {
        let settings = self.settings;
        if settings.timeout_ms == 0 {
            return Err(SettingsError::ZeroTimeout);
        }
        if settings.path.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(SettingsError::EmptyPath);
        }
        if settings
            .config_path
            .as_deref()
            .is_some_and(|p| p.trim().is_empty())
        {
            return Err(SettingsError::EmptyConfigPath);
        }
        Ok(settings)
    }
}
