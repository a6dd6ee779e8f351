//! Build configuration.
//!
//! Loaded from an optional `mini.toml` in the asset root (or a file named
//! with `--config`). The file is sparse: it is merged key-by-key on top of the
//! stock defaults, so it only needs the values it changes.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! ignore = [".DS_Store", "*.pyc", "tmp*", "*.xcf"]  # skipped by every stage
//! fix_templates = false     # repair {% a==b %} in minified HTML
//! timeout_secs = 0          # per-file tool limit, 0 = wait forever
//!
//! [tools]
//! dir = ""                  # value of {tools}; empty = directory of the binary
//! html = ["java", "-jar", "{tools}/htmlcompressor.jar", "{file}"]
//! css = ["java", "-jar", "{tools}/yuicompressor.jar", "{file}"]
//! js = ["uglifyjs", "{file}"]
//! gzip = ["gzip", "-c", "{file}"]
//!
//! [images]
//! patterns = ["*.jpg", "*.png", "*.gif", "*.bmp", "*.ico"]
//! ```
//!
//! Every command must contain exactly one `{file}` argument. Unknown keys are
//! rejected to catch typos early.

use crate::glob::Patterns;
use crate::transform::TransformSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file looked up in the asset root when no explicit file is given.
pub const CONFIG_FILE_NAME: &str = "mini.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Build configuration loaded from `mini.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Patterns skipped by every stage, on top of each stage's own excludes.
    pub ignore: Vec<String>,
    /// Repair template comparison operators in minified HTML.
    pub fix_templates: bool,
    /// Per-file tool timeout in seconds. Zero disables the timeout.
    pub timeout_secs: u64,
    /// External tool command lines.
    pub tools: ToolsConfig,
    /// Which files the image gzip stage picks up.
    pub images: ImagesConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            ignore: strings(&[".DS_Store", "*.pyc", "tmp*", "*.xcf"]),
            fix_templates: false,
            timeout_secs: 0,
            tools: ToolsConfig::default(),
            images: ImagesConfig::default(),
        }
    }
}

/// External tool command lines, one per transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Directory substituted for `{tools}`. Empty means the directory the
    /// `mini-assets` binary lives in.
    pub dir: String,
    pub html: Vec<String>,
    pub css: Vec<String>,
    pub js: Vec<String>,
    pub gzip: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            html: strings(&["java", "-jar", "{tools}/htmlcompressor.jar", "{file}"]),
            css: strings(&["java", "-jar", "{tools}/yuicompressor.jar", "{file}"]),
            js: strings(&["uglifyjs", "{file}"]),
            gzip: strings(&["gzip", "-c", "{file}"]),
        }
    }
}

/// Image file selection for the image gzip stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    pub patterns: Vec<String>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            patterns: strings(&["*.jpg", "*.png", "*.gif", "*.bmp", "*.ico"]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl BuildConfig {
    /// Validate that every command and pattern list can actually be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tools_dir = self.tools_dir();
        for (name, command) in self.tools.commands() {
            TransformSpec::parse(command, &tools_dir)
                .map_err(|e| ConfigError::Validation(format!("tools.{name}: {e}")))?;
        }
        if self.images.patterns.is_empty() {
            return Err(ConfigError::Validation(
                "images.patterns must not be empty".into(),
            ));
        }
        Patterns::new(self.images.patterns.iter().cloned())
            .map_err(|e| ConfigError::Validation(format!("images.patterns: {e}")))?;
        Patterns::new(self.ignore.iter().cloned())
            .map_err(|e| ConfigError::Validation(format!("ignore: {e}")))?;
        Ok(())
    }

    /// Directory substituted for `{tools}` in command lines.
    pub fn tools_dir(&self) -> PathBuf {
        if !self.tools.dir.is_empty() {
            return PathBuf::from(&self.tools.dir);
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Per-file tool timeout, `None` when unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl ToolsConfig {
    /// `(key, command)` pairs in stage order.
    pub fn commands(&self) -> [(&'static str, &[String]); 4] {
        [
            ("html", &self.html),
            ("css", &self.css),
            ("js", &self.js),
            ("gzip", &self.gzip),
        ]
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(BuildConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely, so an
///   overlay `ignore = []` clears the default ignore list.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value. `Ok(None)` if it doesn't exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<BuildConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: BuildConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the build config for an asset root.
///
/// With `explicit` set, that file must exist. Otherwise `mini.toml` in `root`
/// is used when present, and the stock defaults when not.
pub fn load_config(root: &Path, explicit: Option<&Path>) -> Result<BuildConfig, ConfigError> {
    let overlay = match explicit {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            Some(toml::from_str(&content)?)
        }
        None => load_raw_config(&root.join(CONFIG_FILE_NAME))?,
    };
    resolve_config(stock_defaults_value()?, overlay)
}

/// Returns a fully-commented stock `mini.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# mini-assets configuration
# ==========================
# Place this file as mini.toml in the root of the asset tree, or pass it
# with --config. All settings are optional; values below are the defaults.
# Unknown keys will cause an error.

# Names skipped by every stage, on top of each stage's own excludes
# (*.min.*, lib, libs, vendor for minify stages; *.gz for gzip stages).
ignore = [".DS_Store", "*.pyc", "tmp*", "*.xcf"]

# Re-insert the space HTML minifiers strip from template comparisons:
# {% if a==b %} becomes {% if a ==b %}.
fix_templates = false

# Kill a tool that runs longer than this many seconds on a single file.
# 0 waits forever.
timeout_secs = 0

# ---------------------------------------------------------------------------
# External tools
# ---------------------------------------------------------------------------
# Each command must contain exactly one "{file}" argument: the file being
# processed. "{tools}" expands to `dir` below.
[tools]
# Empty = the directory the mini-assets binary lives in.
dir = ""
html = ["java", "-jar", "{tools}/htmlcompressor.jar", "{file}"]
css = ["java", "-jar", "{tools}/yuicompressor.jar", "{file}"]
js = ["uglifyjs", "{file}"]
gzip = ["gzip", "-c", "{file}"]

# ---------------------------------------------------------------------------
# Images
# ---------------------------------------------------------------------------
[images]
# Files gzipped by the image stage.
patterns = ["*.jpg", "*.png", "*.gif", "*.bmp", "*.ico"]
"##
}
