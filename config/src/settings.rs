use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the per-workspace configuration file.
pub const CONFIG_FILE_NAME: &str = ".incwise.toml";

/// Value of `compile_commands` that enables candidate discovery.
pub const AUTO_COMPILE_COMMANDS: &str = "auto";

/// Top-level settings.
///
/// ```toml
/// compile_commands = "auto"
/// filter_output = ""
///
/// [analyzer]
/// path = "include-what-you-use"
///
/// [rewriter]
/// path = "fix_includes.py"
///
/// [diagnostics]
/// include_guard = "${FILE}_"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Path of the compilation database, or `"auto"` to probe the usual locations.
    pub compile_commands: String,
    /// Regex; analyzer output lines matching `#include.*(?:RE)` are dropped before parsing.
    pub filter_output: String,
    pub analyzer: AnalyzerSettings,
    pub rewriter: RewriterSettings,
    pub diagnostics: DiagnosticsSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            compile_commands: AUTO_COMPILE_COMMANDS.to_string(),
            filter_output: String::new(),
            analyzer: AnalyzerSettings::default(),
            rewriter: RewriterSettings::default(),
            diagnostics: DiagnosticsSettings::default(),
        }
    }
}

/// Flags for the external include analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettings {
    pub path: String,
    pub max_line_length: u32,
    /// Globs passed as `--keep=GLOB`.
    pub keep: Vec<String>,
    pub transitive_includes_only: bool,
    pub no_forward_declarations: bool,
    pub no_default_mappings: bool,
    pub mapping_file: String,
    /// Free-form parameters, split like a shell command line.
    pub additional_params: String,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            path: "include-what-you-use".to_string(),
            max_line_length: 80,
            keep: Vec::new(),
            transitive_includes_only: false,
            no_forward_declarations: false,
            no_default_mappings: false,
            mapping_file: String::new(),
            additional_params: String::new(),
        }
    }
}

/// Flags for the external include rewriter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RewriterSettings {
    pub path: String,
    /// Interpreter used to run `path` (e.g. `python3`). Empty runs `path` directly.
    pub python: String,
    pub comments: bool,
    pub dry_run: bool,
    /// Also filters which database files resolve at all.
    pub ignore_re: String,
    /// Also filters which database files resolve at all.
    pub only_re: String,
    pub reorder: bool,
    pub safe_headers: bool,
    pub update_comments: bool,
    /// Restrict the rewriter to the file the command was run for.
    pub only_current_file: bool,
}

impl Default for RewriterSettings {
    fn default() -> Self {
        Self {
            path: "fix_includes.py".to_string(),
            python: String::new(),
            comments: true,
            dry_run: false,
            ignore_re: String::new(),
            only_re: String::new(),
            reorder: true,
            safe_headers: true,
            update_comments: false,
            only_current_file: true,
        }
    }
}

/// Scanner and include-guard policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    pub unused_includes: bool,
    /// Minimum seconds between analyzer runs for the same file.
    pub interval_secs: f64,
    pub scan_min: usize,
    pub scan_more: usize,
    pub full_line_squiggles: bool,
    /// Guard template using `${file}` / `${FILE}`. Empty disables guard checks.
    pub include_guard: String,
    /// Regex selecting the files guard checks apply to.
    pub include_guard_files: String,
    /// Regex restricting which files get diagnostics at all.
    pub only_re: String,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            unused_includes: true,
            interval_secs: 5.0,
            scan_min: 100,
            scan_more: 10,
            full_line_squiggles: true,
            include_guard: String::new(),
            include_guard_files: "[.](h|hh|hpp|hxx)$".to_string(),
            only_re: String::new(),
        }
    }
}

impl DiagnosticsSettings {
    #[must_use]
    pub fn interval(&self) -> Duration {
        if self.interval_secs.is_finite() && self.interval_secs > 0.0 {
            Duration::from_secs_f64(self.interval_secs)
        } else {
            Duration::ZERO
        }
    }
}

impl Settings {
    /// Load `<workspace_root>/.incwise.toml` if it exists.
    pub fn load(workspace_root: &Path) -> Result<Option<Self>, ConfigError> {
        let path = Self::path(workspace_root);
        if !path.exists() {
            return Ok(None);
        }
        Self::load_file(&path).map(Some)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {}: {err}", path.display());
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        toml::from_str(&content).map_err(|err| {
            tracing::warn!("Failed to parse config at {}: {err}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source: err,
            }
        })
    }

    /// Parse editor-provided settings: either `{ "incwise": { ... } }` or the
    /// section itself. `null` yields defaults.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        let section = match value {
            serde_json::Value::Null => return Ok(Self::default()),
            serde_json::Value::Object(mut map) => match map.remove("incwise") {
                Some(section) => section,
                None => serde_json::Value::Object(map),
            },
            other => other,
        };
        Ok(serde_json::from_value(section)?)
    }

    #[must_use]
    pub fn path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(CONFIG_FILE_NAME)
    }
}
