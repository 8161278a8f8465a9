use regex::Regex;

use crate::error::ConfigError;
use crate::settings::Settings;

/// Compiled regular expressions from [`Settings`]. An empty setting compiles to `None`.
#[derive(Debug, Clone, Default)]
pub struct Patterns {
    /// Database files matching this never resolve.
    pub ignore: Option<Regex>,
    /// When set, only database files matching this resolve.
    pub only: Option<Regex>,
    /// When set, only matching files get diagnostics.
    pub diagnostics_only: Option<Regex>,
    /// Files include-guard checks apply to.
    pub header_files: Option<Regex>,
    /// Analyzer output lines matching this are dropped.
    pub output_filter: Option<Regex>,
}

fn optional(setting: &'static str, pattern: &str) -> Result<Option<Regex>, ConfigError> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|source| ConfigError::Pattern { setting, source })
}

impl Patterns {
    pub fn compile(settings: &Settings) -> Result<Self, ConfigError> {
        let output_filter = if settings.filter_output.is_empty() {
            None
        } else {
            // Validate the user's fragment on its own so the error points at it.
            optional("filter_output", &settings.filter_output)?;
            optional(
                "filter_output",
                &format!("#include.*(?:{})", settings.filter_output),
            )?
        };

        Ok(Self {
            ignore: optional("rewriter.ignore_re", &settings.rewriter.ignore_re)?,
            only: optional("rewriter.only_re", &settings.rewriter.only_re)?,
            diagnostics_only: optional("diagnostics.only_re", &settings.diagnostics.only_re)?,
            header_files: optional(
                "diagnostics.include_guard_files",
                &settings.diagnostics.include_guard_files,
            )?,
            output_filter,
        })
    }
}

/// Immutable configuration snapshot for one engine operation.
///
/// An invalid pattern leaves `patterns()` empty; the engine treats that as
/// "no file resolves" and surfaces [`Config::pattern_error`] to the user.
#[derive(Debug, Clone)]
pub struct Config {
    settings: Settings,
    patterns: Option<Patterns>,
    pattern_error: Option<String>,
}

impl Config {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        match Patterns::compile(&settings) {
            Ok(patterns) => Self {
                settings,
                patterns: Some(patterns),
                pattern_error: None,
            },
            Err(err) => {
                tracing::error!("{err}");
                Self {
                    settings,
                    patterns: None,
                    pattern_error: Some(err.to_string()),
                }
            }
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn patterns(&self) -> Option<&Patterns> {
        self.patterns.as_ref()
    }

    #[must_use]
    pub fn pattern_error(&self) -> Option<&str> {
        self.pattern_error.as_deref()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
