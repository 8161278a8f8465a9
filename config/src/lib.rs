//! Configuration for incwise.
//!
//! [`Settings`] is the raw, serde-backed configuration surface. [`Config`] is
//! the immutable per-operation snapshot handed to the engine: settings plus
//! their compiled regular expressions. Callers refresh the snapshot between
//! operations; the engine never reads configuration from ambient state.

mod error;
mod expand;
mod patterns;
mod settings;

pub use error::ConfigError;
pub use expand::{ExpandContext, expand_placeholders};
pub use patterns::{Config, Patterns};
pub use settings::{
    AUTO_COMPILE_COMMANDS, AnalyzerSettings, CONFIG_FILE_NAME, DiagnosticsSettings,
    RewriterSettings, Settings,
};
