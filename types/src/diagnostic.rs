//! Diagnostics emitted by the scanner.
//!
//! A diagnostic is ephemeral: the scanner recomputes the full list for a
//! document on every pass and the host replaces its previous list wholesale.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    #[must_use]
    pub fn to_lsp(self) -> u64 {
        self as u64
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// Closed set of diagnostic categories.
///
/// The category tag doubles as the diagnostic `code` on the wire and is the
/// key the quick-fix provider dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "&'static str")]
pub enum DiagnosticKind {
    UnusedInclude,
    GuardBadIfndef,
    GuardBadDefine,
    GuardBadEndif,
    GuardMissingIfndef,
    GuardMissingEndif,
}

impl DiagnosticKind {
    pub const ALL: [Self; 6] = [
        Self::UnusedInclude,
        Self::GuardBadIfndef,
        Self::GuardBadDefine,
        Self::GuardBadEndif,
        Self::GuardMissingIfndef,
        Self::GuardMissingEndif,
    ];

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::UnusedInclude => "unused-include",
            Self::GuardBadIfndef => "guard-bad-ifndef",
            Self::GuardBadDefine => "guard-bad-define",
            Self::GuardBadEndif => "guard-bad-endif",
            Self::GuardMissingIfndef => "guard-missing-ifndef",
            Self::GuardMissingEndif => "guard-missing-endif",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Guard diagnostics are file-scoped; unused includes are line-scoped.
    #[must_use]
    pub fn is_guard(self) -> bool {
        !matches!(self, Self::UnusedInclude)
    }

    #[must_use]
    pub fn severity(self) -> DiagnosticSeverity {
        match self {
            Self::UnusedInclude => DiagnosticSeverity::Warning,
            Self::GuardMissingIfndef | Self::GuardMissingEndif => DiagnosticSeverity::Warning,
            Self::GuardBadIfndef | Self::GuardBadDefine | Self::GuardBadEndif => {
                DiagnosticSeverity::Information
            }
        }
    }
}

impl From<DiagnosticKind> for &'static str {
    fn from(kind: DiagnosticKind) -> Self {
        kind.code()
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A single-line range: `len` columns starting at `start` on `line`.
///
/// Lines are 0-indexed. Columns are UTF-16 code units, the unit editors use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LineRange {
    pub line: u32,
    pub start: u32,
    pub len: u32,
}

impl LineRange {
    #[must_use]
    pub fn new(line: u32, start: u32, len: u32) -> Self {
        Self { line, start, len }
    }

    #[must_use]
    pub fn end(&self) -> u32 {
        self.start + self.len
    }
}

/// A secondary location linked from a diagnostic (e.g. the opening `#ifndef`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedLocation {
    pub path: PathBuf,
    pub range: LineRange,
    pub message: String,
}

/// A single diagnostic produced for a document.
///
/// Fields are private; construction goes through [`Diagnostic::new`] and
/// related locations are attached with [`Diagnostic::with_related`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    kind: DiagnosticKind,
    range: LineRange,
    message: String,
    related: Vec<RelatedLocation>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(kind: DiagnosticKind, range: LineRange, message: impl Into<String>) -> Self {
        Self {
            kind,
            range,
            message: message.into(),
            related: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_related(mut self, location: RelatedLocation) -> Self {
        self.related.push(location);
        self
    }

    #[must_use]
    pub fn kind(&self) -> DiagnosticKind {
        self.kind
    }

    #[must_use]
    pub fn range(&self) -> LineRange {
        self.range
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.range.line
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn related(&self) -> &[RelatedLocation] {
        &self.related
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.kind.severity()
    }

    /// Format as `path:line:col: severity: [code] message` (1-indexed for display).
    #[must_use]
    pub fn display_with_path(&self, path: &Path) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            path.display(),
            self.range.line + 1,
            self.range.start + 1,
            self.severity().label(),
            self.kind.code(),
            self.message,
        )
    }
}
