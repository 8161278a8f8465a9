//! Diagnostics scanner.
//!
//! Positions always come from the live document text; the cached report only
//! decides which includes are flagged.

use std::sync::LazyLock;

use incwise_config::DiagnosticsSettings;
use incwise_types::{Diagnostic, DiagnosticKind, Document, LineRange, utf16_len};
use regex::Regex;

use crate::guard::GuardChecker;
use crate::report::AnalysisState;

static INCLUDE_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\s*)#\s*include\s*(<[^>]*>|"[^"]*")"#).expect("valid regex")
});

/// Scan window and highlighting options.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions<'a> {
    /// Lines inspected before blank and `//` lines are discounted.
    pub scan_min: usize,
    /// Lines the window extends past each include when removals are pending.
    pub scan_more: usize,
    /// Highlight the whole line instead of `#` through the include token.
    pub full_line: bool,
    /// Expected include guard; `None` skips guard checking.
    pub guard: Option<&'a str>,
}

impl<'a> ScanOptions<'a> {
    #[must_use]
    pub fn new(settings: &DiagnosticsSettings, guard: Option<&'a str>) -> Self {
        Self {
            scan_min: settings.scan_min,
            scan_more: settings.scan_more,
            full_line: settings.full_line_squiggles,
            guard: guard.filter(|g| !g.is_empty()),
        }
    }
}

fn is_skippable(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with("//")
}

/// Diagnostics for `document` against the cached `state`.
///
/// The window starts at `scan_min` lines. Blank and `//` lines inside it do
/// not count, so the boundary moves down past them. An include line seen
/// while removals are pending pushes the horizon to `line + 1 + scan_more`.
#[must_use]
pub fn scan(state: &AnalysisState, document: &Document, options: &ScanOptions<'_>) -> Vec<Diagnostic> {
    let lines = document.lines();
    let has_removals = !state.to_remove().is_empty();
    let mut guard = options
        .guard
        .map(|expected| GuardChecker::new(document.path(), expected));
    let mut out = Vec::new();

    let mut skipped = 0;
    let mut horizon = options.scan_min;
    let mut idx = 0;
    while idx < lines.len() {
        let min_boundary = options.scan_min + skipped;
        if idx >= min_boundary.max(horizon) {
            break;
        }
        let line = lines[idx];
        if idx < min_boundary && is_skippable(line) {
            skipped += 1;
            idx += 1;
            continue;
        }

        if let Some(checker) = guard.as_mut() {
            checker.observe(idx, &lines, &mut out);
        }

        if let Some(caps) = INCLUDE_DIRECTIVE.captures(line) {
            if has_removals {
                horizon = horizon.max(idx + 1 + options.scan_more);
            }
            if let (Some(indent), Some(token)) = (caps.get(1), caps.get(2))
                && let Some(removal) = state.find_removal(token.as_str())
            {
                let range = if options.full_line {
                    LineRange::new(idx as u32, 0, utf16_len(line))
                } else {
                    let start = utf16_len(indent.as_str());
                    LineRange::new(idx as u32, start, utf16_len(&line[indent.end()..token.end()]))
                };
                out.push(Diagnostic::new(
                    DiagnosticKind::UnusedInclude,
                    range,
                    format!("unused #include {}", removal.token()),
                ));
            }
        }
        idx += 1;
    }

    tracing::trace!(
        path = %document.path().display(),
        scanned = idx,
        skipped,
        "Scan window"
    );

    if let Some(checker) = guard {
        checker.finish(&lines, &mut out);
    }
    out
}
