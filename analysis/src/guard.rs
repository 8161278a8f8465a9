//! Include-guard derivation and checking.

use std::path::Path;
use std::sync::LazyLock;

use incwise_types::{Diagnostic, DiagnosticKind, LineRange, RelatedLocation, utf16_len};
use regex::Regex;

use crate::paths::relative_to;

pub(crate) static IFNDEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*#\s*ifndef\s+)([A-Za-z_][A-Za-z0-9_]*)(.*)$").expect("valid regex")
});
pub(crate) static DEFINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*#\s*define\s+)([A-Za-z_][A-Za-z0-9_]*)(.*)$").expect("valid regex")
});
pub(crate) static ENDIF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*#\s*endif\b)(.*)$").expect("valid regex"));
static ENDIF_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?://|/\*)\s*([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex")
});
static PRAGMA_ONCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#\s*pragma\s+once\b").expect("valid regex"));

/// How many trailing lines are searched for the closing `#endif`.
pub const ENDIF_SEARCH_LINES: usize = 10;

/// Expected guard identifier for `file` built in `directory`.
///
/// The path relative to `directory` is sanitized (anything outside
/// `[A-Za-z0-9_]` becomes `_`) and substituted for `${file}` and, upper-cased,
/// for `${FILE}` in `template`. An empty template disables guard checking and
/// yields an empty string.
#[must_use]
pub fn expected_guard(template: &str, file: &Path, directory: &Path) -> String {
    if template.is_empty() {
        return String::new();
    }
    let relative = relative_to(file, directory);
    let sanitized: String = relative
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    template
        .replace("${file}", &sanitized)
        .replace("${FILE}", &sanitized.to_ascii_uppercase())
}

/// Progress of the guard check through one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    NoGuardSeen,
    GuardOpened { ifndef_line: usize },
    GuardClosed { ifndef_line: usize, endif_line: usize },
    PragmaOnce { line: usize },
}

/// Index of the last line with content; a final newline does not add one.
pub(crate) fn last_content_line(lines: &[&str]) -> usize {
    match lines {
        [] => 0,
        [.., last] if last.is_empty() && lines.len() > 1 => lines.len() - 2,
        _ => lines.len() - 1,
    }
}

fn whole_line(lines: &[&str], line: usize) -> LineRange {
    let len = lines.get(line).map_or(0, |l| utf16_len(l));
    LineRange::new(line as u32, 0, len)
}

fn capture_range(text: &str, line: usize, m: regex::Match<'_>) -> LineRange {
    LineRange::new(
        line as u32,
        utf16_len(&text[..m.start()]),
        utf16_len(m.as_str()),
    )
}

/// Include-guard state machine for one document.
///
/// [`GuardChecker::observe`] is fed each line of the scan window top to
/// bottom; [`GuardChecker::finish`] reports a missing guard and runs the
/// bounded backward search for `#endif`.
#[derive(Debug)]
pub struct GuardChecker<'a> {
    path: &'a Path,
    expected: &'a str,
    state: GuardState,
}

impl<'a> GuardChecker<'a> {
    #[must_use]
    pub fn new(path: &'a Path, expected: &'a str) -> Self {
        Self {
            path,
            expected,
            state: GuardState::NoGuardSeen,
        }
    }

    #[must_use]
    pub fn state(&self) -> GuardState {
        self.state
    }

    fn opened_here(&self, ifndef_line: usize, lines: &[&str]) -> RelatedLocation {
        RelatedLocation {
            path: self.path.to_path_buf(),
            range: whole_line(lines, ifndef_line),
            message: "include guard opened here".to_string(),
        }
    }

    pub fn observe(&mut self, line_no: usize, lines: &[&str], out: &mut Vec<Diagnostic>) {
        if self.state != GuardState::NoGuardSeen {
            return;
        }
        let Some(text) = lines.get(line_no).copied() else {
            return;
        };

        if PRAGMA_ONCE.is_match(text) {
            self.state = GuardState::PragmaOnce { line: line_no };
            return;
        }
        let Some(ident) = IFNDEF.captures(text).and_then(|caps| caps.get(2)) else {
            return;
        };
        self.state = GuardState::GuardOpened {
            ifndef_line: line_no,
        };

        if ident.as_str() != self.expected {
            out.push(Diagnostic::new(
                DiagnosticKind::GuardBadIfndef,
                capture_range(text, line_no, ident),
                format!(
                    "include guard should be \"{}\", found \"{}\"",
                    self.expected,
                    ident.as_str()
                ),
            ));
        }

        let define_line = line_no + 1;
        let define_text = lines.get(define_line).copied();
        let define_ident = define_text
            .and_then(|t| DEFINE.captures(t))
            .and_then(|caps| caps.get(2));
        if define_ident.is_some_and(|m| m.as_str() == self.expected) {
            return;
        }
        let (line, range) = match (define_text, define_ident) {
            (Some(text), Some(ident)) => (define_line, capture_range(text, define_line, ident)),
            (Some(_), None) => (define_line, whole_line(lines, define_line)),
            (None, _) => (line_no, whole_line(lines, line_no)),
        };
        tracing::trace!(line, "Guard #define mismatch");
        out.push(
            Diagnostic::new(
                DiagnosticKind::GuardBadDefine,
                range,
                format!("#define should follow #ifndef with \"{}\"", self.expected),
            )
            .with_related(self.opened_here(line_no, lines)),
        );
    }

    /// Report a missing `#ifndef` and check the closing `#endif`.
    pub fn finish(mut self, lines: &[&str], out: &mut Vec<Diagnostic>) -> GuardState {
        let ifndef_line = match self.state {
            GuardState::PragmaOnce { .. } | GuardState::GuardClosed { .. } => return self.state,
            GuardState::GuardOpened { ifndef_line } => Some(ifndef_line),
            GuardState::NoGuardSeen => {
                out.push(Diagnostic::new(
                    DiagnosticKind::GuardMissingIfndef,
                    whole_line(lines, 0),
                    format!("missing include guard \"{}\"", self.expected),
                ));
                None
            }
        };

        let last = last_content_line(lines);
        let first = (last + 1).saturating_sub(ENDIF_SEARCH_LINES);
        let endif = (first..=last)
            .rev()
            .find_map(|idx| ENDIF.captures(lines.get(idx)?).map(|caps| (idx, caps)));

        let Some((endif_line, caps)) = endif else {
            out.push(Diagnostic::new(
                DiagnosticKind::GuardMissingEndif,
                whole_line(lines, last),
                format!("missing #endif for include guard \"{}\"", self.expected),
            ));
            return self.state;
        };

        let annotated = ENDIF_COMMENT
            .captures(caps.get(2).map_or("", |m| m.as_str()))
            .is_some_and(|c| &c[1] == self.expected);
        if !annotated {
            let mut diagnostic = Diagnostic::new(
                DiagnosticKind::GuardBadEndif,
                whole_line(lines, endif_line),
                format!("#endif should be annotated with \"// {}\"", self.expected),
            );
            if let Some(ifndef_line) = ifndef_line {
                diagnostic = diagnostic.with_related(self.opened_here(ifndef_line, lines));
            }
            out.push(diagnostic);
        }
        if let Some(ifndef_line) = ifndef_line {
            self.state = GuardState::GuardClosed {
                ifndef_line,
                endif_line,
            };
        }
        self.state
    }
}
