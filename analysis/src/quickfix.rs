//! Quick fixes for scanner diagnostics.

use std::path::PathBuf;

use incwise_types::{
    Diagnostic, DiagnosticKind, Document, Position, TextEdit, TextSpan, utf16_len,
};

use crate::guard::{DEFINE, ENDIF, IFNDEF};

/// An action offered for one diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuickFix {
    /// Run the external rewriter over `file`.
    RunRewriter { file: PathBuf, title: String },
    /// Apply text edits to the document directly.
    ApplyEdits { title: String, edits: Vec<TextEdit> },
}

impl QuickFix {
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::RunRewriter { title, .. } | Self::ApplyEdits { title, .. } => title,
        }
    }
}

fn diagnostic_span(diagnostic: &Diagnostic) -> TextSpan {
    let range = diagnostic.range();
    TextSpan::new(
        Position::new(range.line, range.start),
        Position::new(range.line, range.end()),
    )
}

fn line_span(line: u32, text: &str) -> TextSpan {
    TextSpan::new(Position::new(line, 0), Position::new(line, utf16_len(text)))
}

fn endif_at_eof(document: &Document, lines: &[&str], expected: &str) -> TextEdit {
    let eol = document.line_ending().as_str();
    let needs_break = lines.last().is_some_and(|last| !last.is_empty());
    let prefix = if needs_break { eol } else { "" };
    TextEdit::insert(
        document.end_position(),
        format!("{prefix}#endif  // {expected}{eol}"),
    )
}

/// The fix for `diagnostic`, if one applies.
///
/// Unused-include fixes are offered only when `selection` contains the
/// diagnostic; guard fixes are file-wide and always offered. `expected` is
/// the file's expected guard; guard fixes need it.
#[must_use]
pub fn quick_fix(
    diagnostic: &Diagnostic,
    document: &Document,
    expected: Option<&str>,
    selection: TextSpan,
) -> Option<QuickFix> {
    if !diagnostic.kind().is_guard() {
        if !selection.contains(&diagnostic_span(diagnostic)) {
            return None;
        }
        let name = document
            .path()
            .file_name()
            .map_or_else(|| document.path().display().to_string(), |n| n.to_string_lossy().into_owned());
        return Some(QuickFix::RunRewriter {
            file: document.path().to_path_buf(),
            title: format!("Fix includes in {name}"),
        });
    }

    let expected = expected.filter(|e| !e.is_empty())?;
    let lines = document.lines();
    let eol = document.line_ending().as_str();
    let line = diagnostic.line();
    let text = lines.get(line as usize).copied().unwrap_or_default();

    let edits = match diagnostic.kind() {
        DiagnosticKind::UnusedInclude => return None,
        DiagnosticKind::GuardBadIfndef => {
            let caps = IFNDEF.captures(text)?;
            vec![TextEdit::replace(
                line_span(line, text),
                format!("{}{expected}{}", &caps[1], &caps[3]),
            )]
        }
        DiagnosticKind::GuardBadDefine => {
            if let Some(caps) = DEFINE.captures(text) {
                vec![TextEdit::replace(
                    line_span(line, text),
                    format!("{}{expected}{}", &caps[1], &caps[3]),
                )]
            } else {
                let ifndef_line = diagnostic.related().first()?.range.line;
                let ifndef_text = lines.get(ifndef_line as usize).copied().unwrap_or_default();
                vec![TextEdit::insert(
                    Position::new(ifndef_line, utf16_len(ifndef_text)),
                    format!("{eol}#define {expected}"),
                )]
            }
        }
        DiagnosticKind::GuardBadEndif => {
            let caps = ENDIF.captures(text)?;
            vec![TextEdit::replace(
                line_span(line, text),
                format!("{}  // {expected}", &caps[1]),
            )]
        }
        DiagnosticKind::GuardMissingIfndef => vec![
            TextEdit::insert(
                Position::new(0, 0),
                format!("#ifndef {expected}{eol}#define {expected}{eol}{eol}"),
            ),
            endif_at_eof(document, &lines, expected),
        ],
        DiagnosticKind::GuardMissingEndif => vec![endif_at_eof(document, &lines, expected)],
    };

    let title = match diagnostic.kind() {
        DiagnosticKind::GuardMissingIfndef => format!("Add include guard {expected}"),
        _ => format!("Use include guard {expected}"),
    };
    Some(QuickFix::ApplyEdits { title, edits })
}
