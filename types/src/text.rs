//! Live document text, positions, and edits.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Number of UTF-16 code units in `s`.
#[must_use]
pub fn utf16_len(s: &str) -> u32 {
    s.chars().map(|c| c.len_utf16() as u32).sum()
}

/// End-of-line style recorded for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    /// Detect from the first line break in `text`; defaults to LF.
    #[must_use]
    pub fn detect(text: &str) -> Self {
        match text.find('\n') {
            Some(idx) if idx > 0 && text.as_bytes()[idx - 1] == b'\r' => Self::CrLf,
            _ => Self::Lf,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

/// A 0-indexed line / UTF-16 column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A half-open span between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TextSpan {
    pub start: Position,
    pub end: Position,
}

impl TextSpan {
    #[must_use]
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Empty span at `position`.
    #[must_use]
    pub fn at(position: Position) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Replace `span` with `new_text`. An empty span is an insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextEdit {
    pub span: TextSpan,
    pub new_text: String,
}

impl TextEdit {
    #[must_use]
    pub fn replace(span: TextSpan, new_text: impl Into<String>) -> Self {
        Self {
            span,
            new_text: new_text.into(),
        }
    }

    #[must_use]
    pub fn insert(at: Position, new_text: impl Into<String>) -> Self {
        Self::replace(TextSpan::at(at), new_text)
    }
}

/// Snapshot of an editor document: path, current (possibly unsaved) text,
/// and the line-ending style edits should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    path: PathBuf,
    text: String,
    line_ending: LineEnding,
}

impl Document {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let text = text.into();
        let line_ending = LineEnding::detect(&text);
        Self {
            path: path.into(),
            text,
            line_ending,
        }
    }

    #[must_use]
    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Lines as an editor counts them: `"a\n"` has two lines, the last empty.
    /// A trailing `\r` is stripped from each line.
    #[must_use]
    pub fn lines(&self) -> Vec<&str> {
        self.text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect()
    }

    /// Position just past the last character of the document.
    #[must_use]
    pub fn end_position(&self) -> Position {
        let lines = self.lines();
        let last = lines.len().saturating_sub(1);
        Position::new(last as u32, lines.last().map_or(0, |l| utf16_len(l)))
    }

    /// Byte offset of `position`, clamped to the document and the line's content.
    #[must_use]
    pub fn offset_at(&self, position: Position) -> usize {
        let mut line_start = 0;
        for (idx, raw) in self.text.split('\n').enumerate() {
            let content = raw.strip_suffix('\r').unwrap_or(raw);
            if idx == position.line as usize {
                let mut units = 0;
                for (byte, ch) in content.char_indices() {
                    if units >= position.character {
                        return line_start + byte;
                    }
                    units += ch.len_utf16() as u32;
                }
                return line_start + content.len();
            }
            line_start += raw.len() + 1;
        }
        self.text.len()
    }

    /// Apply `edits` (positions relative to the current text) and return the new text.
    ///
    /// Edits sharing a start position keep their relative order.
    #[must_use]
    pub fn apply_edits(&self, edits: &[TextEdit]) -> String {
        let mut resolved: Vec<(usize, usize, usize, &str)> = edits
            .iter()
            .enumerate()
            .map(|(idx, edit)| {
                let start = self.offset_at(edit.span.start);
                let end = self.offset_at(edit.span.end).max(start);
                (start, idx, end, edit.new_text.as_str())
            })
            .collect();
        resolved.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

        let mut text = self.text.clone();
        for (start, _, end, new_text) in resolved {
            text.replace_range(start..end, new_text);
        }
        text
    }
}
