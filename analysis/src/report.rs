//! Analyzer report model.
//!
//! The analyzer prints up to three sections per file, each opened by a marker
//! line and closed by a blank line:
//!
//! ```text
//! src/a.cc should add these lines:
//! #include <vector>  // for vector
//!
//! src/a.cc should remove these lines:
//! - #include "unused.h"  // lines 3-3
//!
//! The full include-list for src/a.cc:
//! #include <vector>  // for vector
//! ```

use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::compdb::CompileEntry;
use crate::paths::absolutize;

static ADD_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+) should add these lines:$").expect("valid regex"));
static REMOVE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+) should remove these lines:$").expect("valid regex"));
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^The full include-list for (.+):$").expect("valid regex"));
pub(crate) static INCLUDE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"#include\s+(<[^>]*>|"[^"]*")"#).expect("valid regex")
});

/// One include directive named by the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeRef {
    token: String,
    line: String,
}

impl IncludeRef {
    /// Parse an include directive out of `line`, if it contains one.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        let token = INCLUDE_TOKEN.captures(line)?.get(1)?.as_str();
        Some(Self {
            token: token.to_string(),
            line: line.to_string(),
        })
    }

    /// The literal `<...>` or `"..."` text.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The report line the token was found on.
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Neutral,
    Add,
    Remove,
    List,
}

/// Options applied while parsing one report.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions<'a> {
    /// Lines matching this are dropped before parsing.
    pub output_filter: Option<&'a Regex>,
    /// When false the remove list stays empty.
    pub unused_includes: bool,
}

/// Cached analyzer result for one file.
#[derive(Debug, Clone, Default)]
pub struct AnalysisState {
    raw_output: String,
    last_updated: Option<Instant>,
    to_add: Vec<IncludeRef>,
    to_remove: Vec<IncludeRef>,
    full_list: Vec<IncludeRef>,
}

impl AnalysisState {
    /// Replace the whole state with the parse of `output`.
    ///
    /// Only sections naming `entry`'s file contribute; sections for other
    /// files (e.g. an associated header) are skipped.
    pub fn update(&mut self, entry: &CompileEntry, output: &str, options: ParseOptions<'_>) {
        let filtered: String = match options.output_filter {
            Some(filter) => output
                .lines()
                .filter(|line| !filter.is_match(line))
                .map(|line| format!("{line}\n"))
                .collect(),
            None => output.to_string(),
        };

        let mut to_add = Vec::new();
        let mut to_remove = Vec::new();
        let mut full_list = Vec::new();
        let mut section = Section::Neutral;

        for line in filtered.lines() {
            if line.trim().is_empty() {
                section = Section::Neutral;
                continue;
            }
            if let Some(next) = marker(line, entry) {
                section = next;
                continue;
            }
            match section {
                Section::Neutral => {}
                Section::Add => to_add.extend(IncludeRef::from_line(line)),
                Section::Remove => {
                    if let Some(rest) = line.strip_prefix("- ") {
                        to_remove.extend(IncludeRef::from_line(rest));
                    }
                }
                Section::List => full_list.extend(IncludeRef::from_line(line)),
            }
        }

        if !options.unused_includes {
            to_remove.clear();
        }

        tracing::debug!(
            path = %entry.file().display(),
            add = to_add.len(),
            remove = to_remove.len(),
            list = full_list.len(),
            "Parsed analyzer report"
        );

        *self = Self {
            raw_output: filtered,
            last_updated: Some(Instant::now()),
            to_add,
            to_remove,
            full_list,
        };
    }

    /// The (filtered) report text; this is what the rewriter consumes.
    #[must_use]
    pub fn raw_output(&self) -> &str {
        &self.raw_output
    }

    #[must_use]
    pub fn last_updated(&self) -> Option<Instant> {
        self.last_updated
    }

    #[must_use]
    pub fn to_add(&self) -> &[IncludeRef] {
        &self.to_add
    }

    #[must_use]
    pub fn to_remove(&self) -> &[IncludeRef] {
        &self.to_remove
    }

    #[must_use]
    pub fn full_list(&self) -> &[IncludeRef] {
        &self.full_list
    }

    /// First remove-list entry whose token equals `token` exactly.
    #[must_use]
    pub fn find_removal(&self, token: &str) -> Option<&IncludeRef> {
        self.to_remove.iter().find(|r| r.token == token)
    }

    /// A report exists and was produced less than `interval` ago.
    #[must_use]
    pub fn is_fresh(&self, interval: Duration) -> bool {
        !self.raw_output.is_empty() && self.last_updated.is_some_and(|t| t.elapsed() < interval)
    }
}

fn marker(line: &str, entry: &CompileEntry) -> Option<Section> {
    let (section, caps) = if let Some(caps) = ADD_MARKER.captures(line) {
        (Section::Add, caps)
    } else if let Some(caps) = REMOVE_MARKER.captures(line) {
        (Section::Remove, caps)
    } else if let Some(caps) = LIST_MARKER.captures(line) {
        (Section::List, caps)
    } else {
        return None;
    };
    let named = absolutize(Path::new(&caps[1]), entry.directory());
    if named == entry.file() {
        Some(section)
    } else {
        Some(Section::Neutral)
    }
}

/// Whether `output` contains at least one report section marker.
#[must_use]
pub fn has_report_markers(output: &str) -> bool {
    output.lines().any(|line| {
        ADD_MARKER.is_match(line) || REMOVE_MARKER.is_match(line) || LIST_MARKER.is_match(line)
    })
}
