//! Compilation database index.
//!
//! Loads a JSON compilation database into a per-file lookup of build
//! directory and compiler arguments. The index is immutable once built; a
//! changed database (path, mtime, or filters) produces a fresh index that the
//! owner swaps in wholesale.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use incwise_config::{AUTO_COMPILE_COMMANDS, ExpandContext, expand_placeholders};
use regex::Regex;
use serde::Deserialize;

use crate::error::CompileDbError;
use crate::paths::absolutize;
use crate::tokenize::tokenize;

/// Relative locations probed when `compile_commands = "auto"`.
const AUTO_CANDIDATES: [&str; 4] = [
    "${workspaceFolder}/compile_commands.json",
    "${workspaceFolder}/build/compile_commands.json",
    "${fileWorkspaceFolder}/compile_commands.json",
    "${fileWorkspaceFolder}/build/compile_commands.json",
];

#[derive(Debug, Deserialize)]
struct RawEntry {
    file: String,
    #[serde(default)]
    directory: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
}

/// How one file is compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileEntry {
    file: PathBuf,
    directory: PathBuf,
    command: String,
    arguments: Vec<String>,
}

impl CompileEntry {
    fn from_raw(raw: RawEntry, root: &Path) -> Self {
        let directory = raw
            .directory
            .as_deref()
            .map_or_else(|| root.to_path_buf(), |dir| absolutize(Path::new(dir), root));
        let file = absolutize(Path::new(&raw.file), &directory);
        let (command, arguments) = match (raw.arguments, raw.command) {
            (Some(arguments), _) => (arguments.join(" "), arguments),
            (None, Some(command)) => {
                let arguments = tokenize(&command);
                (command, arguments)
            }
            (None, None) => (String::new(), Vec::new()),
        };
        Self {
            file,
            directory,
            command,
            arguments,
        }
    }

    #[must_use]
    pub fn new(
        file: impl Into<PathBuf>,
        directory: impl Into<PathBuf>,
        arguments: Vec<String>,
    ) -> Self {
        Self {
            file: file.into(),
            directory: directory.into(),
            command: arguments.join(" "),
            arguments,
        }
    }

    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Build directory; external tools run here.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Arguments without the compiler executable.
    #[must_use]
    pub fn compiler_args(&self) -> &[String] {
        self.arguments.get(1..).unwrap_or_default()
    }
}

/// Per-file lookup built from one compilation database.
#[derive(Debug, Default)]
pub struct CompileIndex {
    entries: HashMap<PathBuf, Arc<CompileEntry>>,
    ignore: Option<Regex>,
    only: Option<Regex>,
    source: Option<PathBuf>,
    modified: Option<SystemTime>,
}

fn pattern_str(re: Option<&Regex>) -> Option<&str> {
    re.map(Regex::as_str)
}

impl CompileIndex {
    /// An index that resolves nothing (degraded state).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse database JSON. Relative `file`/`directory` values resolve against `root`.
    pub fn parse(
        json: &str,
        root: &Path,
        ignore: Option<Regex>,
        only: Option<Regex>,
    ) -> Result<Self, serde_json::Error> {
        let raw: Vec<RawEntry> = serde_json::from_str(json)?;
        let entries = raw
            .into_iter()
            .map(|raw| {
                let entry = CompileEntry::from_raw(raw, root);
                (entry.file.clone(), Arc::new(entry))
            })
            .collect();
        Ok(Self {
            entries,
            ignore,
            only,
            source: None,
            modified: None,
        })
    }

    pub fn load(
        path: &Path,
        root: &Path,
        ignore: Option<Regex>,
        only: Option<Regex>,
    ) -> Result<Self, CompileDbError> {
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
        let json = fs::read_to_string(path).map_err(|source| CompileDbError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut index =
            Self::parse(&json, root, ignore, only).map_err(|source| CompileDbError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        index.source = Some(path.to_path_buf());
        index.modified = modified;
        tracing::info!(
            path = %path.display(),
            entries = index.entries.len(),
            "Loaded compilation database"
        );
        Ok(index)
    }

    /// Look up `path` (relative paths resolve against `root`).
    ///
    /// Returns `None` when the file is absent, matches the ignore pattern, or
    /// fails the only pattern.
    #[must_use]
    pub fn resolve(&self, path: &Path, root: &Path) -> Option<Arc<CompileEntry>> {
        let file = absolutize(path, root);
        let Some(entry) = self.entries.get(&file) else {
            tracing::debug!(path = %file.display(), "Not in compilation database");
            return None;
        };
        if !self.passes_filters(&file) {
            tracing::debug!(path = %file.display(), "Filtered out by ignore/only pattern");
            return None;
        }
        Some(Arc::clone(entry))
    }

    /// Entry for an absolute `file`, ignoring the filters.
    #[must_use]
    pub fn get(&self, file: &Path) -> Option<&Arc<CompileEntry>> {
        self.entries.get(file)
    }

    #[must_use]
    pub fn passes_filters(&self, file: &Path) -> bool {
        let name = file.to_string_lossy();
        if self.ignore.as_ref().is_some_and(|re| re.is_match(&name)) {
            return false;
        }
        self.only.as_ref().is_none_or(|re| re.is_match(&name))
    }

    /// Database file this index was loaded from.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Whether the database file's mtime differs from the one recorded at load.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        let Some(source) = &self.source else {
            return false;
        };
        let current = fs::metadata(source).and_then(|m| m.modified()).ok();
        current != self.modified
    }

    /// Whether this index was built with the same ignore/only patterns.
    #[must_use]
    pub fn has_filters(&self, ignore: Option<&Regex>, only: Option<&Regex>) -> bool {
        pattern_str(self.ignore.as_ref()) == pattern_str(ignore)
            && pattern_str(self.only.as_ref()) == pattern_str(only)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, sorted by file path.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<CompileEntry>> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.file.cmp(&b.file));
        entries
    }
}

/// Find the database file for the `compile_commands` setting.
///
/// An explicit setting is expanded and resolved against the workspace root;
/// `"auto"` probes the fixed candidate list and takes the first that exists.
pub fn locate_database(setting: &str, ctx: &ExpandContext<'_>) -> Result<PathBuf, CompileDbError> {
    let candidates: Vec<PathBuf> = if setting.trim().is_empty() || setting == AUTO_COMPILE_COMMANDS
    {
        let mut candidates: Vec<PathBuf> = Vec::new();
        for template in AUTO_CANDIDATES {
            let path = PathBuf::from(expand_placeholders(template, ctx));
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
        candidates
    } else {
        let expanded = expand_placeholders(setting, ctx);
        vec![absolutize(Path::new(&expanded), ctx.workspace_folder)]
    };

    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or(CompileDbError::NotFound { tried: candidates })
}
