//! Invocation controller: index ownership, analyzer throttling, scanning and
//! fix commands for one workspace.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use incwise_config::{Config, ExpandContext, Patterns};
use incwise_types::{Diagnostic, Document, TextSpan};
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::cache::{AnalysisSlot, Freshness};
use crate::compdb::{CompileEntry, CompileIndex, locate_database};
use crate::error::{EngineError, ProcessError};
use crate::guard::expected_guard;
use crate::notice::{Notice, Notices};
use crate::paths::{absolutize, containing_folder};
use crate::process::{Invocation, ProcessOutput, ProcessRunner};
use crate::quickfix::{QuickFix, quick_fix};
use crate::report::{AnalysisState, ParseOptions, has_report_markers};
use crate::scanner::{ScanOptions, scan};

/// A resolved file together with its cached analysis.
#[derive(Debug, Clone)]
pub struct Analysis {
    slot: Arc<AnalysisSlot>,
}

impl Analysis {
    #[must_use]
    pub fn entry(&self) -> &Arc<CompileEntry> {
        self.slot.entry()
    }

    /// Copy of the state as of now.
    pub async fn state(&self) -> AnalysisState {
        self.slot.snapshot().await
    }
}

/// Counts from a "fix all files" run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixSummary {
    pub fixed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Analysis engine for one workspace.
pub struct Engine<R> {
    runner: R,
    root: PathBuf,
    folders: Vec<PathBuf>,
    index: RwLock<Arc<CompileIndex>>,
    slots: Mutex<HashMap<PathBuf, Arc<AnalysisSlot>>>,
    notices: Notices,
}

impl<R: ProcessRunner> Engine<R> {
    /// Create an engine rooted at `root`. `folders` are the workspace folders
    /// used for `${fileWorkspaceFolder}`; the root is always one of them.
    pub fn new(
        runner: R,
        root: impl Into<PathBuf>,
        folders: Vec<PathBuf>,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let root = root.into();
        let mut folders = folders;
        if !folders.contains(&root) {
            folders.push(root.clone());
        }
        let (notices, rx) = Notices::new();
        let engine = Self {
            runner,
            root,
            folders,
            index: RwLock::new(Arc::new(CompileIndex::empty())),
            slots: Mutex::new(HashMap::new()),
            notices,
        };
        (engine, rx)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Channel for user-visible errors raised outside the engine (e.g. a
    /// configuration file that fails to parse).
    #[must_use]
    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    /// The current index.
    pub async fn index(&self) -> Arc<CompileIndex> {
        Arc::clone(&*self.index.read().await)
    }

    async fn swap_index(&self, index: CompileIndex) {
        // A slot survives only while its compile entry is unchanged, so a run
        // in flight across a rebuild still gates later requests.
        self.slots.lock().await.retain(|file, slot| {
            index.passes_filters(file) && index.get(file).is_some_and(|entry| entry == slot.entry())
        });
        *self.index.write().await = Arc::new(index);
    }

    /// Locate the compilation database and rebuild the index when its path,
    /// mtime or filters changed. Returns whether a usable index is in place.
    pub async fn refresh_index(&self, config: &Config, active_file: Option<&Path>) -> bool {
        let Some(patterns) = config.patterns() else {
            let message = config.pattern_error().unwrap_or("invalid pattern in configuration");
            self.notices.report(format!("pattern:{message}"), message);
            if !self.index().await.is_empty() {
                self.swap_index(CompileIndex::empty()).await;
            }
            return false;
        };

        let file_workspace =
            active_file.and_then(|file| containing_folder(&absolutize(file, &self.root), &self.folders));
        let ctx = ExpandContext::new(&self.root).with_file_workspace(file_workspace);
        let setting = &config.settings().compile_commands;

        let path = match locate_database(setting, &ctx) {
            Ok(path) => path,
            Err(err) => {
                self.notices.report(format!("compdb:{err}"), err.to_string());
                if self.index().await.source().is_some() {
                    self.swap_index(CompileIndex::empty()).await;
                }
                return false;
            }
        };

        let current = self.index().await;
        if current.source() == Some(path.as_path())
            && !current.is_stale()
            && current.has_filters(patterns.ignore.as_ref(), patterns.only.as_ref())
        {
            return true;
        }

        match CompileIndex::load(&path, &self.root, patterns.ignore.clone(), patterns.only.clone()) {
            Ok(index) => {
                self.swap_index(index).await;
                true
            }
            Err(err) => {
                self.notices
                    .report(format!("compdb:{}", path.display()), err.to_string());
                self.swap_index(CompileIndex::empty()).await;
                false
            }
        }
    }

    /// Look up `path` in the index.
    pub async fn resolve(&self, config: &Config, path: &Path) -> Option<Arc<CompileEntry>> {
        config.patterns()?;
        self.index().await.resolve(path, &self.root)
    }

    async fn slot(&self, entry: &Arc<CompileEntry>) -> Arc<AnalysisSlot> {
        let mut slots = self.slots.lock().await;
        Arc::clone(
            slots
                .entry(entry.file().to_path_buf())
                .or_insert_with(|| Arc::new(AnalysisSlot::new(Arc::clone(entry)))),
        )
    }

    /// Resolve `path` and make sure its analysis is current.
    ///
    /// Returns `None` when the file is not in the database, is excluded from
    /// diagnostics, or the analyzer failed. A failed run leaves any earlier
    /// state in place.
    pub async fn ensure_analysis(
        &self,
        config: &Config,
        path: &Path,
        freshness: Freshness,
    ) -> Option<Analysis> {
        match self.try_ensure_analysis(config, path, freshness, true).await {
            Ok(analysis) => Some(analysis),
            Err(EngineError::NotResolved(_) | EngineError::Excluded(_)) => None,
            Err(err) => {
                tracing::warn!(path = %path.display(), "Analysis failed: {err}");
                None
            }
        }
    }

    /// `diagnostics_scope` applies `diagnostics.only_re`; fix commands skip it.
    async fn try_ensure_analysis(
        &self,
        config: &Config,
        path: &Path,
        freshness: Freshness,
        diagnostics_scope: bool,
    ) -> Result<Analysis, EngineError> {
        let patterns = config
            .patterns()
            .ok_or_else(|| EngineError::NotResolved(path.to_path_buf()))?;
        let entry = self
            .resolve(config, path)
            .await
            .ok_or_else(|| EngineError::NotResolved(path.to_path_buf()))?;
        if diagnostics_scope
            && let Some(only) = &patterns.diagnostics_only
            && !only.is_match(&entry.file().to_string_lossy())
        {
            tracing::debug!(path = %entry.file().display(), "Excluded by diagnostics.only_re");
            return Err(EngineError::Excluded(entry.file().to_path_buf()));
        }

        let slot = self.slot(&entry).await;
        let settings = config.settings();
        if freshness == Freshness::Reuse && slot.is_fresh(settings.diagnostics.interval()).await {
            tracing::debug!(path = %entry.file().display(), "Reusing cached analysis");
            return Ok(Analysis { slot });
        }

        let Some(in_flight) = slot.try_begin() else {
            tracing::debug!(path = %entry.file().display(), "Waiting for analysis in flight");
            slot.wait_idle().await;
            return if slot.has_report().await {
                Ok(Analysis { slot })
            } else {
                Err(EngineError::NoReport(entry.file().to_path_buf()))
            };
        };

        let invocation = Invocation::analyzer(&settings.analyzer, &entry);
        let output = self.runner.run(&invocation).await?;
        let combined = output.combined();
        if !output.success() && !has_report_markers(&combined) {
            return Err(ProcessError::Exit {
                program: invocation.program,
                code: output.status,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }

        slot.update(&combined, parse_options(config, patterns)).await;
        drop(in_flight);
        Ok(Analysis { slot })
    }

    /// Expected include guard for `path`, or `None` when the file is outside
    /// guard policy. Files missing from the database use the workspace folder
    /// containing them as the base directory.
    pub async fn expected_guard(&self, config: &Config, path: &Path) -> Option<String> {
        let template = &config.settings().diagnostics.include_guard;
        if template.is_empty() {
            return None;
        }
        let header_files = config.patterns()?.header_files.as_ref()?;
        let file = absolutize(path, &self.root);
        if !header_files.is_match(&file.to_string_lossy()) {
            return None;
        }
        let guard = match self.resolve(config, &file).await {
            Some(entry) => expected_guard(template, entry.file(), entry.directory()),
            None => {
                let base = containing_folder(&file, &self.folders).unwrap_or(&self.root);
                expected_guard(template, &file, base)
            }
        };
        (!guard.is_empty()).then_some(guard)
    }

    /// Diagnostics for the live `document` against `analysis`.
    ///
    /// Waits for any analyzer run in flight for the file before reading the
    /// cached report.
    pub async fn scan(
        &self,
        config: &Config,
        analysis: &Analysis,
        document: &Document,
    ) -> Vec<Diagnostic> {
        analysis.slot.wait_idle().await;
        let state = analysis.slot.snapshot().await;
        let guard = self.expected_guard(config, document.path()).await;
        let options = ScanOptions::new(&config.settings().diagnostics, guard.as_deref());
        scan(&state, document, &options)
    }

    /// Analyze and scan. `None` means nothing should be published for this
    /// cycle.
    pub async fn diagnose(
        &self,
        config: &Config,
        document: &Document,
        freshness: Freshness,
    ) -> Option<Vec<Diagnostic>> {
        match self
            .try_ensure_analysis(config, document.path(), freshness, true)
            .await
        {
            Ok(analysis) => Some(self.scan(config, &analysis, document).await),
            Err(EngineError::NotResolved(_)) => {
                // Headers are rarely in the database; they still get guard checks.
                let guard = self.expected_guard(config, document.path()).await?;
                let options = ScanOptions::new(&config.settings().diagnostics, Some(&guard));
                Some(scan(&AnalysisState::default(), document, &options))
            }
            Err(EngineError::Excluded(_)) => None,
            Err(err) => {
                tracing::warn!(path = %document.path().display(), "Analysis failed: {err}");
                None
            }
        }
    }

    /// Quick fixes for `diagnostics` given the editor `selection`.
    pub async fn quick_fixes(
        &self,
        config: &Config,
        document: &Document,
        diagnostics: &[Diagnostic],
        selection: TextSpan,
    ) -> Vec<QuickFix> {
        let expected = self.expected_guard(config, document.path()).await;
        let mut fixes: Vec<QuickFix> = Vec::new();
        for diagnostic in diagnostics {
            if let Some(fix) = quick_fix(diagnostic, document, expected.as_deref(), selection)
                && !fixes.contains(&fix)
            {
                fixes.push(fix);
            }
        }
        fixes
    }

    /// Run the analyzer for `path` and feed its report to the rewriter.
    pub async fn fix_file(&self, config: &Config, path: &Path) -> Result<ProcessOutput, EngineError> {
        let analysis = self
            .try_ensure_analysis(config, path, Freshness::Force, false)
            .await?;
        let state = analysis.state().await;
        if state.raw_output().is_empty() {
            return Err(EngineError::NoReport(analysis.entry().file().to_path_buf()));
        }

        let invocation =
            Invocation::rewriter(&config.settings().rewriter, analysis.entry(), state.raw_output());
        let output = self.runner.run(&invocation).await?.check(&invocation.program)?;
        // The file changed on disk; the next request must re-analyze.
        analysis.slot.invalidate().await;
        tracing::info!(path = %analysis.entry().file().display(), "Fixed includes");
        Ok(output)
    }

    /// Run [`Engine::fix_file`] for every file in the database.
    ///
    /// Files whose top-level directory under the workspace root is a symlink,
    /// and files failing the ignore/only patterns, are skipped.
    pub async fn fix_all(&self, config: &Config) -> FixSummary {
        let mut summary = FixSummary::default();
        let index = self.index().await;
        for entry in index.entries() {
            if self.in_symlinked_dir(entry.file()) || !index.passes_filters(entry.file()) {
                tracing::debug!(path = %entry.file().display(), "Skipping");
                summary.skipped += 1;
                continue;
            }
            match self.fix_file(config, entry.file()).await {
                Ok(_) => summary.fixed += 1,
                Err(err) => {
                    tracing::warn!(path = %entry.file().display(), "Fix failed: {err}");
                    summary.failed += 1;
                }
            }
        }
        tracing::info!(
            fixed = summary.fixed,
            failed = summary.failed,
            skipped = summary.skipped,
            "Fixed all files"
        );
        summary
    }

    fn in_symlinked_dir(&self, file: &Path) -> bool {
        let Ok(relative) = file.strip_prefix(&self.root) else {
            return false;
        };
        let mut components = relative.components();
        let Some(Component::Normal(top)) = components.next() else {
            return false;
        };
        // A bare file name has no top-level directory.
        if components.next().is_none() {
            return false;
        }
        self.root
            .join(top)
            .symlink_metadata()
            .is_ok_and(|meta| meta.file_type().is_symlink())
    }
}

fn parse_options<'a>(config: &Config, patterns: &'a Patterns) -> ParseOptions<'a> {
    ParseOptions {
        output_filter: patterns.output_filter.as_ref(),
        unused_includes: config.settings().diagnostics.unused_includes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::process::RunFut;
    use incwise_config::Settings;

    /// Returns a fixed report for every invocation.
    struct FixedRunner(String);

    impl ProcessRunner for FixedRunner {
        fn run<'a>(&'a self, _invocation: &'a Invocation) -> RunFut<'a> {
            let stdout = self.0.clone();
            Box::pin(async move {
                Ok(ProcessOutput {
                    status: Some(1),
                    stdout,
                    stderr: String::new(),
                })
            })
        }
    }

    /// Temp workspace whose database lists `files` relative to the root.
    fn workspace(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let entries: Vec<String> = files
            .iter()
            .map(|f| format!(r#"{{"file": "{f}", "command": "c++ -c {f}"}}"#))
            .collect();
        fs::write(
            dir.path().join("compile_commands.json"),
            format!("[{}]", entries.join(",")),
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn refresh_index_loads_and_resolves() {
        let dir = workspace(&["a.cc"]);
        let (engine, _rx) = Engine::new(FixedRunner(String::new()), dir.path(), Vec::new());
        let config = Config::default();
        assert!(engine.refresh_index(&config, None).await);
        assert!(engine.resolve(&config, Path::new("a.cc")).await.is_some());
        assert!(engine.resolve(&config, Path::new("b.cc")).await.is_none());
    }

    #[tokio::test]
    async fn missing_database_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, mut rx) = Engine::new(FixedRunner(String::new()), dir.path(), Vec::new());
        let config = Config::default();
        assert!(!engine.refresh_index(&config, None).await);
        assert!(!engine.refresh_index(&config, None).await);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_pattern_resolves_nothing() {
        let dir = workspace(&["a.cc"]);
        let (engine, mut rx) = Engine::new(FixedRunner(String::new()), dir.path(), Vec::new());
        assert!(engine.refresh_index(&Config::default(), None).await);

        let mut settings = Settings::default();
        settings.rewriter.ignore_re = "(".to_string();
        let config = Config::new(settings);
        assert!(!engine.refresh_index(&config, None).await);
        assert!(engine.resolve(&config, Path::new("a.cc")).await.is_none());
        assert!(rx.try_recv().unwrap().message.contains("rewriter.ignore_re"));
    }

    #[tokio::test]
    async fn nonzero_exit_with_report_is_accepted() {
        let dir = workspace(&["a.cc"]);
        let report = "a.cc should remove these lines:\n- #include <map>\n".to_string();
        let (engine, _rx) = Engine::new(FixedRunner(report), dir.path(), Vec::new());
        let config = Config::default();
        engine.refresh_index(&config, None).await;
        let analysis = engine
            .ensure_analysis(&config, Path::new("a.cc"), Freshness::Reuse)
            .await
            .unwrap();
        assert_eq!(analysis.state().await.to_remove().len(), 1);
    }

    #[tokio::test]
    async fn nonzero_exit_without_report_fails() {
        let dir = workspace(&["a.cc"]);
        let (engine, _rx) =
            Engine::new(FixedRunner("fatal error".to_string()), dir.path(), Vec::new());
        let config = Config::default();
        engine.refresh_index(&config, None).await;
        assert!(
            engine
                .ensure_analysis(&config, Path::new("a.cc"), Freshness::Reuse)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn expected_guard_policy() {
        let dir = workspace(&[]);
        let (engine, _rx) = Engine::new(FixedRunner(String::new()), dir.path(), Vec::new());
        let mut settings = Settings::default();
        assert!(engine.expected_guard(&Config::new(settings.clone()), Path::new("inc/foo.h")).await.is_none());

        settings.diagnostics.include_guard = "${FILE}_".to_string();
        let config = Config::new(settings);
        assert_eq!(
            engine.expected_guard(&config, Path::new("inc/foo.h")).await.as_deref(),
            Some("INC_FOO_H_")
        );
        assert!(engine.expected_guard(&config, Path::new("src/foo.cc")).await.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_top_level_dir_detected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        let (engine, _rx) = Engine::new(FixedRunner(String::new()), dir.path(), Vec::new());
        assert!(engine.in_symlinked_dir(&dir.path().join("link/a.cc")));
        assert!(!engine.in_symlinked_dir(&dir.path().join("real/a.cc")));
        assert!(!engine.in_symlinked_dir(&dir.path().join("a.cc")));
        assert!(!engine.in_symlinked_dir(Path::new("/elsewhere/a.cc")));
    }
}
