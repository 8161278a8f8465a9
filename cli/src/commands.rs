//! Subcommand implementations.

use std::fs::{self, Permissions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use incwise_analysis::{
    AnalysisState, Engine, Freshness, Notice, ProcessRunner, QuickFix, ScanOptions, SystemRunner,
    absolutize, quick_fix, scan,
};
use incwise_config::{Config, Settings};
use incwise_lsp::ServerOptions;
use incwise_types::{Document, Position, TextSpan};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

/// Each pass applies one guard fix and rescans. Renaming a guard takes three
/// fixes (`#ifndef`, `#define`, `#endif`) plus a clean pass.
const GUARD_FIX_PASSES: usize = 4;

pub(crate) async fn serve(root: Option<PathBuf>, config_file: Option<PathBuf>) -> Result<ExitCode> {
    let root = root.map(|root| workspace_root(Some(root))).transpose()?;
    incwise_lsp::serve_stdio(ServerOptions { root, config_file }).await?;
    Ok(ExitCode::SUCCESS)
}

pub(crate) async fn check(
    root: Option<PathBuf>,
    config_file: Option<&Path>,
    files: &[PathBuf],
) -> Result<ExitCode> {
    let mut workspace = Workspace::open(SystemRunner, root, config_file)?;
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let mut reported = 0usize;
    for file in files {
        let path = absolutize(file, &cwd);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        workspace.engine.refresh_index(&workspace.config, Some(&path)).await;
        let document = Document::new(&path, text);
        match workspace
            .engine
            .diagnose(&workspace.config, &document, Freshness::Force)
            .await
        {
            Some(diagnostics) => {
                for diagnostic in &diagnostics {
                    println!("{}", diagnostic.display_with_path(file));
                }
                reported += diagnostics.len();
            }
            None => tracing::info!(path = %path.display(), "No diagnostics available"),
        }
        workspace.flush_notices();
    }
    Ok(if reported == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub(crate) async fn fix(
    root: Option<PathBuf>,
    config_file: Option<&Path>,
    file: &Path,
    guards: bool,
) -> Result<ExitCode> {
    let mut workspace = Workspace::open(SystemRunner, root, config_file)?;
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let path = absolutize(file, &cwd);
    workspace.engine.refresh_index(&workspace.config, Some(&path)).await;

    match workspace.engine.fix_file(&workspace.config, &path).await {
        Ok(output) => print!("{}", output.stdout),
        // Headers are rarely in the database; guard fixes still apply.
        Err(err) if guards => tracing::warn!(path = %path.display(), "Rewriter skipped: {err}"),
        Err(err) => {
            workspace.flush_notices();
            return Err(err).with_context(|| format!("fixing {}", path.display()));
        }
    }

    if guards && apply_guard_fixes(&workspace.engine, &workspace.config, &path).await? {
        println!("Updated include guard in {}", file.display());
    }
    workspace.flush_notices();
    Ok(ExitCode::SUCCESS)
}

pub(crate) async fn fix_all(root: Option<PathBuf>, config_file: Option<&Path>) -> Result<ExitCode> {
    let mut workspace = Workspace::open(SystemRunner, root, config_file)?;
    if !workspace.engine.refresh_index(&workspace.config, None).await {
        workspace.flush_notices();
        bail!("no usable compilation database");
    }
    let summary = workspace.engine.fix_all(&workspace.config).await;
    workspace.flush_notices();
    println!(
        "Fixed {} files ({} failed, {} skipped)",
        summary.fixed, summary.failed, summary.skipped
    );
    Ok(if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn workspace_root(root: Option<PathBuf>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("resolving current directory")?;
    Ok(match root {
        Some(root) => absolutize(&root, &cwd),
        None => cwd,
    })
}

/// Engine plus the settings snapshot for a one-shot command.
struct Workspace<R> {
    engine: Engine<R>,
    config: Config,
    notices: mpsc::UnboundedReceiver<Notice>,
}

impl<R: ProcessRunner> Workspace<R> {
    fn open(runner: R, root: Option<PathBuf>, config_file: Option<&Path>) -> Result<Self> {
        let root = workspace_root(root)?;
        let settings = match config_file {
            Some(path) => Settings::load_file(path)?,
            None => Settings::load(&root)?.unwrap_or_default(),
        };
        let config = Config::new(settings);
        if let Some(err) = config.pattern_error() {
            bail!("{err}");
        }
        let (engine, notices) = Engine::new(runner, root, Vec::new());
        Ok(Self {
            engine,
            config,
            notices,
        })
    }

    /// Engine notices are already logged; repeat them on stderr so they show
    /// up even with logging filtered.
    fn flush_notices(&mut self) {
        while let Ok(notice) = self.notices.try_recv() {
            eprintln!("incwise: {}", notice.message);
        }
    }
}

/// Apply guard quick fixes to `path` until none remain. Returns whether the
/// file changed.
async fn apply_guard_fixes<R: ProcessRunner>(
    engine: &Engine<R>,
    config: &Config,
    path: &Path,
) -> Result<bool> {
    let Some(expected) = engine.expected_guard(config, path).await else {
        tracing::info!(path = %path.display(), "Not subject to include guard checks");
        return Ok(false);
    };
    let original = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let options = ScanOptions::new(&config.settings().diagnostics, Some(&expected));
    let selection = TextSpan::at(Position::new(0, 0));

    let mut document = Document::new(path, original.as_str());
    let line_ending = document.line_ending();
    for _ in 0..GUARD_FIX_PASSES {
        let diagnostics = scan(&AnalysisState::default(), &document, &options);
        // Fixes for one pass may touch the same lines; apply one and rescan.
        let Some(edits) = diagnostics.iter().find_map(|diagnostic| {
            match quick_fix(diagnostic, &document, Some(&expected), selection)? {
                QuickFix::ApplyEdits { edits, .. } => Some(edits),
                QuickFix::RunRewriter { .. } => None,
            }
        }) else {
            break;
        };
        document = Document::new(path, document.apply_edits(&edits)).with_line_ending(line_ending);
    }

    if document.text() == original {
        return Ok(false);
    }
    write_atomic(path, document.text().as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), guard = %expected, "Applied include guard fixes");
    Ok(true)
}

/// Replace `path` through a temporary file in the same directory, keeping
/// the original permissions.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let permissions: Option<Permissions> = fs::metadata(path).ok().map(|meta| meta.permissions());

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if let Some(permissions) = permissions {
        fs::set_permissions(tmp.path(), permissions)?;
    }
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
