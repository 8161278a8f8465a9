//! External analyzer and rewriter invocation.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use incwise_config::{AnalyzerSettings, RewriterSettings};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::compdb::CompileEntry;
use crate::error::ProcessError;
use crate::tokenize::tokenize;

/// A fully assembled external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub stdin: Option<String>,
}

impl Invocation {
    /// Analyzer command for `entry`: configured flags, extra parameters, then
    /// the entry's compiler arguments without the compiler itself.
    #[must_use]
    pub fn analyzer(settings: &AnalyzerSettings, entry: &CompileEntry) -> Self {
        let mut args = Vec::new();
        let mut iwyu = |flag: String| {
            args.push("-Xiwyu".to_string());
            args.push(flag);
        };
        iwyu(format!("--max_line_length={}", settings.max_line_length));
        for glob in &settings.keep {
            iwyu(format!("--keep={glob}"));
        }
        if settings.transitive_includes_only {
            iwyu("--transitive_includes_only".to_string());
        }
        if settings.no_forward_declarations {
            iwyu("--no_fwd_decls".to_string());
        }
        if settings.no_default_mappings {
            iwyu("--no_default_mappings".to_string());
        }
        if !settings.mapping_file.is_empty() {
            iwyu(format!("--mapping_file={}", settings.mapping_file));
        }
        args.extend(tokenize(&settings.additional_params));
        args.extend(entry.compiler_args().iter().cloned());

        Self {
            program: settings.path.clone(),
            args,
            cwd: entry.directory().to_path_buf(),
            stdin: None,
        }
    }

    /// Rewriter command for `entry`, fed `report` on stdin.
    #[must_use]
    pub fn rewriter(settings: &RewriterSettings, entry: &CompileEntry, report: &str) -> Self {
        let (program, mut args) = if settings.python.is_empty() {
            (settings.path.clone(), Vec::new())
        } else {
            (settings.python.clone(), vec![settings.path.clone()])
        };

        let toggle = |on: bool, name: &str| {
            if on {
                format!("--{name}")
            } else {
                format!("--no{name}")
            }
        };
        args.push(toggle(settings.comments, "comments"));
        if settings.dry_run {
            args.push("--dry_run".to_string());
        }
        if !settings.ignore_re.is_empty() {
            args.push(format!("--ignore_re={}", settings.ignore_re));
        }
        if !settings.only_re.is_empty() {
            args.push(format!("--only_re={}", settings.only_re));
        }
        args.push(toggle(settings.reorder, "reorder"));
        args.push(toggle(settings.safe_headers, "safe_headers"));
        if settings.update_comments {
            args.push("--update_comments".to_string());
        }
        if settings.only_current_file {
            args.push(entry.file().display().to_string());
        }

        Self {
            program,
            args,
            cwd: entry.directory().to_path_buf(),
            stdin: Some(report.to_string()),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout followed by stderr.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !out.is_empty() && !out.ends_with('\n') && !self.stderr.is_empty() {
            out.push('\n');
        }
        out.push_str(&self.stderr);
        out
    }

    /// Convert a non-zero exit into [`ProcessError::Exit`].
    pub fn check(self, program: &str) -> Result<Self, ProcessError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProcessError::Exit {
                program: program.to_string(),
                code: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

pub type RunFut<'a> =
    Pin<Box<dyn Future<Output = Result<ProcessOutput, ProcessError>> + Send + 'a>>;

/// Runs external commands. Tests substitute a scripted implementation.
pub trait ProcessRunner: Send + Sync {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunFut<'a>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunFut<'a> {
        Box::pin(run_system(invocation))
    }
}

fn resolve_program(program: &str, cwd: &Path) -> PathBuf {
    which::which(program)
        .or_else(|_| which::which_in(program, None::<&str>, cwd))
        .unwrap_or_else(|_| PathBuf::from(program))
}

async fn run_system(invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
    let program = resolve_program(&invocation.program, &invocation.cwd);
    tracing::debug!(cwd = %invocation.cwd.display(), "Running {invocation}");

    let mut child = Command::new(&program)
        .args(&invocation.args)
        .current_dir(&invocation.cwd)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

    let writer = match (invocation.stdin.clone(), child.stdin.take()) {
        (Some(input), Some(mut stdin)) => Some(tokio::spawn(async move {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await
        })),
        _ => None,
    };

    let output = child
        .wait_with_output()
        .await
        .map_err(|source| ProcessError::Wait {
            program: invocation.program.clone(),
            source,
        })?;

    if let Some(writer) = writer {
        let written = writer.await.unwrap_or_else(|err| Err(io::Error::other(err)));
        match written {
            Ok(()) => {}
            // The process may legitimately exit without draining its input.
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!("`{}` closed stdin early", invocation.program);
            }
            Err(source) => {
                return Err(ProcessError::Stdin {
                    program: invocation.program.clone(),
                    source,
                });
            }
        }
    }

    Ok(ProcessOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
