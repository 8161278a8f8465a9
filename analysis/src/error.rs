use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to locate or load a compilation database.
#[derive(Debug, Error)]
pub enum CompileDbError {
    #[error("compilation database not found (tried: {})", display_paths(.tried))]
    NotFound { tried: Vec<PathBuf> },
    #[error("failed to read compilation database {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse compilation database {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure running an external analyzer or rewriter process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed writing stdin of `{program}`: {source}")]
    Stdin {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with {}: {stderr}", exit_label(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

#[allow(clippy::ref_option)]
fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
}

/// Failure of an engine command (fix / fix-all).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{} is not in the compilation database or is filtered out", .0.display())]
    NotResolved(PathBuf),
    #[error("{} is excluded from diagnostics by diagnostics.only_re", .0.display())]
    Excluded(PathBuf),
    #[error("no analyzer report available for {}", .0.display())]
    NoReport(PathBuf),
    #[error(transparent)]
    Process(#[from] ProcessError),
}
