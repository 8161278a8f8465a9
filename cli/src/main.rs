//! incwise CLI - language server and batch entry points.
//!
//! `serve` speaks LSP on stdin/stdout, so logs always go to stderr.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// include-what-you-use diagnostics and fixes.
#[derive(Parser, Debug)]
#[command(name = "incwise", version, about)]
struct Cli {
    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Settings file to use instead of `<root>/.incwise.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug-level logging unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the language server on stdin/stdout.
    Serve,
    /// Print diagnostics for files on disk.
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Run the rewriter for one file.
    Fix {
        file: PathBuf,
        /// Also apply include guard fixes to the file.
        #[arg(long)]
        guards: bool,
    },
    /// Run the rewriter for every file in the compilation database.
    FixAll,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Serve => commands::serve(cli.root, cli.config).await,
        Command::Check { files } => commands::check(cli.root, cli.config.as_deref(), &files).await,
        Command::Fix { file, guards } => {
            commands::fix(cli.root, cli.config.as_deref(), &file, guards).await
        }
        Command::FixAll => commands::fix_all(cli.root, cli.config.as_deref()).await,
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("incwise: {err:#}");
            ExitCode::FAILURE
        }
    }
}
