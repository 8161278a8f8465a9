//! End-to-end engine flows against a scripted process runner:
//! analyze → scan → quick fix → rescan, throttling, single-flight and
//! failure handling.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use incwise_analysis::{
    Engine, Freshness, Invocation, ProcessError, ProcessOutput, ProcessRunner, QuickFix, RunFut,
};
use incwise_config::{Config, Settings};
use incwise_types::{DiagnosticKind, Document, Position, TextSpan};
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

/// What the scripted analyzer answers with.
#[derive(Clone)]
enum Reply {
    Report(String),
    Fail,
}

#[derive(Clone, Default)]
struct Script {
    calls: Arc<Mutex<Vec<Invocation>>>,
    reply: Arc<Mutex<Option<Reply>>>,
    analyzer_runs: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
    started: Arc<Notify>,
}

impl Script {
    fn replying(report: &str) -> Self {
        let script = Self::default();
        script.set_reply(Reply::Report(report.to_string()));
        script
    }

    fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = Some(reply);
    }

    fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    fn analyzer_runs(&self) -> usize {
        self.analyzer_runs.load(Ordering::SeqCst)
    }
}

impl ProcessRunner for Script {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunFut<'a> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(invocation.clone());
            if invocation.stdin.is_some() {
                return Ok(ProcessOutput {
                    status: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }

            self.analyzer_runs.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            let reply = self.reply.lock().unwrap().clone();
            match reply {
                Some(Reply::Report(stdout)) => Ok(ProcessOutput {
                    status: Some(1),
                    stdout,
                    stderr: String::new(),
                }),
                Some(Reply::Fail) | None => Err(ProcessError::Spawn {
                    program: invocation.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no analyzer"),
                }),
            }
        })
    }
}

fn workspace(files: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("build")).unwrap();
    let entries: Vec<String> = files
        .iter()
        .map(|f| {
            format!(
                r#"{{"directory": "{}", "file": "../{f}", "command": "c++ -Iinclude -c ../{f}"}}"#,
                dir.path().join("build").display()
            )
        })
        .collect();
    fs::write(
        dir.path().join("build/compile_commands.json"),
        format!("[{}]", entries.join(",")),
    )
    .unwrap();
    dir
}

fn config(edit: impl FnOnce(&mut Settings)) -> Config {
    let mut settings = Settings::default();
    edit(&mut settings);
    Config::new(settings)
}

fn removal_report(tokens: &[&str]) -> String {
    let mut report = String::from("../a.cc should add these lines:\n\n../a.cc should remove these lines:\n");
    for token in tokens {
        report.push_str(&format!("- #include {token}  // lines 1-1\n"));
    }
    report.push_str("\nThe full include-list for ../a.cc:\n#include <vector>\n---\n");
    report
}

async fn engine_for(dir: &TempDir, script: Script, config: &Config) -> Engine<Script> {
    let (engine, _notices) = Engine::new(script, dir.path(), vec![dir.path().to_path_buf()]);
    assert!(engine.refresh_index(config, None).await);
    engine
}

fn path_in(dir: &TempDir, file: &str) -> PathBuf {
    dir.path().join(file)
}

#[tokio::test]
async fn blank_lines_do_not_count_against_window() {
    let dir = workspace(&["a.cc"]);
    let config = config(|s| s.diagnostics.scan_min = 3);
    let engine = engine_for(&dir, Script::replying(&removal_report(&["\"a.h\""])), &config).await;

    let document = Document::new(path_in(&dir, "a.cc"), "\n\n\n\n\n#include \"a.h\"\n");
    let diagnostics = engine.diagnose(&config, &document, Freshness::Reuse).await.unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind(), DiagnosticKind::UnusedInclude);
    assert_eq!(diagnostics[0].line(), 5);
}

#[tokio::test]
async fn analyzer_invoked_with_entry_arguments() {
    let dir = workspace(&["a.cc"]);
    let config = config(|_| {});
    let script = Script::replying(&removal_report(&[]));
    let engine = engine_for(&dir, script.clone(), &config).await;

    engine
        .ensure_analysis(&config, Path::new("a.cc"), Freshness::Reuse)
        .await
        .unwrap();
    let calls = script.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "include-what-you-use");
    assert_eq!(
        calls[0].args,
        vec!["-Xiwyu", "--max_line_length=80", "-Iinclude", "-c", "../a.cc"]
    );
    assert_eq!(calls[0].cwd, dir.path().join("build"));
}

#[tokio::test]
async fn missing_guard_then_quick_fix_round_trip() {
    let dir = workspace(&["a.cc"]);
    let config = config(|s| s.diagnostics.include_guard = "${FILE}_".to_string());
    let engine = engine_for(&dir, Script::replying(""), &config).await;

    let document = Document::new(path_in(&dir, "foo.h"), "int f();\nint g();\n");
    let diagnostics = engine.diagnose(&config, &document, Freshness::Reuse).await.unwrap();
    let found: Vec<_> = diagnostics.iter().map(|d| (d.kind(), d.line())).collect();
    assert_eq!(
        found,
        vec![
            (DiagnosticKind::GuardMissingIfndef, 0),
            (DiagnosticKind::GuardMissingEndif, 1)
        ]
    );

    let fixes = engine
        .quick_fixes(
            &config,
            &document,
            &diagnostics[..1],
            TextSpan::at(Position::new(0, 0)),
        )
        .await;
    let [QuickFix::ApplyEdits { edits, .. }] = fixes.as_slice() else {
        panic!("expected one edit fix, got {fixes:?}");
    };
    let fixed = Document::new(document.path(), document.apply_edits(edits));
    assert!(fixed.text().starts_with("#ifndef FOO_H_\n#define FOO_H_\n"));
    assert!(engine.diagnose(&config, &fixed, Freshness::Reuse).await.unwrap().is_empty());
}

#[tokio::test]
async fn pragma_once_header_has_no_guard_diagnostics() {
    let dir = workspace(&[]);
    let config = config(|s| s.diagnostics.include_guard = "${FILE}_".to_string());
    let engine = engine_for(&dir, Script::default(), &config).await;

    let document = Document::new(path_in(&dir, "foo.h"), "// header\n#pragma once\nint f();\n");
    assert!(engine.diagnose(&config, &document, Freshness::Reuse).await.unwrap().is_empty());
}

#[tokio::test]
async fn throttle_reuses_report_until_forced() {
    let dir = workspace(&["a.cc"]);
    let config = config(|s| s.diagnostics.interval_secs = 3600.0);
    let script = Script::replying(&removal_report(&["<map>"]));
    let engine = engine_for(&dir, script.clone(), &config).await;
    let document = Document::new(path_in(&dir, "a.cc"), "#include <map>\n");

    engine.diagnose(&config, &document, Freshness::Reuse).await.unwrap();
    engine.diagnose(&config, &document, Freshness::Reuse).await.unwrap();
    assert_eq!(script.analyzer_runs(), 1);

    engine
        .ensure_analysis(&config, document.path(), Freshness::Force)
        .await
        .unwrap();
    assert_eq!(script.analyzer_runs(), 2);

    let eager = self::config(|s| s.diagnostics.interval_secs = 0.0);
    engine.diagnose(&eager, &document, Freshness::Reuse).await.unwrap();
    assert_eq!(script.analyzer_runs(), 3);
}

#[tokio::test]
async fn concurrent_requests_share_one_analyzer_run() {
    let dir = workspace(&["a.cc"]);
    let config = config(|_| {});
    let gate = Arc::new(Semaphore::new(0));
    let script = Script {
        gate: Some(Arc::clone(&gate)),
        ..Script::replying(&removal_report(&["<map>"]))
    };
    let engine = engine_for(&dir, script.clone(), &config).await;
    let path = path_in(&dir, "a.cc");

    let release = async {
        script.started.notified().await;
        gate.add_permits(8);
    };
    let (first, second, ()) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(
            engine.ensure_analysis(&config, &path, Freshness::Force),
            engine.ensure_analysis(&config, &path, Freshness::Force),
            release,
        )
    })
    .await
    .unwrap();

    assert_eq!(script.analyzer_runs(), 1);
    assert_eq!(first.unwrap().state().await.to_remove().len(), 1);
    assert_eq!(second.unwrap().state().await.to_remove().len(), 1);
}

#[tokio::test]
async fn failed_run_keeps_previous_state() {
    let dir = workspace(&["a.cc"]);
    let config = config(|s| s.diagnostics.interval_secs = 0.0);
    let script = Script::replying(&removal_report(&["<map>"]));
    let engine = engine_for(&dir, script.clone(), &config).await;
    let document = Document::new(path_in(&dir, "a.cc"), "#include <map>\n");

    let analysis = engine
        .ensure_analysis(&config, document.path(), Freshness::Reuse)
        .await
        .unwrap();
    assert_eq!(engine.diagnose(&config, &document, Freshness::Reuse).await.unwrap().len(), 1);

    script.set_reply(Reply::Fail);
    assert!(engine.diagnose(&config, &document, Freshness::Reuse).await.is_none());
    assert_eq!(analysis.state().await.to_remove().len(), 1);

    script.set_reply(Reply::Report(removal_report(&[])));
    assert!(engine.diagnose(&config, &document, Freshness::Reuse).await.unwrap().is_empty());
}

#[tokio::test]
async fn diagnostics_only_pattern_skips_file() {
    let dir = workspace(&["a.cc", "b.cc"]);
    let config = config(|s| s.diagnostics.only_re = "a\\.cc$".to_string());
    let script = Script::replying(&removal_report(&[]));
    let engine = engine_for(&dir, script.clone(), &config).await;

    let document = Document::new(path_in(&dir, "b.cc"), "int x;\n");
    assert!(engine.diagnose(&config, &document, Freshness::Reuse).await.is_none());
    assert_eq!(script.analyzer_runs(), 0);
}

#[tokio::test]
async fn fix_file_feeds_report_to_rewriter() {
    let dir = workspace(&["a.cc"]);
    let config = config(|_| {});
    let report = removal_report(&["<map>"]);
    let script = Script::replying(&report);
    let engine = engine_for(&dir, script.clone(), &config).await;

    engine.fix_file(&config, &path_in(&dir, "a.cc")).await.unwrap();
    let calls = script.calls();
    assert_eq!(calls.len(), 2);
    let rewriter = &calls[1];
    assert_eq!(rewriter.program, "fix_includes.py");
    assert_eq!(rewriter.stdin.as_deref(), Some(report.as_str()));
    assert_eq!(rewriter.cwd, dir.path().join("build"));
    assert_eq!(
        rewriter.args.last().map(String::as_str),
        Some(path_in(&dir, "a.cc").to_str().unwrap())
    );
}

#[tokio::test]
async fn fix_file_outside_database_fails() {
    let dir = workspace(&["a.cc"]);
    let config = config(|_| {});
    let engine = engine_for(&dir, Script::replying(""), &config).await;
    assert!(engine.fix_file(&config, Path::new("zzz.cc")).await.is_err());
}

#[tokio::test]
async fn fix_all_counts_and_skips_filtered() {
    let dir = workspace(&["a.cc", "b.cc", "vendor/c.cc"]);
    let config = config(|s| s.rewriter.ignore_re = "vendor".to_string());
    let script = Script::replying(&removal_report(&[]));
    let engine = engine_for(&dir, script.clone(), &config).await;

    let summary = engine.fix_all(&config).await;
    // vendor/c.cc fails the ignore pattern.
    assert_eq!(summary.fixed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn index_rebuilt_when_database_path_changes() {
    let dir = workspace(&["a.cc"]);
    let config = config(|_| {});
    let engine = engine_for(&dir, Script::replying(""), &config).await;
    assert!(engine.resolve(&config, Path::new("a.cc")).await.is_some());

    fs::write(
        dir.path().join("other.json"),
        r#"[{"file": "b.cc", "arguments": ["c++", "-c", "b.cc"]}]"#,
    )
    .unwrap();
    let moved = self::config(|s| s.compile_commands = "${workspaceFolder}/other.json".to_string());
    assert!(engine.refresh_index(&moved, None).await);
    assert!(engine.resolve(&moved, Path::new("a.cc")).await.is_none());
    assert!(engine.resolve(&moved, Path::new("b.cc")).await.is_some());
}

#[tokio::test]
async fn scan_waits_for_run_in_flight() {
    let dir = workspace(&["a.cc"]);
    let config = config(|_| {});
    let gate = Arc::new(Semaphore::new(1));
    let script = Script {
        gate: Some(Arc::clone(&gate)),
        ..Script::replying(&removal_report(&[]))
    };
    let engine = engine_for(&dir, script.clone(), &config).await;
    let document = Document::new(path_in(&dir, "a.cc"), "#include <map>\n");

    let analysis = engine
        .ensure_analysis(&config, document.path(), Freshness::Force)
        .await
        .unwrap();
    assert!(engine.scan(&config, &analysis, &document).await.is_empty());

    // Close the gate; the next run reports <map> once released.
    gate.acquire().await.unwrap().forget();
    script.set_reply(Reply::Report(removal_report(&["<map>"])));
    let (rerun, diagnostics) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(
            engine.ensure_analysis(&config, document.path(), Freshness::Force),
            async {
                script.started.notified().await;
                let (diagnostics, ()) = tokio::join!(
                    engine.scan(&config, &analysis, &document),
                    async { gate.add_permits(1) },
                );
                diagnostics
            },
        )
    })
    .await
    .unwrap();

    assert!(rerun.is_some());
    assert_eq!(script.analyzer_runs(), 2);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind(), DiagnosticKind::UnusedInclude);
}

#[tokio::test]
async fn index_rebuild_keeps_run_in_flight() {
    let dir = workspace(&["a.cc", "b.cc"]);
    let config = config(|_| {});
    let gate = Arc::new(Semaphore::new(0));
    let script = Script {
        gate: Some(Arc::clone(&gate)),
        ..Script::replying(&removal_report(&["<map>"]))
    };
    let engine = engine_for(&dir, script.clone(), &config).await;
    let path = path_in(&dir, "a.cc");
    let refiltered = self::config(|s| s.rewriter.ignore_re = "b\\.cc$".to_string());

    let (first, second) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(
            engine.ensure_analysis(&config, &path, Freshness::Force),
            async {
                script.started.notified().await;
                assert!(engine.refresh_index(&refiltered, None).await);
                let (second, ()) = tokio::join!(
                    engine.ensure_analysis(&refiltered, &path, Freshness::Force),
                    async { gate.add_permits(8) },
                );
                second
            },
        )
    })
    .await
    .unwrap();

    assert_eq!(script.analyzer_runs(), 1);
    assert_eq!(first.unwrap().state().await.to_remove().len(), 1);
    assert_eq!(second.unwrap().state().await.to_remove().len(), 1);
    assert!(engine.resolve(&refiltered, &path_in(&dir, "b.cc")).await.is_none());
}
