//! Include analysis engine: compilation database index, analyzer report
//! model, invocation controller, diagnostics scanner, include-guard checks
//! and quick fixes.

mod cache;
mod compdb;
mod controller;
mod error;
mod guard;
mod notice;
mod paths;
mod process;
mod quickfix;
mod report;
mod scanner;
mod tokenize;

pub use cache::{AnalysisSlot, Freshness, InFlight};
pub use compdb::{CompileEntry, CompileIndex, locate_database};
pub use controller::{Analysis, Engine, FixSummary};
pub use error::{CompileDbError, EngineError, ProcessError};
pub use guard::{ENDIF_SEARCH_LINES, GuardChecker, GuardState, expected_guard};
pub use notice::{Notice, Notices};
pub use paths::{absolutize, containing_folder, normalize_path, relative_to};
pub use process::{Invocation, ProcessOutput, ProcessRunner, RunFut, SystemRunner};
pub use quickfix::{QuickFix, quick_fix};
pub use report::{AnalysisState, IncludeRef, ParseOptions, has_report_markers};
pub use scanner::{ScanOptions, scan};
pub use tokenize::tokenize;
