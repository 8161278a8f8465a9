//! Core domain types for incwise.
//!
//! Pure types with no IO and no async: diagnostics produced by the scanner,
//! text positions and edits produced by the quick-fix synthesizer, and the
//! live document model both of them operate on.

mod diagnostic;
mod text;

pub use diagnostic::{Diagnostic, DiagnosticKind, DiagnosticSeverity, LineRange, RelatedLocation};
pub use text::{Document, LineEnding, Position, TextEdit, TextSpan, utf16_len};
