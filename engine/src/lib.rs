//! Lint engine for tsqllint-ls.
//!
//! Owns everything between an editor event and a published diagnostic set:
//! the open-document store, per-document scheduling, tsqllint invocation and
//! report parsing. The LSP transport lives in `tsqlls-lsp` and talks to this
//! crate through [`LintScheduler`] and the [`DiagnosticPublisher`] trait.

pub mod documents;
pub mod invoker;
pub mod parse;
pub mod publisher;
pub mod scheduler;
pub mod workspace;

pub use documents::{Documents, OpenDocument, TextChange};
pub use invoker::{
    DEFAULT_COMMAND, InvokeError, LintFut, LintInvoker, LintRequest, LintRunResult,
    TsqllintInvoker,
};
pub use parse::{ReportEntry, parse_line, parse_report};
pub use publisher::{DiagnosticPublisher, DiagnosticsStore, RecordingPublisher};
pub use scheduler::{LintScheduler, RunOutcome, TIMEOUT_WARNING};
