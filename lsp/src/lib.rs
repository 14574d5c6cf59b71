//! Language-server transport for tsqllint-ls.
//!
//! Speaks LSP over any async byte stream: [`codec`] handles framing,
//! [`protocol`] the message shapes, and [`serve`] runs the event loop that
//! feeds the lint scheduler.

pub mod codec;
pub mod protocol;

mod server;

pub use protocol::{CLEAR_DIAGNOSTICS, LINT_DOCUMENT, LintDocumentResult};
pub use server::{serve, serve_stdio};
