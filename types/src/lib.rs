//! Core domain types for the tsqllint language server.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the server.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod diagnostic;
mod settings;

pub use diagnostic::{
    DIAGNOSTIC_SOURCE, DiagnosticSeverity, DiagnosticsSnapshot, LintDiagnostic, Position, Range,
};
pub use settings::{LintSettings, LintSettingsBuilder, SettingsError};

use serde::{Deserialize, Serialize};

// ============================================================================
// Lint triggers
// ============================================================================

/// Why a lint run was requested.
///
/// `OnEdit` is debounced; `OnSave` and `Manual` run immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LintReason {
    OnEdit,
    OnSave,
    Manual,
}

impl LintReason {
    /// Whether a trigger with this reason waits for the debounce timer.
    #[must_use]
    pub const fn is_debounced(self) -> bool {
        matches!(self, Self::OnEdit)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OnEdit => "edit",
            Self::OnSave => "save",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for LintReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to lint one document, produced by an editor event.
///
/// Transient: the scheduler records the most recent one per document and acts
/// on it immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LintTrigger {
    reason: LintReason,
    /// Document version the event carried, if the event had one.
    version: Option<i32>,
}

impl LintTrigger {
    #[must_use]
    pub const fn new(reason: LintReason, version: Option<i32>) -> Self {
        Self { reason, version }
    }

    #[must_use]
    pub const fn reason(&self) -> LintReason {
        self.reason
    }

    #[must_use]
    pub const fn version(&self) -> Option<i32> {
        self.version
    }
}
