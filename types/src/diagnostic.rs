//! Diagnostics produced from tsqllint reports.
//!
//! These mirror the LSP wire shapes closely enough that the transport can
//! serialize them directly into `textDocument/publishDiagnostics`.

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Fixed `source` attached to every diagnostic.
pub const DIAGNOSTIC_SOURCE: &str = "tsqllint";

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
}

impl DiagnosticSeverity {
    /// Map a tsqllint severity word.
    ///
    /// Case-insensitive. Anything other than `error` or `warning` is
    /// `Information`, including words the tool may add later.
    #[must_use]
    pub fn from_report(word: &str) -> Self {
        if word.eq_ignore_ascii_case("error") {
            Self::Error
        } else if word.eq_ignore_ascii_case("warning") {
            Self::Warning
        } else {
            Self::Information
        }
    }

    /// LSP numeric severity (1=Error, 2=Warning, 3=Information).
    #[must_use]
    pub const fn as_lsp(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

impl Serialize for DiagnosticSeverity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_lsp())
    }
}

/// Zero-based buffer coordinate. `character` counts UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// A single finding positioned in a document buffer.
///
/// Fields are private; the output parser is the only producer outside tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintDiagnostic {
    range: Range,
    severity: DiagnosticSeverity,
    /// Rule name exactly as the tool printed it.
    code: String,
    source: &'static str,
    message: String,
}

impl LintDiagnostic {
    #[must_use]
    pub fn new(severity: DiagnosticSeverity, range: Range, code: String, message: String) -> Self {
        Self {
            range,
            severity,
            code,
            source: DIAGNOSTIC_SOURCE,
            message,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn source(&self) -> &str {
        self.source
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Immutable view of the last published diagnostics for every document.
///
/// Counts are computed from `documents`, never cached.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Per-document diagnostics, sorted with error-containing documents first.
    documents: Vec<(String, Vec<LintDiagnostic>)>,
}

impl DiagnosticsSnapshot {
    #[must_use]
    pub fn new(documents: Vec<(String, Vec<LintDiagnostic>)>) -> Self {
        Self { documents }
    }

    #[must_use]
    pub fn documents(&self) -> &[(String, Vec<LintDiagnostic>)] {
        &self.documents
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn count_by_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.documents
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == severity)
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Warning)
    }

    /// Compact status string like "E:3 W:5".
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}
