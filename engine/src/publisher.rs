//! Where lint results go.
//!
//! The scheduler reports through [`DiagnosticPublisher`]; the LSP transport
//! implements it by sending notifications to the editor. [`DiagnosticsStore`]
//! keeps the last published set per document for status queries.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tsqlls_types::{DiagnosticsSnapshot, LintDiagnostic};
use url::Url;

/// Sink for lint results and user-facing warnings.
pub trait DiagnosticPublisher: Send + Sync {
    /// Replace the diagnostics shown for `uri`. Empty clears them.
    fn publish(&self, uri: &Url, diagnostics: Vec<LintDiagnostic>);

    /// Non-modal warning shown to the user.
    fn show_warning(&self, message: &str);

    /// Warning written to the editor's output log only.
    fn log_warning(&self, message: &str);
}

/// Last published diagnostics per document.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsStore {
    data: HashMap<Url, Vec<LintDiagnostic>>,
}

impl DiagnosticsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, uri: Url, items: Vec<LintDiagnostic>) {
        if items.is_empty() {
            self.data.remove(&uri);
        } else {
            self.data.insert(uri, items);
        }
    }

    #[must_use]
    pub fn get(&self, uri: &Url) -> Option<&[LintDiagnostic]> {
        self.data.get(uri).map(Vec::as_slice)
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut documents: Vec<(String, Vec<LintDiagnostic>)> = self
            .data
            .iter()
            .map(|(uri, items)| (uri.to_string(), items.clone()))
            .collect();

        // Documents with errors first, then by URI.
        documents.sort_by(|a, b| {
            let a_has_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_has_errors = b.1.iter().any(|d| d.severity().is_error());
            b_has_errors.cmp(&a_has_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(documents)
    }
}

/// Publisher that records everything it receives, for tests.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    state: Mutex<Recorded>,
}

#[derive(Debug, Default, Clone)]
pub struct Recorded {
    /// Every publish call, in order.
    pub published: Vec<(Url, Vec<LintDiagnostic>)>,
    pub warnings: Vec<String>,
    pub logged: Vec<String>,
    /// What the editor is currently showing.
    pub store: DiagnosticsStore,
}

impl RecordingPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn recorded(&self) -> Recorded {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of publish calls for `uri`.
    #[must_use]
    pub fn publish_count(&self, uri: &Url) -> usize {
        self.recorded()
            .published
            .iter()
            .filter(|(u, _)| u == uri)
            .count()
    }

    /// Most recent publish for `uri`.
    #[must_use]
    pub fn last_published(&self, uri: &Url) -> Option<Vec<LintDiagnostic>> {
        self.recorded()
            .published
            .iter()
            .rev()
            .find(|(u, _)| u == uri)
            .map(|(_, items)| items.clone())
    }
}

impl DiagnosticPublisher for RecordingPublisher {
    fn publish(&self, uri: &Url, diagnostics: Vec<LintDiagnostic>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.store.update(uri.clone(), diagnostics.clone());
        state.published.push((uri.clone(), diagnostics));
    }

    fn show_warning(&self, message: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.warnings.push(message.to_string());
    }

    fn log_warning(&self, message: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.logged.push(message.to_string());
    }
}
