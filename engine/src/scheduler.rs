//! Per-document lint scheduling.
//!
//! Every open document moves through `Idle -> Debouncing -> Running -> Idle`.
//! Edits arm (or re-arm) a debounce timer; saves and manual requests start a
//! run immediately. At most one run per document is live: starting a run
//! cancels the previous one and bumps a generation counter, and a run that
//! settles after being superseded is dropped without publishing anything.
//!
//! The registry lock is only ever held between suspension points, so the
//! "invalidate old, install new" step of every transition is atomic with
//! respect to other tasks.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tsqlls_types::{LintReason, LintSettings, LintTrigger};
use url::Url;

use crate::documents::{Documents, buffer_lines};
use crate::invoker::{LintInvoker, LintRequest};
use crate::parse::parse_report;
use crate::publisher::DiagnosticPublisher;
use crate::workspace::resolve_working_dir;

/// Warning shown when a run exceeds its timeout.
pub const TIMEOUT_WARNING: &str = "tsqllint: lint timed out.";

/// How a single run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Diagnostics were published; holds how many.
    Published(usize),
    /// The document was not open when the run was requested.
    NotOpen,
    /// The document URI has no filesystem path to lint.
    Unsupported,
    /// A newer run started, or the document was closed, before this one settled.
    Stale,
    /// The invoker reported cancellation.
    Cancelled,
    TimedOut,
    /// The invoker could not run tsqllint. Holds the failure detail.
    Failed(String),
}

impl RunOutcome {
    /// Diagnostics published by this run; zero for anything but `Published`.
    #[must_use]
    pub fn issue_count(&self) -> usize {
        match self {
            RunOutcome::Published(count) => *count,
            _ => 0,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Published(count) => write!(f, "published {count}"),
            RunOutcome::NotOpen => f.write_str("not open"),
            RunOutcome::Unsupported => f.write_str("unsupported uri"),
            RunOutcome::Stale => f.write_str("stale"),
            RunOutcome::Cancelled => f.write_str("cancelled"),
            RunOutcome::TimedOut => f.write_str("timed out"),
            RunOutcome::Failed(detail) => write!(f, "failed: {detail}"),
        }
    }
}

/// Scheduling state for one document.
#[derive(Debug, Default)]
struct DocumentState {
    debounce: Option<CancellationToken>,
    /// Generation of the most recently started run.
    generation: u64,
    active: Option<CancellationToken>,
    /// Latest trigger not yet consumed by a run.
    pending: Option<LintTrigger>,
}

impl DocumentState {
    fn cancel_debounce(&mut self) {
        if let Some(token) = self.debounce.take() {
            token.cancel();
        }
    }

    fn cancel_active(&mut self) {
        if let Some(token) = self.active.take() {
            token.cancel();
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    documents: HashMap<Url, DocumentState>,
    /// Shared across documents so a reopened document never reuses a number.
    last_generation: u64,
}

impl Registry {
    fn arm_debounce(&mut self, uri: &Url, token: CancellationToken, trigger: LintTrigger) {
        let state = self.documents.entry(uri.clone()).or_default();
        state.cancel_debounce();
        state.debounce = Some(token);
        state.pending = Some(trigger);
    }

    /// Claim a fired debounce timer. `false` if it was cancelled meanwhile.
    fn take_debounce(&mut self, uri: &Url, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return false;
        }
        match self.documents.get_mut(uri) {
            Some(state) => state.debounce.take().is_some(),
            None => false,
        }
    }

    fn begin_run(&mut self, uri: &Url, token: CancellationToken) -> (u64, Option<LintTrigger>) {
        self.last_generation += 1;
        let generation = self.last_generation;
        let state = self.documents.entry(uri.clone()).or_default();
        state.cancel_debounce();
        state.cancel_active();
        state.generation = generation;
        state.active = Some(token);
        (generation, state.pending.take())
    }

    /// Retire a settled run. `false` if it was superseded or its document cleared.
    fn finish_run(&mut self, uri: &Url, generation: u64) -> bool {
        match self.documents.get_mut(uri) {
            Some(state) if state.generation == generation => {
                state.active = None;
                true
            }
            _ => false,
        }
    }

    /// Drop the entry for `uri` unless a timer or run still holds it.
    fn forget_idle(&mut self, uri: &Url) {
        if let Some(state) = self.documents.get(uri)
            && state.debounce.is_none()
            && state.active.is_none()
        {
            self.documents.remove(uri);
        }
    }

    fn clear(&mut self, uri: &Url) -> bool {
        match self.documents.remove(uri) {
            Some(mut state) => {
                state.cancel_debounce();
                state.cancel_active();
                true
            }
            None => false,
        }
    }
}

struct Inner {
    documents: Documents,
    invoker: Arc<dyn LintInvoker>,
    publisher: Arc<dyn DiagnosticPublisher>,
    settings: RwLock<LintSettings>,
    workspace_roots: RwLock<Vec<PathBuf>>,
    registry: Mutex<Registry>,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns per-document lint state and drives runs. Clones share state.
#[derive(Clone)]
pub struct LintScheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for LintScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LintScheduler")
            .field("tracked", &self.inner.registry().documents.len())
            .finish_non_exhaustive()
    }
}

impl LintScheduler {
    #[must_use]
    pub fn new(
        documents: Documents,
        invoker: Arc<dyn LintInvoker>,
        publisher: Arc<dyn DiagnosticPublisher>,
        settings: LintSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                documents,
                invoker,
                publisher,
                settings: RwLock::new(settings),
                workspace_roots: RwLock::new(Vec::new()),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> LintSettings {
        self.inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the settings. Timers and runs already started keep their values.
    pub fn update_settings(&self, settings: LintSettings) {
        tracing::debug!(?settings, "Lint settings updated");
        *self
            .inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn set_workspace_roots(&self, roots: Vec<PathBuf>) {
        *self
            .inner
            .workspace_roots
            .write()
            .unwrap_or_else(PoisonError::into_inner) = roots;
    }

    #[must_use]
    pub fn workspace_roots(&self) -> Vec<PathBuf> {
        self.inner
            .workspace_roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn documents(&self) -> &Documents {
        &self.inner.documents
    }

    /// Latest trigger recorded for `uri` that no run has consumed yet.
    #[must_use]
    pub fn pending_trigger(&self, uri: &Url) -> Option<LintTrigger> {
        self.inner
            .registry()
            .documents
            .get(uri)
            .and_then(|state| state.pending)
    }

    /// Whether any scheduling state exists for `uri`.
    #[must_use]
    pub fn is_tracked(&self, uri: &Url) -> bool {
        self.inner.registry().documents.contains_key(uri)
    }

    /// Request a lint. Edits are debounced; saves and manual requests run now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger_lint(&self, uri: &Url, reason: LintReason, version: Option<i32>) {
        if !self.inner.documents.is_open(uri) {
            tracing::debug!(%uri, %reason, "Ignoring lint trigger: document not open");
            return;
        }
        let trigger = LintTrigger::new(reason, version);

        if !reason.is_debounced() {
            {
                let mut registry = self.inner.registry();
                let state = registry.documents.entry(uri.clone()).or_default();
                state.cancel_debounce();
                state.pending = Some(trigger);
            }
            let scheduler = self.clone();
            let uri = uri.clone();
            tokio::spawn(async move {
                scheduler.run_now(&uri, reason).await;
            });
            return;
        }

        let delay = self.settings().debounce();
        let token = CancellationToken::new();
        self.inner
            .registry()
            .arm_debounce(uri, token.clone(), trigger);
        tracing::trace!(%uri, ?version, delay_ms = delay.as_millis(), "Debounce armed");

        let scheduler = self.clone();
        let uri = uri.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            if !scheduler.inner.registry().take_debounce(&uri, &token) {
                return;
            }
            scheduler.run_now(&uri, reason).await;
        });
    }

    /// Run a lint immediately and return how many diagnostics were published.
    pub async fn run_now(&self, uri: &Url, reason: LintReason) -> usize {
        self.run_now_outcome(uri, reason).await.issue_count()
    }

    /// Like [`run_now`](Self::run_now), reporting how the run ended.
    pub async fn run_now_outcome(&self, uri: &Url, reason: LintReason) -> RunOutcome {
        if let Some(state) = self.inner.registry().documents.get_mut(uri) {
            state.cancel_debounce();
            state.cancel_active();
        }

        let Some(text) = self.inner.documents.text(uri) else {
            tracing::debug!(%uri, "Skipping lint: document not open");
            self.inner.registry().forget_idle(uri);
            return RunOutcome::NotOpen;
        };
        let Ok(file_path) = uri.to_file_path() else {
            tracing::debug!(%uri, "Skipping lint: not a file URI");
            self.inner.registry().forget_idle(uri);
            return RunOutcome::Unsupported;
        };

        let settings = self.settings();
        let working_dir = resolve_working_dir(&file_path, &self.workspace_roots());
        let token = CancellationToken::new();
        let (generation, trigger) = self.inner.registry().begin_run(uri, token.clone());
        tracing::debug!(
            %uri,
            generation,
            %reason,
            version = ?trigger.and_then(|t| t.version()),
            cwd = %working_dir.display(),
            "Starting lint run"
        );

        let request = LintRequest {
            content: text.clone(),
            file_path: file_path.clone(),
            working_dir: working_dir.clone(),
            settings: settings.clone(),
        };
        let invoker = Arc::clone(&self.inner.invoker);
        let run_token = token.clone();
        let mut invocation = tokio::spawn(async move { invoker.run(request, run_token).await });

        let settled = tokio::select! {
            joined = &mut invocation => Some(joined),
            () = tokio::time::sleep(settings.timeout()) => None,
        };
        if settled.is_none() {
            // Ask the invoker to stop; whatever it returns later is never awaited.
            token.cancel();
        }

        if !self.inner.registry().finish_run(uri, generation) {
            tracing::debug!(%uri, generation, "Discarding stale lint result");
            return RunOutcome::Stale;
        }

        let result = match settled {
            None => return self.timed_out(uri, &settings),
            Some(Err(join_error)) => return self.failed(uri, join_error.to_string()),
            Some(Ok(Err(invoke_error))) => return self.failed(uri, invoke_error.to_string()),
            Some(Ok(Ok(result))) => result,
        };
        if result.timed_out {
            return self.timed_out(uri, &settings);
        }
        if result.cancelled || token.is_cancelled() {
            tracing::debug!(%uri, generation, "Lint run cancelled");
            return RunOutcome::Cancelled;
        }

        let stderr = result.stderr.trim();
        if !stderr.is_empty() {
            tracing::warn!(%uri, "tsqllint stderr: {stderr}");
            self.inner
                .publisher
                .log_warning(&format!("tsqllint stderr: {stderr}"));
        }

        let current = self.inner.documents.text(uri).unwrap_or(text);
        let lines = buffer_lines(&current);
        let diagnostics = parse_report(&result.stdout, &file_path, &working_dir, &lines);
        let count = diagnostics.len();
        tracing::debug!(%uri, generation, count, exit_code = ?result.exit_code, "Lint run complete");
        self.inner.publisher.publish(uri, diagnostics);
        RunOutcome::Published(count)
    }

    /// Drop all pending work for `uri` and clear its diagnostics.
    pub fn cancel_and_clear(&self, uri: &Url) {
        if self.inner.registry().clear(uri) {
            tracing::debug!(%uri, "Cancelled pending lint work");
        }
        self.inner.publisher.publish(uri, Vec::new());
    }

    /// [`cancel_and_clear`](Self::cancel_and_clear) for several documents.
    pub fn cancel_and_clear_all<'a>(&self, uris: impl IntoIterator<Item = &'a Url>) {
        for uri in uris {
            self.cancel_and_clear(uri);
        }
    }

    /// Cancel every timer and run without publishing.
    pub fn shutdown(&self) {
        let mut registry = self.inner.registry();
        for state in registry.documents.values_mut() {
            state.cancel_debounce();
            state.cancel_active();
        }
        registry.documents.clear();
    }

    fn timed_out(&self, uri: &Url, settings: &LintSettings) -> RunOutcome {
        tracing::warn!(
            %uri,
            timeout_ms = settings.timeout().as_millis(),
            "Lint run timed out"
        );
        self.inner.publisher.publish(uri, Vec::new());
        self.inner.publisher.show_warning(TIMEOUT_WARNING);
        RunOutcome::TimedOut
    }

    fn failed(&self, uri: &Url, detail: String) -> RunOutcome {
        tracing::warn!(%uri, "Lint run failed: {detail}");
        self.inner.publisher.publish(uri, Vec::new());
        self.inner
            .publisher
            .show_warning(&format!("tsqllint: failed to run ({detail})"));
        RunOutcome::Failed(detail)
    }
}
