//! Server main loop: reads client frames, maps editor events onto the lint
//! scheduler, and writes replies and notifications back.
//!
//! Frame handling never awaits. Anything that has to wait (manual lint runs,
//! settings refreshes that round-trip to the client) runs in its own task so
//! the read loop keeps routing the client's responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tsqlls_config::{HOST_SECTION, ServerConfig, resolve_settings};
use tsqlls_engine::{
    DiagnosticPublisher, DiagnosticsStore, Documents, LintInvoker, LintScheduler, TextChange,
};
use tsqlls_types::{DiagnosticsSnapshot, LintDiagnostic, LintReason};
use url::Url;

use crate::codec::{FrameReader, FrameWriter, Incoming};
use crate::protocol::{
    self, CLEAR_DIAGNOSTICS, ClearDiagnosticsParams, DeleteFilesParams,
    DidChangeConfigurationParams, DidChangeTextDocumentParams, DidOpenTextDocumentParams,
    DocumentParams, InitializeParams, LINT_DOCUMENT, LintDocumentParams, LintDocumentResult,
    MessageParams, MessageType, Notification, PublishDiagnosticsParams, RenameFilesParams,
    Request, Response, error_codes,
};

/// How long a server-to-client request waits for its reply.
const CLIENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

enum WriterCommand {
    Send(Value),
    Shutdown,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Outgoing side of the connection. Clones share the writer and the pending
/// request table.
#[derive(Clone)]
pub(crate) struct Client {
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
}

impl Client {
    fn new(writer_tx: mpsc::UnboundedSender<WriterCommand>) -> Self {
        Self {
            writer_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, message: &impl Serialize) {
        let frame = match serde_json::to_value(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Failed to serialize outgoing message: {e}");
                return;
            }
        };
        if self.writer_tx.send(WriterCommand::Send(frame)).is_err() {
            tracing::debug!("Writer closed; dropping outgoing message");
        }
    }

    pub fn notify(&self, method: &str, params: &impl Serialize) {
        match serde_json::to_value(params) {
            Ok(params) => self.send(&Notification::new(method, params)),
            Err(e) => tracing::warn!("Failed to serialize {method} params: {e}"),
        }
    }

    fn respond(&self, response: &Response) {
        self.send(response);
    }

    /// Send a request to the client and wait for its `result`.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame =
            serde_json::to_value(Request::new(id, method, params)).context("serializing request")?;

        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);
        if self.writer_tx.send(WriterCommand::Send(frame)).is_err() {
            self.pending().remove(&id);
            bail!("writer channel closed");
        }

        let body = match tokio::time::timeout(CLIENT_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(body)) => body,
            Ok(Err(_)) => {
                self.pending().remove(&id);
                bail!("response channel dropped");
            }
            Err(_) => {
                self.pending().remove(&id);
                bail!("{method} timed out");
            }
        };

        if let Some(error) = body.get("error") {
            bail!(
                "{method} failed: {}",
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
            );
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Route a client reply to the task waiting on it.
    fn complete(&self, id: u64, body: Value) {
        let waiter = self.pending().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(body);
            }
            None => tracing::debug!(id, "Reply for unknown request"),
        }
    }

    fn close(&self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
    }
}

/// Sends lint results to the editor and remembers what it sent.
pub(crate) struct ClientPublisher {
    client: Client,
    store: Mutex<DiagnosticsStore>,
}

impl ClientPublisher {
    fn new(client: Client) -> Self {
        Self {
            client,
            store: Mutex::new(DiagnosticsStore::new()),
        }
    }

    fn store(&self) -> MutexGuard<'_, DiagnosticsStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.store().snapshot()
    }
}

impl DiagnosticPublisher for ClientPublisher {
    fn publish(&self, uri: &Url, diagnostics: Vec<LintDiagnostic>) {
        self.client.notify(
            "textDocument/publishDiagnostics",
            &PublishDiagnosticsParams {
                uri,
                diagnostics: &diagnostics,
            },
        );
        self.store().update(uri.clone(), diagnostics);
        tracing::debug!(%uri, status = %self.snapshot().status_string(), "Published diagnostics");
    }

    fn show_warning(&self, message: &str) {
        self.client.notify(
            "window/showMessage",
            &MessageParams {
                kind: MessageType::Warning,
                message,
            },
        );
    }

    fn log_warning(&self, message: &str) {
        self.client.notify(
            "window/logMessage",
            &MessageParams {
                kind: MessageType::Warning,
                message,
            },
        );
    }
}

enum Flow {
    Continue,
    Exit,
}

struct Server {
    client: Client,
    scheduler: LintScheduler,
    documents: Documents,
    file_config: Option<Arc<ServerConfig>>,
    supports_configuration: bool,
    /// Bumped per refresh; only the newest refresh may apply its result.
    settings_epoch: Arc<AtomicU64>,
    shutdown_requested: bool,
}

impl Server {
    fn dispatch(&mut self, incoming: Incoming) -> Flow {
        match incoming {
            Incoming::Request { id, method, params } => {
                self.handle_request(id, &method, params);
                Flow::Continue
            }
            Incoming::Notification { method, params } => self.handle_notification(&method, params),
            Incoming::Response { id, body } => {
                self.client.complete(id, body);
                Flow::Continue
            }
        }
    }

    fn handle_request(&mut self, id: Value, method: &str, params: Value) {
        tracing::debug!(method, "Request");
        if self.shutdown_requested {
            self.client.respond(&Response::error(
                id,
                error_codes::INVALID_REQUEST,
                "server is shutting down",
            ));
            return;
        }

        match method {
            "initialize" => {
                let params: InitializeParams = match parse_params(method, params) {
                    Ok(params) => params,
                    Err(message) => return self.reject(id, message),
                };
                let roots = params.workspace_roots();
                tracing::info!(?roots, "Initializing");
                self.supports_configuration = params.supports_configuration();
                self.scheduler.set_workspace_roots(roots);
                self.client
                    .respond(&Response::ok(id, protocol::initialize_result()));
            }
            "shutdown" => {
                tracing::info!("Shutdown requested");
                self.shutdown_requested = true;
                self.scheduler.shutdown();
                self.client.respond(&Response::ok(id, Value::Null));
            }
            LINT_DOCUMENT => {
                let params: LintDocumentParams = match parse_params(method, params) {
                    Ok(params) => params,
                    Err(message) => return self.reject(id, message),
                };
                let scheduler = self.scheduler.clone();
                let client = self.client.clone();
                tokio::spawn(async move {
                    let issues = scheduler.run_now(&params.uri, LintReason::Manual).await;
                    let result = LintDocumentResult { ok: true, issues };
                    match serde_json::to_value(result) {
                        Ok(result) => client.respond(&Response::ok(id, result)),
                        Err(e) => tracing::warn!("Failed to serialize lint result: {e}"),
                    }
                });
            }
            _ => {
                self.client.respond(&Response::error(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                ));
            }
        }
    }

    fn reject(&self, id: Value, message: String) {
        self.client
            .respond(&Response::error(id, error_codes::INVALID_PARAMS, message));
    }

    fn handle_notification(&mut self, method: &str, params: Value) -> Flow {
        tracing::trace!(method, "Notification");
        match method {
            "exit" => return Flow::Exit,
            "initialized" => self.refresh_settings(None),
            "workspace/didChangeConfiguration" => {
                let pushed = parse_notification::<DidChangeConfigurationParams>(method, params)
                    .map(|params| params.settings);
                self.refresh_settings(pushed);
            }
            "textDocument/didOpen" => {
                if let Some(params) = parse_notification::<DidOpenTextDocumentParams>(method, params) {
                    let doc = params.text_document;
                    tracing::debug!(uri = %doc.uri, version = doc.version, "Opened");
                    self.documents.open(doc.uri.clone(), doc.text, doc.version);
                    if self.scheduler.settings().run_on_type() {
                        self.scheduler
                            .trigger_lint(&doc.uri, LintReason::OnEdit, Some(doc.version));
                    }
                }
            }
            "textDocument/didChange" => {
                if let Some(params) = parse_notification::<DidChangeTextDocumentParams>(method, params) {
                    let uri = params.text_document.uri;
                    let version = params.text_document.version;
                    let changes: Vec<TextChange> = params
                        .content_changes
                        .into_iter()
                        .map(|change| TextChange {
                            range: change.range,
                            text: change.text,
                        })
                        .collect();
                    if !self.documents.change(&uri, version, &changes) {
                        tracing::debug!(%uri, "Change for a document that is not open");
                        return Flow::Continue;
                    }
                    if self.scheduler.settings().run_on_type() {
                        self.scheduler
                            .trigger_lint(&uri, LintReason::OnEdit, Some(version));
                    }
                }
            }
            "textDocument/didSave" => {
                if let Some(params) = parse_notification::<DocumentParams>(method, params)
                    && self.scheduler.settings().run_on_save()
                {
                    let uri = params.text_document.uri;
                    let Some(doc) = self.documents.get(&uri) else {
                        tracing::debug!(%uri, "Save for a document that is not open");
                        return Flow::Continue;
                    };
                    self.scheduler
                        .trigger_lint(&uri, LintReason::OnSave, Some(doc.version()));
                }
            }
            "textDocument/didClose" => {
                if let Some(params) = parse_notification::<DocumentParams>(method, params) {
                    let uri = params.text_document.uri;
                    tracing::debug!(%uri, "Closed");
                    self.documents.close(&uri);
                    self.scheduler.cancel_and_clear(&uri);
                }
            }
            "workspace/didDeleteFiles" => {
                if let Some(params) = parse_notification::<DeleteFilesParams>(method, params) {
                    self.scheduler
                        .cancel_and_clear_all(params.files.iter().map(|file| &file.uri));
                }
            }
            "workspace/didRenameFiles" => {
                if let Some(params) = parse_notification::<RenameFilesParams>(method, params) {
                    self.scheduler
                        .cancel_and_clear_all(params.files.iter().map(|file| &file.old_uri));
                }
            }
            CLEAR_DIAGNOSTICS => {
                if let Some(params) = parse_notification::<ClearDiagnosticsParams>(method, params) {
                    self.scheduler.cancel_and_clear_all(&params.uris);
                }
            }
            _ => tracing::trace!(method, "Ignoring notification"),
        }
        Flow::Continue
    }

    /// Re-resolve settings in the background.
    ///
    /// Clients that support `workspace/configuration` are asked for the
    /// `tsqllint` section. Others may push it inside
    /// `didChangeConfiguration`, which arrives here as `pushed`.
    /// A refresh that settles after a newer one started is dropped.
    fn refresh_settings(&self, pushed: Option<Value>) {
        let scheduler = self.scheduler.clone();
        let client = self.client.clone();
        let file_config = self.file_config.clone();
        let pull = self.supports_configuration;
        let latest = Arc::clone(&self.settings_epoch);
        let epoch = latest.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::spawn(async move {
            let host = if pull {
                let params = protocol::configuration_params(HOST_SECTION);
                match client.request("workspace/configuration", params).await {
                    Ok(result) => result.get(0).cloned(),
                    Err(e) => {
                        tracing::warn!("Failed to fetch {HOST_SECTION} settings: {e:#}");
                        return;
                    }
                }
            } else {
                pushed.and_then(|settings| settings.get(HOST_SECTION).cloned())
            };
            if latest.load(Ordering::SeqCst) != epoch {
                tracing::debug!(epoch, "Dropping superseded settings refresh");
                return;
            }
            let settings = resolve_settings(file_config.as_deref(), host.as_ref());
            scheduler.update_settings(settings);
        });
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, String> {
    serde_json::from_value(params).map_err(|e| format!("invalid {method} params: {e}"))
}

fn parse_notification<T: DeserializeOwned>(method: &str, params: Value) -> Option<T> {
    match parse_params(method, params) {
        Ok(params) => Some(params),
        Err(message) => {
            tracing::warn!("{message}");
            None
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    output: W,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
) {
    let mut writer = FrameWriter::new(output);
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Send(frame) => {
                if let Err(e) = writer.write_frame(&frame).await {
                    tracing::warn!("LSP write error: {e:#}");
                    break;
                }
            }
            WriterCommand::Shutdown => break,
        }
    }
}

/// Serve one client over `input`/`output` until `exit` or end of input.
///
/// Returns an error if the input stream is malformed, or if the client sends
/// `exit` without a preceding `shutdown`.
pub async fn serve<R, W>(
    input: R,
    output: W,
    invoker: Arc<dyn LintInvoker>,
    file_config: Option<ServerConfig>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let writer_handle = tokio::spawn(write_loop(output, writer_rx));

    let client = Client::new(writer_tx);
    let publisher = Arc::new(ClientPublisher::new(client.clone()));
    let file_config = file_config.map(Arc::new);
    let documents = Documents::new();
    let scheduler = LintScheduler::new(
        documents.clone(),
        invoker,
        publisher,
        resolve_settings(file_config.as_deref(), None),
    );
    let mut server = Server {
        client,
        scheduler,
        documents,
        file_config,
        supports_configuration: false,
        settings_epoch: Arc::new(AtomicU64::new(0)),
        shutdown_requested: false,
    };

    let mut reader = FrameReader::new(input);
    let result = loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("Client closed the connection");
                break Ok(());
            }
            Err(e) => break Err(e.context("reading from client")),
        };
        let Some(incoming) = Incoming::classify(&frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame");
            continue;
        };
        if let Flow::Exit = server.dispatch(incoming) {
            tracing::info!("Exiting");
            break if server.shutdown_requested {
                Ok(())
            } else {
                Err(anyhow::anyhow!("exit received before shutdown"))
            };
        }
    };

    server.scheduler.shutdown();
    server.client.close();
    let _ = writer_handle.await;
    result
}

/// [`serve`] over the process's stdin and stdout.
pub async fn serve_stdio(
    invoker: Arc<dyn LintInvoker>,
    file_config: Option<ServerConfig>,
) -> Result<()> {
    serve(tokio::io::stdin(), tokio::io::stdout(), invoker, file_config).await
}
