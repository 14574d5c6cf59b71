//! Shared test utilities and fixtures
//!
//! Drives a real server over in-memory pipes. The linter is replaced by
//! [`FakeTsqllint`], which flags every line containing `BAD`.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tsqlls_engine::{InvokeError, LintFut, LintInvoker, LintRequest, LintRunResult};
use tsqlls_lsp::codec::{FrameReader, FrameWriter};
use url::Url;

/// Upper bound on any single wait for the server.
pub const WAIT: Duration = Duration::from_secs(5);

/// Pipe capacity in each direction.
const PIPE_BYTES: usize = 64 * 1024;

/// Host settings answered to `workspace/configuration` unless a test swaps them.
pub fn fast_settings() -> Value {
    json!({
        "runOnSave": true,
        "runOnType": true,
        "debounceMs": 20,
        "timeoutMs": 2000
    })
}

/// Stand-in for the tsqllint executable.
///
/// Reports one `no-bad` error per line containing `BAD`, at the column where it
/// starts, followed by a summary line the parser must skip.
#[derive(Default)]
pub struct FakeTsqllint {
    delay: Mutex<Duration>,
    fail: Mutex<Option<String>>,
    stderr: Mutex<String>,
    runs: AtomicUsize,
    cancelled: AtomicUsize,
    seen: Mutex<Vec<LintRequest>>,
}

impl FakeTsqllint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every subsequent run waits this long before reporting.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Every subsequent run fails to start with this message.
    pub fn set_failure(&self, message: &str) {
        *self.fail.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_stderr(&self, stderr: &str) {
        *self.stderr.lock().unwrap() = stderr.to_string();
    }

    /// Runs that got past the cancellation pre-check.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Runs stopped by their token while in flight.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Requests of runs that produced a report, oldest first.
    pub fn seen(&self) -> Vec<LintRequest> {
        self.seen.lock().unwrap().clone()
    }

    fn report(request: &LintRequest) -> (String, i32) {
        let mut report = String::new();
        let mut issues = 0;
        for (index, line) in request.content.lines().enumerate() {
            if let Some(column) = line.find("BAD") {
                issues += 1;
                report.push_str(&format!(
                    "{}({},{}): error no-bad : Avoid BAD.\n",
                    request.file_path.display(),
                    index + 1,
                    column + 1
                ));
            }
        }
        report.push_str(&format!("\nLinted 1 files in 0.01 seconds\n\n{issues} Errors.\n"));
        (report, i32::from(issues > 0))
    }
}

impl LintInvoker for FakeTsqllint {
    fn run(&self, request: LintRequest, token: CancellationToken) -> LintFut<'_> {
        Box::pin(async move {
            if token.is_cancelled() {
                return Ok(LintRunResult::cancelled());
            }
            self.runs.fetch_add(1, Ordering::SeqCst);

            if let Some(message) = self.fail.lock().unwrap().clone() {
                return Err(InvokeError::Wait(io::Error::other(message)));
            }

            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::select! {
                    () = token.cancelled() => {
                        self.cancelled.fetch_add(1, Ordering::SeqCst);
                        return Ok(LintRunResult::cancelled());
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }

            let (stdout, code) = Self::report(&request);
            let mut result = LintRunResult::completed(stdout, code);
            result.stderr = self.stderr.lock().unwrap().clone();
            self.seen.lock().unwrap().push(request);
            Ok(result)
        })
    }
}

/// Editor side of a connection to a spawned server.
///
/// `workspace/configuration` requests are answered in the background with the
/// current [`TestClient::set_settings`] value; every other server frame is
/// queued for the test to inspect.
pub struct TestClient {
    outgoing: Option<mpsc::UnboundedSender<Value>>,
    incoming: mpsc::UnboundedReceiver<Value>,
    backlog: VecDeque<Value>,
    settings: Arc<Mutex<Value>>,
    config_requests: Arc<AtomicUsize>,
    next_id: u64,
    server: Option<JoinHandle<anyhow::Result<()>>>,
    pub linter: Arc<FakeTsqllint>,
    pub workspace: TempDir,
}

impl TestClient {
    pub fn spawn() -> Self {
        Self::spawn_with(FakeTsqllint::new())
    }

    pub fn spawn_with(linter: Arc<FakeTsqllint>) -> Self {
        let (client_out, server_in) = tokio::io::duplex(PIPE_BYTES);
        let (server_out, client_in) = tokio::io::duplex(PIPE_BYTES);

        let invoker: Arc<dyn LintInvoker> = linter.clone();
        let server = tokio::spawn(tsqlls_lsp::serve(server_in, server_out, invoker, None));

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        let settings = Arc::new(Mutex::new(fast_settings()));
        let config_requests = Arc::new(AtomicUsize::new(0));

        tokio::spawn(write_frames(client_out, outgoing_rx));
        tokio::spawn(read_frames(
            client_in,
            incoming_tx,
            outgoing.downgrade(),
            settings.clone(),
            config_requests.clone(),
        ));

        Self {
            outgoing: Some(outgoing),
            incoming,
            backlog: VecDeque::new(),
            settings,
            config_requests,
            next_id: 1,
            server: Some(server),
            linter,
            workspace: tempfile::tempdir().unwrap(),
        }
    }

    /// `file://` URI for a file in the workspace (the file need not exist).
    pub fn uri(&self, name: &str) -> Url {
        Url::from_file_path(self.workspace.path().join(name)).unwrap()
    }

    pub fn set_settings(&self, settings: Value) {
        *self.settings.lock().unwrap() = settings;
    }

    fn send(&self, frame: Value) {
        self.outgoing
            .as_ref()
            .expect("client input already closed")
            .send(frame)
            .unwrap();
    }

    pub fn notify(&self, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "method": method, "params": params}));
    }

    /// Send a request and wait for the full response frame.
    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}));
        self.next_matching(|frame| frame.get("method").is_none() && frame["id"] == id)
            .await
    }

    /// `initialize` with a workspace root and pull configuration, then
    /// `initialized`, returning the initialize result once settings are in.
    pub async fn initialize(&mut self) -> Value {
        let root = Url::from_directory_path(self.workspace.path()).unwrap();
        let response = self
            .request(
                "initialize",
                json!({
                    "processId": null,
                    "rootUri": root,
                    "capabilities": {"workspace": {"configuration": true}}
                }),
            )
            .await;
        let before = self.config_requests.load(Ordering::SeqCst);
        self.notify("initialized", json!({}));
        self.settle_settings(before).await;
        response["result"].clone()
    }

    /// Swap the host settings and tell the server they changed.
    pub async fn change_settings(&mut self, settings: Value) {
        self.set_settings(settings);
        let before = self.config_requests.load(Ordering::SeqCst);
        self.notify("workspace/didChangeConfiguration", json!({"settings": null}));
        self.settle_settings(before).await;
    }

    async fn settle_settings(&self, before: usize) {
        tokio::time::timeout(WAIT, async {
            while self.config_requests.load(Ordering::SeqCst) == before {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("server never asked for settings");
        // The reply is applied by a server task after it is read.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    pub fn open(&self, uri: &Url, text: &str) {
        self.notify(
            "textDocument/didOpen",
            json!({"textDocument": {"uri": uri, "languageId": "sql", "version": 1, "text": text}}),
        );
    }

    /// Full-text change.
    pub fn change(&self, uri: &Url, version: i32, text: &str) {
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": {"uri": uri, "version": version},
                "contentChanges": [{"text": text}]
            }),
        );
    }

    pub fn save(&self, uri: &Url) {
        self.notify("textDocument/didSave", json!({"textDocument": {"uri": uri}}));
    }

    pub fn close(&self, uri: &Url) {
        self.notify("textDocument/didClose", json!({"textDocument": {"uri": uri}}));
    }

    /// Params of the next notification named `method`.
    pub async fn notification(&mut self, method: &str) -> Value {
        self.next_matching(|frame| frame["method"] == method)
            .await["params"]
            .clone()
    }

    /// Diagnostics of the next publish for `uri`.
    pub async fn diagnostics(&mut self, uri: &Url) -> Vec<Value> {
        let uri = uri.as_str();
        let frame = self
            .next_matching(|frame| {
                frame["method"] == "textDocument/publishDiagnostics"
                    && frame["params"]["uri"] == uri
            })
            .await;
        frame["params"]["diagnostics"]
            .as_array()
            .cloned()
            .unwrap_or_default()
    }

    /// Assert that no notification named `method` arrives within `window`.
    pub async fn expect_no(&mut self, method: &str, window: Duration) {
        assert!(
            !self.backlog.iter().any(|frame| frame["method"] == method),
            "unexpected {method}: {:?}",
            self.backlog
        );
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, self.incoming.recv()).await {
            assert_ne!(frame["method"], method, "unexpected {frame}");
            self.backlog.push_back(frame);
        }
    }

    async fn next_matching(&mut self, matches: impl Fn(&Value) -> bool) -> Value {
        if let Some(index) = self.backlog.iter().position(&matches) {
            return self.backlog.remove(index).unwrap();
        }
        loop {
            let frame = tokio::time::timeout(WAIT, self.incoming.recv())
                .await
                .expect("timed out waiting for server frame")
                .expect("server output closed");
            if matches(&frame) {
                return frame;
            }
            self.backlog.push_back(frame);
        }
    }

    /// `shutdown` then `exit`; returns the server's result.
    pub async fn shutdown_and_exit(mut self) -> anyhow::Result<()> {
        let response = self.request("shutdown", Value::Null).await;
        assert_eq!(response["result"], Value::Null);
        self.notify("exit", Value::Null);
        self.join().await
    }

    /// Close the client's output and wait for the server to stop.
    pub async fn hang_up(mut self) -> anyhow::Result<()> {
        self.outgoing = None;
        self.join().await
    }

    pub async fn join(&mut self) -> anyhow::Result<()> {
        let server = self.server.take().expect("server already joined");
        tokio::time::timeout(WAIT, server)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

async fn write_frames(output: DuplexStream, mut frames: mpsc::UnboundedReceiver<Value>) {
    let mut writer = FrameWriter::new(output);
    while let Some(frame) = frames.recv().await {
        if writer.write_frame(&frame).await.is_err() {
            break;
        }
    }
}

async fn read_frames(
    input: DuplexStream,
    incoming: mpsc::UnboundedSender<Value>,
    outgoing: mpsc::WeakUnboundedSender<Value>,
    settings: Arc<Mutex<Value>>,
    config_requests: Arc<AtomicUsize>,
) {
    let mut reader = FrameReader::new(input);
    while let Ok(Some(frame)) = reader.read_frame().await {
        if frame["method"] == "workspace/configuration" {
            let items = frame["params"]["items"].as_array().map_or(0, Vec::len);
            let section = settings.lock().unwrap().clone();
            let result: Vec<Value> = (0..items.max(1)).map(|_| section.clone()).collect();
            if let Some(outgoing) = outgoing.upgrade() {
                let _ = outgoing.send(json!({"jsonrpc": "2.0", "id": frame["id"], "result": result}));
            }
            config_requests.fetch_add(1, Ordering::SeqCst);
            continue;
        }
        if incoming.send(frame).is_err() {
            break;
        }
    }
}
