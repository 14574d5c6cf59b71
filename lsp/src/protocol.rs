//! LSP message shapes used by the server.
//!
//! Only the fields the server reads are modelled; everything else the client
//! sends is ignored by serde.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tsqlls_types::{LintDiagnostic, Range};
use url::Url;

/// Custom request: lint one document now, reply with the issue count.
pub const LINT_DOCUMENT: &str = "tsqllint/lintDocument";
/// Custom notification: drop pending work and diagnostics for some documents.
pub const CLEAR_DIAGNOSTICS: &str = "tsqllint/clearDiagnostics";

/// JSON-RPC error codes.
pub mod error_codes {
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
}

/// `window/showMessage` and `window/logMessage` types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Error = 1,
    Warning = 2,
    Info = 3,
    Log = 4,
}

impl Serialize for MessageType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    /// A success reply. `result` is always present, `null` included.
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub root_uri: Option<Url>,
    #[serde(default)]
    pub workspace_folders: Option<Vec<WorkspaceFolder>>,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
}

impl InitializeParams {
    /// Filesystem paths of the workspace roots, in the client's order.
    ///
    /// Workspace folders win over the legacy `rootUri`; non-file URIs are
    /// skipped.
    #[must_use]
    pub fn workspace_roots(&self) -> Vec<PathBuf> {
        match &self.workspace_folders {
            Some(folders) if !folders.is_empty() => folders
                .iter()
                .filter_map(|folder| folder.uri.to_file_path().ok())
                .collect(),
            _ => self
                .root_uri
                .iter()
                .filter_map(|uri| uri.to_file_path().ok())
                .collect(),
        }
    }

    /// Whether the client answers `workspace/configuration`.
    #[must_use]
    pub fn supports_configuration(&self) -> bool {
        self.capabilities
            .workspace
            .as_ref()
            .and_then(|ws| ws.configuration)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceFolder {
    pub uri: Url,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default)]
    pub workspace: Option<WorkspaceClientCapabilities>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkspaceClientCapabilities {
    #[serde(default)]
    pub configuration: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentItem {
    pub uri: Url,
    #[serde(default)]
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct VersionedTextDocumentIdentifier {
    pub uri: Url,
    pub version: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenTextDocumentParams {
    pub text_document: TextDocumentItem,
}

#[derive(Debug, Deserialize)]
pub struct ContentChange {
    #[serde(default)]
    pub range: Option<Range>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeTextDocumentParams {
    pub text_document: VersionedTextDocumentIdentifier,
    pub content_changes: Vec<ContentChange>,
}

/// Shared shape of `didSave` and `didClose`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Default, Deserialize)]
pub struct DidChangeConfigurationParams {
    #[serde(default)]
    pub settings: Value,
}

#[derive(Debug, Deserialize)]
pub struct FileDelete {
    pub uri: Url,
}

#[derive(Debug, Deserialize)]
pub struct DeleteFilesParams {
    pub files: Vec<FileDelete>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRename {
    pub old_uri: Url,
    pub new_uri: Url,
}

#[derive(Debug, Deserialize)]
pub struct RenameFilesParams {
    pub files: Vec<FileRename>,
}

#[derive(Debug, Deserialize)]
pub struct LintDocumentParams {
    pub uri: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintDocumentResult {
    pub ok: bool,
    pub issues: usize,
}

#[derive(Debug, Deserialize)]
pub struct ClearDiagnosticsParams {
    #[serde(default)]
    pub uris: Vec<Url>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PublishDiagnosticsParams<'a> {
    pub uri: &'a Url,
    pub diagnostics: &'a [LintDiagnostic],
}

#[derive(Debug, Serialize)]
pub(crate) struct MessageParams<'a> {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub message: &'a str,
}

/// Capabilities advertised in the `initialize` reply.
#[must_use]
pub fn initialize_result() -> Value {
    let sql_files = json!({
        "filters": [{
            "scheme": "file",
            "pattern": { "glob": "**/*.sql", "matches": "file" }
        }]
    });
    json!({
        "capabilities": {
            "textDocumentSync": {
                "openClose": true,
                "change": 2,
                "save": { "includeText": false }
            },
            "workspace": {
                "fileOperations": {
                    "didDelete": sql_files,
                    "didRename": sql_files
                }
            }
        },
        "serverInfo": {
            "name": "tsqllint-ls",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// `workspace/configuration` params asking for one section.
#[must_use]
pub fn configuration_params(section: &str) -> Value {
    json!({ "items": [{ "section": section }] })
}
