//! JSON-RPC envelopes and the LSP shapes the server exchanges, with
//! conversions to and from the engine's types.

use std::path::{Path, PathBuf};

use incwise_analysis::QuickFix;
use incwise_types::{
    Diagnostic, DiagnosticKind, LineRange, Position, RelatedLocation, TextEdit, TextSpan,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// `source` attached to every published diagnostic.
pub const SOURCE: &str = "incwise";

pub const FIX_FILE_COMMAND: &str = "incwise.fixFile";
pub const FIX_ALL_COMMAND: &str = "incwise.fixAll";

/// JSON-RPC and LSP error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const SERVER_NOT_INITIALIZED: i64 = -32002;
    pub const REQUEST_FAILED: i64 = -32803;
}

/// `window/showMessage` types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Error = 1,
    Warning = 2,
    Info = 3,
}

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

/// `None` for unparsable or non-`file:` URIs.
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .filter(|url| url.scheme() == "file")
        .and_then(|url| url.to_file_path().ok())
}

/// A message received from the client.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Incoming {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// A reply to something we sent; the server sends no requests, so these
    /// are only logged.
    Response { id: Value },
}

impl Incoming {
    pub fn parse(frame: Value) -> Option<Self> {
        let Value::Object(mut map) = frame else {
            return None;
        };
        let method = match map.remove("method") {
            Some(Value::String(method)) => Some(method),
            Some(_) => return None,
            None => None,
        };
        let params = map.remove("params").unwrap_or(Value::Null);
        match (map.remove("id"), method) {
            (Some(id), Some(method)) => Some(Self::Request { id, method, params }),
            (None, Some(method)) => Some(Self::Notification { method, params }),
            (Some(id), None) if map.contains_key("result") || map.contains_key("error") => {
                Some(Self::Response { id })
            }
            _ => None,
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

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Value,
}

impl Notification {
    pub fn new(method: &'static str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }

    pub fn publish_diagnostics(uri: &str, version: Option<i32>, diagnostics: &[Diagnostic]) -> Self {
        let diagnostics: Vec<LspDiagnostic> =
            diagnostics.iter().map(LspDiagnostic::from_diagnostic).collect();
        let mut params = json!({ "uri": uri, "diagnostics": diagnostics });
        if let Some(version) = version {
            params["version"] = json!(version);
        }
        Self::new("textDocument/publishDiagnostics", params)
    }

    pub fn show_message(kind: MessageType, message: &str) -> Self {
        Self::new(
            "window/showMessage",
            json!({ "type": kind as u8, "message": message }),
        )
    }
}

pub(crate) fn server_capabilities() -> Value {
    json!({
        "capabilities": {
            "textDocumentSync": {
                "openClose": true,
                "change": 1,
                "save": { "includeText": false }
            },
            "codeActionProvider": { "codeActionKinds": ["quickfix"] },
            "executeCommandProvider": { "commands": [FIX_FILE_COMMAND, FIX_ALL_COMMAND] }
        },
        "serverInfo": { "name": SOURCE, "version": env!("CARGO_PKG_VERSION") }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LspPosition {
    pub line: u32,
    pub character: u32,
}

impl From<Position> for LspPosition {
    fn from(position: Position) -> Self {
        Self {
            line: position.line,
            character: position.character,
        }
    }
}

impl From<LspPosition> for Position {
    fn from(position: LspPosition) -> Self {
        Position::new(position.line, position.character)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LspRange {
    pub start: LspPosition,
    pub end: LspPosition,
}

impl From<LineRange> for LspRange {
    fn from(range: LineRange) -> Self {
        Self {
            start: Position::new(range.line, range.start).into(),
            end: Position::new(range.line, range.end()).into(),
        }
    }
}

impl From<TextSpan> for LspRange {
    fn from(span: TextSpan) -> Self {
        Self {
            start: span.start.into(),
            end: span.end.into(),
        }
    }
}

impl From<LspRange> for TextSpan {
    fn from(range: LspRange) -> Self {
        TextSpan::new(range.start.into(), range.end.into())
    }
}

impl LspRange {
    /// Diagnostics never span lines; a multi-line range is clipped to its
    /// first line.
    fn to_line_range(self) -> LineRange {
        let len = if self.end.line == self.start.line {
            self.end.character.saturating_sub(self.start.character)
        } else {
            0
        };
        LineRange::new(self.start.line, self.start.character, len)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LspLocation {
    pub uri: String,
    pub range: LspRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LspRelatedInformation {
    pub location: LspLocation,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LspDiagnostic {
    pub range: LspRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_information: Vec<LspRelatedInformation>,
}

impl LspDiagnostic {
    pub fn from_diagnostic(diagnostic: &Diagnostic) -> Self {
        let related_information = diagnostic
            .related()
            .iter()
            .filter_map(|related| match path_to_file_uri(&related.path) {
                Ok(uri) => Some(LspRelatedInformation {
                    location: LspLocation {
                        uri: uri.to_string(),
                        range: related.range.into(),
                    },
                    message: related.message.clone(),
                }),
                Err(err) => {
                    tracing::debug!("Dropping related location: {err}");
                    None
                }
            })
            .collect();
        Self {
            range: diagnostic.range().into(),
            severity: Some(diagnostic.severity().to_lsp()),
            code: Some(Value::String(diagnostic.kind().code().to_string())),
            source: Some(SOURCE.to_string()),
            message: diagnostic.message().to_string(),
            related_information,
        }
    }

    /// Rebuild one of our diagnostics from the copy a client echoes back in a
    /// code action request. Diagnostics from other sources yield `None`.
    pub fn to_diagnostic(&self) -> Option<Diagnostic> {
        if self.source.as_deref() != Some(SOURCE) {
            return None;
        }
        let kind = DiagnosticKind::from_code(self.code.as_ref()?.as_str()?)?;
        let diagnostic = Diagnostic::new(kind, self.range.to_line_range(), self.message.clone());
        Some(
            self.related_information
                .iter()
                .filter_map(|info| {
                    Some(RelatedLocation {
                        path: file_uri_to_path(&info.location.uri)?,
                        range: info.location.range.to_line_range(),
                        message: info.message.clone(),
                    })
                })
                .fold(diagnostic, Diagnostic::with_related),
        )
    }
}

fn text_edit(edit: &TextEdit) -> Value {
    json!({ "range": LspRange::from(edit.span), "newText": edit.new_text })
}

/// Render a quick fix as an LSP `CodeAction`.
pub(crate) fn code_action(fix: &QuickFix, uri: &str) -> Value {
    match fix {
        QuickFix::RunRewriter { title, .. } => json!({
            "title": title,
            "kind": "quickfix",
            "command": {
                "title": title,
                "command": FIX_FILE_COMMAND,
                "arguments": [uri]
            }
        }),
        QuickFix::ApplyEdits { title, edits } => {
            let edits: Vec<Value> = edits.iter().map(text_edit).collect();
            json!({
                "title": title,
                "kind": "quickfix",
                "edit": { "changes": { uri: edits } }
            })
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WorkspaceFolder {
    pub uri: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct InitializeParams {
    pub root_uri: Option<String>,
    pub root_path: Option<String>,
    pub workspace_folders: Option<Vec<WorkspaceFolder>>,
    pub initialization_options: Option<Value>,
}

impl InitializeParams {
    /// Workspace folders in client order, falling back to the legacy root
    /// fields.
    pub fn folders(&self) -> Vec<PathBuf> {
        let folders: Vec<PathBuf> = self
            .workspace_folders
            .iter()
            .flatten()
            .filter_map(|folder| file_uri_to_path(&folder.uri))
            .collect();
        if !folders.is_empty() {
            return folders;
        }
        if let Some(root) = self.root_uri.as_deref().and_then(file_uri_to_path) {
            return vec![root];
        }
        self.root_path
            .iter()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextDocumentItem {
    pub uri: String,
    #[serde(default)]
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidOpenParams {
    pub text_document: TextDocumentItem,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VersionedTextDocumentIdentifier {
    pub uri: String,
    #[serde(default)]
    pub version: i32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentChange {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidChangeParams {
    pub text_document: VersionedTextDocumentIdentifier,
    pub content_changes: Vec<ContentChange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DocumentParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CodeActionContext {
    #[serde(default)]
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CodeActionParams {
    pub text_document: TextDocumentIdentifier,
    pub range: LspRange,
    #[serde(default)]
    pub context: CodeActionContext,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExecuteCommandParams {
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DidChangeConfigurationParams {
    #[serde(default)]
    pub settings: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard_diagnostic() -> Diagnostic {
        Diagnostic::new(
            DiagnosticKind::GuardBadDefine,
            LineRange::new(1, 8, 5),
            "expected #define FOO_H",
        )
        .with_related(RelatedLocation {
            path: PathBuf::from("/ws/foo.h"),
            range: LineRange::new(0, 8, 5),
            message: "include guard opened here".into(),
        })
    }

    #[test]
    fn parse_incoming_kinds() {
        let request = Incoming::parse(json!({"jsonrpc": "2.0", "id": 3, "method": "shutdown"}));
        assert_eq!(
            request,
            Some(Incoming::Request {
                id: json!(3),
                method: "shutdown".into(),
                params: Value::Null
            })
        );

        let notification =
            Incoming::parse(json!({"jsonrpc": "2.0", "method": "exit", "params": {}}));
        assert!(matches!(notification, Some(Incoming::Notification { method, .. }) if method == "exit"));

        let response = Incoming::parse(json!({"jsonrpc": "2.0", "id": "a", "result": null}));
        assert_eq!(response, Some(Incoming::Response { id: json!("a") }));

        assert_eq!(Incoming::parse(json!({"jsonrpc": "2.0", "id": 1})), None);
        assert_eq!(Incoming::parse(json!([1, 2])), None);
        assert_eq!(Incoming::parse(json!({"method": 7})), None);
    }

    #[test]
    fn response_serialization() {
        let ok = serde_json::to_value(Response::ok(json!(1), Value::Null)).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 1, "result": null}));

        let err = serde_json::to_value(Response::error(
            json!(2),
            error_codes::METHOD_NOT_FOUND,
            "no",
        ))
        .unwrap();
        assert_eq!(err["error"]["code"], -32601);
        assert!(err.get("result").is_none());
    }

    #[test]
    fn diagnostic_to_lsp() {
        let lsp = serde_json::to_value(LspDiagnostic::from_diagnostic(&guard_diagnostic())).unwrap();
        assert_eq!(lsp["range"]["start"], json!({"line": 1, "character": 8}));
        assert_eq!(lsp["range"]["end"], json!({"line": 1, "character": 13}));
        assert_eq!(lsp["code"], "guard-bad-define");
        assert_eq!(lsp["source"], "incwise");
        assert_eq!(lsp["severity"], 3);
        assert_eq!(
            lsp["relatedInformation"][0]["location"]["uri"],
            "file:///ws/foo.h"
        );
    }

    #[test]
    fn diagnostic_survives_client_echo() {
        let original = guard_diagnostic();
        let echoed: LspDiagnostic =
            serde_json::from_value(serde_json::to_value(LspDiagnostic::from_diagnostic(&original)).unwrap())
                .unwrap();
        assert_eq!(echoed.to_diagnostic(), Some(original));
    }

    #[test]
    fn foreign_diagnostic_ignored() {
        let foreign: LspDiagnostic = serde_json::from_value(json!({
            "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}},
            "source": "clangd",
            "code": "unused-include",
            "message": "x"
        }))
        .unwrap();
        assert!(foreign.to_diagnostic().is_none());
    }

    #[test]
    fn code_action_shapes() {
        let run = code_action(
            &QuickFix::RunRewriter {
                file: PathBuf::from("/ws/a.cc"),
                title: "Fix includes in a.cc".into(),
            },
            "file:///ws/a.cc",
        );
        assert_eq!(run["command"]["command"], FIX_FILE_COMMAND);
        assert_eq!(run["command"]["arguments"][0], "file:///ws/a.cc");

        let edit = code_action(
            &QuickFix::ApplyEdits {
                title: "Use include guard FOO_H".into(),
                edits: vec![TextEdit::insert(Position::new(0, 0), "#ifndef FOO_H\n")],
            },
            "file:///ws/foo.h",
        );
        let edits = &edit["edit"]["changes"]["file:///ws/foo.h"];
        assert_eq!(edits[0]["newText"], "#ifndef FOO_H\n");
        assert_eq!(edits[0]["range"]["end"], json!({"line": 0, "character": 0}));
    }

    #[test]
    fn initialize_folders_precedence() {
        let params: InitializeParams = serde_json::from_value(json!({
            "rootUri": "file:///root",
            "workspaceFolders": [{"uri": "file:///a", "name": "a"}, {"uri": "file:///b", "name": "b"}]
        }))
        .unwrap();
        assert_eq!(params.folders(), vec![PathBuf::from("/a"), PathBuf::from("/b")]);

        let params: InitializeParams =
            serde_json::from_value(json!({"rootUri": "file:///root", "workspaceFolders": null}))
                .unwrap();
        assert_eq!(params.folders(), vec![PathBuf::from("/root")]);

        let params: InitializeParams = serde_json::from_value(json!({"rootPath": "/legacy"})).unwrap();
        assert_eq!(params.folders(), vec![PathBuf::from("/legacy")]);

        assert!(InitializeParams::default().folders().is_empty());
    }

    #[test]
    fn file_uri_round_trip() {
        let path = PathBuf::from("/tmp/some dir/x.h");
        let uri = path_to_file_uri(&path).unwrap();
        assert_eq!(uri.as_str(), "file:///tmp/some%20dir/x.h");
        assert_eq!(file_uri_to_path(uri.as_str()), Some(path));
        assert_eq!(file_uri_to_path("untitled:Untitled-1"), None);
        assert_eq!(file_uri_to_path("not a uri"), None);
    }
}
