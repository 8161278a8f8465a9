//! Server loop: reads client frames, dispatches them to the session, and
//! funnels every outgoing message through one writer task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use incwise_analysis::{Engine, Freshness, Notice, ProcessRunner, SystemRunner};
use incwise_config::{Config, ConfigError, Settings};
use incwise_types::{Diagnostic, Document};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::{
    CodeActionParams, DidChangeConfigurationParams, DidChangeParams, DidOpenParams,
    DocumentParams, ExecuteCommandParams, FIX_ALL_COMMAND, FIX_FILE_COMMAND, Incoming,
    InitializeParams, LspDiagnostic, MessageType, Notification, Response, code_action,
    error_codes, file_uri_to_path, server_capabilities,
};

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// How long to wait for queued messages to drain after `exit`.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A diagnose pass whose document changed underneath it rescans the newer
/// text against the cached report at most this many times.
const RESCAN_ATTEMPTS: usize = 3;

/// Startup options supplied by the binary.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Workspace root; overrides the folders sent by the client.
    pub root: Option<PathBuf>,
    /// Settings file used instead of `<root>/.incwise.toml`.
    pub config_file: Option<PathBuf>,
}

/// Serve on the process's stdin and stdout.
pub async fn serve_stdio(options: ServerOptions) -> Result<()> {
    serve(tokio::io::stdin(), tokio::io::stdout(), SystemRunner, options).await
}

/// Serve one client over `input`/`output` until `exit` or end of input.
pub async fn serve<I, O, R>(input: I, output: O, runner: R, options: ServerOptions) -> Result<()>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin + Send + 'static,
    R: ProcessRunner + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Value>(WRITER_CHANNEL_CAPACITY);
    let writer = tokio::spawn(async move {
        let mut writer = FrameWriter::new(output);
        while let Some(message) = rx.recv().await {
            if let Err(err) = writer.write_frame(&message).await {
                tracing::warn!("Failed to write to client: {err:#}");
                break;
            }
        }
    });

    let mut reader = FrameReader::new(input);
    let mut server = Server {
        options,
        runner: Some(runner),
        session: None,
        outbox: Outbox(tx),
        shutdown_requested: false,
    };

    let result = loop {
        let body = match reader.read_body().await {
            Ok(Some(body)) => body,
            Ok(None) => {
                tracing::info!("Client closed the connection");
                break Ok(());
            }
            Err(err) => break Err(err),
        };
        let frame = match serde_json::from_slice::<Value>(&body) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("Malformed message from client: {err}");
                server
                    .outbox
                    .send(Response::error(Value::Null, error_codes::PARSE_ERROR, err.to_string()))
                    .await;
                continue;
            }
        };
        let Some(incoming) = Incoming::parse(frame) else {
            server
                .outbox
                .send(Response::error(
                    Value::Null,
                    error_codes::INVALID_REQUEST,
                    "not a JSON-RPC request or notification",
                ))
                .await;
            continue;
        };
        if server.dispatch(incoming).await == Flow::Exit {
            break Ok(());
        }
    };

    if !server.shutdown_requested {
        tracing::debug!("Stopping without a shutdown request");
    }
    drop(server);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        tracing::debug!("Writer still busy after exit; abandoning queued messages");
    }
    result
}

/// Cloneable handle onto the writer task.
#[derive(Clone)]
struct Outbox(mpsc::Sender<Value>);

impl Outbox {
    async fn send(&self, message: impl Serialize) {
        let value = match serde_json::to_value(message) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("Failed to serialize outgoing message: {err}");
                return;
            }
        };
        if self.0.send(value).await.is_err() {
            tracing::debug!("Writer closed; dropping outgoing message");
        }
    }

    async fn show_message(&self, kind: MessageType, message: &str) {
        self.send(Notification::show_message(kind, message)).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

struct Server<R> {
    options: ServerOptions,
    /// Moved into the engine on `initialize`.
    runner: Option<R>,
    session: Option<Arc<Session<R>>>,
    outbox: Outbox,
    shutdown_requested: bool,
}

impl<R: ProcessRunner + 'static> Server<R> {
    async fn dispatch(&mut self, incoming: Incoming) -> Flow {
        match incoming {
            Incoming::Request { id, method, params } => {
                self.handle_request(id, &method, params).await;
                Flow::Continue
            }
            Incoming::Notification { method, params } => {
                self.handle_notification(&method, params).await
            }
            Incoming::Response { id } => {
                tracing::trace!(%id, "Ignoring response from client");
                Flow::Continue
            }
        }
    }

    async fn handle_request(&mut self, id: Value, method: &str, params: Value) {
        if method == "initialize" {
            let reply = self.initialize(id, params).await;
            self.outbox.send(reply).await;
            return;
        }
        let Some(session) = self.session.clone() else {
            self.outbox
                .send(Response::error(
                    id,
                    error_codes::SERVER_NOT_INITIALIZED,
                    "server not initialized",
                ))
                .await;
            return;
        };
        if self.shutdown_requested {
            self.outbox
                .send(Response::error(id, error_codes::INVALID_REQUEST, "server is shutting down"))
                .await;
            return;
        }

        match method {
            "shutdown" => {
                self.shutdown_requested = true;
                self.outbox.send(Response::ok(id, Value::Null)).await;
            }
            "textDocument/codeAction" => {
                let reply = match decode::<CodeActionParams>(params) {
                    Ok(params) => Response::ok(id, session.code_actions(params).await),
                    Err(err) => invalid_params(id, &err),
                };
                self.outbox.send(reply).await;
            }
            "workspace/executeCommand" => match decode::<ExecuteCommandParams>(params) {
                // Fixes run external tools; keep reading while they do.
                Ok(params) => {
                    tokio::spawn(async move {
                        let reply = session.execute_command(id, params).await;
                        session.outbox.send(reply).await;
                    });
                }
                Err(err) => self.outbox.send(invalid_params(id, &err)).await,
            },
            _ => {
                tracing::debug!("Unsupported request: {method}");
                self.outbox
                    .send(Response::error(
                        id,
                        error_codes::METHOD_NOT_FOUND,
                        format!("method not found: {method}"),
                    ))
                    .await;
            }
        }
    }

    async fn initialize(&mut self, id: Value, params: Value) -> Response {
        if self.session.is_some() {
            return Response::error(id, error_codes::INVALID_REQUEST, "already initialized");
        }
        let params = match decode::<InitializeParams>(params) {
            Ok(params) => params,
            Err(err) => return invalid_params(id, &err),
        };
        let Some(runner) = self.runner.take() else {
            return Response::error(id, error_codes::INVALID_REQUEST, "already initialized");
        };
        self.session = Some(Session::start(runner, params, &self.options, self.outbox.clone()).await);
        Response::ok(id, server_capabilities())
    }

    async fn handle_notification(&mut self, method: &str, params: Value) -> Flow {
        if method == "exit" {
            return Flow::Exit;
        }
        let Some(session) = self.session.as_ref() else {
            tracing::debug!("Ignoring {method} before initialize");
            return Flow::Continue;
        };
        match method {
            "initialized" => tracing::debug!("Client initialized"),
            "textDocument/didOpen" => {
                if let Some(params) = notification_params::<DidOpenParams>(method, params) {
                    session.open(params).await;
                }
            }
            "textDocument/didChange" => {
                if let Some(params) = notification_params::<DidChangeParams>(method, params) {
                    session.change(params).await;
                }
            }
            "textDocument/didSave" => {
                if let Some(params) = notification_params::<DocumentParams>(method, params) {
                    session.save(&params.text_document.uri).await;
                }
            }
            "textDocument/didClose" => {
                if let Some(params) = notification_params::<DocumentParams>(method, params) {
                    session.close(&params.text_document.uri).await;
                }
            }
            "workspace/didChangeConfiguration" => {
                if let Some(params) =
                    notification_params::<DidChangeConfigurationParams>(method, params)
                {
                    session.reconfigure(params.settings).await;
                }
            }
            _ if method.starts_with("$/") => tracing::trace!("Ignoring {method}"),
            _ => tracing::debug!("Unsupported notification: {method}"),
        }
        Flow::Continue
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(params)
}

fn notification_params<T: DeserializeOwned>(method: &str, value: Value) -> Option<T> {
    decode(value)
        .inspect_err(|err| tracing::warn!("Invalid {method} params: {err}"))
        .ok()
}

fn invalid_params(id: Value, err: &serde_json::Error) -> Response {
    Response::error(id, error_codes::INVALID_PARAMS, err.to_string())
}

/// An editor buffer the client has open.
#[derive(Debug, Clone)]
struct OpenDocument {
    uri: String,
    version: i32,
    text: String,
}

/// Everything that exists once the client has sent `initialize`.
struct Session<R> {
    engine: Engine<R>,
    config: RwLock<Arc<Config>>,
    documents: Mutex<HashMap<PathBuf, OpenDocument>>,
    outbox: Outbox,
}

impl<R: ProcessRunner + 'static> Session<R> {
    async fn start(
        runner: R,
        params: InitializeParams,
        options: &ServerOptions,
        outbox: Outbox,
    ) -> Arc<Self> {
        let folders = params.folders();
        let root = options
            .root
            .clone()
            .or_else(|| folders.first().cloned())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        tracing::info!(root = %root.display(), "Initializing workspace");

        let (engine, notices) = Engine::new(runner, root.clone(), folders);
        tokio::spawn(forward_notices(notices, outbox.clone()));

        let settings = match initial_settings(
            &root,
            options.config_file.as_deref(),
            params.initialization_options,
        ) {
            Ok(settings) => settings,
            Err(err) => {
                engine
                    .notices()
                    .report(format!("config:{err}"), format!("incwise: {err}"));
                Settings::default()
            }
        };
        let config = Arc::new(Config::new(settings));
        engine.refresh_index(&config, None).await;

        Arc::new(Self {
            engine,
            config: RwLock::new(config),
            documents: Mutex::new(HashMap::new()),
            outbox,
        })
    }

    async fn config(&self) -> Arc<Config> {
        Arc::clone(&*self.config.read().await)
    }

    async fn open(self: &Arc<Self>, params: DidOpenParams) {
        let item = params.text_document;
        let Some(path) = file_uri_to_path(&item.uri) else {
            tracing::debug!(uri = %item.uri, "Ignoring non-file document");
            return;
        };
        self.documents.lock().await.insert(
            path.clone(),
            OpenDocument {
                uri: item.uri,
                version: item.version,
                text: item.text,
            },
        );
        self.schedule(path, Freshness::Reuse);
    }

    async fn change(self: &Arc<Self>, params: DidChangeParams) {
        let Some(path) = file_uri_to_path(&params.text_document.uri) else {
            return;
        };
        // Full sync: the last change carries the whole text.
        let Some(change) = params.content_changes.into_iter().next_back() else {
            return;
        };
        {
            let mut documents = self.documents.lock().await;
            let Some(document) = documents.get_mut(&path) else {
                tracing::debug!(path = %path.display(), "Change for a document that is not open");
                return;
            };
            document.version = params.text_document.version;
            document.text = change.text;
        }
        self.schedule(path, Freshness::Reuse);
    }

    async fn save(self: &Arc<Self>, uri: &str) {
        let Some(path) = file_uri_to_path(uri) else {
            return;
        };
        if self.documents.lock().await.contains_key(&path) {
            // The analyzer reads from disk, so a save invalidates its report.
            self.schedule(path, Freshness::Force);
        }
    }

    async fn close(&self, uri: &str) {
        let Some(path) = file_uri_to_path(uri) else {
            return;
        };
        if self.documents.lock().await.remove(&path).is_some() {
            self.outbox
                .send(Notification::publish_diagnostics(uri, None, &[]))
                .await;
        }
    }

    async fn reconfigure(self: &Arc<Self>, settings: Value) {
        if settings.is_null() {
            tracing::debug!("Configuration change without settings; keeping current snapshot");
            return;
        }
        match Settings::from_json(settings) {
            Ok(settings) => {
                *self.config.write().await = Arc::new(Config::new(settings));
                tracing::info!("Configuration updated");
            }
            Err(err) => {
                self.engine
                    .notices()
                    .report(format!("config:{err}"), format!("incwise: {err}"));
                return;
            }
        }
        self.rediagnose_open_documents().await;
    }

    async fn rediagnose_open_documents(self: &Arc<Self>) {
        let paths: Vec<PathBuf> = self.documents.lock().await.keys().cloned().collect();
        for path in paths {
            self.schedule(path, Freshness::Reuse);
        }
    }

    fn schedule(self: &Arc<Self>, path: PathBuf, freshness: Freshness) {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.diagnose(&path, freshness).await });
    }

    async fn snapshot(&self, path: &Path) -> Option<(String, i32, Document)> {
        let documents = self.documents.lock().await;
        let open = documents.get(path)?;
        Some((
            open.uri.clone(),
            open.version,
            Document::new(path, open.text.clone()),
        ))
    }

    async fn version(&self, path: &Path) -> Option<i32> {
        self.documents.lock().await.get(path).map(|open| open.version)
    }

    async fn diagnose(&self, path: &Path, freshness: Freshness) {
        let config = self.config().await;
        self.engine.refresh_index(&config, Some(path)).await;

        let mut freshness = freshness;
        for _ in 0..RESCAN_ATTEMPTS {
            let Some((uri, version, document)) = self.snapshot(path).await else {
                return;
            };
            let Some(diagnostics) = self.engine.diagnose(&config, &document, freshness).await else {
                return;
            };
            // Positions must come from the text the client currently shows.
            if self.version(path).await == Some(version) {
                self.publish(&uri, version, &diagnostics).await;
                return;
            }
            freshness = Freshness::Reuse;
        }
        tracing::debug!(path = %path.display(), "Document kept changing; leaving it to a later pass");
    }

    async fn publish(&self, uri: &str, version: i32, diagnostics: &[Diagnostic]) {
        tracing::debug!(%uri, count = diagnostics.len(), "Publishing diagnostics");
        self.outbox
            .send(Notification::publish_diagnostics(uri, Some(version), diagnostics))
            .await;
    }

    async fn code_actions(&self, params: CodeActionParams) -> Value {
        let uri = params.text_document.uri;
        let Some(path) = file_uri_to_path(&uri) else {
            return json!([]);
        };
        let diagnostics: Vec<Diagnostic> = params
            .context
            .diagnostics
            .iter()
            .filter_map(LspDiagnostic::to_diagnostic)
            .collect();
        if diagnostics.is_empty() {
            return json!([]);
        }
        let Some((_, _, document)) = self.snapshot(&path).await else {
            return json!([]);
        };
        let config = self.config().await;
        let fixes = self
            .engine
            .quick_fixes(&config, &document, &diagnostics, params.range.into())
            .await;
        Value::Array(fixes.iter().map(|fix| code_action(fix, &uri)).collect())
    }

    async fn execute_command(self: &Arc<Self>, id: Value, params: ExecuteCommandParams) -> Response {
        let config = self.config().await;
        match params.command.as_str() {
            FIX_FILE_COMMAND => {
                let Some(path) = params
                    .arguments
                    .first()
                    .and_then(Value::as_str)
                    .and_then(file_uri_to_path)
                else {
                    return Response::error(
                        id,
                        error_codes::INVALID_PARAMS,
                        format!("{FIX_FILE_COMMAND} expects a file URI argument"),
                    );
                };
                self.engine.refresh_index(&config, Some(&path)).await;
                match self.engine.fix_file(&config, &path).await {
                    Ok(output) => {
                        tracing::debug!(path = %path.display(), "Rewriter output:\n{}", output.combined());
                        if self.version(&path).await.is_some() {
                            self.schedule(path, Freshness::Reuse);
                        }
                        Response::ok(id, Value::Null)
                    }
                    Err(err) => {
                        let message = format!("Fixing includes in {} failed: {err}", path.display());
                        self.outbox.show_message(MessageType::Error, &message).await;
                        Response::error(id, error_codes::REQUEST_FAILED, message)
                    }
                }
            }
            FIX_ALL_COMMAND => {
                self.engine.refresh_index(&config, None).await;
                let summary = self.engine.fix_all(&config).await;
                let message = format!(
                    "Fixed includes in {} files ({} failed, {} skipped)",
                    summary.fixed, summary.failed, summary.skipped
                );
                let kind = if summary.failed == 0 {
                    MessageType::Info
                } else {
                    MessageType::Warning
                };
                self.outbox.show_message(kind, &message).await;
                self.rediagnose_open_documents().await;
                Response::ok(
                    id,
                    json!({
                        "fixed": summary.fixed,
                        "failed": summary.failed,
                        "skipped": summary.skipped
                    }),
                )
            }
            other => Response::error(
                id,
                error_codes::INVALID_PARAMS,
                format!("unknown command: {other}"),
            ),
        }
    }
}

/// Settings at startup: editor-provided options win over the settings file.
fn initial_settings(
    root: &Path,
    config_file: Option<&Path>,
    initialization_options: Option<Value>,
) -> Result<Settings, ConfigError> {
    if let Some(options) = initialization_options.filter(|options| !options.is_null()) {
        return Settings::from_json(options);
    }
    match config_file {
        Some(path) => Settings::load_file(path),
        None => Ok(Settings::load(root)?.unwrap_or_default()),
    }
}

async fn forward_notices(mut notices: mpsc::UnboundedReceiver<Notice>, outbox: Outbox) {
    while let Some(notice) = notices.recv().await {
        outbox.show_message(MessageType::Error, &notice.message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    #[test]
    fn initial_settings_precedence() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(".incwise.toml"),
            "[diagnostics]\nscan_min = 7\n",
        )
        .unwrap();

        let from_file = initial_settings(dir.path(), None, None).unwrap();
        assert_eq!(from_file.diagnostics.scan_min, 7);

        let from_editor = initial_settings(
            dir.path(),
            None,
            Some(json!({"incwise": {"diagnostics": {"scan_min": 3}}})),
        )
        .unwrap();
        assert_eq!(from_editor.diagnostics.scan_min, 3);

        let null_options = initial_settings(dir.path(), None, Some(Value::Null)).unwrap();
        assert_eq!(null_options.diagnostics.scan_min, 7);
    }

    #[test]
    fn initial_settings_explicit_file() {
        let dir = TempDir::new().unwrap();
        let custom = dir.path().join("custom.toml");
        fs::write(&custom, "[analyzer]\nmax_line_length = 120\n").unwrap();
        fs::write(dir.path().join(".incwise.toml"), "not = [valid").unwrap();

        let settings = initial_settings(dir.path(), Some(&custom), None).unwrap();
        assert_eq!(settings.analyzer.max_line_length, 120);
        assert!(initial_settings(dir.path(), None, None).is_err());
    }

    #[test]
    fn missing_settings_file_is_default() {
        let dir = TempDir::new().unwrap();
        let settings = initial_settings(dir.path(), None, None).unwrap();
        assert_eq!(
            settings.diagnostics.scan_min,
            Settings::default().diagnostics.scan_min
        );
    }
}
