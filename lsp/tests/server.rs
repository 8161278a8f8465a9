//! Drives the server over an in-memory stream the way an editor would.

use std::fs;
use std::path::Path;
use std::time::Duration;

use incwise_analysis::{Invocation, ProcessOutput, ProcessRunner, RunFut};
use incwise_lsp::codec::{FrameReader, FrameWriter};
use incwise_lsp::{ServerOptions, path_to_file_uri, serve};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

/// Analyzer that always reports nothing.
struct Quiet;

impl ProcessRunner for Quiet {
    fn run<'a>(&'a self, _invocation: &'a Invocation) -> RunFut<'a> {
        Box::pin(async {
            Ok(ProcessOutput {
                status: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        })
    }
}

struct Client {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    next_id: u64,
}

impl Client {
    async fn send(&mut self, message: Value) {
        self.writer.write_frame(&message).await.unwrap();
    }

    async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await;
    }

    async fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id;
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        loop {
            let frame = self.next_frame().await;
            if frame["id"] == id && frame.get("method").is_none() {
                return frame;
            }
        }
    }

    async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(10), self.reader.read_frame())
            .await
            .expect("timed out waiting for the server")
            .unwrap()
            .expect("server closed the stream")
    }

    async fn notification(&mut self, method: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["method"] == method {
                return frame["params"].clone();
            }
        }
    }

    async fn initialize(&mut self, root: &Path, options: Value) -> Value {
        let reply = self
            .request(
                "initialize",
                json!({
                    "processId": null,
                    "rootUri": uri(root),
                    "capabilities": {},
                    "initializationOptions": options
                }),
            )
            .await;
        self.notify("initialized", json!({})).await;
        reply
    }

    async fn shutdown(&mut self) {
        let reply = self.request("shutdown", Value::Null).await;
        assert_eq!(reply["result"], Value::Null);
        assert!(reply.get("error").is_none());
        self.notify("exit", Value::Null).await;
    }
}

fn connect() -> (Client, ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);
    (
        Client {
            reader: FrameReader::new(client_read),
            writer: FrameWriter::new(client_write),
            next_id: 0,
        },
        server_read,
        server_write,
    )
}

fn uri(path: &Path) -> String {
    path_to_file_uri(path).unwrap().to_string()
}

/// Workspace with a one-entry database at its root.
fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let db = json!([{
        "directory": dir.path().to_string_lossy(),
        "file": "a.cc",
        "arguments": ["c++", "-c", "a.cc"]
    }]);
    fs::write(dir.path().join("compile_commands.json"), db.to_string()).unwrap();
    fs::write(dir.path().join("a.cc"), "int main() {}\n").unwrap();
    dir
}

fn guard_options() -> Value {
    json!({"diagnostics": {"include_guard": "${FILE}_"}})
}

#[tokio::test]
async fn header_guard_diagnostics_and_code_action() {
    let dir = workspace();
    let header = dir.path().join("foo.h");
    let header_uri = uri(&header);
    let (mut client, input, output) = connect();

    let script = async {
        let reply = client.initialize(dir.path(), guard_options()).await;
        let capabilities = &reply["result"]["capabilities"];
        assert_eq!(capabilities["textDocumentSync"]["change"], 1);
        assert_eq!(
            capabilities["executeCommandProvider"]["commands"],
            json!(["incwise.fixFile", "incwise.fixAll"])
        );

        client
            .notify(
                "textDocument/didOpen",
                json!({"textDocument": {
                    "uri": header_uri,
                    "languageId": "cpp",
                    "version": 1,
                    "text": "int f();\n"
                }}),
            )
            .await;
        let published = client.notification("textDocument/publishDiagnostics").await;
        assert_eq!(published["uri"], header_uri);
        assert_eq!(published["version"], 1);
        let diagnostics = published["diagnostics"].as_array().unwrap().clone();
        let codes: Vec<&str> = diagnostics
            .iter()
            .map(|d| d["code"].as_str().unwrap())
            .collect();
        assert_eq!(codes, vec!["guard-missing-ifndef", "guard-missing-endif"]);
        assert!(diagnostics.iter().all(|d| d["source"] == "incwise"));

        let actions = client
            .request(
                "textDocument/codeAction",
                json!({
                    "textDocument": {"uri": header_uri},
                    "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 0}},
                    "context": {"diagnostics": [diagnostics[0]]}
                }),
            )
            .await;
        let actions = actions["result"].as_array().unwrap().clone();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0]["kind"], "quickfix");
        let edits = actions[0]["edit"]["changes"][header_uri.as_str()]
            .as_array()
            .unwrap();
        assert_eq!(edits[0]["newText"], "#ifndef FOO_H_\n#define FOO_H_\n\n");

        client.shutdown().await;
    };

    let (result, ()) = tokio::join!(serve(input, output, Quiet, ServerOptions::default()), script);
    result.unwrap();
}

#[tokio::test]
async fn edit_republishes_and_close_clears() {
    let dir = workspace();
    let header_uri = uri(&dir.path().join("bar.h"));
    let (mut client, input, output) = connect();

    let script = async {
        client.initialize(dir.path(), guard_options()).await;
        client
            .notify(
                "textDocument/didOpen",
                json!({"textDocument": {"uri": header_uri, "languageId": "cpp", "version": 1, "text": ""}}),
            )
            .await;
        let first = client.notification("textDocument/publishDiagnostics").await;
        assert!(!first["diagnostics"].as_array().unwrap().is_empty());

        client
            .notify(
                "textDocument/didChange",
                json!({
                    "textDocument": {"uri": header_uri, "version": 2},
                    "contentChanges": [{"text": "#ifndef BAR_H_\n#define BAR_H_\n#endif  // BAR_H_\n"}]
                }),
            )
            .await;
        let second = client.notification("textDocument/publishDiagnostics").await;
        assert_eq!(second["version"], 2);
        assert_eq!(second["diagnostics"], json!([]));

        client
            .notify("textDocument/didClose", json!({"textDocument": {"uri": header_uri}}))
            .await;
        let cleared = client.notification("textDocument/publishDiagnostics").await;
        assert_eq!(cleared["uri"], header_uri);
        assert_eq!(cleared["diagnostics"], json!([]));

        client.shutdown().await;
    };

    let (result, ()) = tokio::join!(serve(input, output, Quiet, ServerOptions::default()), script);
    result.unwrap();
}

#[tokio::test]
async fn protocol_errors() {
    let dir = workspace();
    let (mut client, input, output) = connect();

    let script = async {
        let early = client
            .request("textDocument/codeAction", json!({}))
            .await;
        assert_eq!(early["error"]["code"], -32002);

        client.initialize(dir.path(), Value::Null).await;

        let unknown = client.request("textDocument/hover", json!({})).await;
        assert_eq!(unknown["error"]["code"], -32601);

        let bad_command = client
            .request("workspace/executeCommand", json!({"command": "incwise.fixFile"}))
            .await;
        assert_eq!(bad_command["error"]["code"], -32602);

        client
            .send(json!({"jsonrpc": "2.0", "id": 99, "result": null}))
            .await;
        client.shutdown().await;
    };

    let (result, ()) = tokio::join!(serve(input, output, Quiet, ServerOptions::default()), script);
    result.unwrap();
}

#[tokio::test]
async fn end_of_input_stops_server() {
    let (client, input, output) = connect();
    drop(client);
    serve(input, output, Quiet, ServerOptions::default())
        .await
        .unwrap();
}
