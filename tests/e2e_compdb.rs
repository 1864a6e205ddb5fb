//! Compilation database E2E tests: a full server session over a duplex stream

mod helper;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lsp_types::{TextDocumentItem, Url};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use compdb_lsp::build_system::FileBuildSettings;
use compdb_lsp::config::{BuildSystemPreference, ServerOptions};
use compdb_lsp::lsp::engine::{AnalysisEngine, SemanticRequest};
use compdb_lsp::lsp::server::serve;
use compdb_lsp::protocol::ResponseError;
use helper::{
    TestClient, create_did_change_watched_files_notification, create_did_close_notification,
    create_did_open_notification, create_hover_params, create_initialize_params,
    create_notification, duplex_pair, file_uri, write_compile_commands,
};

#[derive(Debug, PartialEq)]
enum EngineEvent {
    Opened(Url, Option<FileBuildSettings>),
    SettingsChanged(Url, Option<FileBuildSettings>),
    Closed(Url),
}

/// Engine that reports document events on a channel and echoes the build
/// settings it was given for each request
struct RecordingEngine {
    events: mpsc::UnboundedSender<EngineEvent>,
}

fn settings_json(settings: Option<&FileBuildSettings>) -> Value {
    match settings {
        Some(settings) => json!({
            "arguments": settings.compiler_arguments,
            "workingDirectory": settings.working_directory,
        }),
        None => Value::Null,
    }
}

#[async_trait]
impl AnalysisEngine for RecordingEngine {
    async fn document_opened(
        &self,
        document: &TextDocumentItem,
        settings: Option<&FileBuildSettings>,
    ) {
        let _ = self
            .events
            .send(EngineEvent::Opened(document.uri.clone(), settings.cloned()));
    }

    async fn document_closed(&self, uri: &Url) {
        let _ = self.events.send(EngineEvent::Closed(uri.clone()));
    }

    async fn build_settings_changed(&self, uri: &Url, settings: Option<&FileBuildSettings>) {
        let _ = self
            .events
            .send(EngineEvent::SettingsChanged(uri.clone(), settings.cloned()));
    }

    async fn handle(
        &self,
        request: SemanticRequest,
        settings: Option<FileBuildSettings>,
        _cancel: CancellationToken,
    ) -> Result<Value, ResponseError> {
        Ok(json!({
            "method": request.method(),
            "settings": settings_json(settings.as_ref()),
        }))
    }
}

struct Session {
    client: TestClient,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    server: JoinHandle<anyhow::Result<i32>>,
}

fn start_server(options: ServerOptions) -> Session {
    let (client, input, output) = duplex_pair();
    let (tx, events) = mpsc::unbounded_channel();
    let engine = Arc::new(RecordingEngine { events: tx });
    let server = tokio::spawn(serve(input, output, options, engine, None));
    Session {
        client,
        events,
        server,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<EngineEvent>) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an engine event")
        .expect("engine channel closed")
}

fn expected_settings(dir: &Path, flag: &str, file: &Path) -> Option<FileBuildSettings> {
    Some(FileBuildSettings {
        compiler_arguments: vec![flag.to_string(), file.to_string_lossy().into_owned()],
        working_directory: Some(dir.to_path_buf()),
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn hover_receives_settings_from_compile_commands() {
    // 1. Project with a compilation database at its root
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("a.c");
    write_compile_commands(temp_dir.path(), &[(&source, "-DX")]);
    let uri = file_uri(&source);

    // 2. Initialize
    let Session {
        mut client,
        mut events,
        ..
    } = start_server(ServerOptions::default());
    let response = client
        .initialize(create_initialize_params(Some(temp_dir.path())))
        .await;
    assert_eq!(response["result"]["serverInfo"]["name"], "compdb-lsp");
    assert_eq!(response["result"]["capabilities"]["hoverProvider"], true);

    // 3. didOpen forwards the resolved settings to the engine
    client
        .send(&create_did_open_notification(&uri, "c", "int main;"))
        .await;
    assert_eq!(
        next_event(&mut events).await,
        EngineEvent::Opened(
            uri.clone(),
            expected_settings(temp_dir.path(), "-DX", &source)
        )
    );

    // 4. Hover is answered with the same settings
    let response = client
        .request(1, "textDocument/hover", create_hover_params(&uri))
        .await;
    assert_eq!(response["result"]["method"], "textDocument/hover");
    assert_eq!(
        response["result"]["settings"]["arguments"],
        json!(["-DX", source])
    );
    assert_eq!(
        response["result"]["settings"]["workingDirectory"],
        json!(temp_dir.path())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn database_change_notifies_open_documents_once() {
    let temp_dir = TempDir::new().unwrap();
    let a = temp_dir.path().join("a.c");
    let b = temp_dir.path().join("b.c");
    write_compile_commands(temp_dir.path(), &[(&a, "-DOLD"), (&b, "-DOLD")]);

    let Session {
        mut client,
        mut events,
        ..
    } = start_server(ServerOptions::default());
    client
        .initialize(create_initialize_params(Some(temp_dir.path())))
        .await;
    client
        .send(&create_did_open_notification(&file_uri(&a), "c", ""))
        .await;
    next_event(&mut events).await;

    // Rewrite the database and report it along with an unrelated change
    write_compile_commands(temp_dir.path(), &[(&a, "-DNEW"), (&b, "-DNEW")]);
    client
        .send(&create_did_change_watched_files_notification(&[
            &temp_dir.path().join("README.md"),
            &temp_dir.path().join("compile_commands.json"),
        ]))
        .await;

    assert_eq!(
        next_event(&mut events).await,
        EngineEvent::SettingsChanged(
            file_uri(&a),
            expected_settings(temp_dir.path(), "-DNEW", &a)
        )
    );

    // Notifications are handled in order, so a reply to a later request
    // means the change has been fully processed
    client
        .request(2, "textDocument/hover", create_hover_params(&file_uri(&a)))
        .await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn closed_documents_are_not_notified() {
    let temp_dir = TempDir::new().unwrap();
    let a = temp_dir.path().join("a.c");
    write_compile_commands(temp_dir.path(), &[(&a, "-DX")]);
    let uri = file_uri(&a);

    let Session {
        mut client,
        mut events,
        ..
    } = start_server(ServerOptions::default());
    client
        .initialize(create_initialize_params(Some(temp_dir.path())))
        .await;
    client
        .send(&create_did_open_notification(&uri, "c", ""))
        .await;
    next_event(&mut events).await;
    client.send(&create_did_close_notification(&uri)).await;
    assert_eq!(next_event(&mut events).await, EngineEvent::Closed(uri));

    client
        .send(&create_did_change_watched_files_notification(&[&temp_dir
            .path()
            .join("compile_flags.txt")]))
        .await;
    client
        .request(3, "textDocument/hover", create_hover_params(&file_uri(&a)))
        .await;

    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn database_is_discovered_without_workspace_root() {
    let temp_dir = TempDir::new().unwrap();
    let nested = temp_dir.path().join("src/sub");
    std::fs::create_dir_all(&nested).unwrap();
    let source = nested.join("a.c");
    write_compile_commands(temp_dir.path(), &[(&source, "-DDISCOVERED")]);

    let Session { mut client, .. } = start_server(ServerOptions::default());
    client.initialize(create_initialize_params(None)).await;

    let response = client
        .request(
            4,
            "textDocument/hover",
            create_hover_params(&file_uri(&source)),
        )
        .await;

    assert_eq!(
        response["result"]["settings"]["arguments"][0],
        "-DDISCOVERED"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn compilation_database_path_option_overrides_root() {
    let workspace = TempDir::new().unwrap();
    let build = TempDir::new().unwrap();
    let source = workspace.path().join("a.c");
    write_compile_commands(build.path(), &[(&source, "-DFROM_BUILD_DIR")]);

    let Session { mut client, .. } = start_server(ServerOptions::default());
    let mut params = create_initialize_params(Some(workspace.path()));
    params["initializationOptions"] = json!({"compilationDatabasePath": build.path()});
    client.initialize(params).await;

    let response = client
        .request(
            5,
            "textDocument/hover",
            create_hover_params(&file_uri(&source)),
        )
        .await;

    assert_eq!(
        response["result"]["settings"]["arguments"][0],
        "-DFROM_BUILD_DIR"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn build_system_none_provides_no_settings() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("a.c");
    write_compile_commands(temp_dir.path(), &[(&source, "-DX")]);

    let Session { mut client, .. } = start_server(ServerOptions {
        build_system: BuildSystemPreference::None,
        compilation_database_path: None,
    });
    client
        .initialize(create_initialize_params(Some(temp_dir.path())))
        .await;

    let response = client
        .request(
            6,
            "textDocument/hover",
            create_hover_params(&file_uri(&source)),
        )
        .await;

    assert_eq!(response["result"]["settings"], Value::Null);
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_before_initialize_are_rejected() {
    let Session { mut client, .. } = start_server(ServerOptions::default());

    let response = client
        .request(
            1,
            "textDocument/hover",
            create_hover_params(&Url::parse("file:///proj/a.c").unwrap()),
        )
        .await;

    assert_eq!(response["error"]["code"], -32002);
}

#[tokio::test(flavor = "multi_thread")]
async fn lifecycle_messages_are_logged_to_client() {
    let Session { mut client, .. } = start_server(ServerOptions::default());

    client.initialize(create_initialize_params(None)).await;
    let initializing = client.wait_for_method("window/logMessage").await;
    let initialized = client.wait_for_method("window/logMessage").await;

    assert_eq!(initializing["params"]["message"], "LSP server initializing");
    assert_eq!(initialized["params"]["message"], "LSP server initialized");
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_then_exit_exits_cleanly() {
    let Session {
        mut client, server, ..
    } = start_server(ServerOptions::default());
    client.initialize(create_initialize_params(None)).await;

    let response = client.request(7, "shutdown", Value::Null).await;
    assert_eq!(response["result"], Value::Null);
    assert!(response.get("error").is_none());

    let response = client
        .request(
            8,
            "textDocument/hover",
            create_hover_params(&Url::parse("file:///proj/a.c").unwrap()),
        )
        .await;
    assert_eq!(response["error"]["code"], -32600);

    client.send(&create_notification("exit", Value::Null)).await;
    assert_eq!(server.await.unwrap().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn exit_without_shutdown_is_an_error_exit() {
    let Session {
        mut client, server, ..
    } = start_server(ServerOptions::default());
    client.initialize(create_initialize_params(None)).await;

    client.send(&create_notification("exit", Value::Null)).await;

    assert_eq!(server.await.unwrap().unwrap(), 1);
}
