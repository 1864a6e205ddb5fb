use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use lsp_types::notification::{
    DidChangeConfiguration, DidChangeTextDocument, DidChangeWatchedFiles,
    DidChangeWorkspaceFolders, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument,
    Exit, Initialized, LogMessage, WillSaveTextDocument,
};
use lsp_types::request::{Initialize, Shutdown};
use lsp_types::*;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::build_system::types::uri_to_file_path;
use crate::build_system::{
    BuildSystem, BuildSystemDelegate, FileBuildSettings, Language, ManifestBuildSystem,
};
use crate::config::ServerOptions;
use crate::lsp::engine::{AnalysisEngine, NullAnalysisEngine, SemanticRequest};
use crate::protocol::{IncomingNotification, IncomingRequest, ResponseError};
use crate::transport::{Connection, MessageHandler};

type OpenDocuments = Arc<Mutex<HashMap<Url, Language>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Initializing,
    Initialized,
    ShutDown,
}

pub struct Backend {
    connection: Connection,
    engine: Arc<dyn AnalysisEngine>,
    manifest: Option<Arc<dyn ManifestBuildSystem>>,
    defaults: ServerOptions,
    lifecycle: RwLock<Lifecycle>,
    build_system: RwLock<Option<Arc<BuildSystem>>>,
    documents: OpenDocuments,
    shutdown_received: AtomicBool,
}

impl Backend {
    pub fn new(connection: Connection, defaults: ServerOptions) -> Self {
        Self::build(connection, defaults, Arc::new(NullAnalysisEngine), None)
    }

    /// Build Backend with an injected analysis engine and manifest build system
    pub fn build(
        connection: Connection,
        defaults: ServerOptions,
        engine: Arc<dyn AnalysisEngine>,
        manifest: Option<Arc<dyn ManifestBuildSystem>>,
    ) -> Self {
        Self {
            connection,
            engine,
            manifest,
            defaults,
            lifecycle: RwLock::new(Lifecycle::Uninitialized),
            build_system: RwLock::new(None),
            documents: Arc::new(Mutex::new(HashMap::new())),
            shutdown_received: AtomicBool::new(false),
        }
    }

    pub fn server_capabilities() -> ServerCapabilities {
        ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Options(
                TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::INCREMENTAL),
                    ..Default::default()
                },
            )),
            completion_provider: Some(CompletionOptions::default()),
            hover_provider: Some(HoverProviderCapability::Simple(true)),
            definition_provider: Some(OneOf::Left(true)),
            references_provider: Some(OneOf::Left(true)),
            document_highlight_provider: Some(OneOf::Left(true)),
            document_formatting_provider: Some(OneOf::Left(true)),
            document_range_formatting_provider: Some(OneOf::Left(true)),
            ..Default::default()
        }
    }

    /// Process exit code: 0 once `shutdown` has been acknowledged, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.shutdown_received.load(Ordering::SeqCst) {
            0
        } else {
            1
        }
    }

    async fn build_system(&self) -> Option<Arc<BuildSystem>> {
        self.build_system.read().await.clone()
    }

    fn log_message(&self, typ: MessageType, message: impl Into<String>) {
        let params = LogMessageParams {
            typ,
            message: message.into(),
        };
        if let Err(e) = self.connection.send_notification::<LogMessage>(params) {
            debug!("Could not send window/logMessage: {}", e);
        }
    }

    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult, ResponseError> {
        self.log_message(MessageType::INFO, "LSP server initializing");

        let options = self
            .defaults
            .merged_with(params.initialization_options.as_ref());
        let workspace_root = workspace_root(&params);
        info!("Workspace root: {:?}", workspace_root);
        let project_root = options.compilation_database_path.clone().or(workspace_root);

        let build_system = Arc::new(
            BuildSystem::for_workspace(options.build_system, project_root, self.manifest.clone())
                .await,
        );
        let forwarder = SettingsChangeForwarder {
            build_system: Arc::downgrade(&build_system),
            engine: Arc::clone(&self.engine),
            documents: Arc::clone(&self.documents),
        };
        build_system.set_delegate(Some(Arc::new(forwarder))).await;
        *self.build_system.write().await = Some(build_system);

        Ok(InitializeResult {
            capabilities: Self::server_capabilities(),
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    /// Claims the single `initialize` of this session
    async fn begin_initialize(&self) -> Result<(), ResponseError> {
        let mut lifecycle = self.lifecycle.write().await;
        match *lifecycle {
            Lifecycle::Uninitialized => {
                *lifecycle = Lifecycle::Initializing;
                Ok(())
            }
            Lifecycle::ShutDown => Err(ResponseError::invalid_request("server is shutting down")),
            Lifecycle::Initializing | Lifecycle::Initialized => {
                Err(ResponseError::invalid_request("server is already initialized"))
            }
        }
    }

    async fn shutdown(&self) {
        self.log_message(MessageType::INFO, "LSP server shutting down");
        *self.lifecycle.write().await = Lifecycle::ShutDown;
        self.shutdown_received.store(true, Ordering::SeqCst);
        if let Some(build_system) = self.build_system().await {
            build_system.set_delegate(None).await;
        }
    }

    fn exit(&self) {
        info!(
            "Exit requested (shutdown received: {})",
            self.shutdown_received.load(Ordering::SeqCst)
        );
        self.connection.close();
    }

    async fn language_of(&self, uri: &Url) -> Language {
        if let Some(language) = self.documents.lock().await.get(uri) {
            return language.clone();
        }
        uri_to_file_path(uri)
            .and_then(|path| Language::from_path(&path))
            .unwrap_or_else(|| Language::Other("unknown".to_string()))
    }

    async fn forward(
        &self,
        request: SemanticRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ResponseError> {
        if cancel.is_cancelled() {
            return Err(ResponseError::request_cancelled());
        }

        let uri = request.document().clone();
        let settings = match self.build_system().await {
            Some(build_system) => {
                let language = self.language_of(&uri).await;
                build_system.build_settings(&uri, &language).await
            }
            None => None,
        };
        if settings.is_none() {
            debug!("No build settings for {} ({})", uri, request.method());
        }

        if cancel.is_cancelled() {
            return Err(ResponseError::request_cancelled());
        }
        self.engine.handle(request, settings, cancel).await
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        let language = Language::from_language_id(&document.language_id);
        debug!("Document opened: {} ({})", document.uri, language);

        self.documents
            .lock()
            .await
            .insert(document.uri.clone(), language.clone());

        let settings = match self.build_system().await {
            Some(build_system) => {
                build_system
                    .register_for_change_notifications(&document.uri, &language)
                    .await;
                build_system.build_settings(&document.uri, &language).await
            }
            None => None,
        };

        self.engine
            .document_opened(&document, settings.as_ref())
            .await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        debug!("Document closed: {}", uri);

        self.documents.lock().await.remove(&uri);
        if let Some(build_system) = self.build_system().await {
            build_system.unregister_for_change_notifications(&uri).await;
        }
        self.engine.document_closed(&uri).await;
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        let Some(build_system) = self.build_system().await else {
            return;
        };
        build_system.files_did_change(&params.changes).await;
    }
}

/// Root of the workspace: `rootUri`, else the deprecated `rootPath`, else the
/// first workspace folder
#[allow(deprecated)]
fn workspace_root(params: &InitializeParams) -> Option<PathBuf> {
    if let Some(root_uri) = params.root_uri.as_ref() {
        return uri_to_file_path(root_uri);
    }
    if let Some(root_path) = params.root_path.as_ref() {
        return Some(PathBuf::from(root_path));
    }
    params
        .workspace_folders
        .as_ref()
        .and_then(|folders| folders.first())
        .and_then(|folder| uri_to_file_path(&folder.uri))
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, ResponseError> {
    serde_json::to_value(value).map_err(ResponseError::internal_error)
}

#[async_trait]
impl MessageHandler for Backend {
    async fn handle_request(
        &self,
        request: IncomingRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ResponseError> {
        let request = match request.extract::<Initialize>() {
            Ok((_, params)) => {
                self.begin_initialize().await?;
                return match self.initialize(params).await {
                    Ok(result) => {
                        *self.lifecycle.write().await = Lifecycle::Initialized;
                        to_result(result)
                    }
                    Err(e) => {
                        *self.lifecycle.write().await = Lifecycle::Uninitialized;
                        Err(e)
                    }
                };
            }
            Err(request) => request,
        };

        match *self.lifecycle.read().await {
            Lifecycle::Uninitialized | Lifecycle::Initializing => {
                return Err(ResponseError::server_not_initialized());
            }
            Lifecycle::ShutDown => {
                return Err(ResponseError::invalid_request("server is shutting down"));
            }
            Lifecycle::Initialized => {}
        }

        let request = match request.extract::<Shutdown>() {
            Ok(_) => {
                self.shutdown().await;
                return Ok(Value::Null);
            }
            Err(request) => request,
        };

        match SemanticRequest::from_incoming(request) {
            Ok((_, semantic)) => self.forward(semantic, cancel).await,
            Err(request) => {
                debug!("No handler for request {}", request.method());
                Err(ResponseError::method_not_found(request.method()))
            }
        }
    }

    async fn handle_notification(&self, notification: IncomingNotification) {
        let notification = match notification.extract::<Exit>() {
            Ok(()) => {
                self.exit();
                return;
            }
            Err(notification) => notification,
        };

        if *self.lifecycle.read().await != Lifecycle::Initialized {
            debug!(
                "Dropping {} outside of an initialized session",
                notification.method()
            );
            return;
        }

        let notification = match notification.extract::<Initialized>() {
            Ok(_) => {
                self.log_message(MessageType::INFO, "LSP server initialized");
                return;
            }
            Err(notification) => notification,
        };

        let notification = match notification.extract::<DidOpenTextDocument>() {
            Ok(params) => return self.did_open(params).await,
            Err(notification) => notification,
        };

        let notification = match notification.extract::<DidCloseTextDocument>() {
            Ok(params) => return self.did_close(params).await,
            Err(notification) => notification,
        };

        let notification = match notification.extract::<DidChangeTextDocument>() {
            Ok(params) => return self.engine.document_changed(&params).await,
            Err(notification) => notification,
        };

        let notification = match notification.extract::<DidChangeWatchedFiles>() {
            Ok(params) => return self.did_change_watched_files(params).await,
            Err(notification) => notification,
        };

        if notification.is::<DidSaveTextDocument>()
            || notification.is::<WillSaveTextDocument>()
            || notification.is::<DidChangeConfiguration>()
            || notification.is::<DidChangeWorkspaceFolders>()
        {
            debug!("Ignoring {}", notification.method());
            return;
        }

        warn!("Unhandled notification {}", notification.method());
    }
}

/// Delegate that pushes re-resolved settings of open documents to the engine.
///
/// Holds the build system weakly: the build system owns this delegate.
struct SettingsChangeForwarder {
    build_system: Weak<BuildSystem>,
    engine: Arc<dyn AnalysisEngine>,
    documents: OpenDocuments,
}

#[async_trait]
impl BuildSystemDelegate for SettingsChangeForwarder {
    async fn file_build_settings_changed(&self, changed_files: HashSet<Url>) {
        let Some(build_system) = self.build_system.upgrade() else {
            return;
        };
        debug!("Build settings changed for {} files", changed_files.len());

        let open: Vec<(Url, Language)> = {
            let documents = self.documents.lock().await;
            changed_files
                .into_iter()
                .filter_map(|uri| {
                    let language = documents.get(&uri)?.clone();
                    Some((uri, language))
                })
                .collect()
        };

        for (uri, language) in open {
            let settings: Option<FileBuildSettings> =
                build_system.build_settings(&uri, &language).await;
            self.engine
                .build_settings_changed(&uri, settings.as_ref())
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageRegistry;
    use rstest::rstest;
    use serde_json::json;

    fn initialize_params(value: Value) -> InitializeParams {
        serde_json::from_value(value).unwrap()
    }

    #[rstest]
    #[case(json!({"capabilities": {}, "rootUri": "file:///from/uri", "rootPath": "/from/path"}), Some("/from/uri"))]
    #[case(json!({"capabilities": {}, "rootPath": "/from/path", "workspaceFolders": [{"uri": "file:///from/folder", "name": "f"}]}), Some("/from/path"))]
    #[case(json!({"capabilities": {}, "workspaceFolders": [{"uri": "file:///from/folder", "name": "f"}]}), Some("/from/folder"))]
    #[case(json!({"capabilities": {}}), None)]
    fn workspace_root_precedence(#[case] params: Value, #[case] expected: Option<&str>) {
        let root = workspace_root(&initialize_params(params));
        assert_eq!(root, expected.map(PathBuf::from));
    }

    #[tokio::test]
    async fn requests_before_initialize_are_rejected() {
        let backend = Backend::new(
            Connection::new(MessageRegistry::global()),
            ServerOptions::default(),
        );
        let request = MessageRegistry::global()
            .decode_request(
                1.into(),
                "textDocument/hover",
                json!({"textDocument": {"uri": "file:///a.c"}, "position": {"line": 0, "character": 0}}),
            )
            .unwrap();

        let err = backend
            .handle_request(request, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::protocol::ErrorCode::ServerNotInitialized);
        assert_eq!(backend.exit_code(), 1);
    }

    #[tokio::test]
    async fn concurrent_initialize_is_accepted_once() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let root = Url::from_file_path(temp_dir.path()).unwrap();
        let backend = Backend::new(
            Connection::new(MessageRegistry::global()),
            ServerOptions::default(),
        );
        let initialize = |id: i32| {
            MessageRegistry::global()
                .decode_request(
                    id.into(),
                    "initialize",
                    json!({"capabilities": {}, "rootUri": root}),
                )
                .unwrap()
        };

        let (first, second) = tokio::join!(
            backend.handle_request(initialize(1), CancellationToken::new()),
            backend.handle_request(initialize(2), CancellationToken::new()),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        let rejected = results
            .iter()
            .find_map(|result| result.as_ref().err())
            .unwrap();
        assert_eq!(rejected.kind(), crate::protocol::ErrorCode::InvalidRequest);
        assert_eq!(*backend.lifecycle.read().await, Lifecycle::Initialized);
    }
}
