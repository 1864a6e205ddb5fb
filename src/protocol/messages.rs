//! Built-in message set
//!
//! Every request and notification the server understands is listed here. Methods
//! used only by tests should be registered on an isolated registry instead of
//! being added to these lists.

use lsp_types::notification::{
    Cancel, DidChangeConfiguration, DidChangeTextDocument, DidChangeWatchedFiles,
    DidChangeWorkspaceFolders, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument,
    Exit, Initialized, LogMessage, PublishDiagnostics, WillSaveTextDocument,
};
use lsp_types::request::{
    Completion, DocumentHighlightRequest, Formatting, GotoDefinition, HoverRequest, Initialize,
    OnTypeFormatting, RangeFormatting, References, Request, Shutdown, WorkspaceFoldersRequest,
};
use lsp_types::{Location, SymbolKind, TextDocumentPositionParams};
use serde::{Deserialize, Serialize};

use crate::protocol::registry::MethodDescriptor;

pub fn builtin_requests() -> Vec<MethodDescriptor> {
    vec![
        MethodDescriptor::request::<Initialize>(),
        MethodDescriptor::request::<Shutdown>(),
        MethodDescriptor::request::<WorkspaceFoldersRequest>(),
        MethodDescriptor::request::<Completion>(),
        MethodDescriptor::request::<HoverRequest>(),
        MethodDescriptor::request::<GotoDefinition>(),
        MethodDescriptor::request::<References>(),
        MethodDescriptor::request::<DocumentHighlightRequest>(),
        MethodDescriptor::request::<Formatting>(),
        MethodDescriptor::request::<RangeFormatting>(),
        MethodDescriptor::request::<OnTypeFormatting>(),
        // Extensions
        MethodDescriptor::request::<SymbolInfoRequest>(),
    ]
}

pub fn builtin_notifications() -> Vec<MethodDescriptor> {
    vec![
        MethodDescriptor::notification::<Initialized>(),
        MethodDescriptor::notification::<Exit>(),
        MethodDescriptor::notification::<Cancel>(),
        MethodDescriptor::notification::<LogMessage>(),
        MethodDescriptor::notification::<DidChangeConfiguration>(),
        MethodDescriptor::notification::<DidChangeWorkspaceFolders>(),
        MethodDescriptor::notification::<DidOpenTextDocument>(),
        MethodDescriptor::notification::<DidCloseTextDocument>(),
        MethodDescriptor::notification::<DidChangeTextDocument>(),
        MethodDescriptor::notification::<DidSaveTextDocument>(),
        MethodDescriptor::notification::<WillSaveTextDocument>(),
        MethodDescriptor::notification::<PublishDiagnostics>(),
        MethodDescriptor::notification::<DidChangeWatchedFiles>(),
    ]
}

/// `textDocument/symbolInfo`: describes the symbol under the cursor
#[derive(Debug)]
pub enum SymbolInfoRequest {}

pub type SymbolInfoParams = TextDocumentPositionParams;

impl Request for SymbolInfoRequest {
    type Params = SymbolInfoParams;
    type Result = Vec<SymbolDetails>;
    const METHOD: &'static str = "textDocument/symbolInfo";
}

/// Details of one symbol returned by `textDocument/symbolInfo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Unified symbol resolution identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_local_declaration: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SymbolKind>,
}
