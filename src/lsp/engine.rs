//! Boundary to the semantic analysis engine.
//!
//! The server never computes completions, hovers or formatting itself. It
//! resolves build settings for the target document and hands the request,
//! together with those settings, to an [`AnalysisEngine`].

use async_trait::async_trait;
use lsp_types::request::{
    Completion, DocumentHighlightRequest, Formatting, GotoDefinition, HoverRequest,
    OnTypeFormatting, RangeFormatting, References, Request,
};
use lsp_types::{
    CompletionParams, DidChangeTextDocumentParams, DocumentFormattingParams,
    DocumentHighlightParams, DocumentOnTypeFormattingParams, DocumentRangeFormattingParams,
    GotoDefinitionParams, HoverParams, ReferenceParams, TextDocumentItem, Url,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::build_system::FileBuildSettings;
use crate::protocol::messages::{SymbolInfoParams, SymbolInfoRequest};
use crate::protocol::{IncomingRequest, RequestId, ResponseError};

/// A request answered by the analysis engine
#[derive(Debug, Clone)]
pub enum SemanticRequest {
    Completion(CompletionParams),
    Hover(HoverParams),
    Definition(GotoDefinitionParams),
    References(ReferenceParams),
    DocumentHighlight(DocumentHighlightParams),
    Formatting(DocumentFormattingParams),
    RangeFormatting(DocumentRangeFormattingParams),
    OnTypeFormatting(DocumentOnTypeFormattingParams),
    SymbolInfo(SymbolInfoParams),
}

macro_rules! try_extract {
    ($request:expr, $($kind:ty => $variant:ident),+ $(,)?) => {{
        let request = $request;
        $(
            let request = match request.extract::<$kind>() {
                Ok((id, params)) => return Ok((id, SemanticRequest::$variant(params))),
                Err(request) => request,
            };
        )+
        Err(request)
    }};
}

impl SemanticRequest {
    /// Recovers a semantic request, handing back any other request untouched
    pub fn from_incoming(request: IncomingRequest) -> Result<(RequestId, Self), IncomingRequest> {
        try_extract!(
            request,
            Completion => Completion,
            HoverRequest => Hover,
            GotoDefinition => Definition,
            References => References,
            DocumentHighlightRequest => DocumentHighlight,
            Formatting => Formatting,
            RangeFormatting => RangeFormatting,
            OnTypeFormatting => OnTypeFormatting,
            SymbolInfoRequest => SymbolInfo,
        )
    }

    pub fn method(&self) -> &'static str {
        match self {
            SemanticRequest::Completion(_) => Completion::METHOD,
            SemanticRequest::Hover(_) => HoverRequest::METHOD,
            SemanticRequest::Definition(_) => GotoDefinition::METHOD,
            SemanticRequest::References(_) => References::METHOD,
            SemanticRequest::DocumentHighlight(_) => DocumentHighlightRequest::METHOD,
            SemanticRequest::Formatting(_) => Formatting::METHOD,
            SemanticRequest::RangeFormatting(_) => RangeFormatting::METHOD,
            SemanticRequest::OnTypeFormatting(_) => OnTypeFormatting::METHOD,
            SemanticRequest::SymbolInfo(_) => SymbolInfoRequest::METHOD,
        }
    }

    /// The document the request targets
    pub fn document(&self) -> &Url {
        match self {
            SemanticRequest::Completion(params) => &params.text_document_position.text_document.uri,
            SemanticRequest::Hover(params) => {
                &params.text_document_position_params.text_document.uri
            }
            SemanticRequest::Definition(params) => {
                &params.text_document_position_params.text_document.uri
            }
            SemanticRequest::References(params) => &params.text_document_position.text_document.uri,
            SemanticRequest::DocumentHighlight(params) => {
                &params.text_document_position_params.text_document.uri
            }
            SemanticRequest::Formatting(params) => &params.text_document.uri,
            SemanticRequest::RangeFormatting(params) => &params.text_document.uri,
            SemanticRequest::OnTypeFormatting(params) => {
                &params.text_document_position.text_document.uri
            }
            SemanticRequest::SymbolInfo(params) => &params.text_document.uri,
        }
    }
}

/// External semantic service fed with resolved build settings.
///
/// Document notifications default to no-ops so an engine only implements what
/// it tracks.
#[async_trait]
pub trait AnalysisEngine: Send + Sync + 'static {
    async fn document_opened(
        &self,
        _document: &TextDocumentItem,
        _settings: Option<&FileBuildSettings>,
    ) {
    }

    async fn document_changed(&self, _params: &DidChangeTextDocumentParams) {}

    async fn document_closed(&self, _uri: &Url) {}

    /// Called when the settings of an open document may have changed
    async fn build_settings_changed(&self, _uri: &Url, _settings: Option<&FileBuildSettings>) {}

    /// Answers a semantic request. `settings` is `None` when no build system
    /// could provide flags for the document.
    async fn handle(
        &self,
        request: SemanticRequest,
        settings: Option<FileBuildSettings>,
        cancel: CancellationToken,
    ) -> Result<Value, ResponseError>;
}

/// Engine that answers every request with `null`
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAnalysisEngine;

#[async_trait]
impl AnalysisEngine for NullAnalysisEngine {
    async fn handle(
        &self,
        _request: SemanticRequest,
        _settings: Option<FileBuildSettings>,
        _cancel: CancellationToken,
    ) -> Result<Value, ResponseError> {
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageRegistry;
    use serde_json::json;

    fn position_params(uri: &str) -> Value {
        json!({
            "textDocument": {"uri": uri},
            "position": {"line": 0, "character": 4}
        })
    }

    #[test]
    fn from_incoming_recognizes_semantic_requests() {
        let registry = MessageRegistry::builtin();
        let request = registry
            .decode_request(
                RequestId::Number(3),
                "textDocument/hover",
                position_params("file:///proj/a.c"),
            )
            .unwrap();

        let (id, semantic) = SemanticRequest::from_incoming(request).unwrap();

        assert_eq!(id, RequestId::Number(3));
        assert_eq!(semantic.method(), "textDocument/hover");
        assert_eq!(semantic.document().as_str(), "file:///proj/a.c");
    }

    #[test]
    fn from_incoming_reads_symbol_info_document() {
        let registry = MessageRegistry::builtin();
        let request = registry
            .decode_request(
                RequestId::from("s"),
                "textDocument/symbolInfo",
                position_params("file:///proj/b.c"),
            )
            .unwrap();

        let (_, semantic) = SemanticRequest::from_incoming(request).unwrap();

        assert!(matches!(semantic, SemanticRequest::SymbolInfo(_)));
        assert_eq!(semantic.document().as_str(), "file:///proj/b.c");
    }

    #[test]
    fn from_incoming_hands_back_lifecycle_requests() {
        let registry = MessageRegistry::builtin();
        let request = registry
            .decode_request(RequestId::Number(1), "shutdown", Value::Null)
            .unwrap();

        let request = SemanticRequest::from_incoming(request).unwrap_err();

        assert_eq!(request.method(), "shutdown");
    }
}
