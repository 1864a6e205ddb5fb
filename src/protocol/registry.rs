//! Method registry mapping wire method names to typed message shapes
//!
//! Requests and notifications live in the same name space but are decoded through
//! separate entry points, so a request payload can never be decoded as a
//! notification and vice versa. Decoded params are type-erased and recovered with
//! [`IncomingRequest::extract`] / [`IncomingNotification::extract`].

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use lsp_types::notification::Notification;
use lsp_types::request::Request;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::jsonrpc::{RequestId, ResponseError};
use crate::protocol::messages;

type DecodeFn = fn(Value) -> Result<Box<dyn Any + Send>, serde_json::Error>;

/// Direction of a registered method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Expects exactly one response
    Request,
    /// Fire-and-forget
    Notification,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Request => write!(f, "request"),
            MessageKind::Notification => write!(f, "notification"),
        }
    }
}

/// Shape of a single method: its name, direction, params type and (for requests)
/// response type
#[derive(Clone)]
pub struct MethodDescriptor {
    method: &'static str,
    kind: MessageKind,
    params_type: TypeId,
    params_type_name: &'static str,
    response_type: Option<TypeId>,
    response_type_name: Option<&'static str>,
    decode: DecodeFn,
}

impl MethodDescriptor {
    pub fn request<R>() -> Self
    where
        R: Request,
        R::Params: Send + 'static,
        R::Result: 'static,
    {
        Self {
            method: R::METHOD,
            kind: MessageKind::Request,
            params_type: TypeId::of::<R::Params>(),
            params_type_name: type_name::<R::Params>(),
            response_type: Some(TypeId::of::<R::Result>()),
            response_type_name: Some(type_name::<R::Result>()),
            decode: decode_params::<R::Params>,
        }
    }

    pub fn notification<N>() -> Self
    where
        N: Notification,
        N::Params: Send + 'static,
    {
        Self {
            method: N::METHOD,
            kind: MessageKind::Notification,
            params_type: TypeId::of::<N::Params>(),
            params_type_name: type_name::<N::Params>(),
            response_type: None,
            response_type_name: None,
            decode: decode_params::<N::Params>,
        }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn response_type_name(&self) -> Option<&'static str> {
        self.response_type_name
    }

    fn same_shape(&self, other: &MethodDescriptor) -> bool {
        self.kind == other.kind
            && self.params_type == other.params_type
            && self.response_type == other.response_type
    }

    fn shape(&self) -> String {
        match self.response_type_name {
            Some(response) => format!("{}({}) -> {}", self.kind, self.params_type_name, response),
            None => format!("{}({})", self.kind, self.params_type_name),
        }
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("method", &self.method)
            .field("shape", &self.shape())
            .finish()
    }
}

/// Deserializes params, treating absent params as an empty object when the
/// type does not accept `null` (e.g. `initialized` sent without params).
fn decode_params<P>(params: Value) -> Result<Box<dyn Any + Send>, serde_json::Error>
where
    P: DeserializeOwned + Send + 'static,
{
    let is_null = params.is_null();
    match serde_json::from_value::<P>(params) {
        Ok(decoded) => Ok(Box::new(decoded)),
        Err(_) if is_null => {
            serde_json::from_value::<P>(Value::Object(Default::default()))
                .map(|decoded| Box::new(decoded) as Box<dyn Any + Send>)
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("method `{method}` is already registered as {existing}, refusing to bind it to {requested}")]
    Conflict {
        method: String,
        existing: String,
        requested: String,
    },
}

/// A request whose params were decoded according to its registered shape
pub struct IncomingRequest {
    id: RequestId,
    method: &'static str,
    params: Box<dyn Any + Send>,
}

impl IncomingRequest {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn is<R: Request>(&self) -> bool
    where
        R::Params: 'static,
    {
        self.method == R::METHOD && self.params.is::<R::Params>()
    }

    /// Recovers the typed params, handing the request back if it is of another type
    pub fn extract<R: Request>(self) -> Result<(RequestId, R::Params), Self>
    where
        R::Params: 'static,
    {
        if self.method != R::METHOD {
            return Err(self);
        }
        let Self { id, method, params } = self;
        match params.downcast::<R::Params>() {
            Ok(params) => Ok((id, *params)),
            Err(params) => Err(Self { id, method, params }),
        }
    }
}

impl fmt::Debug for IncomingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// A notification whose params were decoded according to its registered shape
pub struct IncomingNotification {
    method: &'static str,
    params: Box<dyn Any + Send>,
}

impl IncomingNotification {
    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn is<N: Notification>(&self) -> bool
    where
        N::Params: 'static,
    {
        self.method == N::METHOD && self.params.is::<N::Params>()
    }

    pub fn extract<N: Notification>(self) -> Result<N::Params, Self>
    where
        N::Params: 'static,
    {
        if self.method != N::METHOD {
            return Err(self);
        }
        let Self { method, params } = self;
        match params.downcast::<N::Params>() {
            Ok(params) => Ok(*params),
            Err(params) => Err(Self { method, params }),
        }
    }
}

impl fmt::Debug for IncomingNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingNotification")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Table of known methods.
///
/// Production code shares the frozen [`MessageRegistry::global`] instance; tests
/// and extensions build their own with [`MessageRegistry::builtin`] or
/// [`MessageRegistry::new`] and register additional methods on it.
#[derive(Debug, Clone, Default)]
pub struct MessageRegistry {
    methods: HashMap<&'static str, MethodDescriptor>,
}

impl MessageRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in message set
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_all(messages::builtin_requests());
        registry.register_all(messages::builtin_notifications());
        registry
    }

    /// Process-wide registry built once from the built-in message set
    pub fn global() -> Arc<MessageRegistry> {
        static GLOBAL: OnceLock<Arc<MessageRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(MessageRegistry::builtin()))
            .clone()
    }

    /// Binds a method. Re-registering the same shape is a no-op; binding a
    /// different shape to a known name fails.
    pub fn register(&mut self, descriptor: MethodDescriptor) -> Result<(), RegistryError> {
        if let Some(existing) = self.methods.get(descriptor.method) {
            if existing.same_shape(&descriptor) {
                return Ok(());
            }
            return Err(RegistryError::Conflict {
                method: descriptor.method.to_string(),
                existing: existing.shape(),
                requested: descriptor.shape(),
            });
        }
        self.methods.insert(descriptor.method, descriptor);
        Ok(())
    }

    pub fn register_request<R>(&mut self) -> Result<(), RegistryError>
    where
        R: Request,
        R::Params: Send + 'static,
        R::Result: 'static,
    {
        self.register(MethodDescriptor::request::<R>())
    }

    pub fn register_notification<N>(&mut self) -> Result<(), RegistryError>
    where
        N: Notification,
        N::Params: Send + 'static,
    {
        self.register(MethodDescriptor::notification::<N>())
    }

    /// Binds a method unconditionally, shadowing any previous binding.
    ///
    /// Intended for tests and protocol extensions; returns the shadowed descriptor.
    pub fn register_override(&mut self, descriptor: MethodDescriptor) -> Option<MethodDescriptor> {
        debug!("Overriding registration for {}", descriptor.method);
        self.methods.insert(descriptor.method, descriptor)
    }

    /// Bulk registration that logs and skips conflicting entries
    fn register_all(&mut self, descriptors: Vec<MethodDescriptor>) {
        for descriptor in descriptors {
            if let Err(e) = self.register(descriptor) {
                warn!("Skipping built-in method: {}", e);
            }
        }
    }

    pub fn descriptor(&self, method: &str) -> Option<&MethodDescriptor> {
        self.methods.get(method)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn decode_request(
        &self,
        id: RequestId,
        method: &str,
        params: Value,
    ) -> Result<IncomingRequest, ResponseError> {
        let descriptor = self.lookup(method, MessageKind::Request)?;
        let params = (descriptor.decode)(params)
            .map_err(|e| ResponseError::invalid_params(method, e))?;
        Ok(IncomingRequest {
            id,
            method: descriptor.method,
            params,
        })
    }

    pub fn decode_notification(
        &self,
        method: &str,
        params: Value,
    ) -> Result<IncomingNotification, ResponseError> {
        let descriptor = self.lookup(method, MessageKind::Notification)?;
        let params = (descriptor.decode)(params)
            .map_err(|e| ResponseError::invalid_params(method, e))?;
        Ok(IncomingNotification {
            method: descriptor.method,
            params,
        })
    }

    fn lookup(&self, method: &str, kind: MessageKind) -> Result<&MethodDescriptor, ResponseError> {
        match self.methods.get(method) {
            Some(descriptor) if descriptor.kind == kind => Ok(descriptor),
            Some(descriptor) => {
                debug!(
                    "{} received for {} method {}",
                    kind, descriptor.kind, method
                );
                Err(ResponseError::method_not_found(method))
            }
            None => Err(ResponseError::method_not_found(method)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::jsonrpc::ErrorCode;
    use lsp_types::notification::{Cancel, DidOpenTextDocument, Exit, Initialized};
    use lsp_types::request::{HoverRequest, Initialize, Shutdown};
    use lsp_types::{CancelParams, NumberOrString};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    enum AlternateHover {}

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct AlternateHoverParams {
        word: String,
    }

    impl Request for AlternateHover {
        type Params = AlternateHoverParams;
        type Result = String;
        const METHOD: &'static str = "textDocument/hover";
    }

    #[test]
    fn builtin_registry_knows_lifecycle_methods() {
        let registry = MessageRegistry::builtin();

        assert_eq!(
            registry.descriptor("initialize").map(|d| d.kind()),
            Some(MessageKind::Request)
        );
        assert_eq!(
            registry.descriptor("exit").map(|d| d.kind()),
            Some(MessageKind::Notification)
        );
        assert!(registry.contains("$/cancelRequest"));
        assert!(registry.contains("textDocument/symbolInfo"));
    }

    #[test]
    fn decode_unknown_method_is_method_not_found() {
        let registry = MessageRegistry::builtin();

        let err = registry
            .decode_request(RequestId::Number(1), "textDocument/unknown", json!({}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorCode::MethodNotFound);

        let err = registry
            .decode_notification("$/unknownNotification", Value::Null)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorCode::MethodNotFound);
    }

    #[test]
    fn decode_never_mixes_requests_and_notifications() {
        let registry = MessageRegistry::builtin();

        let err = registry
            .decode_request(RequestId::Number(1), "exit", Value::Null)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorCode::MethodNotFound);

        let err = registry
            .decode_notification("shutdown", Value::Null)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorCode::MethodNotFound);
    }

    #[test]
    fn decode_mismatched_params_is_invalid_params() {
        let registry = MessageRegistry::builtin();

        let err = registry
            .decode_notification("$/cancelRequest", json!({"id": {"nested": true}}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorCode::InvalidParams);
    }

    #[test]
    fn decode_accepts_missing_params_for_empty_structs() {
        let registry = MessageRegistry::builtin();

        let notification = registry
            .decode_notification("initialized", Value::Null)
            .unwrap();
        assert!(notification.is::<Initialized>());

        let request = registry
            .decode_request(RequestId::Number(2), "shutdown", Value::Null)
            .unwrap();
        assert!(request.is::<Shutdown>());
    }

    #[test]
    fn extract_returns_typed_params() {
        let registry = MessageRegistry::builtin();

        let notification = registry
            .decode_notification("$/cancelRequest", json!({"id": 12}))
            .unwrap();
        let notification = notification.extract::<Exit>().unwrap_err();
        let params = notification.extract::<Cancel>().unwrap();

        assert_eq!(
            params,
            CancelParams {
                id: NumberOrString::Number(12)
            }
        );
    }

    #[test]
    fn extract_hands_back_request_of_other_type() {
        let registry = MessageRegistry::builtin();

        let request = registry
            .decode_request(RequestId::Number(5), "shutdown", Value::Null)
            .unwrap();
        let request = request.extract::<Initialize>().unwrap_err();
        let (id, ()) = request.extract::<Shutdown>().unwrap();

        assert_eq!(id, RequestId::Number(5));
    }

    #[test]
    fn register_same_shape_twice_is_idempotent() {
        let mut registry = MessageRegistry::new();

        registry.register_request::<HoverRequest>().unwrap();
        registry.register_request::<HoverRequest>().unwrap();

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_conflicting_shape_fails() {
        let mut registry = MessageRegistry::builtin();

        let err = registry.register_request::<AlternateHover>().unwrap_err();

        assert!(matches!(err, RegistryError::Conflict { ref method, .. } if method == "textDocument/hover"));
        assert!(registry.descriptor("textDocument/hover").is_some());
    }

    #[test]
    fn register_conflicting_kind_fails() {
        let mut registry = MessageRegistry::new();
        registry.register_notification::<DidOpenTextDocument>().unwrap();

        enum DidOpenAsRequest {}
        impl Request for DidOpenAsRequest {
            type Params = lsp_types::DidOpenTextDocumentParams;
            type Result = ();
            const METHOD: &'static str = "textDocument/didOpen";
        }

        assert!(registry.register_request::<DidOpenAsRequest>().is_err());
    }

    #[test]
    fn register_override_shadows_previous_binding() {
        let mut registry = MessageRegistry::builtin();

        let shadowed = registry.register_override(MethodDescriptor::request::<AlternateHover>());
        assert!(shadowed.is_some());

        let request = registry
            .decode_request(RequestId::Number(1), "textDocument/hover", json!({"word": "main"}))
            .unwrap();
        let (_, params) = request.extract::<AlternateHover>().unwrap();
        assert_eq!(params.word, "main");
    }

    #[test]
    fn isolated_registries_do_not_affect_global() {
        let mut registry = MessageRegistry::builtin();
        registry.register_override(MethodDescriptor::request::<AlternateHover>());

        let global = MessageRegistry::global();
        let err = global
            .decode_request(RequestId::Number(1), "textDocument/hover", json!({"word": "main"}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorCode::InvalidParams);
    }
}
