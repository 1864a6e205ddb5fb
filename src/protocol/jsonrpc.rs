//! JSON-RPC 2.0 envelope types

use std::fmt;

use lsp_types::NumberOrString;
use lsp_types::notification::Notification;
use lsp_types::request::Request;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Protocol version carried in every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Identifier of a request, unique to the side that issued it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i32),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i32> for RequestId {
    fn from(id: i32) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

impl From<NumberOrString> for RequestId {
    fn from(id: NumberOrString) -> Self {
        match id {
            NumberOrString::Number(n) => RequestId::Number(n),
            NumberOrString::String(s) => RequestId::String(s),
        }
    }
}

impl From<RequestId> for NumberOrString {
    fn from(id: RequestId) -> Self {
        match id {
            RequestId::Number(n) => NumberOrString::Number(n),
            RequestId::String(s) => NumberOrString::String(s),
        }
    }
}

impl From<&RequestId> for Value {
    fn from(id: &RequestId) -> Self {
        match id {
            RequestId::Number(n) => Value::from(*n),
            RequestId::String(s) => Value::from(s.as_str()),
        }
    }
}

/// Error codes defined by JSON-RPC and LSP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerNotInitialized,
    UnknownErrorCode,
    RequestCancelled,
    ContentModified,
    /// Any code outside the well-known set
    ServerError(i32),
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerNotInitialized => -32002,
            ErrorCode::UnknownErrorCode => -32001,
            ErrorCode::RequestCancelled => -32800,
            ErrorCode::ContentModified => -32801,
            ErrorCode::ServerError(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            -32002 => ErrorCode::ServerNotInitialized,
            -32001 => ErrorCode::UnknownErrorCode,
            -32800 => ErrorCode::RequestCancelled,
            -32801 => ErrorCode::ContentModified,
            other => ErrorCode::ServerError(other),
        }
    }
}

/// Structured error carried in the `error` member of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn kind(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }

    pub fn parse_error(detail: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ParseError, format!("Parse error: {}", detail))
    }

    pub fn invalid_request(detail: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidRequest, format!("Invalid request: {}", detail))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(method: &str, detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidParams,
            format!("Invalid params for {}: {}", method, detail),
        )
    }

    pub fn internal_error(detail: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, detail.to_string())
    }

    pub fn server_not_initialized() -> Self {
        Self::new(ErrorCode::ServerNotInitialized, "Server not initialized")
    }

    pub fn request_cancelled() -> Self {
        Self::new(ErrorCode::RequestCancelled, "Request cancelled")
    }

    fn to_value(&self) -> Value {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let (Some(data), Value::Object(object)) = (&self.data, &mut error) {
            object.insert("data".to_string(), data.clone());
        }
        error
    }
}

/// Reply to a request, carrying exactly one of a result or an error
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` only when the request id could not be determined
    pub id: Option<RequestId>,
    pub outcome: Result<Value, ResponseError>,
}

impl Response {
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: Ok(result),
        }
    }

    pub fn error(id: Option<RequestId>, error: ResponseError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}

/// A decoded JSON-RPC envelope whose params are still untyped
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response(Response),
}

/// An envelope that cannot be classified as request, notification or response
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed message: {}", error.message)]
pub struct MalformedMessage {
    pub id: Option<RequestId>,
    pub error: ResponseError,
}

impl MalformedMessage {
    fn new(id: Option<RequestId>, detail: impl fmt::Display) -> Self {
        Self {
            id,
            error: ResponseError::invalid_request(detail),
        }
    }
}

impl Message {
    /// Builds a typed request envelope
    pub fn request<R: Request>(id: RequestId, params: &R::Params) -> serde_json::Result<Self> {
        Ok(Message::Request {
            id,
            method: R::METHOD.to_string(),
            params: serde_json::to_value(params)?,
        })
    }

    /// Builds a typed notification envelope
    pub fn notification<N: Notification>(params: &N::Params) -> serde_json::Result<Self> {
        Ok(Message::Notification {
            method: N::METHOD.to_string(),
            params: serde_json::to_value(params)?,
        })
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } | Message::Notification { method, .. } => Some(method),
            Message::Response(_) => None,
        }
    }

    /// Classifies a raw JSON value.
    ///
    /// A member `id` together with `method` makes a request, `method` alone a
    /// notification, and `result` or `error` without `method` a response. A
    /// `null` result is a valid response.
    pub fn from_value(value: Value) -> Result<Self, MalformedMessage> {
        let Value::Object(mut object) = value else {
            return Err(MalformedMessage::new(None, "expected a JSON object"));
        };

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<RequestId>(raw).map_err(|_| {
                MalformedMessage::new(None, "`id` must be an integer or a string")
            })?),
        };

        if let Some(version) = object.get("jsonrpc") {
            if version.as_str() != Some(JSONRPC_VERSION) {
                return Err(MalformedMessage::new(
                    id,
                    format!("unsupported jsonrpc version {}", version),
                ));
            }
        }

        let params = object.remove("params").unwrap_or(Value::Null);

        match object.remove("method") {
            Some(Value::String(method)) => Ok(match id {
                Some(id) => Message::Request { id, method, params },
                None => Message::Notification { method, params },
            }),
            Some(_) => Err(MalformedMessage::new(id, "`method` must be a string")),
            None => {
                if let Some(error) = object.remove("error") {
                    let error = serde_json::from_value::<ResponseError>(error).unwrap_or_else(|e| {
                        ResponseError::internal_error(format!("malformed error response: {}", e))
                    });
                    Ok(Message::Response(Response::error(id, error)))
                } else if let Some(result) = object.remove("result") {
                    Ok(Message::Response(Response { id, outcome: Ok(result) }))
                } else {
                    Err(MalformedMessage::new(
                        id,
                        "message has neither `method` nor `result`/`error`",
                    ))
                }
            }
        }
    }

    /// Serializes the envelope; `params` is omitted when null
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));

        match self {
            Message::Request { id, method, params } => {
                object.insert("id".to_string(), Value::from(id));
                object.insert("method".to_string(), Value::from(method.as_str()));
                if !params.is_null() {
                    object.insert("params".to_string(), params.clone());
                }
            }
            Message::Notification { method, params } => {
                object.insert("method".to_string(), Value::from(method.as_str()));
                if !params.is_null() {
                    object.insert("params".to_string(), params.clone());
                }
            }
            Message::Response(response) => {
                let id = response.id.as_ref().map(Value::from).unwrap_or(Value::Null);
                object.insert("id".to_string(), id);
                match &response.outcome {
                    Ok(result) => {
                        object.insert("result".to_string(), result.clone());
                    }
                    Err(error) => {
                        object.insert("error".to_string(), error.to_value());
                    }
                }
            }
        }

        Value::Object(object)
    }
}
