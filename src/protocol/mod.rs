// Message protocol layer
// - jsonrpc.rs: JSON-RPC 2.0 envelope, request ids and error codes
// - registry.rs: method name to message shape table
// - messages.rs: built-in message set and protocol extensions

pub mod jsonrpc;
pub mod messages;
pub mod registry;

pub use jsonrpc::{ErrorCode, Message, RequestId, Response, ResponseError};
pub use registry::{
    IncomingNotification, IncomingRequest, MessageKind, MessageRegistry, MethodDescriptor,
    RegistryError,
};
