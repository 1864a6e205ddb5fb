// Transport layer
// - codec.rs: Content-Length framing
// - connection.rs: duplex connection, dispatch loop and outgoing requests
// - correlation.rs: pending outgoing requests keyed by id
// - cancellation.rs: in-flight inbound requests and their cancellation tokens
// - error.rs: transport error types

pub mod cancellation;
pub mod codec;
pub mod connection;
pub mod correlation;
pub mod error;

pub use connection::{Connection, ConnectionState, MessageHandler, PendingResponse};
pub use error::{ConnectionError, RequestError};
