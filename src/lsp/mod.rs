// LSP server layer
// - server.rs: stdio entry point and testable serve loop
// - backend.rs: MessageHandler wiring requests to build settings
// - engine.rs: boundary to the external analysis engine
pub mod backend;
pub mod engine;
pub mod server;
