//! Shared test fixtures for the semantic query workspace.
//!
//! [`MockSemanticServer`] is a scripted WebSocket endpoint that behaves like
//! the upstream semantic service: it records the handshake URI and every
//! text message it receives, and replays a fixed set of frames each time the
//! client sends the end-of-utterance token.

mod server;

pub use server::{MockError, MockResult, MockSemanticServer, Script, content_frame};
