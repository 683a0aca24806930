/// JSON-RPC access to a running collective
///
/// This module provides:
/// - Request, response and notification envelopes
/// - A method dispatcher over [`collective_core::Collective`]
/// - An HTTP server exposing `POST /rpc`, `GET /events` (SSE) and `GET /health`
pub mod handlers;
pub mod protocol;
pub mod server;
