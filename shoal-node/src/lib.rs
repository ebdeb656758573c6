//! HTTP facade for Shoal: axum routers exposing the index and peer RPC
//! surfaces over localhost HTTP.
//!
//! Control responses carry application status codes in their JSON
//! bodies; chunk bodies are raw bytes with the HTTP status carrying
//! found/not-found.

pub mod index_server;
pub mod peer_server;

pub use index_server::{index_router, serve_index};
pub use peer_server::{peer_router, serve_peer};
