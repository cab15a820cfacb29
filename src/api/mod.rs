//! Crash table API
//!
//! HTTP endpoints for betting, cashouts and wallet queries, plus the live
//! round feed over WebSocket.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{shutdown_signal, ApiServer};
