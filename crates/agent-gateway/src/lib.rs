//! Agent Gateway — the Axum HTTP + WebSocket surface re-exposing `RunStream`
//! to remote clients (§6.1).

pub mod auth;
pub mod protocol;
pub mod server;
pub mod state;
pub mod ws;

pub use server::{start_gateway, ExtendedConfig};
