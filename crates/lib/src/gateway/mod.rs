//! Gateway: HTTP control plane for sessions.
//!
//! Thin glue over [`crate::sessions::SessionRegistry`]: create, inspect, delete, send, and
//! fetch the pairing code. Optional bearer-token auth on `/api`.

mod protocol;
mod server;

pub use protocol::{ApiError, CreateSessionRequest, CreatedView, SendRequest, SessionView};
pub use server::{router, run_gateway, run_gateway_with, GatewayState};
