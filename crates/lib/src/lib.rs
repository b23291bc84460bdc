//! Relay core library: session lifecycle, message relay, and the HTTP gateway
//! used by the relay CLI.

pub mod config;
pub mod gateway;
pub mod init;
pub mod relay;
pub mod sessions;
pub mod transport;
