//! HTTP API: the service the remote repositories talk to.

pub mod auth;
pub mod server;
pub mod types;

pub use server::{ApiState, router, shutdown, start_server};
