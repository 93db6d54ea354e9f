//! JSON-RPC 2.0 surface
//!
//! One JSON object per line on stdin, one response per line on stdout.
//! Requests are handled concurrently; responses may arrive out of order
//! and are matched by `id`.

pub mod methods;
pub mod protocol;
pub mod server;
pub mod transport;

pub use protocol::*;
pub use server::{serve, ServeLimits, ServiceHandle};
