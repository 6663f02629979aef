//! Weir - Embeddable HTTP/1.x Server Core
//!
//! Incremental request parsing, per-connection state machines, an accept
//! loop with optional TLS, signature-based routing and a slot-limited
//! transfer pipeline.

pub mod config;
pub mod http;
pub mod router;
pub mod server;
pub mod transfer;
