//! HTTP protocol implementation.
//!
//! This module implements an HTTP/1.x request server core with support for
//! keep-alive and pipelined requests.
//!
//! # Architecture
//!
//! The HTTP layer is organized into several submodules:
//!
//! - **`buffer`**: Fixed-capacity per-connection receive buffer with left-compaction
//! - **`parser`**: Incremental request parser state machine
//! - **`query`**: Query string decoding
//! - **`request`**: HTTP request representation and header multimap
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes and writes HTTP responses to the client
//! - **`connection`**: Drives the parser from a stream and manages the connection lifecycle
//!
//! # Connection State Machine
//!
//! Each client connection loops over the following steps:
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Read into the buffer after any unconsumed bytes
//!        └──────┬──────┘
//!               │ Bytes received
//!               ▼
//!        ┌──────────────────┐
//!        │   Draining       │ ← Parse, dispatch and answer every complete request
//!        └──────┬───────────┘
//!               │ No complete request left
//!               ▼
//!        ┌──────────────────┐
//!        │   Compacting     │ ← Move the partial tail to offset 0
//!        └──────┬───────────┘
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close / EOF / error / timeout → Disconnected
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use weir::http::connection::{ClientInfo, Connection, ConnectionOptions};
//! use weir::router::Router;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     let router = Arc::new(Router::new());
//!
//!     loop {
//!         let (socket, peer) = listener.accept().await?;
//!         let info = ClientInfo { id: 0, remote_addr: peer, secure: false };
//!         let conn = Connection::new(socket, info, router.clone(), &ConnectionOptions::default());
//!         tokio::spawn(conn.run());
//!     }
//! }
//! ```

pub mod buffer;
pub mod connection;
pub mod parser;
pub mod query;
pub mod request;
pub mod response;
pub mod writer;
