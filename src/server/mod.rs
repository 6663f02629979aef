//! Accepting connections, plain or over TLS.

pub mod listener;
pub mod tls;

pub use listener::{AcceptObserver, Listener, RunningListener, ServerError};
