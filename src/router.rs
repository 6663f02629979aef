//! Request routing by `(method, content-type, path-pattern)` signature.
//!
//! Handlers live in an immutable snapshot. Registration and removal build a
//! new slice and swap it in, so routing only clones an `Arc` and never holds
//! a lock while a handler runs.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};

use crate::http::connection::{ClientInfo, DisconnectReason, RequestHandler};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};

/// Callback invoked for a matched request.
pub type HandlerCallback =
    Arc<dyn Fn(&ClientInfo, &Request) -> anyhow::Result<Response> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("invalid path pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// The `(method, content-type, path)` triple of a request or a handler.
///
/// On a handler, empty fields match anything and `path` is a
/// case-insensitive regular expression searched in the request's path and
/// query.
#[derive(Clone)]
pub struct RequestSignature {
    method: String,
    content_type: String,
    path: String,
    pattern: Option<Regex>,
}

impl RequestSignature {
    /// Builds a handler signature, compiling `path` as a pattern.
    pub fn new(method: &str, content_type: &str, path: &str) -> Result<Self, RouterError> {
        let pattern = if path.is_empty() {
            None
        } else {
            let regex = RegexBuilder::new(path)
                .case_insensitive(true)
                .build()
                .map_err(|source| RouterError::InvalidPattern {
                    pattern: path.to_string(),
                    source,
                })?;
            Some(regex)
        };

        Ok(Self {
            method: method.to_ascii_uppercase(),
            content_type: content_type.to_ascii_lowercase(),
            path: path.to_string(),
            pattern,
        })
    }

    /// Signature of an incoming request.
    pub fn from_request(request: &Request) -> Self {
        let path = match &request.uri {
            Some(uri) => match uri.query() {
                Some(query) => format!("{}?{}", uri.path(), query),
                None => uri.path().to_string(),
            },
            None => request.uri_path.clone(),
        };

        Self {
            method: request.method.as_str().to_ascii_uppercase(),
            content_type: request.content_type(),
            path,
            pattern: None,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Field-by-field equality, pattern text compared literally.
    pub fn exactly_equals(&self, other: &RequestSignature) -> bool {
        self.method == other.method
            && self.content_type == other.content_type
            && self.path == other.path
    }

    /// Whether `request` satisfies this signature used as a pattern.
    pub fn matches(&self, request: &RequestSignature) -> bool {
        let method_match = self.method.is_empty() || self.method == request.method;
        let content_type_match =
            self.content_type.is_empty() || self.content_type == request.content_type;
        let path_match = match &self.pattern {
            Some(pattern) => pattern.is_match(&request.path),
            None => true,
        };
        method_match && content_type_match && path_match
    }
}

impl PartialEq for RequestSignature {
    fn eq(&self, other: &Self) -> bool {
        self.exactly_equals(other)
    }
}

impl Eq for RequestSignature {}

impl fmt::Debug for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} Content-Type: {}",
            self.method, self.path, self.content_type
        )
    }
}

/// A signature pattern paired with the callback serving it.
#[derive(Clone)]
pub struct RegisteredHandler {
    pub signature: RequestSignature,
    pub callback: HandlerCallback,
}

impl RegisteredHandler {
    pub fn new<F>(signature: RequestSignature, callback: F) -> Self
    where
        F: Fn(&ClientInfo, &Request) -> anyhow::Result<Response> + Send + Sync + 'static,
    {
        Self {
            signature,
            callback: Arc::new(callback),
        }
    }
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

pub struct Router {
    handlers: RwLock<Arc<[RegisteredHandler]>>,
    not_found: RwLock<Option<HandlerCallback>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Arc::from(Vec::<RegisteredHandler>::new())),
            not_found: RwLock::new(None),
        }
    }

    /// Registers a callback for requests matching the given signature.
    /// Empty strings act as wildcards.
    pub fn add_handler<F>(
        &self,
        method: &str,
        content_type: &str,
        path: &str,
        callback: F,
    ) -> Result<(), RouterError>
    where
        F: Fn(&ClientInfo, &Request) -> anyhow::Result<Response> + Send + Sync + 'static,
    {
        let signature = RequestSignature::new(method, content_type, path)?;
        self.add(RegisteredHandler::new(signature, callback));
        Ok(())
    }

    pub fn add(&self, handler: RegisteredHandler) {
        tracing::debug!(signature = ?handler.signature, "Registering request handler");

        let mut handlers = self.handlers.write();
        let mut next = handlers.to_vec();
        next.push(handler);
        *handlers = Arc::from(next);
    }

    /// Removes every handler whose signature exactly equals `signature`.
    /// Returns whether anything was removed.
    pub fn remove(&self, signature: &RequestSignature) -> bool {
        let mut handlers = self.handlers.write();
        let next: Vec<_> = handlers
            .iter()
            .filter(|h| !h.signature.exactly_equals(signature))
            .cloned()
            .collect();

        let removed = next.len() != handlers.len();
        *handlers = Arc::from(next);
        removed
    }

    /// Overrides the built-in 404 response; `None` restores it.
    pub fn set_not_found_handler(&self, callback: Option<HandlerCallback>) {
        *self.not_found.write() = callback;
    }

    /// Current handler snapshot, in registration order.
    pub fn handlers(&self) -> Arc<[RegisteredHandler]> {
        Arc::clone(&self.handlers.read())
    }

    /// Runs the first handler matching `request`, falling back to the
    /// not-found handler and then to a generated 404.
    pub fn route(&self, client: &ClientInfo, request: &Request) -> Response {
        let signature = RequestSignature::from_request(request);
        let handlers = self.handlers();

        if let Some(handler) = handlers.iter().find(|h| h.signature.matches(&signature)) {
            return fire(&handler.callback, client, request);
        }

        let not_found = self.not_found.read().clone();
        match not_found {
            Some(callback) => fire(&callback, client, request),
            None => default_not_found(&signature),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestHandler for Router {
    fn on_request(&self, client: &ClientInfo, request: Request) -> Response {
        self.route(client, &request)
    }

    fn on_disconnect(&self, client: &ClientInfo, reason: DisconnectReason) {
        tracing::trace!(client = client.id, reason = %reason, "Client left");
    }
}

fn fire(callback: &HandlerCallback, client: &ClientInfo, request: &Request) -> Response {
    match callback(client, request) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(
                method = %request.method,
                path = %request.uri_path,
                error = %e,
                "Exception in HTTP handler"
            );
            Response::internal_error()
        }
    }
}

fn default_not_found(signature: &RequestSignature) -> Response {
    let reason = format!(
        "No request handler registered for Method=\"{}\", Content-Type=\"{}\", Path=\"{}\"",
        signature.method, signature.content_type, signature.path
    );
    let body = format!(
        "<html><head><title>Page Not Found</title></head><body><h3>{reason}</h3></body></html>"
    );

    Response::new(StatusCode::NotFound)
        .reason(reason)
        .header("Content-Type", "text/html")
        .body(body)
        .build()
}
