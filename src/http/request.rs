use std::net::SocketAddr;

use bytes::Bytes;
use url::Url;

use crate::http::query::{parse_query_string, QueryParams};

/// HTTP request methods.
///
/// The well-known verbs get their own variant; any other token that is a
/// valid method name is kept as an extension method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// Any other method token, stored upper-cased
    Extension(String),
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, typically uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use weir::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    /// Builds a method from a request-line token, upper-casing it first.
    ///
    /// Returns `None` when the token is empty or contains characters that
    /// are not allowed in a method name.
    pub fn from_token(token: &str) -> Option<Self> {
        if token.is_empty() || !token.bytes().all(is_token_char) {
            return None;
        }
        let upper = token.to_ascii_uppercase();
        Some(Self::from_str(&upper).unwrap_or(Method::Extension(upper)))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::Extension(name) => name,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Value of the `Connection` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Close,
    KeepAlive,
}

/// Request header multimap.
///
/// Names compare case-insensitively, insertion order is kept and repeated
/// headers are all retained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Represents a parsed HTTP request from a client.
///
/// Contains all information extracted from the request line and headers.
/// The body field contains any request entity (e.g., for POST/PUT requests).
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Path and query exactly as sent on the request line (e.g., "/index.html?x=1")
    pub uri_path: String,
    /// The path without the query string
    pub path: String,
    /// Decoded query string parameters
    pub query: QueryParams,
    /// HTTP version (typically "HTTP/1.1")
    pub version: String,
    /// Request headers
    pub headers: Headers,
    /// Declared Content-Length, 0 when absent
    pub content_length: usize,
    /// Request body
    pub body: Bytes,
    /// Full request URI, built from the Host header and the path
    pub uri: Option<Url>,
    /// Parsed `Connection` header, if any
    pub connection: Option<ConnectionType>,
    /// Values of the `Accept` header, split on commas
    pub accept_types: Vec<String>,
    /// Whether the request was sent by `XMLHttpRequest`
    pub is_ajax: bool,
    /// Whether the request arrived over TLS
    pub secure: bool,
    /// Remote peer, filled in by the connection
    pub remote_addr: Option<SocketAddr>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::GET,
            uri_path: String::new(),
            path: String::new(),
            query: QueryParams::new(),
            version: String::new(),
            headers: Headers::new(),
            content_length: 0,
            body: Bytes::new(),
            uri: None,
            connection: None,
            accept_types: Vec::new(),
            is_ajax: false,
            secure: false,
            remote_addr: None,
        }
    }
}

impl Request {
    /// Sets the request target, splitting off and decoding the query string.
    pub fn set_uri_path(&mut self, uri_path: impl Into<String>) {
        self.uri_path = uri_path.into();
        match self.uri_path.split_once('?') {
            Some((path, query)) => {
                self.path = path.to_string();
                self.query = parse_query_string(query);
            }
            None => {
                self.path = self.uri_path.clone();
                self.query = QueryParams::new();
            }
        }
    }

    /// Non-empty path segments, taken from the full URI when one is known.
    ///
    /// `/a/b/` yields `["a", "b"]`.
    pub fn path_segments(&self) -> Vec<&str> {
        let path = match &self.uri {
            Some(uri) => uri.path(),
            None => self.path.as_str(),
        };
        path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Retrieves the first header value by name (case-insensitive).
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// The `Content-Type` header without parameters, lower-cased.
    pub fn content_type(&self) -> String {
        self.header("Content-Type")
            .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// An explicit `Connection` header wins. Otherwise HTTP/1.1 defaults to
    /// keep-alive and older versions to close.
    pub fn keep_alive(&self) -> bool {
        match self.connection {
            Some(ConnectionType::KeepAlive) => true,
            Some(ConnectionType::Close) => false,
            None => self.version.eq_ignore_ascii_case("HTTP/1.1"),
        }
    }

    /// Whether the client asked for a `100 Continue` before sending the body.
    pub fn expects_continue(&self) -> bool {
        self.header("Expect")
            .map(|v| v.to_ascii_lowercase().contains("100-continue"))
            .unwrap_or(false)
    }
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    path: Option<String>,
    version: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            path: None,
            version: None,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        let mut request = Request {
            method: self.method.ok_or("method missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            content_length: self.body.len(),
            body: self.body,
            ..Request::default()
        };
        request.set_uri_path(self.path.ok_or("path missing")?);
        Ok(request)
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
