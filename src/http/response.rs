use bytes::Bytes;

/// HTTP status codes supported by the server.
///
/// Common HTTP status codes used in responses:
/// - `Continue` (100): Client may send the request body
/// - `Ok` (200): Request successful
/// - `BadRequest` (400): Malformed request
/// - `NotFound` (404): No handler matched the request
/// - `InternalServerError` (500): A handler failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 100 Continue
    Continue,
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 204 No Content
    NoContent,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 500 Internal Server Error
    InternalServerError,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use weir::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue => 100,
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::InternalServerError => 500,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use weir::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Continue => "Continue",
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }
}

/// Represents a complete HTTP response ready to be sent to a client.
///
/// Contains the HTTP status code, headers, and response body.
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// Reason phrase to send instead of the standard one
    pub reason: Option<String>,
    /// HTTP headers in the order they are written
    pub headers: Vec<(String, String)>,
    /// Response body as bytes
    pub body: Bytes,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    reason: Option<String>,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Overrides the reason phrase on the status line.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Adds or replaces a header (names compare case-insensitively).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((key, value)),
        }
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the final Response.
    ///
    /// Adds `Content-Length` from the body size unless already present.
    pub fn build(mut self) -> Response {
        let has_length = self
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("Content-Length"));
        if !has_length {
            self.headers
                .push(("Content-Length".to_string(), self.body.len().to_string()));
        }

        Response {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// Starts building a response with the given status.
    pub fn new(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder::new(status)
    }

    /// Creates a simple 200 OK `text/html` response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Type", "text/html")
            .body(body)
            .build()
    }

    /// Creates a 500 Internal Server Error response.
    pub fn internal_error() -> Self {
        ResponseBuilder::new(StatusCode::InternalServerError)
            .header("Content-Type", "text/html")
            .body(&b"500 Internal Server Error"[..])
            .build()
    }

    /// Reason phrase written on the status line.
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase())
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}
