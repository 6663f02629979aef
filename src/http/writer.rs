use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::response::{Response, StatusCode};

pub const HTTP10: &str = "HTTP/1.0";
pub const HTTP11: &str = "HTTP/1.1";

/// Content type used when a body is sent without one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

pub fn serialize_response(resp: &Response, version: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + resp.body.len());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        version,
        resp.status.as_u16(),
        resp.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    // Body
    buf.extend_from_slice(&resp.body);

    buf
}

/// Formats a bare response: just a status line when `body` is empty, or a
/// status line with `Content-Type`, `Content-Length` and the body.
///
/// `reason` defaults to the status name (e.g. `BadRequest`) and
/// `content_type` to `text/html`.
pub fn format_status_response(
    version: &str,
    status: StatusCode,
    reason: Option<&str>,
    body: Option<&str>,
    content_type: Option<&str>,
) -> Vec<u8> {
    let status_name = format!("{status:?}");
    let reason = reason.filter(|r| !r.is_empty()).unwrap_or(&status_name);
    let code = status.as_u16();

    match body.filter(|b| !b.is_empty()) {
        None => format!("{version} {code} {reason}\r\n\r\n").into_bytes(),
        Some(body) => {
            let content_type = content_type
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_CONTENT_TYPE);
            format!(
                "{version} {code} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            )
            .into_bytes()
        }
    }
}

pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response, version: &str) -> Self {
        Self::from_bytes(serialize_response(response, version))
    }

    pub fn from_bytes(buffer: Vec<u8>) -> Self {
        Self { buffer, written: 0 }
    }

    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }

            self.written += n;
        }

        stream.flush().await
    }
}
