use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::http::buffer::{RawBuffer, DEFAULT_CAPACITY};
use crate::http::parser::{ParseError, RequestParser};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{format_status_response, ResponseWriter, HTTP10, HTTP11};

/// Why a client connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DisconnectReason {
    /// The peer closed the stream, or an I/O error had no OS error code.
    #[error("connection reset")]
    ConnectionReset,
    /// The peer sent a request that could not be parsed.
    #[error("bad request, no recovery")]
    NoRecovery,
    /// The stream was already closed when used.
    #[error("stream is not connected")]
    NotSocket,
    /// No data arrived within the read timeout.
    #[error("read timed out")]
    TimedOut,
    /// The client asked for `Connection: close`.
    #[error("closed after response")]
    Closed,
    /// The server is stopping.
    #[error("server shutdown")]
    Shutdown,
    /// An I/O error carrying an OS error code.
    #[error("socket error {0}")]
    SocketError(i32),
}

/// Identity of a connected client, handed to every [`RequestHandler`] call.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: u64,
    pub remote_addr: SocketAddr,
    pub secure: bool,
}

/// Receives the requests and disconnects of client connections.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handles one completed request. The returned response is written
    /// before the next pipelined request is parsed.
    fn on_request(&self, client: &ClientInfo, request: Request) -> Response;

    /// Called exactly once when a connection ends.
    fn on_disconnect(&self, _client: &ClientInfo, _reason: DisconnectReason) {}
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Receive buffer capacity.
    pub buffer_size: usize,
    /// Limit for the request line plus headers of one request.
    pub max_header_bytes: usize,
    /// Idle limit for a single read; `None` waits forever.
    pub read_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_CAPACITY,
            max_header_bytes: DEFAULT_CAPACITY,
            read_timeout: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DrainError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("connection closed: {0}")]
    Closed(DisconnectReason),
}

/// One client connection: a duplex stream, its receive buffer and the
/// request parser fed from it.
///
/// Reads, parsing, dispatch and writes happen strictly in sequence, so
/// requests are answered in the order they arrived and the buffer is never
/// touched by anything but this connection.
pub struct Connection<S> {
    stream: S,
    info: ClientInfo,
    buffer: RawBuffer,
    parser: RequestParser,
    handler: Arc<dyn RequestHandler>,
    read_timeout: Option<Duration>,
    shutdown: Option<watch::Receiver<bool>>,
    disconnected: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        info: ClientInfo,
        handler: Arc<dyn RequestHandler>,
        options: &ConnectionOptions,
    ) -> Self {
        let mut parser = RequestParser::with_max_header_bytes(options.max_header_bytes);
        parser.set_secure(info.secure);

        Self {
            stream,
            info,
            buffer: RawBuffer::new(options.buffer_size),
            parser,
            handler,
            read_timeout: options.read_timeout,
            shutdown: None,
            disconnected: false,
        }
    }

    /// Ends the connection with [`DisconnectReason::Shutdown`] once the
    /// watched flag turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn info(&self) -> &ClientInfo {
        &self.info
    }

    /// Serves the connection until it ends and returns why it ended.
    pub async fn run(mut self) -> DisconnectReason {
        let reason = loop {
            let received = match self.receive().await {
                Ok(n) => n,
                Err(reason) => break reason,
            };

            if let Err(reason) = self.on_receive(received).await {
                break reason;
            }
        };

        self.disconnect(reason).await;
        reason
    }

    async fn receive(&mut self) -> Result<usize, DisconnectReason> {
        let Self {
            stream,
            buffer,
            shutdown,
            read_timeout,
            ..
        } = self;

        let read = async {
            let result = match *read_timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, stream.read(buffer.spare_mut())).await {
                        Ok(result) => result,
                        Err(_) => return Err(DisconnectReason::TimedOut),
                    }
                }
                None => stream.read(buffer.spare_mut()).await,
            };
            result.map_err(|e| io_reason(&e))
        };

        tokio::select! {
            res = read => res,
            _ = shutdown_signaled(shutdown) => Err(DisconnectReason::Shutdown),
        }
    }

    async fn on_receive(&mut self, received: usize) -> Result<(), DisconnectReason> {
        if received == 0 {
            tracing::debug!(peer = %self.info.remote_addr, "Client closed the connection");
            return Err(DisconnectReason::ConnectionReset);
        }

        self.buffer.advance(received);
        tracing::trace!(
            peer = %self.info.remote_addr,
            bytes = received,
            buffered = self.buffer.bytes_left(),
            "Received"
        );

        let consumed = match self.drain().await {
            Ok(consumed) => consumed,
            Err(DrainError::Parse(e)) => {
                self.reject(&e).await;
                return Err(DisconnectReason::NoRecovery);
            }
            Err(DrainError::Closed(reason)) => return Err(reason),
        };

        self.buffer.compact(consumed);

        // a full buffer the parser cannot make progress on will never complete
        if self.buffer.is_full() {
            let err = ParseError::RequestHeaderTooLarge(self.buffer.bytes_left());
            self.reject(&err).await;
            return Err(DisconnectReason::NoRecovery);
        }

        Ok(())
    }

    /// Parses every request present in the buffer, answering each before
    /// looking at the next. Returns the number of bytes consumed.
    async fn drain(&mut self) -> Result<usize, DrainError> {
        let mut offset = 0;

        loop {
            let parsed = self.parser.parse(&self.buffer.filled()[offset..])?;
            offset += parsed.consumed;

            if self.parser.should_send_continue() {
                self.send_continue().await.map_err(DrainError::Closed)?;
            }

            let Some(request) = parsed.request else {
                break;
            };

            if !self.dispatch(request).await.map_err(DrainError::Closed)? {
                return Err(DrainError::Closed(DisconnectReason::Closed));
            }

            if offset >= self.buffer.bytes_left() {
                break;
            }
        }

        Ok(offset)
    }

    /// Hands a request to the handler and writes its response. Returns
    /// whether the connection stays open.
    async fn dispatch(&mut self, mut request: Request) -> Result<bool, DisconnectReason> {
        request.remote_addr = Some(self.info.remote_addr);
        let keep_alive = request.keep_alive();
        let version = if request.version.eq_ignore_ascii_case(HTTP10) {
            HTTP10
        } else {
            HTTP11
        };

        let handler = Arc::clone(&self.handler);
        let info = &self.info;
        let response = panic::catch_unwind(AssertUnwindSafe(|| handler.on_request(info, request)))
            .unwrap_or_else(|_| {
                tracing::error!(peer = %info.remote_addr, "Request handler panicked");
                Response::internal_error()
            });

        let mut writer = ResponseWriter::new(&response, version);
        if let Err(e) = writer.write_to_stream(&mut self.stream).await {
            tracing::error!(
                peer = %self.info.remote_addr,
                error = %e,
                "Failed to send HTTP response"
            );
            return Err(io_reason(&e));
        }

        Ok(keep_alive)
    }

    async fn send_continue(&mut self) -> Result<(), DisconnectReason> {
        tracing::debug!(peer = %self.info.remote_addr, "Sending 100 Continue");
        self.respond(HTTP10, StatusCode::Continue, Some("Please continue"), None, None)
            .await
            .map_err(|e| io_reason(&e))
    }

    /// Best-effort 400 carrying the parse error as reason phrase.
    async fn reject(&mut self, err: &ParseError) {
        tracing::warn!(
            peer = %self.info.remote_addr,
            error = %err,
            "Bad request, responding with it"
        );

        let reason = err.to_string();
        if let Err(e) = self
            .respond(HTTP10, StatusCode::BadRequest, Some(&reason), None, None)
            .await
        {
            tracing::error!(
                peer = %self.info.remote_addr,
                error = %e,
                "Failed to reply to a bad request"
            );
        }
    }

    /// Writes a status-line-only response, or one with a body.
    ///
    /// `reason` defaults to the status name and `content_type` to
    /// `text/html`.
    pub async fn respond(
        &mut self,
        version: &str,
        status: StatusCode,
        reason: Option<&str>,
        body: Option<&str>,
        content_type: Option<&str>,
    ) -> std::io::Result<()> {
        let bytes = format_status_response(version, status, reason, body, content_type);
        self.send(&bytes).await
    }

    /// Writes raw bytes to the client.
    pub async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if self.disconnected {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "client already disconnected",
            ));
        }
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Closes the stream and notifies the handler. Safe to call more than
    /// once; only the first call has an effect. Never fails.
    pub async fn disconnect(&mut self, reason: DisconnectReason) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;

        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(
                peer = %self.info.remote_addr,
                error = %e,
                "Disconnect failed to close the stream"
            );
        }

        tracing::debug!(peer = %self.info.remote_addr, reason = %reason, "Client disconnected");
        self.handler.on_disconnect(&self.info, reason);
    }
}

fn io_reason(err: &std::io::Error) -> DisconnectReason {
    if let Some(code) = err.raw_os_error() {
        return DisconnectReason::SocketError(code);
    }
    match err.kind() {
        std::io::ErrorKind::NotConnected => DisconnectReason::NotSocket,
        _ => DisconnectReason::ConnectionReset,
    }
}

async fn shutdown_signaled(shutdown: &mut Option<watch::Receiver<bool>>) {
    match shutdown {
        Some(rx) => {
            if rx.wait_for(|stop| *stop).await.is_err() {
                // sender gone without a stop request, keep serving
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}
