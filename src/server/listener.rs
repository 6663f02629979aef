use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::http::connection::{ClientInfo, Connection, ConnectionOptions, RequestHandler};
use crate::server::tls;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("secure handshake with {peer} failed: {source}")]
    SecureHandshakeFailure {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("socket I/O error: {0}")]
    SocketIo(#[from] std::io::Error),
}

/// Gets a say on every accepted peer before any connection state is built.
pub trait AcceptObserver: Send + Sync + 'static {
    /// Returns false to revoke the connection.
    fn accept(&self, peer: &SocketAddr) -> bool;
}

impl<F> AcceptObserver for F
where
    F: Fn(&SocketAddr) -> bool + Send + Sync + 'static,
{
    fn accept(&self, peer: &SocketAddr) -> bool {
        self(peer)
    }
}

struct AcceptContext {
    handler: Arc<dyn RequestHandler>,
    options: ConnectionOptions,
    tls: Option<TlsAcceptor>,
    observer: Option<Arc<dyn AcceptObserver>>,
    active: Arc<AtomicUsize>,
}

/// A bound, not yet accepting, HTTP listener.
pub struct Listener {
    listener: TcpListener,
    ctx: AcceptContext,
    stop_timeout: Duration,
}

impl Listener {
    /// Binds the configured address. Sets up TLS when `cfg.tls` is present.
    pub async fn bind(cfg: &ServerConfig, handler: Arc<dyn RequestHandler>) -> anyhow::Result<Self> {
        let tls = cfg.tls.as_ref().map(tls::build_acceptor).transpose()?;

        let listener = TcpListener::bind(&cfg.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;

        let local_addr = listener.local_addr()?;
        if tls.is_some() {
            info!("HTTPS listening on {}", local_addr);
        } else {
            info!("HTTP listening on {}", local_addr);
        }

        Ok(Self {
            listener,
            ctx: AcceptContext {
                handler,
                options: cfg.connection_options(),
                tls,
                observer: None,
                active: Arc::new(AtomicUsize::new(0)),
            },
            stop_timeout: cfg.stop_timeout(),
        })
    }

    pub fn with_accept_observer(mut self, observer: impl AcceptObserver) -> Self {
        self.ctx.observer = Some(Arc::new(observer));
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts the accept loop on the current runtime.
    pub fn start(self) -> anyhow::Result<RunningListener> {
        let local_addr = self.listener.local_addr()?;
        let (shutdown, rx) = watch::channel(false);
        let active = Arc::clone(&self.ctx.active);
        let accept_task = tokio::spawn(accept_loop(self.listener, Arc::new(self.ctx), rx));

        Ok(RunningListener {
            local_addr,
            shutdown,
            accept_task,
            active,
            stop_timeout: self.stop_timeout,
        })
    }
}

/// Handle to a listener whose accept loop is running.
pub struct RunningListener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    active: Arc<AtomicUsize>,
    stop_timeout: Duration,
}

impl RunningListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connection tasks currently alive, TLS handshakes included.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Stops accepting and waits, at most the configured stop timeout, for
    /// the accept loop and every connection it spawned to wind down.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        let abort = self.accept_task.abort_handle();

        match tokio::time::timeout(self.stop_timeout, self.accept_task).await {
            Ok(Ok(())) => info!("Listener stopped"),
            Ok(Err(e)) => error!(error = %e, "Accept loop failed"),
            Err(_) => {
                error!("Failed to shutdown listener properly");
                abort.abort();
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<AcceptContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    let mut next_id: u64 = 0;
    // handed to connections; `shutdown` stays borrowed by wait_for in select!
    let conn_shutdown = shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,

            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    next_id += 1;

                    if let Some(observer) = &ctx.observer {
                        if !observer.accept(&peer) {
                            debug!(peer = %peer, "Socket was revoked by accept observer");
                            continue;
                        }
                    }

                    // spawned so the loop is back in accept() right away
                    connections.spawn(serve(
                        socket,
                        peer,
                        next_id,
                        Arc::clone(&ctx),
                        conn_shutdown.clone(),
                    ));
                }
                Err(e) => error!(error = %ServerError::from(e), "Failed to accept connection"),
            },

            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    debug!(remaining = connections.len(), "Waiting for connections to close");
    while connections.join_next().await.is_some() {}
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn serve(
    socket: TcpStream,
    peer: SocketAddr,
    id: u64,
    ctx: Arc<AcceptContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let _active = ActiveGuard::new(&ctx.active);
    debug!(peer = %peer, client = id, "Accepted connection");

    if let Err(e) = socket.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let Some(acceptor) = &ctx.tls else {
        let info = ClientInfo {
            id,
            remote_addr: peer,
            secure: false,
        };
        Connection::new(socket, info, Arc::clone(&ctx.handler), &ctx.options)
            .with_shutdown(shutdown)
            .run()
            .await;
        return;
    };

    let handshake = tokio::select! {
        res = handshake(acceptor, socket, peer) => res,
        _ = shutdown.wait_for(|stop| *stop) => return,
    };

    match handshake {
        Ok(stream) => {
            let info = ClientInfo {
                id,
                remote_addr: peer,
                secure: true,
            };
            Connection::new(stream, info, Arc::clone(&ctx.handler), &ctx.options)
                .with_shutdown(shutdown)
                .run()
                .await;
        }
        Err(e) => warn!(peer = %peer, error = %e, "Dropping connection"),
    }
}

async fn handshake(
    acceptor: &TlsAcceptor,
    socket: TcpStream,
    peer: SocketAddr,
) -> Result<tokio_rustls::server::TlsStream<TcpStream>, ServerError> {
    acceptor
        .accept(socket)
        .await
        .map_err(|source| ServerError::SecureHandshakeFailure { peer, source })
}

/// Binds, serves until `ctrl-c`, then stops gracefully.
pub async fn run(cfg: &ServerConfig, handler: Arc<dyn RequestHandler>) -> anyhow::Result<()> {
    let running = Listener::bind(cfg, handler).await?.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    running.stop().await;
    Ok(())
}
