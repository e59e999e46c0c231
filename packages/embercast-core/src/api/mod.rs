//! HTTP API layer.
//!
//! Thin handlers that delegate to the mount registry and the streaming
//! core, plus the server startup path. The accept loop is hand-rolled
//! (instead of `axum::serve`) so every connection gets the TCP tuning a
//! continuous audio stream needs: Nagle off, keep-alive probes, sized
//! socket buffers, and an HTTP/1.1-only connection driver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tower::{Service, ServiceExt};

use crate::mount::MountRegistry;
use crate::protocol_constants::{TCP_BUFFER_SIZE, TCP_KEEPALIVE_SECS};

pub mod http;
mod listen;
mod source;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listen socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The accept loop failed.
    #[error("Accept failed: {0}")]
    Accept(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin wrapper over the registry; all streaming logic lives in the
/// mount/stream modules.
#[derive(Clone)]
pub struct AppState {
    /// The mount registry, shared with every handler.
    pub registry: Arc<MountRegistry>,
}

impl AppState {
    /// Creates the state around a registry.
    pub fn new(registry: Arc<MountRegistry>) -> Self {
        Self { registry }
    }
}

/// Binds the listen socket with the server-side socket options applied.
fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let bind = |addr: SocketAddr| -> std::io::Result<TcpListener> {
        let domain = Domain::for_address(addr);
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_send_buffer_size(TCP_BUFFER_SIZE)?;
        socket.set_recv_buffer_size(TCP_BUFFER_SIZE)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;
        socket.set_nonblocking(true)?;
        TcpListener::from_std(socket.into())
    };
    bind(addr).map_err(|source| ServerError::Bind { addr, source })
}

/// Applies per-connection TCP tuning.
///
/// Nagle off so audio writes hit the wire immediately; keep-alive probes
/// so half-dead listeners are detected; socket buffers sized for streaming.
fn tune_socket(socket: &TcpStream) -> std::io::Result<()> {
    socket.set_nodelay(true)?;
    let sock_ref = socket2::SockRef::from(socket);
    sock_ref.set_tcp_keepalive(
        &TcpKeepalive::new().with_time(Duration::from_secs(TCP_KEEPALIVE_SECS)),
    )?;
    sock_ref.set_send_buffer_size(TCP_BUFFER_SIZE)?;
    sock_ref.set_recv_buffer_size(TCP_BUFFER_SIZE)?;
    Ok(())
}

/// Starts the HTTP server on `addr` and serves until the accept loop fails.
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = bind_listener(addr)?;
    log::info!("[Server] Listening on http://{}", addr);
    serve(state, listener).await
}

/// Serves connections from an already bound listener.
///
/// Each connection is driven by an HTTP/1.1-only hyper builder; HTTP/2's
/// flow control interferes with continuous audio delivery, so it is never
/// negotiated.
pub async fn serve(state: AppState, listener: TcpListener) -> Result<(), ServerError> {
    let header_timeout = state.registry.config().timeouts.header_timeout();
    let app = http::create_router(state);
    let mut make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    loop {
        let (socket, remote_addr) = listener.accept().await?;
        if let Err(e) = tune_socket(&socket) {
            log::debug!("[Server] Socket tuning failed for {}: {}", remote_addr, e);
        }

        let tower_service = make_service
            .call(remote_addr)
            .await
            .unwrap_or_else(|infallible| match infallible {});

        tokio::spawn(async move {
            let io = TokioIo::new(socket);
            let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
                tower_service.clone().oneshot(request)
            });

            let result = hyper::server::conn::http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(header_timeout)
                .serve_connection(io, hyper_service)
                .await;
            if let Err(e) = result {
                // Routine for streaming: listeners vanish mid-body.
                log::trace!("[Server] Connection {} ended: {}", remote_addr, e);
            }
        });
    }
}
