//! TCP acceptor.
//!
//! Binds the listening socket, filters peers through the IPv4
//! allow-list, and spawns one session task per admitted connection.

use crate::allow::AllowList;
use crate::error::{ServerError, ServerResult};
use crate::session;
use riorita_storage::{ResultCache, Storage};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{error, info, warn};

/// Shared state for all sessions.
pub struct ServerState {
    pub storage: Storage,
    pub cache: ResultCache,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Peer filter; `None` admits every peer.
    pub allowed: Option<AllowList>,
}

/// A server bound to its port, ready to accept.
pub struct BoundServer {
    listener: tokio::net::TcpListener,
    allowed: Option<AllowList>,
    state: Arc<ServerState>,
}

/// Binds the listening socket with SO_REUSEADDR.
pub async fn bind(config: ServerConfig, state: Arc<ServerState>) -> ServerResult<BoundServer> {
    let socket = match config.bind_addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(config.bind_addr)?;
    let listener = socket.listen(1024)?;

    info!(addr = %listener.local_addr()?, "riorita server listening");
    Ok(BoundServer {
        listener,
        allowed: config.allowed,
        state,
    })
}

impl BoundServer {
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        self.listener.local_addr().map_err(ServerError::from)
    }

    /// Accepts connections until the shutdown signal fires.
    pub async fn run_until(
        self,
        shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> ServerResult<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.dispatch(stream, addr),
                        Err(e) => error!("failed to accept connection: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("riorita server shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Accepts connections forever. Useful for tests driving the server
    /// from a spawned task.
    pub async fn run(self) -> ServerResult<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => self.dispatch(stream, addr),
                Err(e) => error!("failed to accept connection: {}", e),
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, addr: SocketAddr) {
        if !permitted(self.allowed.as_ref(), &addr) {
            warn!(peer = %addr, "connection denied by allow-list");
            return;
        }
        let state = self.state.clone();
        tokio::spawn(async move {
            if let Err(e) = session::run(stream, addr, state).await {
                warn!(peer = %addr, "session error: {}", e);
            }
        });
    }
}

/// An absent allow-list admits everyone; otherwise the peer's IPv4 must
/// lie in the union of the entries. IPv6 peers are matched through their
/// IPv4-mapped form when they have one.
fn permitted(allowed: Option<&AllowList>, addr: &SocketAddr) -> bool {
    let Some(list) = allowed else {
        return true;
    };
    match addr.ip() {
        IpAddr::V4(v4) => list.permits(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(|v4| list.permits(v4)).unwrap_or(false),
    }
}
