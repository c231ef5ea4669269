use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;

const BACKLOG: u32 = 1024;

/// One bound, listening socket plus the token that cancels its pending
/// accepts. The listener closes once the last holder drops it.
#[derive(Debug)]
pub struct Endpoint {
    addr: SocketAddr,
    listener: TcpListener,
    cancel: CancellationToken,
}

impl Endpoint {
    /// Creates the socket, binds it and starts listening.
    pub fn bind(addr: &str) -> io::Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(BACKLOG)?;

        Ok(Self {
            addr: listener.local_addr()?,
            listener,
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Waits for the next connection. `None` once [`Endpoint::cancel_all`]
    /// has been called.
    pub async fn accept(&self) -> Option<io::Result<(TcpStream, SocketAddr)>> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            accepted = self.listener.accept() => Some(accepted),
        }
    }

    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Source of inbound connections for an accept loop.
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
    fn local_addr(&self) -> SocketAddr;

    /// `None` once the source has been cancelled.
    async fn accept(&self) -> Option<io::Result<(TcpStream, SocketAddr)>>;
}

#[async_trait]
impl Acceptor for Endpoint {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn accept(&self) -> Option<io::Result<(TcpStream, SocketAddr)>> {
        Endpoint::accept(self).await
    }
}
