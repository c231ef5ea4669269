use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// An accepted transport. Whoever holds it owns the socket; dropping or
/// [`Connection::close`]-ing it closes the socket exactly once.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    recv_timeout: Option<Duration>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            recv_timeout: None,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// `0` disables the timeout.
    pub fn set_recv_timeout(&mut self, ms: u64) {
        self.recv_timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout
    }

    pub fn set_keepalive(&self, interval: Duration) -> io::Result<()> {
        SockRef::from(&self.stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(interval))
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(peer = %self.peer, "shutdown: {}", e);
        }
        debug!(peer = %self.peer, "connection closed");
    }
}
