use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::ws::handshake::UpgradeRequest;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A servlet callback gave up on the session. The message loop ends, but the
/// close callback still runs if the session was open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler returned {code}: {reason}")]
pub struct HandlerFault {
    pub code: i32,
    pub reason: String,
}

impl HandlerFault {
    pub fn new(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

pub type HandlerResult = Result<(), HandlerFault>;

/// One complete application message, whatever number of frames it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WsMessage {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WsMessage::Text(text) => Some(text),
            WsMessage::Binary(_) => None,
        }
    }
}

/// What a servlet sees of its connection. Replies are queued and written by
/// the dispatch loop after the callback returns.
#[derive(Debug)]
pub struct WsSession {
    id: u64,
    peer: SocketAddr,
    outbox: Vec<WsMessage>,
    close_requested: bool,
}

impl WsSession {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            outbox: Vec::new(),
            close_requested: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn send_text(&mut self, text: impl Into<String>) {
        self.outbox.push(WsMessage::Text(text.into()));
    }

    pub fn send_binary(&mut self, data: impl Into<Vec<u8>>) {
        self.outbox.push(WsMessage::Binary(data.into()));
    }

    pub fn send(&mut self, message: WsMessage) {
        self.outbox.push(message);
    }

    /// Ends the session once queued messages are flushed.
    pub fn close(&mut self) {
        self.close_requested = true;
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<WsMessage> {
        std::mem::take(&mut self.outbox)
    }
}

type OnConnect = Arc<dyn Fn(&UpgradeRequest, &mut WsSession) -> HandlerResult + Send + Sync>;
type OnMessage =
    Arc<dyn Fn(&UpgradeRequest, WsMessage, &mut WsSession) -> HandlerResult + Send + Sync>;
type OnClose = Arc<dyn Fn(&UpgradeRequest, &mut WsSession) + Send + Sync>;

/// WebSocket callbacks for one route. `on_connect` and `on_close` default to
/// no-ops that succeed.
#[derive(Clone)]
pub struct WsServlet {
    on_connect: OnConnect,
    on_message: OnMessage,
    on_close: OnClose,
}

impl WsServlet {
    pub fn new<F>(on_message: F) -> Self
    where
        F: Fn(&UpgradeRequest, WsMessage, &mut WsSession) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            on_connect: Arc::new(|_, _| Ok(())),
            on_message: Arc::new(on_message),
            on_close: Arc::new(|_, _| {}),
        }
    }

    pub fn on_connect<F>(mut self, on_connect: F) -> Self
    where
        F: Fn(&UpgradeRequest, &mut WsSession) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_connect = Arc::new(on_connect);
        self
    }

    pub fn on_close<F>(mut self, on_close: F) -> Self
    where
        F: Fn(&UpgradeRequest, &mut WsSession) + Send + Sync + 'static,
    {
        self.on_close = Arc::new(on_close);
        self
    }

    /// Replies to every message with the same message.
    pub fn echo() -> Self {
        Self::new(|_, message, session| {
            session.send(message);
            Ok(())
        })
    }

    pub(crate) fn connect(&self, request: &UpgradeRequest, session: &mut WsSession) -> HandlerResult {
        (self.on_connect)(request, session)
    }

    pub(crate) fn message(
        &self,
        request: &UpgradeRequest,
        message: WsMessage,
        session: &mut WsSession,
    ) -> HandlerResult {
        (self.on_message)(request, message, session)
    }

    pub(crate) fn close(&self, request: &UpgradeRequest, session: &mut WsSession) {
        (self.on_close)(request, session)
    }
}

impl fmt::Debug for WsServlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsServlet").finish_non_exhaustive()
    }
}

/// A registered handler. Only the `WebSocket` variant is visible to the
/// WebSocket dispatcher; `Plain` handlers are served by something else.
#[derive(Debug, Clone)]
pub enum Servlet {
    Plain { name: String },
    WebSocket(Arc<WsServlet>),
}

impl Servlet {
    pub fn websocket(&self) -> Option<&Arc<WsServlet>> {
        match self {
            Servlet::WebSocket(servlet) => Some(servlet),
            Servlet::Plain { .. } => None,
        }
    }
}

impl From<WsServlet> for Servlet {
    fn from(servlet: WsServlet) -> Self {
        Servlet::WebSocket(Arc::new(servlet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> UpgradeRequest {
        UpgradeRequest::new("/chat")
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn defaults_succeed() {
        let servlet = WsServlet::new(|_, _, _| Ok(()));
        let mut session = WsSession::new(peer());
        assert!(servlet.connect(&request(), &mut session).is_ok());
        servlet.close(&request(), &mut session);
        assert!(session.take_outbox().is_empty());
    }

    #[test]
    fn echo_queues_the_message() {
        let servlet = WsServlet::echo();
        let mut session = WsSession::new(peer());
        servlet
            .message(&request(), WsMessage::Text("ping".into()), &mut session)
            .unwrap();
        assert_eq!(session.take_outbox(), vec![WsMessage::Text("ping".into())]);
        assert!(session.take_outbox().is_empty());
    }

    #[test]
    fn sessions_get_distinct_ids() {
        let a = WsSession::new(peer());
        let b = WsSession::new(peer());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn plain_servlet_has_no_websocket_capability() {
        let plain = Servlet::Plain {
            name: "static".into(),
        };
        assert!(plain.websocket().is_none());
        assert!(Servlet::from(WsServlet::echo()).websocket().is_some());
    }
}
