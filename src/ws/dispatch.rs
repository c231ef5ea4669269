use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::server::{ClientHandler, Connection};
use crate::ws::handshake::handshake;
use crate::ws::routing::ServletRoutingTable;
use crate::ws::servlet::{WsMessage, WsSession};

/// Runs the WebSocket protocol on every connection the server accepts:
/// handshake, route lookup, then the servlet's message loop.
pub struct WsDispatcher {
    routes: Arc<ServletRoutingTable>,
}

impl WsDispatcher {
    pub fn new(routes: ServletRoutingTable) -> Self {
        Self {
            routes: Arc::new(routes),
        }
    }

    pub fn routes(&self) -> &ServletRoutingTable {
        &self.routes
    }

    async fn serve(&self, conn: Connection) {
        let peer = conn.peer_addr();
        let recv_timeout = conn.recv_timeout();

        let (request, mut ws) = match handshake(conn.into_stream(), recv_timeout).await {
            Some(upgraded) => upgraded,
            None => return,
        };

        let servlet = match self.routes.get_match_ws_servlet(&request.path) {
            Some(servlet) => servlet,
            None => {
                info!(path = %request.path, "no websocket route");
                shutdown(&mut ws).await;
                return;
            }
        };

        let mut session = WsSession::new(peer);
        if let Err(fault) = servlet.connect(&request, &mut session) {
            info!(path = %request.path, %fault, "connect rejected");
            flush(&mut ws, &mut session).await;
            shutdown(&mut ws).await;
            return;
        }
        debug!(path = %request.path, session = session.id(), "session open");

        let mut open = flush(&mut ws, &mut session).await;
        while open && !session.is_close_requested() {
            let message = match receive(&mut ws, recv_timeout).await {
                Some(message) => message,
                None => break,
            };
            let handled = servlet.message(&request, message, &mut session);
            open = flush(&mut ws, &mut session).await;
            if let Err(fault) = handled {
                debug!(%fault, "handler ended session");
                break;
            }
        }

        servlet.close(&request, &mut session);
        if open {
            flush(&mut ws, &mut session).await;
        }
        shutdown(&mut ws).await;
        debug!(session = session.id(), "session closed");
    }
}

#[async_trait]
impl ClientHandler for WsDispatcher {
    async fn handle_client(&self, conn: Connection) {
        let span = info_span!("ws", peer = %conn.peer_addr());
        self.serve(conn).instrument(span).await
    }
}

/// Next application message. `None` when the peer closed, the transport
/// failed or the receive timeout elapsed.
async fn receive(ws: &mut WebSocketStream<TcpStream>, timeout: Option<Duration>) -> Option<WsMessage> {
    loop {
        let next = match timeout {
            Some(limit) => match tokio::time::timeout(limit, ws.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!("receive timed out after {:?}", limit);
                    return None;
                }
            },
            None => ws.next().await,
        };

        match next? {
            Ok(Message::Text(text)) => return Some(WsMessage::Text(text.as_str().to_owned())),
            Ok(Message::Binary(data)) => return Some(WsMessage::Binary(data.to_vec())),
            Ok(Message::Close(frame)) => {
                debug!(?frame, "peer closed");
                return None;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Err(e) => {
                debug!("receive failed: {}", e);
                return None;
            }
        }
    }
}

/// Writes everything the servlet queued. `false` once the transport is gone.
async fn flush(ws: &mut WebSocketStream<TcpStream>, session: &mut WsSession) -> bool {
    for message in session.take_outbox() {
        let frame = match message {
            WsMessage::Text(text) => Message::text(text),
            WsMessage::Binary(data) => Message::binary(data),
        };
        if let Err(e) = ws.feed(frame).await {
            warn!("send failed: {}", e);
            return false;
        }
    }
    match ws.flush().await {
        Ok(()) => true,
        Err(e) => {
            warn!("flush failed: {}", e);
            false
        }
    }
}

async fn shutdown(ws: &mut WebSocketStream<TcpStream>) {
    if let Err(e) = ws.close(None).await {
        debug!("close: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::server::{TcpServer, TokioScheduler};
    use crate::ws::servlet::{HandlerFault, WsServlet};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::connect_async;

    const WAIT: Duration = Duration::from_secs(5);

    type Events = Arc<Mutex<Vec<String>>>;

    fn recording_servlet(events: &Events) -> WsServlet {
        let on_connect = events.clone();
        let on_message = events.clone();
        let on_close = events.clone();

        WsServlet::new(move |_, message, session| {
            let text = message.as_text().unwrap_or_default().to_owned();
            on_message.lock().unwrap().push(format!("message:{}", text));
            match text.as_str() {
                "bye" => Err(HandlerFault::new(1, "client said bye")),
                "quit" => {
                    session.close();
                    Ok(())
                }
                _ => {
                    session.send_text(text);
                    Ok(())
                }
            }
        })
        .on_connect(move |request, session| {
            on_connect.lock().unwrap().push("connect".to_owned());
            if request.path.ends_with("/locked") {
                session.send_text("go away");
                return Err(HandlerFault::new(403, "locked"));
            }
            Ok(())
        })
        .on_close(move |_, _| {
            on_close.lock().unwrap().push("close".to_owned());
        })
    }

    async fn boot(events: &Events) -> (TcpServer<WsDispatcher>, String) {
        let mut routes = ServletRoutingTable::new();
        routes.add_ws_servlet("/echo", recording_servlet(events)).unwrap();
        routes.add_ws_servlet("/rooms/*", recording_servlet(events)).unwrap();

        let config = ServerConfig {
            addresses: vec!["127.0.0.1:0".to_owned()],
            timeout_ms: 5_000,
            ..ServerConfig::default()
        };
        let server = TcpServer::new(
            config,
            WsDispatcher::new(routes),
            Arc::new(TokioScheduler::new()),
        )
        .unwrap();
        server.bind_configured().await.unwrap();
        server.start().await.unwrap();
        let addr = server.bound_addrs().await[0];
        (server, format!("ws://{}", addr))
    }

    async fn wait_for(events: &Events, expected: &[&str]) {
        let result = tokio::time::timeout(WAIT, async {
            loop {
                if events.lock().unwrap().len() >= expected.len() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        let seen = events.lock().unwrap().clone();
        assert!(result.is_ok(), "timed out, saw {:?}", seen);
        assert_eq!(seen, expected);
    }

    async fn expect_closed(
        ws: &mut WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
    ) {
        let next = tokio::time::timeout(WAIT, ws.next()).await.unwrap();
        match next {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {}
            Some(Ok(other)) => panic!("expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn echo_session_runs_every_callback_once() {
        let events = Events::default();
        let (server, base) = boot(&events).await;

        let (mut ws, _) = connect_async(format!("{}/echo", base)).await.unwrap();
        ws.send(Message::text("hi")).await.unwrap();
        let reply = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(reply, Message::text("hi"));
        ws.close(None).await.unwrap();

        wait_for(&events, &["connect", "message:hi", "close"]).await;
        server.stop();
    }

    #[tokio::test]
    async fn handler_fault_still_runs_close() {
        let events = Events::default();
        let (server, base) = boot(&events).await;

        let (mut ws, _) = connect_async(format!("{}/rooms/a", base)).await.unwrap();
        ws.send(Message::text("bye")).await.unwrap();
        expect_closed(&mut ws).await;

        wait_for(&events, &["connect", "message:bye", "close"]).await;
        server.stop();
    }

    #[tokio::test]
    async fn servlet_requested_close_ends_loop() {
        let events = Events::default();
        let (server, base) = boot(&events).await;

        let (mut ws, _) = connect_async(format!("{}/echo", base)).await.unwrap();
        ws.send(Message::text("quit")).await.unwrap();
        expect_closed(&mut ws).await;

        wait_for(&events, &["connect", "message:quit", "close"]).await;
        server.stop();
    }

    #[tokio::test]
    async fn rejected_connect_skips_loop_and_close() {
        let events = Events::default();
        let (server, base) = boot(&events).await;

        let (mut ws, _) = connect_async(format!("{}/rooms/locked", base)).await.unwrap();
        let first = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(first, Message::text("go away"));
        expect_closed(&mut ws).await;

        wait_for(&events, &["connect"]).await;
        server.stop();
    }

    #[tokio::test]
    async fn unrouted_path_fires_no_callbacks() {
        let events = Events::default();
        let (server, base) = boot(&events).await;

        let (mut ws, _) = connect_async(format!("{}/nowhere", base)).await.unwrap();
        expect_closed(&mut ws).await;

        assert!(events.lock().unwrap().is_empty());
        server.stop();
    }

    #[tokio::test]
    async fn failed_handshake_closes_connection() {
        let events = Events::default();
        let (server, base) = boot(&events).await;
        let addr = base.trim_start_matches("ws://").to_owned();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /echo HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut rest = Vec::new();
        let drained = tokio::time::timeout(WAIT, client.read_to_end(&mut rest)).await;
        assert!(drained.is_ok(), "server kept the connection open");

        assert!(events.lock().unwrap().is_empty());
        server.stop();
    }
}
