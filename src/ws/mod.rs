//! # WebSocket module
//!
//! A [`WsDispatcher`] plugged into a [`TcpServer`] turns it into a WebSocket
//! server. Every connection goes through:
//!
//! * the upgrade handshake (a failure closes the connection, nothing else runs)
//! * a route lookup by request path (no match closes the connection)
//! * the servlet's `on_connect`, message loop and `on_close`

mod dispatch;
mod handshake;
pub mod routing;
mod servlet;

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::server::{Scheduler, ServerError, TcpServer};

pub use dispatch::WsDispatcher;
pub use handshake::UpgradeRequest;
pub use routing::{RouteError, RouteTable, ServletRoutingTable};
pub use servlet::{HandlerFault, HandlerResult, Servlet, WsMessage, WsServlet, WsSession};

pub type WebSocketServer = TcpServer<WsDispatcher>;

pub fn websocket_server(
    config: ServerConfig,
    routes: ServletRoutingTable,
    scheduler: Arc<dyn Scheduler>,
) -> Result<WebSocketServer, ServerError> {
    TcpServer::new(config, WsDispatcher::new(routes), scheduler)
}
