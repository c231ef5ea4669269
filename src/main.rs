use std::error::Error;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use courier::config::{ConfigRegistry, ServerConfig};
use courier::server::TokioScheduler;
use courier::tracing::setup_tracing;
use courier::ws::{websocket_server, ServletRoutingTable, WsMessage, WsServlet};

/// Tags every text message with the room it was sent to and sends it back.
fn room_servlet() -> WsServlet {
    WsServlet::new(|request, message, session| {
        match message {
            WsMessage::Text(text) => session.send_text(format!("[{}] {}", request.path, text)),
            WsMessage::Binary(data) => session.send_binary(data),
        }
        Ok(())
    })
    .on_connect(|request, session| {
        info!(room = %request.path, session = session.id(), "joined");
        Ok(())
    })
    .on_close(|request, session| {
        info!(room = %request.path, session = session.id(), "left");
    })
}

fn routes() -> Result<ServletRoutingTable, Box<dyn Error>> {
    let mut routes = ServletRoutingTable::new();
    routes.add_ws_servlet("/echo", WsServlet::echo())?;
    routes.add_ws_servlet("/rooms/*", room_servlet())?;
    Ok(routes)
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = ServerConfig::from_env()?;
    let server = websocket_server(config, routes()?, Arc::new(TokioScheduler::new()))?;

    let registry = ConfigRegistry::new();
    let _subscription = server.watch_config(&registry);

    server.bind_configured().await?;
    server.start().await?;
    info!(addrs = ?server.bound_addrs().await, "listening");

    signal::ctrl_c().await?;
    info!("shutting down");
    server.stop();
    Ok(())
}

#[tokio::main]
async fn main() {
    setup_tracing();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}
