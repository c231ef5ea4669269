use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// The parts of the HTTP upgrade request servlets get to see. Header names
/// are lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
}

impl UpgradeRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl From<&Request> for UpgradeRequest {
    fn from(req: &Request) -> Self {
        let headers = req
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();

        Self {
            path: req.uri().path().to_owned(),
            query: req.uri().query().map(str::to_owned),
            headers,
        }
    }
}

/// Runs the server side of the upgrade. `None` on a malformed request, a
/// transport error or when `timeout` elapses; the stream is dropped, and so
/// closed, in every one of those cases.
pub async fn handshake(
    stream: TcpStream,
    timeout: Option<Duration>,
) -> Option<(UpgradeRequest, WebSocketStream<TcpStream>)> {
    let mut captured = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        captured = Some(UpgradeRequest::from(req));
        Ok(resp)
    };

    let accept = tokio_tungstenite::accept_hdr_async(stream, callback);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, accept).await {
            Ok(result) => result,
            Err(_) => {
                warn!("handshake timed out after {:?}", limit);
                return None;
            }
        },
        None => accept.await,
    };

    match (result, captured) {
        (Ok(ws), Some(request)) => {
            debug!(path = %request.path, "handshake complete");
            Some((request, ws))
        }
        (Ok(_), None) => {
            warn!("handshake completed without a request");
            None
        }
        (Err(e), _) => {
            debug!("handshake failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_captures_path_query_and_headers() {
        let req = Request::builder()
            .uri("/chat/room1?token=abc")
            .header("Sec-WebSocket-Protocol", "chat")
            .body(())
            .unwrap();

        let upgrade = UpgradeRequest::from(&req);
        assert_eq!(upgrade.path, "/chat/room1");
        assert_eq!(upgrade.query.as_deref(), Some("token=abc"));
        assert_eq!(upgrade.header("sec-websocket-protocol"), Some("chat"));
        assert_eq!(upgrade.header("Sec-WebSocket-Protocol"), Some("chat"));
    }
}
