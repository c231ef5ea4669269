//! Path resolution: exact paths first, then glob patterns in registration
//! order.

use globset::{GlobBuilder, GlobMatcher};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::ws::servlet::{Servlet, WsServlet};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
}

fn is_pattern(path: &str) -> bool {
    path.contains(['*', '?', '[', '{'])
}

/// Generic path table. Re-registering an exact path replaces its handler;
/// patterns are only ever appended, so a repeated pattern is shadowed by its
/// first registration.
#[derive(Debug)]
pub struct RouteTable<H> {
    exact: HashMap<String, H>,
    patterns: Vec<(GlobMatcher, H)>,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            patterns: Vec::new(),
        }
    }
}

impl<H> RouteTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        if !is_pattern(path) {
            self.exact.insert(path.to_owned(), handler);
            return Ok(());
        }

        let glob = GlobBuilder::new(path)
            .literal_separator(false)
            .build()
            .map_err(|source| RouteError::Pattern {
                pattern: path.to_owned(),
                source,
            })?;
        self.patterns.push((glob.compile_matcher(), handler));
        Ok(())
    }

    pub fn get_match(&self, path: &str) -> Option<&H> {
        if let Some(handler) = self.exact.get(path) {
            return Some(handler);
        }
        self.patterns
            .iter()
            .find(|(glob, _)| glob.is_match(path))
            .map(|(_, handler)| handler)
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Servlets by path, narrowed to WebSocket-capable ones on lookup.
#[derive(Debug, Default)]
pub struct ServletRoutingTable {
    routes: RouteTable<Servlet>,
}

impl ServletRoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_servlet(&mut self, path: &str, servlet: Servlet) -> Result<(), RouteError> {
        debug!(path, "servlet registered");
        self.routes.add(path, servlet)
    }

    pub fn add_ws_servlet(&mut self, path: &str, servlet: WsServlet) -> Result<(), RouteError> {
        self.add_servlet(path, servlet.into())
    }

    pub fn get_match_servlet(&self, path: &str) -> Option<&Servlet> {
        self.routes.get_match(path)
    }

    /// `None` both when nothing matches and when the match can't speak
    /// WebSocket.
    pub fn get_match_ws_servlet(&self, path: &str) -> Option<Arc<WsServlet>> {
        self.get_match_servlet(path)
            .and_then(Servlet::websocket)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
