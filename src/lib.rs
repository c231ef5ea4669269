//! # courier
//!
//! Building blocks for small protocol servers and clients:
//!
//! * [`server`]: listener, accept loops and per-connection dispatch
//! * [`ws`]: a WebSocket session layer on top of the server, with routes
//! * [`smtp`]: an SMTP client that sends one [`models::Email`] per session

pub mod config;
pub mod models;
pub mod server;
pub mod smtp;
pub mod tracing;
pub mod ws;
