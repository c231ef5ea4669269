//! # SMTP client module
//!
//! Drives one outbound session through the usual command sequence, built
//! the same way an inbound session would be read: a small state enum and
//! one reply per command.
//!
//! ```text
//! greeting(220) → HELO → [AUTH LOGIN → user → pass] → MAIL FROM
//!               → RCPT TO × n → DATA → message + "." → done
//! ```
//!
//! Any reply of 400 or above, or any transport error, stops the sequence
//! right there.

mod client;
mod errors;
pub mod mime;
mod reply;
mod stream;

pub use client::{SmtpClient, State, CONNECT_TIMEOUT};
pub use errors::{SmtpError, SmtpResult};
pub use reply::Reply;
pub use stream::SmtpStream;
