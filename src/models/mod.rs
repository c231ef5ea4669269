//! # Mail value objects
//!
//! What the SMTP client consumes: the outbound [`Email`] and its
//! [`EmailEntity`] attachment parts. Both are plain data and stay untouched
//! while a send is in flight.

mod email;
mod entity;

pub use email::{bare_address, header_address, local_part, Email};
pub use entity::EmailEntity;
