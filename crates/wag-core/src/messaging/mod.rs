//! Outbound messaging to WhatsApp users.

pub mod port;
