//! Core domain and application logic for the WhatsApp gateway.
//!
//! This crate is framework-agnostic. The Meta Graph API and the backend
//! engine live behind ports (traits) implemented in adapter crates.

pub mod chunking;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod handler;
pub mod logging;
pub mod messaging;
pub mod retry;
pub mod signature;

pub use errors::{Error, Result};
