//! Backend conversational engine: wire types and the port adapters implement.

pub mod port;
pub mod types;
