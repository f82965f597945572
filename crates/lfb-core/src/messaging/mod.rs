//! Transport-facing model: inbound events, outbound renders, and the port
//! the platform adapter implements.

pub mod port;
pub mod types;
