//! Adapters implementing the domain ports and outward-facing transports.

pub mod http;
pub mod memory;
