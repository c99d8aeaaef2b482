//! Payload decoding for events that arrive as raw bytes
//!
//! Only the network sources are decoded here; every other family reaches the
//! engine already typed.

pub mod network;
pub mod reader;

pub use network::{decode_network_event, tls_protocol_name};
pub use reader::PayloadReader;
