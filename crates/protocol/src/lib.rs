//! Shared protocol crate for schema-sync.
//!
//! This crate contains:
//! - OSC binary decoding utilities
//! - TUIO message and tracked-entity definitions
//! - Room message types exchanged over the WebSocket transport

mod error;
pub mod messages;
pub mod osc;
pub mod tuio;

pub use error::ProtocolError;
pub use messages::{ClientMessage, ServerMessage};
pub use tuio::{EntityClass, TrackedEntity, TuioEvent};
