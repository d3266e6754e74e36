//! Schema-sync server library.

pub mod config;
pub mod patch;
pub mod rooms;
pub mod serial;
pub mod server;
pub mod tracking;

// Re-export commonly used types
pub use config::Config;
pub use patch::{apply_patch, PatchError, NUMERIC_DELTA_MARKER};
pub use rooms::{Room, Rooms};
pub use server::run;
