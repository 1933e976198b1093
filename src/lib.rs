//! clipFlow: continuous playlist scheduling engine.
//!
//! Decides which pre-rendered clip goes to the live sink next, lets breaking
//! content pre-empt the rotation, and keeps its cursor across restarts.
//! The CLI in `main.rs` consumes this crate.

pub mod clip;
pub mod config;
pub mod delivery;
pub mod error;
mod json_file;
pub mod ordering;
pub mod playlist;
pub mod scheduler;
pub mod state;
pub mod store;
