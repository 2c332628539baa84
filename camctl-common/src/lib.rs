//! # camctl common library
//!
//! Shared code for the camctl capture service and its front ends:
//! - Error type
//! - UI-facing event types and the broadcast `EventBus`
//! - TOML bootstrap configuration and capture folder resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{CameraEvent, EventBus, UiCommand};
