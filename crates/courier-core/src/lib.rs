//! # courier-core
//!
//! Core types, traits, and abstractions for the courier notification
//! delivery system.
//!
//! This crate provides the foundational data structures and trait
//! definitions that the other courier crates depend on: the notification
//! record shape, the delivery job model, and the repository/queue
//! contracts implemented by `courier-db`.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
