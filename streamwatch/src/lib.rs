//! streamwatch library crate.
//!
//! Supervises external stream recorders: per-identifier supervisor tasks own
//! the recorder processes while a serial probe scheduler decides which
//! identifier to check next.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod probe;
pub mod recorder;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};
