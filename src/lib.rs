//! Clipforge - export Steam game recordings as single MP4 files.
//!
//! This library crate exposes the core functionality for integration testing.

pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod names;
pub mod scheduler;
pub mod steam;
