//! Handler module - host system request handling.
//!
//! Provides [`SystemHandler`], which answers echo, info and settings
//! requests, applies settings changes, and reports reset requests to the
//! composition root.

mod system;

pub use system::{info_text, SystemAction, SystemHandler};
