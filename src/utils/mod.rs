//! Utility functions shared across cellpix
//!
//! Common helpers that don't fit in specialized modules.

pub mod color;

pub use color::{composite_over, parse_hex_color};
