//! cellpix - inline terminal images over the Kitty and iTerm2 graphics protocols
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │   detect: probe once, cache per process  │
//! │      (tty gate: termios + one lock)      │
//! ├──────────────────────────────────────────┤
//! │   style / config  →  RenderOptions       │
//! │                          ↓               │
//! │   graphics: resize → kitty | iterm2      │
//! │                          ↓               │
//! │   quirks: per-vendor clear / cursor fix  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Rendering produces a `String`; writing it is up to the caller.

pub mod config;
pub mod constants;
pub mod detect;
pub mod error;
pub mod graphics;
pub mod style;
pub mod tty;
pub mod utils;

pub use detect::{Protocol, ProtocolSupport, Support, Vendor, Version};
pub use error::{Error, Result, StyleError, TransmissionError};
pub use graphics::{Alpha, RenderMethod, RenderOptions, Renderer, ZIndex};
pub use style::{parse_style, StyleArgs};
