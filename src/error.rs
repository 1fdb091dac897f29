//! Error types for cellpix
//!
//! Detection never fails: an unsupported terminal is a value, not an error.
//! Everything here is raised before any byte reaches the terminal.

/// Errors raised while parsing a style format string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StyleError {
    /// The format string does not match the grammar.
    #[error("invalid style format spec {spec:?}: unexpected {offending:?}")]
    Format { spec: String, offending: String },

    /// A recognized key carries a value outside its legal domain.
    #[error("invalid style argument {key:?}: {constraint}")]
    Argument { key: &'static str, constraint: String },
}

/// Operations that are invalid for the current state of a Kitty transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransmissionError {
    /// Compression only applies to payloads transmitted inline.
    #[error("compression requires direct transmission (t=d)")]
    NotDirect,

    /// Compression level outside 0-9.
    #[error("compression level {0} is outside 0-9")]
    InvalidLevel(u8),
}

/// Crate-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Style(#[from] StyleError),

    #[error(transparent)]
    Transmission(#[from] TransmissionError),

    /// The terminal does not support the requested protocol.
    #[error("terminal does not support the {0} graphics protocol")]
    Unsupported(&'static str),

    /// Image container encode/decode failure.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// PNG encoder failure.
    #[error("png encode error: {0}")]
    Png(#[from] png::EncodingError),

    /// Zero-sized render extent or pixel buffer.
    #[error("invalid render size: {cols}x{rows} cells")]
    InvalidSize { cols: u32, rows: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
