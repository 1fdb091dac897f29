//! Global constants for cellpix
//!
//! Consolidates escape sequences, timing, and protocol limits
//! to eliminate magic strings throughout the codebase.

// ============================================================================
// Escape Sequences
// ============================================================================

/// Control Sequence Introducer
pub const CSI: &str = "\x1b[";

/// String Terminator
pub const ST: &str = "\x1b\\";

/// Save cursor position (DECSC)
pub const SAVE_CURSOR: &str = "\x1b7";

/// Restore cursor position (DECRC)
pub const RESTORE_CURSOR: &str = "\x1b8";

/// Kitty graphics APC start (`ESC _ G`)
pub const KITTY_START: &str = "\x1b_G";

/// iTerm2 inline image OSC start (`ESC ] 1337 ; File =`)
pub const ITERM2_START: &str = "\x1b]1337;File=";

/// Delete every Kitty image intersecting the cursor cell
pub const KITTY_DELETE_AT_CURSOR: &str = "\x1b_Ga=d,d=c;\x1b\\";

/// Delete every visible Kitty image
pub const KITTY_DELETE_ALL: &str = "\x1b_Ga=d;\x1b\\";

// ============================================================================
// Terminal Queries
// ============================================================================

/// Primary Device Attributes query (DA1)
///
/// Answered by virtually every terminal, so it doubles as the
/// end-of-response marker for batched queries.
pub const DA1_QUERY: &[u8] = b"\x1b[c";

/// Terminal name/version query (XTVERSION)
pub const XTVERSION_QUERY: &[u8] = b"\x1b[>q";

/// Image ID used by the Kitty support query
pub const KITTY_QUERY_ID: u32 = 31;

// ============================================================================
// Timing Constants
// ============================================================================

/// Default time to wait for the terminal to answer a query (milliseconds)
pub const QUERY_TIMEOUT_MS: u64 = 1000;

/// Read granularity while waiting for a response, in deciseconds (termios VTIME)
pub const READ_GRANULARITY_DS: u8 = 1;

/// Time allowed for draining leftover response bytes (milliseconds)
pub const DRAIN_TIMEOUT_MS: u64 = 100;

// ============================================================================
// Protocol Limits
// ============================================================================

/// Maximum base64 payload bytes per Kitty escape sequence
pub const KITTY_CHUNK_SIZE: usize = 4096;

/// Default deflate level for both protocols
pub const DEFAULT_COMPRESSION: u8 = 4;

/// Default JPEG quality for opaque iTerm2 images (0 disables JPEG)
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Cell size assumed when the terminal does not report one (width, height)
pub const FALLBACK_CELL_SIZE: (u32, u32) = (1, 2);

/// Z-index below which Kitty draws images under non-default text backgrounds
pub const KITTY_Z_BELOW_BACKGROUND: i32 = i32::MIN / 2;

// ============================================================================
// Helper Functions for Cursor Movement
// ============================================================================

/// Move the cursor `cols` cells to the right (CUF)
#[inline]
pub fn cursor_right(cols: u32) -> String {
    format!("{CSI}{cols}C")
}

/// Erase `cols` cells starting at the cursor without moving it (ECH)
#[inline]
pub fn erase_cells(cols: u32) -> String {
    format!("{CSI}{cols}X")
}

/// Move the cursor one line down without changing the column (CUD)
#[inline]
pub fn cursor_down() -> String {
    format!("{CSI}B")
}
