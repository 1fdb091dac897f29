//! Per-vendor workarounds
//!
//! Terminals implementing the same protocol still differ in where they
//! leave the cursor, whether text overwrites image cells, and how they
//! recover from a truncated transmission. The workarounds that apply to
//! a terminal are looked up once from a static rule table keyed by
//! protocol, vendor and version.

use crate::constants::{
    cursor_down, cursor_right, erase_cells, KITTY_DELETE_ALL, KITTY_DELETE_AT_CURSOR,
    RESTORE_CURSOR, SAVE_CURSOR, ST,
};
use crate::detect::{Protocol, Vendor, Version};

use super::{RenderOptions, ZIndex};

/// A single vendor workaround
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quirk {
    /// The cursor stays at the image origin; jump past the image
    CursorStays,
    /// Erase text under the image after drawing (unless mixing)
    EraseAfterDraw,
    /// Erase text under the image before drawing (unless mixing)
    EraseBeforeDraw,
    /// Delete overlapping images before drawing (unless mixing)
    ClearBeforeDraw,
    /// Images must be deleted explicitly; text doesn't overwrite them
    DeleteImages,
    /// Animation frames need an explicit delete-all between them
    ExplicitFrameClear,
    /// Animation frames replace the overlapping image via the z-index
    ReplaceOverlappingFrames,
    /// Write ST twice to end an interrupted transmission
    DoubleTerminator,
}

#[derive(Debug, Clone, Copy)]
enum VersionRange {
    Any,
    AtMost(Version),
    Above(Version),
}

impl VersionRange {
    fn contains(self, version: Option<Version>) -> bool {
        match (self, version) {
            (VersionRange::Any, _) => true,
            (VersionRange::AtMost(max), Some(v)) => v <= max,
            (VersionRange::Above(min), Some(v)) => v > min,
            (_, None) => false,
        }
    }
}

struct Rule {
    protocol: Protocol,
    /// None matches every vendor
    vendor: Option<Vendor>,
    versions: VersionRange,
    quirk: Quirk,
}

const KITTY_FRAME_FIX: Version = Version(0, 25, 0);

#[rustfmt::skip]
static RULES: &[Rule] = &[
    Rule { protocol: Protocol::Kitty, vendor: None, versions: VersionRange::Any, quirk: Quirk::CursorStays },
    Rule { protocol: Protocol::Kitty, vendor: None, versions: VersionRange::Any, quirk: Quirk::EraseAfterDraw },
    Rule { protocol: Protocol::Kitty, vendor: None, versions: VersionRange::Any, quirk: Quirk::DeleteImages },
    Rule { protocol: Protocol::Kitty, vendor: Some(Vendor::Kitty), versions: VersionRange::AtMost(KITTY_FRAME_FIX), quirk: Quirk::ExplicitFrameClear },
    Rule { protocol: Protocol::Kitty, vendor: Some(Vendor::Kitty), versions: VersionRange::Above(KITTY_FRAME_FIX), quirk: Quirk::ReplaceOverlappingFrames },
    Rule { protocol: Protocol::Iterm2, vendor: Some(Vendor::Konsole), versions: VersionRange::Any, quirk: Quirk::ClearBeforeDraw },
    Rule { protocol: Protocol::Iterm2, vendor: Some(Vendor::Konsole), versions: VersionRange::Any, quirk: Quirk::CursorStays },
    Rule { protocol: Protocol::Iterm2, vendor: Some(Vendor::Konsole), versions: VersionRange::Any, quirk: Quirk::DeleteImages },
    Rule { protocol: Protocol::Iterm2, vendor: Some(Vendor::WezTerm), versions: VersionRange::Any, quirk: Quirk::EraseBeforeDraw },
    Rule { protocol: Protocol::Iterm2, vendor: None, versions: VersionRange::Any, quirk: Quirk::DoubleTerminator },
];

/// Workarounds in effect for one protocol on one terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quirks {
    protocol: Protocol,
    active: Vec<Quirk>,
}

impl Quirks {
    pub fn new(protocol: Protocol, vendor: Vendor, version: Option<Version>) -> Self {
        let active = RULES
            .iter()
            .filter(|rule| {
                rule.protocol == protocol
                    && rule.vendor.map_or(true, |v| v == vendor)
                    && rule.versions.contains(version)
            })
            .map(|rule| rule.quirk)
            .collect();
        Self { protocol, active }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn has(&self, quirk: Quirk) -> bool {
        self.active.contains(&quirk)
    }

    /// Delete whatever image sits in the region's first and last cell
    fn pre_draw_clear(&self, cols: u32, options: &RenderOptions) -> String {
        let replace = self.protocol == Protocol::Kitty
            && options.z_index == ZIndex::ReplaceOverlapping;
        let konsole = self.has(Quirk::ClearBeforeDraw) && !options.mix;
        if !(replace || konsole) {
            return String::new();
        }
        format!(
            "{del}{SAVE_CURSOR}{jump}{del}{RESTORE_CURSOR}",
            del = KITTY_DELETE_AT_CURSOR,
            jump = cursor_right(cols)
        )
    }

    fn erases_before(&self, options: &RenderOptions) -> bool {
        self.has(Quirk::EraseBeforeDraw) && !options.mix
    }

    /// Written before each row's image sequence
    pub fn line_prefix(&self, cols: u32, options: &RenderOptions) -> String {
        let mut prefix = self.pre_draw_clear(cols, options);
        if self.erases_before(options) {
            prefix.push_str(&erase_cells(cols));
        }
        prefix
    }

    /// Written after each row's image sequence
    pub fn line_suffix(&self, cols: u32, options: &RenderOptions) -> String {
        let mut suffix = String::new();
        if self.has(Quirk::EraseAfterDraw) && !options.mix {
            suffix.push_str(&erase_cells(cols));
        }
        if self.has(Quirk::CursorStays) {
            suffix.push_str(&cursor_right(cols));
        }
        suffix
    }

    /// Written before a whole-image sequence.
    ///
    /// The erase covers every row, then returns to the origin.
    pub fn whole_prefix(&self, cols: u32, rows: u32, options: &RenderOptions) -> String {
        let mut prefix = self.pre_draw_clear(cols, options);
        if self.erases_before(options) {
            let erase = erase_cells(cols);
            prefix.push_str(SAVE_CURSOR);
            for _ in 1..rows {
                prefix.push_str(&erase);
                prefix.push_str(&cursor_down());
            }
            prefix.push_str(&erase);
            prefix.push_str(RESTORE_CURSOR);
        }
        prefix
    }

    /// Written after a whole-image sequence: the per-row fill, one row
    /// at a time, leaving the cursor right after the last row
    pub fn whole_suffix(&self, cols: u32, rows: u32, options: &RenderOptions) -> String {
        let fill = self.line_suffix(cols, options);
        if fill.is_empty() {
            return fill;
        }
        let mut suffix = format!("{fill}\n").repeat(rows.saturating_sub(1) as usize);
        suffix.push_str(&fill);
        suffix
    }

    /// iTerm2 `doNotMoveCursor=1`
    pub fn do_not_move_cursor(&self) -> bool {
        self.protocol == Protocol::Iterm2 && self.has(Quirk::CursorStays)
    }

    /// Ends a transmission cut short, so the terminal stops consuming
    /// output as image data
    pub fn interrupted_draw_recovery(&self) -> &'static str {
        if self.has(Quirk::DoubleTerminator) {
            "\x1b\\\x1b\\"
        } else {
            ST
        }
    }

    /// Sequence deleting every visible image, where images outlive the
    /// text drawn over them
    pub fn clear_images(&self) -> Option<&'static str> {
        self.has(Quirk::DeleteImages).then_some(KITTY_DELETE_ALL)
    }

    /// Sequence to write between animation frames, if any
    pub fn clear_frame(&self) -> Option<&'static str> {
        self.has(Quirk::ExplicitFrameClear).then_some(KITTY_DELETE_ALL)
    }

    /// Z-index for animation frames; None means leave the default
    pub fn animation_z_index(&self) -> Option<ZIndex> {
        self.has(Quirk::ReplaceOverlappingFrames)
            .then_some(ZIndex::ReplaceOverlapping)
    }
}
