//! Kitty terminal graphics protocol
//!
//! https://sw.kovidgoyal.net/kitty/graphics-protocol/
//!
//! Images are sent inline (`t=d`) as raw RGB/RGBA or PNG, optionally
//! zlib-compressed, base64-encoded and split into 4096-byte chunks.
//! `c`/`r` make the terminal scale the image to the cell extent, and
//! `C=1` keeps the cursor at the image origin so the caller decides where
//! it goes next.

use base64::{engine::general_purpose, Engine as _};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

use super::quirks::Quirks;
use super::{Pixels, RenderMethod, RenderOptions};
use crate::constants::{KITTY_CHUNK_SIZE, KITTY_START, KITTY_Z_BELOW_BACKGROUND, ST};
use crate::error::{Result, TransmissionError};

/// Image stacking order relative to text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZIndex {
    /// `>= 0` above text, `< 0` below text
    Layer(i32),
    /// No `z` key; any directly overlapping image is deleted first.
    /// Used for animation frame replacement.
    ReplaceOverlapping,
}

impl Default for ZIndex {
    fn default() -> Self {
        ZIndex::Layer(0)
    }
}

impl ZIndex {
    /// Layer value sent as `z`, if any
    pub fn layer(self) -> Option<i32> {
        match self {
            ZIndex::Layer(z) => Some(z),
            ZIndex::ReplaceOverlapping => None,
        }
    }

    /// True if the image goes below non-default text backgrounds too
    pub fn is_below_background(self) -> bool {
        matches!(self, ZIndex::Layer(z) if z < KITTY_Z_BELOW_BACKGROUND)
    }
}

/// Action (a)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Transmit only (a=t)
    Transmit,
    /// Transmit and display (a=T)
    TransmitAndDisplay,
    /// Query support (a=q)
    Query,
    /// Display a transmitted image (a=p)
    Place,
    /// Delete images (a=d)
    Delete,
}

impl Action {
    fn code(self) -> char {
        match self {
            Action::Transmit => 't',
            Action::TransmitAndDisplay => 'T',
            Action::Query => 'q',
            Action::Place => 'p',
            Action::Delete => 'd',
        }
    }
}

/// Pixel data format (f)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// f=24
    Rgb,
    /// f=32
    Rgba,
    /// f=100
    Png,
}

impl Format {
    pub fn code(self) -> u32 {
        match self {
            Format::Rgb => 24,
            Format::Rgba => 32,
            Format::Png => 100,
        }
    }
}

/// Transmission medium (t)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    /// Inline payload (t=d)
    Direct,
    /// Regular file (t=f)
    File,
    /// Temporary file (t=t)
    TempFile,
    /// POSIX shared memory (t=s)
    SharedMemory,
}

impl Medium {
    fn code(self) -> char {
        match self {
            Medium::Direct => 'd',
            Medium::File => 'f',
            Medium::TempFile => 't',
            Medium::SharedMemory => 's',
        }
    }
}

/// Payload compression (o)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// o=z
    Zlib,
}

/// Cursor movement policy (C)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPolicy {
    /// C=0: cursor moves past the image
    Move,
    /// C=1: cursor stays at the image origin
    Stay,
}

/// Control data of one transmission.
///
/// Serialized in the fixed key order `a,f,t,s,v,z,o,C,c,r`; absent keys
/// are never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlData {
    action: Option<Action>,
    format: Option<Format>,
    medium: Option<Medium>,
    width: Option<u32>,
    height: Option<u32>,
    z_index: Option<i32>,
    compression: Option<Compression>,
    cursor: Option<CursorPolicy>,
    columns: Option<u32>,
    rows: Option<u32>,
}

impl Default for ControlData {
    fn default() -> Self {
        Self {
            action: Some(Action::TransmitAndDisplay),
            format: Some(Format::Rgba),
            medium: Some(Medium::Direct),
            width: None,
            height: None,
            z_index: Some(0),
            compression: None,
            cursor: Some(CursorPolicy::Stay),
            columns: None,
            rows: None,
        }
    }
}

impl ControlData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_action(&mut self, action: Option<Action>) -> &mut Self {
        self.action = action;
        self
    }

    /// PNG carries its own dimensions, so `s`/`v` are dropped for it
    pub fn set_format(&mut self, format: Option<Format>) -> &mut Self {
        self.format = format;
        if format == Some(Format::Png) {
            self.width = None;
            self.height = None;
        }
        self
    }

    pub fn set_medium(&mut self, medium: Option<Medium>) -> &mut Self {
        self.medium = medium;
        self
    }

    /// Pixel size (`s`, `v`); ignored for PNG
    pub fn set_pixel_size(&mut self, width: u32, height: u32) -> &mut Self {
        if self.format != Some(Format::Png) {
            self.width = Some(width);
            self.height = Some(height);
        }
        self
    }

    pub fn set_z_index(&mut self, z_index: ZIndex) -> &mut Self {
        self.z_index = z_index.layer();
        self
    }

    pub fn set_cursor(&mut self, cursor: Option<CursorPolicy>) -> &mut Self {
        self.cursor = cursor;
        self
    }

    /// Display extent in cells (`c`, `r`)
    pub fn set_extent(&mut self, columns: u32, rows: u32) -> &mut Self {
        self.columns = Some(columns);
        self.rows = Some(rows);
        self
    }

    pub fn format(&self) -> Option<Format> {
        self.format
    }

    pub fn medium(&self) -> Option<Medium> {
        self.medium
    }

    pub fn compression(&self) -> Option<Compression> {
        self.compression
    }

    pub fn pixel_size(&self) -> (Option<u32>, Option<u32>) {
        (self.width, self.height)
    }

    /// `key=value` pairs joined by `,`
    pub fn serialize(&self) -> String {
        let pairs: [(&str, Option<String>); 10] = [
            ("a", self.action.map(|a| a.code().to_string())),
            ("f", self.format.map(|f| f.code().to_string())),
            ("t", self.medium.map(|t| t.code().to_string())),
            ("s", self.width.map(|s| s.to_string())),
            ("v", self.height.map(|v| v.to_string())),
            ("z", self.z_index.map(|z| z.to_string())),
            ("o", self.compression.map(|_| "z".to_string())),
            (
                "C",
                self.cursor.map(|c| match c {
                    CursorPolicy::Move => "0".to_string(),
                    CursorPolicy::Stay => "1".to_string(),
                }),
            ),
            ("c", self.columns.map(|c| c.to_string())),
            ("r", self.rows.map(|r| r.to_string())),
        ];

        pairs
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={v}")))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// One image transmission: control data plus payload
#[derive(Debug, Clone)]
pub struct Transmission {
    control: ControlData,
    payload: Vec<u8>,
    compressed: bool,
}

impl Transmission {
    pub fn new(control: ControlData, payload: Vec<u8>) -> Self {
        Self {
            control,
            payload,
            compressed: false,
        }
    }

    pub fn control(&self) -> &ControlData {
        &self.control
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// zlib-compress the payload at `level` (1-9) and set `o=z`.
    ///
    /// Level 0 leaves the payload as is. Compressing twice is a no-op.
    pub fn compress(&mut self, level: u8) -> Result<()> {
        if level > 9 {
            return Err(TransmissionError::InvalidLevel(level).into());
        }
        if level == 0 || self.compressed {
            return Ok(());
        }
        if self.control.medium != Some(Medium::Direct) {
            return Err(TransmissionError::NotDirect.into());
        }

        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(self.payload.len() / 2),
            flate2::Compression::new(level as u32),
        );
        encoder.write_all(&self.payload)?;
        self.payload = encoder.finish()?;
        self.control.compression = Some(Compression::Zlib);
        self.compressed = true;
        Ok(())
    }

    /// Undo [`compress`](Self::compress); a no-op on uncompressed payloads
    pub fn decompress(&mut self) -> Result<()> {
        if !self.compressed {
            return Ok(());
        }
        let mut decoder = ZlibDecoder::new(self.payload.as_slice());
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;
        self.payload = raw;
        self.control.compression = None;
        self.compressed = false;
        Ok(())
    }

    /// Base64 (standard alphabet, padded) payload
    pub fn encode(&self) -> String {
        general_purpose::STANDARD.encode(&self.payload)
    }

    /// Escape sequences carrying the payload in slices of at most `size`
    /// base64 bytes.
    ///
    /// The first chunk carries the full control data; later chunks carry
    /// only `m`. `m=1` marks that more follow. A payload that fits one
    /// slice yields exactly one chunk with `m=0`, and the final chunk is
    /// never empty unless the whole payload is.
    pub fn chunks(&self, size: usize) -> Vec<String> {
        let encoded = self.encode();
        let size = size.max(1);
        let count = encoded.len().div_ceil(size).max(1);

        (0..count)
            .map(|i| {
                let start = (i * size).min(encoded.len());
                let end = (start + size).min(encoded.len());
                // base64 is ASCII: every index is a char boundary
                let piece = &encoded[start..end];
                let more = u8::from(i + 1 < count);
                if i == 0 {
                    format!("{KITTY_START}{},m={more};{piece}{ST}", self.control.serialize())
                } else {
                    format!("{KITTY_START}m={more};{piece}{ST}")
                }
            })
            .collect()
    }

    /// All chunks at the default chunk size, concatenated
    pub fn chunked(&self) -> String {
        self.chunks(KITTY_CHUNK_SIZE).concat()
    }
}

/// True if `data` starts with the PNG signature
pub fn is_png(data: &[u8]) -> bool {
    data.starts_with(b"\x89PNG\r\n\x1a\n")
}

/// Render prepared pixels over `cols` x `rows` cells
pub fn render(
    pixels: &Pixels,
    cols: u32,
    rows: u32,
    options: &RenderOptions,
    quirks: &Quirks,
) -> Result<String> {
    let mut control = ControlData::new();
    control
        .set_format(Some(if pixels.has_alpha {
            Format::Rgba
        } else {
            Format::Rgb
        }))
        .set_z_index(options.z_index);

    match options.method {
        RenderMethod::Lines => {
            let band_height = pixels.height / rows;
            control
                .set_pixel_size(pixels.width, band_height)
                .set_extent(cols, 1);

            let prefix = quirks.line_prefix(cols, options);
            let suffix = quirks.line_suffix(cols, options);
            let mut output = String::new();
            for (i, band) in pixels.bands(rows).enumerate() {
                if i > 0 {
                    output.push('\n');
                }
                let mut trans = Transmission::new(control.clone(), band.to_vec());
                trans.compress(options.compress)?;
                output.push_str(&prefix);
                output.push_str(&trans.chunked());
                output.push_str(&suffix);
            }
            Ok(output)
        }
        RenderMethod::Whole => {
            control
                .set_pixel_size(pixels.width, pixels.height)
                .set_extent(cols, rows);
            let mut trans = Transmission::new(control, pixels.data.clone());
            trans.compress(options.compress)?;
            Ok(whole(trans, cols, rows, options, quirks))
        }
    }
}

/// Render PNG bytes as a single `f=100` transmission
pub fn render_png(
    png: &[u8],
    cols: u32,
    rows: u32,
    options: &RenderOptions,
    quirks: &Quirks,
) -> Result<String> {
    let mut control = ControlData::new();
    control
        .set_format(Some(Format::Png))
        .set_z_index(options.z_index)
        .set_extent(cols, rows);
    // Already deflated; zlib on top gains nothing
    let trans = Transmission::new(control, png.to_vec());
    Ok(whole(trans, cols, rows, options, quirks))
}

fn whole(
    trans: Transmission,
    cols: u32,
    rows: u32,
    options: &RenderOptions,
    quirks: &Quirks,
) -> String {
    let mut output = quirks.whole_prefix(cols, rows, options);
    output.push_str(&trans.chunked());
    output.push_str(&quirks.whole_suffix(cols, rows, options));
    output
}
