//! iTerm2 inline image protocol
//!
//! `ESC ] 1337 ; File = <key>=<value>[;...] : <base64> ST`
//!
//! The payload is an image container, not raw pixels: PNG when the image
//! keeps an alpha channel (or JPEG is disabled), JPEG otherwise.
//! `width`/`height` in cells with `preserveAspectRatio=0` make the
//! terminal scale the image to the exact cell extent.

use base64::{engine::general_purpose, Engine as _};
use flate2::write::ZlibEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use std::io::Write;

use super::quirks::Quirks;
use super::{Pixels, RenderMethod, RenderOptions};
use crate::constants::{ITERM2_START, ST};
use crate::error::Result;

/// Control data of one inline image.
///
/// Serialized as `key=value` joined by `;` in the order size, width,
/// height, preserveAspectRatio, inline, doNotMoveCursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlData {
    /// Container size in bytes
    pub size: Option<usize>,
    /// Columns
    pub width: Option<u32>,
    /// Rows
    pub height: Option<u32>,
    pub preserve_aspect_ratio: Option<bool>,
    pub inline: Option<bool>,
    pub do_not_move_cursor: Option<bool>,
}

impl ControlData {
    /// Inline image stretched over `cols` x `rows` cells
    pub fn inline(size: usize, cols: u32, rows: u32, do_not_move_cursor: bool) -> Self {
        Self {
            size: Some(size),
            width: Some(cols),
            height: Some(rows),
            preserve_aspect_ratio: Some(false),
            inline: Some(true),
            do_not_move_cursor: do_not_move_cursor.then_some(true),
        }
    }

    pub fn serialize(&self) -> String {
        let flag = |b: bool| u8::from(b).to_string();
        let pairs: [(&str, Option<String>); 6] = [
            ("size", self.size.map(|s| s.to_string())),
            ("width", self.width.map(|w| w.to_string())),
            ("height", self.height.map(|h| h.to_string())),
            ("preserveAspectRatio", self.preserve_aspect_ratio.map(flag)),
            ("inline", self.inline.map(flag)),
            ("doNotMoveCursor", self.do_not_move_cursor.map(flag)),
        ];

        pairs
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={v}")))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Full escape sequence for one container
pub fn sequence(control: &ControlData, container: &[u8]) -> String {
    format!(
        "{ITERM2_START}{}:{}{ST}",
        control.serialize(),
        general_purpose::STANDARD.encode(container)
    )
}

/// Encode RGB8/RGBA8 pixels as PNG at deflate `level` (0-9).
///
/// The png crate only exposes coarse compression presets, so the IDAT
/// stream is built here: filter type 0 on every scanline, then zlib.
pub fn encode_png(
    data: &[u8],
    width: u32,
    height: u32,
    has_alpha: bool,
    level: u8,
) -> Result<Vec<u8>> {
    let bpp = if has_alpha { 4 } else { 3 };
    let stride = width as usize * bpp;

    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2),
        flate2::Compression::new(level.min(9) as u32),
    );
    for row in data.chunks(stride.max(1)) {
        encoder.write_all(&[0])?;
        encoder.write_all(row)?;
    }
    let idat = encoder.finish()?;

    let mut out = Vec::with_capacity(idat.len() + 64);
    let mut header = png::Encoder::new(&mut out, width, height);
    header.set_color(if has_alpha {
        png::ColorType::Rgba
    } else {
        png::ColorType::Rgb
    });
    header.set_depth(png::BitDepth::Eight);
    let mut writer = header.write_header()?;
    writer.write_chunk(png::chunk::IDAT, &idat)?;
    // IEND is written on drop
    drop(writer);
    Ok(out)
}

/// Encode RGB8 pixels as baseline JPEG
pub fn encode_jpeg(data: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        data,
        width,
        height,
        ColorType::Rgb8,
    )?;
    Ok(out)
}

fn encode(
    pixels: &[u8],
    width: u32,
    height: u32,
    has_alpha: bool,
    options: &RenderOptions,
    jpeg_quality: Option<u8>,
) -> Result<Vec<u8>> {
    match jpeg_quality {
        Some(quality) if !has_alpha => encode_jpeg(pixels, width, height, quality),
        _ => encode_png(pixels, width, height, has_alpha, options.compress),
    }
}

/// Render prepared pixels over `cols` x `rows` cells
pub fn render(
    pixels: &Pixels,
    cols: u32,
    rows: u32,
    options: &RenderOptions,
    quirks: &Quirks,
    jpeg_quality: Option<u8>,
) -> Result<String> {
    let stay = quirks.do_not_move_cursor();

    match options.method {
        RenderMethod::Lines => {
            let band_height = pixels.height / rows;
            let prefix = quirks.line_prefix(cols, options);
            let suffix = quirks.line_suffix(cols, options);

            let mut output = String::new();
            for (i, band) in pixels.bands(rows).enumerate() {
                if i > 0 {
                    output.push('\n');
                }
                let container = encode(
                    band,
                    pixels.width,
                    band_height,
                    pixels.has_alpha,
                    options,
                    jpeg_quality,
                )?;
                output.push_str(&prefix);
                output.push_str(&sequence(
                    &ControlData::inline(container.len(), cols, 1, stay),
                    &container,
                ));
                output.push_str(&suffix);
            }
            Ok(output)
        }
        RenderMethod::Whole => {
            let container = encode(
                &pixels.data,
                pixels.width,
                pixels.height,
                pixels.has_alpha,
                options,
                jpeg_quality,
            )?;
            Ok(whole(&container, cols, rows, options, quirks))
        }
    }
}

/// Send an already-encoded container (PNG, JPEG, GIF...) untouched
pub fn render_native(
    container: &[u8],
    cols: u32,
    rows: u32,
    options: &RenderOptions,
    quirks: &Quirks,
) -> String {
    whole(container, cols, rows, options, quirks)
}

fn whole(
    container: &[u8],
    cols: u32,
    rows: u32,
    options: &RenderOptions,
    quirks: &Quirks,
) -> String {
    let control = ControlData::inline(container.len(), cols, rows, quirks.do_not_move_cursor());
    let mut output = quirks.whole_prefix(cols, rows, options);
    output.push_str(&sequence(&control, container));
    output.push_str(&quirks.whole_suffix(cols, rows, options));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Protocol, Vendor, Version};

    fn iterm2() -> Quirks {
        Quirks::new(Protocol::Iterm2, Vendor::Iterm2, Some(Version(3, 5, 0)))
    }

    fn payload(seq: &str) -> Vec<u8> {
        let start = seq.find(':').unwrap() + 1;
        let end = seq.rfind(ST).unwrap();
        general_purpose::STANDARD.decode(&seq[start..end]).unwrap()
    }

    #[test]
    fn test_control_data() {
        assert_eq!(
            ControlData::inline(10, 4, 2, false).serialize(),
            "size=10;width=4;height=2;preserveAspectRatio=0;inline=1"
        );
        assert_eq!(
            ControlData::inline(10, 4, 2, true).serialize(),
            "size=10;width=4;height=2;preserveAspectRatio=0;inline=1;doNotMoveCursor=1"
        );
        assert_eq!(ControlData::default().serialize(), "");
    }

    #[test]
    fn test_png_decodes() {
        let data: Vec<u8> = (0..2 * 3 * 4).map(|i| i as u8).collect();
        for level in [0, 4, 9] {
            let png = encode_png(&data, 2, 3, true, level).unwrap();
            let img = image::load_from_memory(&png).unwrap();
            assert_eq!(img.color(), ColorType::Rgba8);
            assert_eq!(img.to_rgba8().into_raw(), data);
        }
    }

    #[test]
    fn test_png_size_shrinks_with_level() {
        let data = vec![200u8; 64 * 64 * 3];
        let stored = encode_png(&data, 64, 64, false, 0).unwrap();
        let best = encode_png(&data, 64, 64, false, 9).unwrap();
        assert!(best.len() < stored.len());
    }

    #[test]
    fn test_opaque_uses_jpeg() {
        let pixels = Pixels {
            width: 8,
            height: 8,
            has_alpha: false,
            data: vec![128; 8 * 8 * 3],
        };
        let options = RenderOptions {
            method: RenderMethod::Whole,
            ..RenderOptions::default()
        };
        let out = render(&pixels, 2, 1, &options, &iterm2(), Some(90)).unwrap();
        assert!(payload(&out).starts_with(&[0xFF, 0xD8]));

        let out = render(&pixels, 2, 1, &options, &iterm2(), None).unwrap();
        assert!(payload(&out).starts_with(b"\x89PNG"));
    }

    #[test]
    fn test_lines() {
        let pixels = Pixels {
            width: 1,
            height: 2,
            has_alpha: true,
            data: vec![0; 8],
        };
        let out = render(&pixels, 3, 2, &RenderOptions::default(), &iterm2(), Some(95)).unwrap();
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            assert!(line.starts_with("\x1b]1337;File=size="));
            assert!(line.contains(";width=3;height=1;preserveAspectRatio=0;inline=1:"));
            assert!(line.ends_with(ST));
            let band = image::load_from_memory(&payload(line)).unwrap();
            assert_eq!((band.width(), band.height()), (1, 1));
        }
    }

    #[test]
    fn test_konsole_whole() {
        let quirks = Quirks::new(Protocol::Iterm2, Vendor::Konsole, Some(Version(23, 8, 0)));
        let out = render_native(b"GIF89a", 2, 2, &RenderOptions::default(), &quirks);
        let delete = "\x1b_Ga=d,d=c;\x1b\\";
        assert!(out.starts_with(&format!("{delete}\x1b7\x1b[2C{delete}\x1b8\x1b]1337;File=size=6;")));
        assert!(out.contains(";doNotMoveCursor=1:"));
        assert!(out.ends_with("\x1b\\\x1b[2C\n\x1b[2C"));
    }
}
