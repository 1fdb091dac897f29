//! Inline image rendering
//!
//! Turns a decoded image into the escape sequences that draw it over an
//! exact extent of terminal cells. Both protocols let the terminal scale
//! the image to the declared cell extent, so the payload never needs more
//! pixels than the cells can show:
//!
//! ```text
//! DynamicImage ─▶ minimal_render_size() ─▶ prepare() ─▶ Pixels
//!                                                        │
//!                  kitty::render() / iterm2::render() ◀──┘
//!                                                        │
//!                                 quirks (clear, fill) ──▶ String
//! ```

pub mod iterm2;
pub mod kitty;
pub mod quirks;

use image::imageops::FilterType;
use image::DynamicImage;
use log::debug;
use std::fmt;
use std::str::FromStr;

use crate::config::Config;
use crate::constants::{DEFAULT_COMPRESSION, DEFAULT_JPEG_QUALITY};
use crate::detect::{self, Protocol, ProtocolSupport};
use crate::error::{Error, Result};
use crate::tty::geometry;
use crate::utils::composite_over;

pub use kitty::ZIndex;
pub use quirks::Quirks;

/// How an image is split into escape sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMethod {
    /// One sequence per terminal row, joined by newlines
    #[default]
    Lines,
    /// A single sequence declaring the full extent
    Whole,
}

impl FromStr for RenderMethod {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "lines" => Ok(RenderMethod::Lines),
            "whole" => Ok(RenderMethod::Whole),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RenderMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RenderMethod::Lines => "lines",
            RenderMethod::Whole => "whole",
        })
    }
}

/// Transparency handling applied before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alpha {
    /// Keep the alpha channel if the image has one
    #[default]
    Keep,
    /// Drop alpha, compositing over black
    Opaque,
    /// Drop alpha, compositing over this color
    Background(u8, u8, u8),
}

/// Per-request render options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub method: RenderMethod,
    pub alpha: Alpha,
    /// Kitty only
    pub z_index: ZIndex,
    /// Keep text under transparent image areas
    pub mix: bool,
    /// Deflate level 0-9 (0 = off)
    pub compress: u8,
    /// iTerm2 only: send the caller's original container bytes
    pub native: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            method: RenderMethod::Lines,
            alpha: Alpha::Keep,
            z_index: ZIndex::default(),
            mix: false,
            compress: DEFAULT_COMPRESSION,
            native: false,
        }
    }
}

/// Pixel buffer ready for transmission (RGB8 or RGBA8, row-major)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixels {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    pub data: Vec<u8>,
}

impl Pixels {
    pub fn bytes_per_pixel(&self) -> usize {
        if self.has_alpha {
            4
        } else {
            3
        }
    }

    /// Split into `rows` equal horizontal bands.
    ///
    /// `height` must be a multiple of `rows`; `minimal_render_size`
    /// guarantees it.
    pub fn bands(&self, rows: u32) -> impl Iterator<Item = &[u8]> {
        let band_height = (self.height / rows.max(1)) as usize;
        let band_len = self.width as usize * band_height * self.bytes_per_pixel();
        self.data.chunks(band_len.max(1))
    }
}

/// Smallest pixel size that still fills `cols` x `rows` cells.
///
/// Downscales to the on-screen size when that holds fewer pixels than the
/// original; otherwise keeps the original, with the height padded up to a
/// multiple of `rows` so every row gets the same number of pixel lines.
/// The terminal scales to the declared cell extent, so nothing is ever
/// upsampled here beyond that padding.
///
/// None if the on-screen size or the padded height overflows `u32`.
pub fn minimal_render_size(
    original: (u32, u32),
    cols: u32,
    rows: u32,
    cell_size: (u32, u32),
) -> Option<(u32, u32)> {
    let render = (
        cols.checked_mul(cell_size.0.max(1))?,
        rows.checked_mul(cell_size.1.max(1))?,
    );
    let (width, height) =
        if (render.0 as u64) * (render.1 as u64) < (original.0 as u64) * (original.1 as u64) {
            render
        } else {
            original
        };

    let rows = u64::from(rows.max(1));
    let padded = u64::from(height).div_ceil(rows) * rows;
    Some((width, u32::try_from(padded).ok()?))
}

/// Resize to `size` and apply alpha processing
pub fn prepare(img: &DynamicImage, alpha: Alpha, size: (u32, u32)) -> Pixels {
    let (width, height) = size;
    let rgba = img.to_rgba8();
    let rgba = if rgba.dimensions() == size {
        rgba
    } else {
        image::imageops::resize(&rgba, width, height, FilterType::Triangle)
    };

    let data = rgba.into_raw();
    match alpha {
        Alpha::Keep if img.color().has_alpha() => Pixels {
            width,
            height,
            has_alpha: true,
            data,
        },
        Alpha::Keep => Pixels {
            width,
            height,
            has_alpha: false,
            data: data.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]).collect(),
        },
        Alpha::Opaque | Alpha::Background(..) => {
            let background = match alpha {
                Alpha::Background(r, g, b) => (r, g, b),
                _ => (0, 0, 0),
            };
            Pixels {
                width,
                height,
                has_alpha: false,
                data: data
                    .chunks_exact(4)
                    .flat_map(|p| composite_over([p[0], p[1], p[2], p[3]], background))
                    .collect(),
            }
        }
    }
}

/// Renders images for one protocol on one terminal
#[derive(Debug, Clone)]
pub struct Renderer {
    protocol: Protocol,
    quirks: Quirks,
    cell_size: (u32, u32),
    jpeg_quality: Option<u8>,
}

impl Renderer {
    /// Renderer for an explicitly chosen protocol and terminal.
    ///
    /// Opaque iTerm2 images go out as JPEG at the default quality.
    pub fn new(protocol: Protocol, support: &ProtocolSupport, cell_size: (u32, u32)) -> Self {
        Self {
            protocol,
            quirks: Quirks::new(protocol, support.vendor, support.version),
            cell_size,
            jpeg_quality: Some(DEFAULT_JPEG_QUALITY),
        }
    }

    /// Detect `protocol` on the controlling terminal and configure from `config`.
    ///
    /// Fails with [`Error::Unsupported`] if the terminal doesn't support it.
    pub fn detect(protocol: Protocol, config: &Config) -> Result<Self> {
        let support = detect::detect_with_timeout(protocol, config.detection.timeout());
        if !support.is_supported() {
            return Err(Error::Unsupported(protocol.name()));
        }
        let cell_size = geometry::resolve_cell_size(config.geometry.cell_size());
        Ok(Self::new(protocol, &support, cell_size)
            .with_jpeg_quality(config.render.jpeg_quality()))
    }

    /// JPEG quality for opaque iTerm2 images; None always uses PNG
    pub fn with_jpeg_quality(mut self, quality: Option<u8>) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn quirks(&self) -> &Quirks {
        &self.quirks
    }

    pub fn cell_size(&self) -> (u32, u32) {
        self.cell_size
    }

    /// Render `img` over `cols` x `rows` cells
    pub fn render(
        &self,
        img: &DynamicImage,
        cols: u32,
        rows: u32,
        options: &RenderOptions,
    ) -> Result<String> {
        if cols == 0 || rows == 0 || img.width() == 0 || img.height() == 0 {
            return Err(Error::InvalidSize { cols, rows });
        }

        let size = minimal_render_size((img.width(), img.height()), cols, rows, self.cell_size)
            .ok_or(Error::InvalidSize { cols, rows })?;
        let pixels = prepare(img, options.alpha, size);
        debug!(
            "{}: rendering {}x{} px over {}x{} cells ({})",
            self.protocol, pixels.width, pixels.height, cols, rows, options.method
        );

        match self.protocol {
            Protocol::Kitty => kitty::render(&pixels, cols, rows, options, &self.quirks),
            Protocol::Iterm2 => iterm2::render(
                &pixels,
                cols,
                rows,
                options,
                &self.quirks,
                self.jpeg_quality,
            ),
        }
    }

    /// Render an already-encoded image file (e.g. an animated GIF).
    ///
    /// iTerm2 transmits the bytes untouched. Kitty accepts PNG natively and
    /// re-encodes anything else.
    pub fn render_native(
        &self,
        container: &[u8],
        cols: u32,
        rows: u32,
        options: &RenderOptions,
    ) -> Result<String> {
        if cols == 0 || rows == 0 {
            return Err(Error::InvalidSize { cols, rows });
        }

        match self.protocol {
            Protocol::Iterm2 => Ok(iterm2::render_native(
                container,
                cols,
                rows,
                options,
                &self.quirks,
            )),
            Protocol::Kitty if kitty::is_png(container) => {
                kitty::render_png(container, cols, rows, options, &self.quirks)
            }
            Protocol::Kitty => {
                let img = image::load_from_memory(container)?;
                self.render(&img, cols, rows, options)
            }
        }
    }

    /// Sequence that deletes images drawn earlier, if the terminal needs one
    pub fn clear_images(&self) -> Option<&'static str> {
        self.quirks.clear_images()
    }

    /// Sequence to write when drawing was interrupted mid-transmission
    pub fn interrupted_draw_recovery(&self) -> &'static str {
        self.quirks.interrupted_draw_recovery()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose, Engine as _};
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_method_from_str() {
        assert_eq!("lines".parse(), Ok(RenderMethod::Lines));
        assert_eq!("WHOLE".parse(), Ok(RenderMethod::Whole));
        assert_eq!("".parse::<RenderMethod>(), Err(()));
    }

    #[test]
    fn test_minimal_size_downscales() {
        // 100x100 image over 4x2 cells of 10x20 px = 40x40 px
        assert_eq!(minimal_render_size((100, 100), 4, 2, (10, 20)), Some((40, 40)));
    }

    #[test]
    fn test_minimal_size_keeps_original_with_padding() {
        // Original smaller than render size: keep it, pad height to a multiple of rows
        assert_eq!(minimal_render_size((30, 25), 10, 4, (10, 20)), Some((30, 28)));
        assert_eq!(minimal_render_size((1, 1), 4, 4, (1, 2)), Some((1, 4)));
        assert_eq!(minimal_render_size((30, 24), 10, 4, (10, 20)), Some((30, 24)));
    }

    #[test]
    fn test_minimal_size_overflow() {
        assert_eq!(minimal_render_size((4, 4), 500_000_000, 1, (10, 20)), None);
        assert_eq!(minimal_render_size((4, 4), 1, u32::MAX, (1, 2)), None);
        // Odd original height padded past u32::MAX
        assert_eq!(
            minimal_render_size((1, u32::MAX), 2, 2, (1, u32::MAX / 2)),
            None
        );
    }

    #[test]
    fn test_oversized_extent_rejected() {
        let renderer = Renderer::new(Protocol::Kitty, &ProtocolSupport::default(), (10, 20));
        let img = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        assert!(matches!(
            renderer.render(&img, 500_000_000, 1, &RenderOptions::default()),
            Err(Error::InvalidSize {
                cols: 500_000_000,
                rows: 1
            })
        ));
    }

    #[test]
    fn test_new_renderer_sends_opaque_iterm2_as_jpeg() {
        let support = ProtocolSupport {
            vendor: detect::Vendor::Iterm2,
            ..ProtocolSupport::default()
        };
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(8, 8));
        let options = RenderOptions {
            method: RenderMethod::Whole,
            ..RenderOptions::default()
        };

        let container = |renderer: Renderer| {
            let out = renderer.render(&img, 4, 4, &options).unwrap();
            let start = out.find(':').unwrap() + 1;
            let end = out.rfind("\x1b\\").unwrap();
            general_purpose::STANDARD.decode(&out[start..end]).unwrap()
        };

        let renderer = Renderer::new(Protocol::Iterm2, &support, (1, 2));
        assert_eq!(&container(renderer.clone())[..2], &[0xFF, 0xD8]);
        assert_eq!(
            &container(renderer.with_jpeg_quality(None))[..4],
            b"\x89PNG"
        );
    }

    #[test]
    fn test_prepare_modes() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0])));

        let keep = prepare(&img, Alpha::Keep, (2, 2));
        assert!(keep.has_alpha);
        assert_eq!(keep.data, vec![0; 16]);

        let opaque = prepare(&img, Alpha::Opaque, (2, 2));
        assert!(!opaque.has_alpha);
        assert_eq!(opaque.data, vec![0; 12]);

        let red = prepare(&img, Alpha::Background(255, 0, 0), (2, 4));
        assert_eq!((red.width, red.height), (2, 4));
        assert_eq!(red.data.len(), 2 * 4 * 3);
        assert!(red.data.chunks(3).all(|p| p == [255, 0, 0]));
    }

    #[test]
    fn test_prepare_rgb_source_has_no_alpha() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(3, 1, image::Rgb([1, 2, 3])));
        let pixels = prepare(&img, Alpha::Keep, (3, 1));
        assert!(!pixels.has_alpha);
        assert_eq!(pixels.data, vec![1, 2, 3, 1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_bands() {
        let pixels = Pixels {
            width: 2,
            height: 4,
            has_alpha: true,
            data: (0..32).collect(),
        };
        let bands: Vec<&[u8]> = pixels.bands(2).collect();
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[0].len(), 16);
        assert_eq!(bands[1][0], 16);
    }

    #[test]
    fn test_zero_extent_rejected() {
        let renderer = Renderer::new(Protocol::Kitty, &ProtocolSupport::default(), (1, 2));
        let img = DynamicImage::ImageRgba8(RgbaImage::new(1, 1));
        assert!(matches!(
            renderer.render(&img, 0, 3, &RenderOptions::default()),
            Err(Error::InvalidSize { cols: 0, rows: 3 })
        ));
    }
}
