//! Color parsing and compositing utilities
//!
//! Used by the style parser (`#RRGGBB` backgrounds) and alpha processing.

/// Parse 6-digit hex color (e.g., "ff0000" -> (255, 0, 0))
/// Returns None on invalid input.
pub fn parse_hex_color(hex: &str) -> Option<(u8, u8, u8)> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

/// Composite one RGBA pixel over an opaque background.
///
/// Integer "over" operator with rounding; the result is opaque RGB.
#[inline]
pub fn composite_over(pixel: [u8; 4], background: (u8, u8, u8)) -> [u8; 3] {
    let a = pixel[3] as u32;
    let blend = |fg: u8, bg: u8| -> u8 { ((fg as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8 };
    [
        blend(pixel[0], background.0),
        blend(pixel[1], background.1),
        blend(pixel[2], background.2),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("ff0000"), Some((255, 0, 0)));
        assert_eq!(parse_hex_color("00ff00"), Some((0, 255, 0)));
        assert_eq!(parse_hex_color("0000ff"), Some((0, 0, 255)));
        assert_eq!(parse_hex_color("#ff0000"), Some((255, 0, 0)));
        assert_eq!(parse_hex_color("f00"), None);
        assert_eq!(parse_hex_color("#f00"), None);
        assert_eq!(parse_hex_color("invalid"), None);
        assert_eq!(parse_hex_color("ééé"), None);
    }

    #[test]
    fn test_composite_over() {
        // Fully transparent takes the background
        assert_eq!(composite_over([9, 9, 9, 0], (255, 0, 0)), [255, 0, 0]);
        // Fully opaque keeps the pixel
        assert_eq!(composite_over([1, 2, 3, 255], (255, 255, 255)), [1, 2, 3]);
        // Half blend
        assert_eq!(composite_over([255, 255, 255, 128], (0, 0, 0)), [128, 128, 128]);
    }
}
