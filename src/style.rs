//! Style format strings
//!
//! A compact, separator-less way to set render options per request:
//!
//! ```text
//! [#|#.NNN|#RRGGBB] [L|W] [z[-]<digits>] [m0|m1] [c<digits>]   kitty
//! [#|#.NNN|#RRGGBB] [L|W] [N]            [m0|m1] [c<digits>]   iterm2
//! ```
//!
//! - `#` drops alpha (over black), `#.NNN` keeps it, `#RRGGBB` composites
//!   over that color
//! - `L`/`W` render method (lines/whole)
//! - `z` z-index; bare `z` replaces overlapping images
//! - `N` sends the original image file
//! - `m` text mixing off/on
//! - `c` compression level 0-9
//!
//! Fields must appear in this order. Only what the string sets is
//! returned, so explicit values override configured defaults.

use crate::detect::Protocol;
use crate::error::StyleError;
use crate::graphics::{Alpha, RenderMethod, RenderOptions, ZIndex};
use crate::utils::parse_hex_color;

/// Options set by one style string
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StyleArgs {
    pub method: Option<RenderMethod>,
    pub alpha: Option<Alpha>,
    pub z_index: Option<ZIndex>,
    pub mix: Option<bool>,
    pub compress: Option<u8>,
    pub native: Option<bool>,
}

impl StyleArgs {
    /// Overlay the values set here on `base`
    pub fn apply(&self, base: RenderOptions) -> RenderOptions {
        RenderOptions {
            method: self.method.unwrap_or(base.method),
            alpha: self.alpha.unwrap_or(base.alpha),
            z_index: self.z_index.unwrap_or(base.z_index),
            mix: self.mix.unwrap_or(base.mix),
            compress: self.compress.unwrap_or(base.compress),
            native: self.native.unwrap_or(base.native),
        }
    }
}

/// Left-to-right cursor over a style string
struct Scanner<'a> {
    spec: &'a str,
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(spec: &'a str) -> Self {
        Self { spec, rest: spec }
    }

    fn eat(&mut self, c: char) -> bool {
        match self.rest.strip_prefix(c) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn digits(&mut self) -> &'a str {
        let end = self
            .rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest.len());
        let (digits, rest) = self.rest.split_at(end);
        self.rest = rest;
        digits
    }

    /// Error pointing at the unconsumed text
    fn invalid(&self) -> StyleError {
        self.invalid_at(self.rest)
    }

    fn invalid_at(&self, offending: &str) -> StyleError {
        StyleError::Format {
            spec: self.spec.to_string(),
            offending: offending.to_string(),
        }
    }
}

/// Parse a style string for `protocol`
pub fn parse_style(protocol: Protocol, spec: &str) -> Result<StyleArgs, StyleError> {
    let mut scan = Scanner::new(spec);
    let mut args = StyleArgs::default();

    // Generic alpha group
    let group = scan.rest;
    if scan.eat('#') {
        if scan.eat('.') {
            if scan.digits().is_empty() {
                return Err(scan.invalid_at(group));
            }
            args.alpha = Some(Alpha::Keep);
        } else if let Some((r, g, b)) = scan.rest.get(..6).and_then(parse_hex_color) {
            scan.rest = &scan.rest[6..];
            args.alpha = Some(Alpha::Background(r, g, b));
        } else {
            args.alpha = Some(Alpha::Opaque);
        }
    }

    if scan.eat('L') {
        args.method = Some(RenderMethod::Lines);
    } else if scan.eat('W') {
        args.method = Some(RenderMethod::Whole);
    }

    match protocol {
        Protocol::Kitty => {
            let start = scan.rest;
            if scan.eat('z') {
                let negative = scan.eat('-');
                let digits = scan.digits();
                args.z_index = Some(if digits.is_empty() {
                    if negative {
                        return Err(scan.invalid_at(start));
                    }
                    ZIndex::ReplaceOverlapping
                } else {
                    let value = format!("{}{}", if negative { "-" } else { "" }, digits);
                    ZIndex::Layer(value.parse().map_err(|_| StyleError::Argument {
                        key: "z_index",
                        constraint: format!(
                            "must be within the 32-bit signed integer range (got {value})"
                        ),
                    })?)
                });
            }
        }
        Protocol::Iterm2 => {
            if scan.eat('N') {
                args.native = Some(true);
            }
        }
    }

    if scan.eat('m') {
        if scan.eat('0') {
            args.mix = Some(false);
        } else if scan.eat('1') {
            args.mix = Some(true);
        } else {
            return Err(scan.invalid());
        }
    }

    let start = scan.rest;
    if scan.eat('c') {
        let digits = scan.digits();
        if digits.is_empty() {
            return Err(scan.invalid_at(start));
        }
        let level = digits.parse::<u32>().ok().filter(|l| *l <= 9);
        match level {
            Some(level) => args.compress = Some(level as u8),
            None => {
                return Err(StyleError::Argument {
                    key: "compress",
                    constraint: format!("must be 0-9 (got {digits})"),
                })
            }
        }
    }

    if !scan.rest.is_empty() {
        return Err(scan.invalid());
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kitty(spec: &str) -> Result<StyleArgs, StyleError> {
        parse_style(Protocol::Kitty, spec)
    }

    fn iterm2(spec: &str) -> Result<StyleArgs, StyleError> {
        parse_style(Protocol::Iterm2, spec)
    }

    fn is_format_error(result: Result<StyleArgs, StyleError>) -> bool {
        matches!(result, Err(StyleError::Format { .. }))
    }

    #[test]
    fn test_empty() {
        assert_eq!(kitty(""), Ok(StyleArgs::default()));
        assert_eq!(iterm2(""), Ok(StyleArgs::default()));
    }

    #[test]
    fn test_whole_mix_compress() {
        let args = kitty("Wm1c9").unwrap();
        assert_eq!(args.method, Some(RenderMethod::Whole));
        assert_eq!(args.mix, Some(true));
        assert_eq!(args.compress, Some(9));

        let options = args.apply(RenderOptions::default());
        assert_eq!(options.method, RenderMethod::Whole);
        assert!(options.mix);
        assert_eq!(options.compress, 9);
    }

    #[test]
    fn test_explicit_defaults_override() {
        let base = RenderOptions {
            mix: true,
            compress: 9,
            ..RenderOptions::default()
        };
        let options = iterm2("m0c4").unwrap().apply(base);
        assert!(!options.mix);
        assert_eq!(options.compress, 4);
    }

    #[test]
    fn test_alpha_group() {
        assert_eq!(kitty("#").unwrap().alpha, Some(Alpha::Opaque));
        assert_eq!(kitty("#.5").unwrap().alpha, Some(Alpha::Keep));
        assert_eq!(
            kitty("#ff8000W").unwrap(),
            StyleArgs {
                alpha: Some(Alpha::Background(255, 128, 0)),
                method: Some(RenderMethod::Whole),
                ..StyleArgs::default()
            }
        );
        assert_eq!(kitty("#L").unwrap().alpha, Some(Alpha::Opaque));
        assert!(is_format_error(kitty("#.")));
    }

    #[test]
    fn test_z_index() {
        assert_eq!(kitty("z").unwrap().z_index, Some(ZIndex::ReplaceOverlapping));
        assert_eq!(kitty("z-1").unwrap().z_index, Some(ZIndex::Layer(-1)));
        assert_eq!(
            kitty("Lz-2147483648").unwrap().z_index,
            Some(ZIndex::Layer(i32::MIN))
        );
        assert!(matches!(
            kitty("z2147483648"),
            Err(StyleError::Argument { key: "z_index", .. })
        ));
        assert!(is_format_error(kitty("z-")));
        // z is kitty-only
        assert!(is_format_error(iterm2("z1")));
    }

    #[test]
    fn test_native() {
        assert_eq!(iterm2("WN").unwrap().native, Some(true));
        assert!(is_format_error(kitty("WN")));
    }

    #[test]
    fn test_compress_argument_error() {
        assert_eq!(
            kitty("c10"),
            Err(StyleError::Argument {
                key: "compress",
                constraint: "must be 0-9 (got 10)".to_string(),
            })
        );
    }

    #[test]
    fn test_format_errors() {
        for spec in ["LW", "c1m0", "m2", "m01", "c-1", " c1", "c", "x", "W ", "z1L"] {
            assert!(is_format_error(kitty(spec)), "{spec:?} should be rejected");
        }
        assert_eq!(
            kitty("Lm2"),
            Err(StyleError::Format {
                spec: "Lm2".to_string(),
                offending: "2".to_string(),
            })
        );
    }
}
