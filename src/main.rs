//! cellpix - draw an image in the terminal
//!
//! Detects the graphics protocol (or takes a forced one), renders the
//! image over the requested cell extent and writes the result to stdout.

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use std::io::Write;
use std::path::PathBuf;

use cellpix::config::Config;
use cellpix::graphics::Renderer;
use cellpix::{parse_style, Protocol};

/// Parsed command line
#[derive(Debug, Default)]
struct Args {
    protocol: Option<Protocol>,
    cols: Option<u32>,
    rows: Option<u32>,
    style: Option<String>,
    image: Option<PathBuf>,
}

/// Print help message
fn print_help() {
    println!(
        r#"cellpix {} - inline terminal images (Kitty / iTerm2 graphics protocols)

USAGE:
    cellpix [OPTIONS] <IMAGE>

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --kitty                 Use the Kitty protocol without detecting
    --iterm2                Use the iTerm2 protocol without detecting
    --cols N                Width in terminal columns
    --rows N                Height in terminal rows
    --style SPEC            Style format string (see below)

STYLE (no separators, in this order):
    #  #.NNN  #RRGGBB       Drop alpha / keep alpha / blend over color
    L  W                    Render line by line / as a whole
    z[-]N                   Kitty z-index
    N                       iTerm2: send the file as is (e.g. animated GIF)
    m0  m1                  Text mixing off / on
    c0 .. c9                Compression level

CONFIG:
    $CELLPIX_CONFIG or ~/.config/cellpix/config.toml

EXAMPLES:
    cellpix photo.jpg
    cellpix --cols 40 --style Wc9 logo.png
    cellpix --iterm2 --rows 10 --style WN anim.gif"#,
        env!("CARGO_PKG_VERSION")
    );
}

fn parse_number(flag: &str, value: Option<String>) -> Result<u32> {
    let value = value.ok_or_else(|| anyhow!("{} requires a value", flag))?;
    value
        .parse()
        .with_context(|| format!("Invalid value for {}: {:?}", flag, value))
}

fn parse_args(mut argv: impl Iterator<Item = String>) -> Result<Args> {
    let mut args = Args::default();
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--kitty" => args.protocol = Some(Protocol::Kitty),
            "--iterm2" => args.protocol = Some(Protocol::Iterm2),
            "--cols" => args.cols = Some(parse_number("--cols", argv.next())?),
            "--rows" => args.rows = Some(parse_number("--rows", argv.next())?),
            "--style" => {
                let spec = argv.next().ok_or_else(|| anyhow!("--style requires a value"))?;
                args.style = Some(spec);
            }
            flag if flag.starts_with('-') => bail!("Unknown option: {}", flag),
            path => {
                if args.image.is_some() {
                    bail!("Only one image may be given");
                }
                args.image = Some(PathBuf::from(path));
            }
        }
    }
    Ok(args)
}

/// Fill in a missing extent from the image's aspect ratio
fn resolve_extent(
    cols: Option<u32>,
    rows: Option<u32>,
    image: (u32, u32),
    cell: (u32, u32),
) -> (u32, u32) {
    let (width, height) = (image.0.max(1) as u64, image.1.max(1) as u64);
    let (cw, ch) = (cell.0.max(1) as u64, cell.1.max(1) as u64);
    let (cols, rows) = match (cols, rows) {
        (Some(c), Some(r)) => (c as u64, r as u64),
        (Some(c), None) => (c as u64, (c as u64 * cw * height).div_ceil(width * ch)),
        (None, Some(r)) => ((r as u64 * ch * width).div_ceil(height * cw), r as u64),
        (None, None) => (width.div_ceil(cw), height.div_ceil(ch)),
    };
    (cols.clamp(1, u32::MAX as u64) as u32, rows.clamp(1, u32::MAX as u64) as u32)
}

fn write_output(out: &mut impl Write, output: &str) -> std::io::Result<()> {
    out.write_all(output.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let argv: Vec<String> = std::env::args().skip(1).collect();

    // --help
    if argv.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // --version
    if argv.iter().any(|a| a == "--version" || a == "-V") {
        println!("cellpix {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let args = parse_args(argv.into_iter())?;
    let path = args
        .image
        .ok_or_else(|| anyhow!("No image given (see --help)"))?;

    let config = Config::load();

    // Kitty first, then iTerm2
    let renderer = match args.protocol {
        Some(protocol) => Renderer::detect(protocol, &config)?,
        None => Renderer::detect(Protocol::Kitty, &config)
            .or_else(|_| Renderer::detect(Protocol::Iterm2, &config))
            .context("Terminal supports neither the Kitty nor the iTerm2 graphics protocol")?,
    };
    info!("Using {} graphics protocol", renderer.protocol());

    let mut options = config.render.options();
    if let Some(spec) = &args.style {
        options = parse_style(renderer.protocol(), spec)?.apply(options);
    }
    debug!("Render options: {:?}", options);

    let output = if options.native {
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read image: {}", path.display()))?;
        let (width, height) = image::image_dimensions(&path)
            .with_context(|| format!("Failed to read image header: {}", path.display()))?;
        let (cols, rows) =
            resolve_extent(args.cols, args.rows, (width, height), renderer.cell_size());
        renderer.render_native(&bytes, cols, rows, &options)?
    } else {
        let img = image::open(&path)
            .with_context(|| format!("Failed to decode image: {}", path.display()))?;
        let (cols, rows) = resolve_extent(
            args.cols,
            args.rows,
            (img.width(), img.height()),
            renderer.cell_size(),
        );
        renderer.render(&img, cols, rows, &options)?
    };

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = write_output(&mut stdout, &output) {
        // The terminal may still be waiting for the rest of the payload
        let _ = stdout.write_all(renderer.interrupted_draw_recovery().as_bytes());
        let _ = stdout.flush();
        return Err(e).context("Failed to write image");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["--iterm2", "--cols", "40", "--style", "Wc9", "a.png"]).unwrap();
        assert_eq!(parsed.protocol, Some(Protocol::Iterm2));
        assert_eq!(parsed.cols, Some(40));
        assert_eq!(parsed.rows, None);
        assert_eq!(parsed.style.as_deref(), Some("Wc9"));
        assert_eq!(parsed.image, Some(PathBuf::from("a.png")));

        assert!(args(&["--cols"]).is_err());
        assert!(args(&["--cols", "x"]).is_err());
        assert!(args(&["--bogus"]).is_err());
        assert!(args(&["a.png", "b.png"]).is_err());
    }

    #[test]
    fn test_resolve_extent() {
        // 100x50 image, 10x20 cells
        assert_eq!(resolve_extent(None, None, (100, 50), (10, 20)), (10, 3));
        assert_eq!(resolve_extent(Some(20), None, (100, 50), (10, 20)), (20, 5));
        assert_eq!(resolve_extent(None, Some(5), (100, 50), (10, 20)), (20, 5));
        assert_eq!(resolve_extent(Some(3), Some(4), (100, 50), (10, 20)), (3, 4));
    }
}
