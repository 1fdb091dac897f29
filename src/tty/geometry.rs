//! Terminal cell geometry
//!
//! Derives the cell pixel size from the window size reported by
//! TIOCGWINSZ (pixel extent divided by cell count).

use log::debug;

use crate::constants::FALLBACK_CELL_SIZE;

/// Cell size in pixels (width, height), or None if the terminal
/// doesn't report its pixel extent
pub fn cell_size() -> Option<(u32, u32)> {
    let ws = window_size(libc::STDOUT_FILENO).or_else(|| {
        let tty = std::fs::File::open("/dev/tty").ok()?;
        window_size(std::os::fd::AsRawFd::as_raw_fd(&tty))
    })?;
    cell_size_from_winsize(ws.ws_col, ws.ws_row, ws.ws_xpixel, ws.ws_ypixel)
}

/// Cell size with the configured override and the (1, 2) fallback applied
pub fn resolve_cell_size(overridden: Option<(u32, u32)>) -> (u32, u32) {
    if let Some(size) = overridden {
        return size;
    }
    cell_size().unwrap_or_else(|| {
        debug!("Cell size unknown, assuming {:?}", FALLBACK_CELL_SIZE);
        FALLBACK_CELL_SIZE
    })
}

/// Query the window size (TIOCGWINSZ)
fn window_size(fd: libc::c_int) -> Option<libc::winsize> {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws as *mut libc::winsize) };
    if ret < 0 {
        return None;
    }
    Some(ws)
}

fn cell_size_from_winsize(cols: u16, rows: u16, xpixel: u16, ypixel: u16) -> Option<(u32, u32)> {
    if cols == 0 || rows == 0 || xpixel == 0 || ypixel == 0 {
        return None;
    }
    let width = xpixel as u32 / cols as u32;
    let height = ypixel as u32 / rows as u32;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_size_from_winsize() {
        assert_eq!(cell_size_from_winsize(80, 24, 800, 480), Some((10, 20)));
        // Terminals that leave the pixel fields at zero
        assert_eq!(cell_size_from_winsize(80, 24, 0, 0), None);
        assert_eq!(cell_size_from_winsize(0, 0, 800, 480), None);
    }

    #[test]
    fn test_resolve_override() {
        assert_eq!(resolve_cell_size(Some((7, 15))), (7, 15));
    }
}
