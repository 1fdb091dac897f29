//! Terminal I/O gate
//!
//! Serializes query/response exchanges with the controlling terminal.
//! Every exchange runs under one process-wide lock with the terminal
//! switched to non-canonical, no-echo mode; the original termios
//! settings are restored when the exchange ends.
//!
//! Terminals answer back-to-back queries FIFO, so a reply left unread
//! would be taken as the answer to the next query. Whatever follows a
//! satisfied stop condition is drained before the lock is released.

pub mod geometry;

use log::{debug, trace, warn};
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::constants::{DRAIN_TIMEOUT_MS, READ_GRANULARITY_DS};

/// Controlling terminal device
const TTY_PATH: &str = "/dev/tty";

/// Process-wide gate for terminal queries
static GATE: Mutex<()> = Mutex::new(());

/// Bytes read back for one query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub bytes: Vec<u8>,
    /// The stop condition held before the deadline
    pub complete: bool,
}

/// Query/response access to a terminal.
///
/// Implemented by [`Tty`] for the real device; tests script replies.
pub trait TerminalIo {
    /// Write `query`, then read until `stop(accumulated)` holds or
    /// `timeout` elapses. Returns whatever was accumulated, possibly
    /// nothing, and whether `stop` was satisfied. Bytes past a satisfied
    /// stop condition are drained and discarded before returning.
    fn send_and_read(
        &mut self,
        query: &[u8],
        stop: &dyn Fn(&[u8]) -> bool,
        timeout: Duration,
    ) -> io::Result<Reply>;
}

/// Acquire the terminal gate.
///
/// Anything else that reads the terminal (an interactive input loop,
/// for instance) should hold this guard while reading, so its reads
/// are suspended while a capability probe is in flight.
pub fn lock() -> MutexGuard<'static, ()> {
    // A panic inside a previous exchange leaves nothing to repair:
    // the termios state was restored by `Tty::drop`.
    GATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `f` with exclusive access to the controlling terminal.
///
/// Fails only if the terminal cannot be opened or configured.
pub fn with_exclusive_terminal_access<R>(f: impl FnOnce(&mut Tty) -> R) -> io::Result<R> {
    let _guard = lock();
    let mut tty = Tty::open()?;
    Ok(f(&mut tty))
    // `tty` drops first, restoring termios while the gate is still held
}

/// Controlling terminal in query mode
pub struct Tty {
    file: File,
    /// Original termios settings (for restoration)
    orig_termios: Termios,
}

impl Tty {
    /// Open `/dev/tty` and switch it to non-canonical, no-echo mode
    fn open() -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(TTY_PATH)?;
        Self::from_file(file)
    }

    /// Switch an already open terminal device to query mode
    pub fn from_file(file: File) -> io::Result<Self> {
        let orig_termios = termios::tcgetattr(file.as_fd())?;

        // Reads return after at most one VTIME period, with or without data
        let mut query_mode = orig_termios.clone();
        query_mode
            .local_flags
            .remove(LocalFlags::ICANON | LocalFlags::ECHO);
        query_mode.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        query_mode.control_chars[SpecialCharacterIndices::VTIME as usize] = READ_GRANULARITY_DS;

        // TCSAFLUSH also discards replies left over from an earlier timed-out probe
        termios::tcsetattr(file.as_fd(), SetArg::TCSAFLUSH, &query_mode)?;
        trace!("tty: query mode enabled");

        Ok(Self { file, orig_termios })
    }

    /// Read one byte at a time until `stop` holds or `deadline` passes.
    ///
    /// Byte-wise reads never consume past the end of the awaited reply.
    fn read_until(
        &mut self,
        stop: &dyn Fn(&[u8]) -> bool,
        deadline: Instant,
    ) -> io::Result<Reply> {
        let mut response = Vec::with_capacity(64);
        let mut byte = [0u8; 1];

        while Instant::now() < deadline {
            match self.file.read(&mut byte) {
                // VTIME expired without data
                Ok(0) => continue,
                Ok(_) => {
                    response.push(byte[0]);
                    if stop(&response) {
                        return Ok(Reply {
                            bytes: response,
                            complete: true,
                        });
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(Reply {
            bytes: response,
            complete: false,
        })
    }

    /// Discard anything the terminal is still sending
    fn drain(&mut self) -> io::Result<usize> {
        let deadline = Instant::now() + Duration::from_millis(DRAIN_TIMEOUT_MS);
        let mut buf = [0u8; 256];
        let mut drained = 0;

        while Instant::now() < deadline {
            match self.file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => drained += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if drained > 0 {
            debug!("tty: drained {} stray response bytes", drained);
        }
        Ok(drained)
    }
}

impl TerminalIo for Tty {
    fn send_and_read(
        &mut self,
        query: &[u8],
        stop: &dyn Fn(&[u8]) -> bool,
        timeout: Duration,
    ) -> io::Result<Reply> {
        self.file.write_all(query)?;
        self.file.flush()?;

        let reply = self.read_until(stop, Instant::now() + timeout)?;
        if reply.complete {
            self.drain()?;
        } else {
            debug!(
                "tty: no complete reply within {:?} ({} bytes)",
                timeout,
                reply.bytes.len()
            );
        }
        Ok(reply)
    }
}

impl Drop for Tty {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(self.file.as_fd(), SetArg::TCSANOW, &self.orig_termios)
        {
            warn!("tty: failed to restore terminal mode: {}", e);
        }
    }
}

/// True once `buf` ends with a complete DA1 reply (`ESC [ ? ... c`).
///
/// DA1 is sent last in every batched probe, so its reply marks the end
/// of everything the terminal is going to say.
pub fn da1_complete(buf: &[u8]) -> bool {
    if buf.last() != Some(&b'c') {
        return false;
    }
    match buf.windows(3).rposition(|w| w == b"\x1b[?") {
        Some(start) => buf[start + 3..buf.len() - 1]
            .iter()
            .all(|b| b.is_ascii_digit() || *b == b';'),
        None => false,
    }
}
