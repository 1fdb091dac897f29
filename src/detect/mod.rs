//! Graphics protocol capability detection
//!
//! Each protocol is probed at most once per process: the result is
//! cached until explicitly reset. Probes are batched into one write
//! (protocol query, XTVERSION, DA1) since terminals answer queries FIFO
//! and DA1 is answered by virtually everything, so its reply marks the
//! end of the exchange.
//!
//! Detection never fails. A terminal that doesn't answer, answers
//! something unexpected, or runs a version below the supported floor
//! resolves to "unsupported".

use log::{debug, info};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use crate::constants::{
    DA1_QUERY, KITTY_QUERY_ID, KITTY_START, QUERY_TIMEOUT_MS, ST, XTVERSION_QUERY,
};
use crate::tty::{self, TerminalIo};

/// Graphics protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Kitty terminal graphics protocol (APC G, chunked)
    Kitty,
    /// iTerm2 inline image protocol (OSC 1337)
    Iterm2,
}

impl Protocol {
    pub fn name(self) -> &'static str {
        match self {
            Protocol::Kitty => "kitty",
            Protocol::Iterm2 => "iterm2",
        }
    }

    /// Probe bytes sent before XTVERSION and DA1
    fn probe_query(self) -> Vec<u8> {
        match self {
            Protocol::Kitty => {
                format!("{KITTY_START}a=q,t=d,i={KITTY_QUERY_ID},f=24,s=1,v=1,C=1,c=1,r=1;AAAA{ST}")
                    .into_bytes()
            }
            Protocol::Iterm2 => Vec::new(),
        }
    }

    fn index(self) -> usize {
        match self {
            Protocol::Kitty => 0,
            Protocol::Iterm2 => 1,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tri-state support flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Support {
    #[default]
    Unknown,
    Yes,
    No,
}

/// Terminal emulator identified by XTVERSION
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Vendor {
    Kitty,
    Konsole,
    Iterm2,
    /// Release builds report date stamps such as `20230712-072601-f4abf8fd`,
    /// which are not dotted versions, so those resolve to unsupported.
    /// Only a plain `YYYYMMDD` version is accepted.
    WezTerm,
    /// Answered XTVERSION with a name we don't know
    Other,
    /// Did not answer XTVERSION
    #[default]
    Unknown,
}

impl Vendor {
    /// Case-insensitive lookup of an XTVERSION name
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "kitty" => Vendor::Kitty,
            "konsole" => Vendor::Konsole,
            "iterm2" => Vendor::Iterm2,
            "wezterm" => Vendor::WezTerm,
            _ => Vendor::Other,
        }
    }
}

/// Dotted version number (major, minor, patch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u32, pub u32, pub u32);

impl Version {
    /// Parse dot-separated integers; missing components are zero.
    /// "22.04.0" -> 22.4.0
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = [0u32; 3];
        let mut count = 0;
        for part in s.trim().split('.') {
            if count == parts.len() {
                return None;
            }
            parts[count] = part.parse().ok()?;
            count += 1;
        }
        Some(Version(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// Resolved capability of one protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolSupport {
    pub supported: Support,
    pub vendor: Vendor,
    pub version: Option<Version>,
}

impl ProtocolSupport {
    fn unsupported(vendor: Vendor, version: Option<Version>) -> Self {
        Self {
            supported: Support::No,
            vendor,
            version,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported == Support::Yes
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The terminal answered; the result is definitive
    Resolved(ProtocolSupport),
    /// No complete reply came back in time; ambiguous, so not cached
    TimedOut,
}

/// Parse an XTVERSION reply: `ESC P > | <name>(<version>) ESC \`
/// or `ESC P > | <name> <version> ESC \`.
///
/// The reply may be embedded among other replies. Returns the name and
/// the raw version text; None if no well-formed reply is present.
pub fn parse_xtversion(response: &[u8]) -> Option<(String, String)> {
    const PREFIX: &[u8] = b"\x1bP>|";
    let start = response
        .windows(PREFIX.len())
        .position(|w| w == PREFIX)?
        + PREFIX.len();
    let rest = &response[start..];
    let end = rest.windows(2).position(|w| w == b"\x1b\\")?;
    let body = std::str::from_utf8(&rest[..end]).ok()?;

    let name_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(body.len());
    if name_len == 0 {
        return None;
    }
    let (name, rest) = body.split_at(name_len);

    let version = match rest.chars().next() {
        Some('(') => rest[1..].strip_suffix(')').unwrap_or(&rest[1..]),
        Some(' ') => rest[1..].trim_end_matches(')'),
        _ => return None,
    };
    if version.is_empty() {
        return None;
    }

    Some((name.to_string(), version.to_string()))
}

/// Decide support from a complete batched reply
pub fn evaluate(protocol: Protocol, response: &[u8]) -> ProtocolSupport {
    // For iTerm2 the probe *is* XTVERSION
    let probe_answered = match protocol {
        Protocol::Kitty => {
            let ok = format!("{KITTY_START}i={KITTY_QUERY_ID};OK{ST}");
            response
                .windows(ok.len())
                .any(|w| w == ok.as_bytes())
        }
        Protocol::Iterm2 => parse_xtversion(response).is_some(),
    };
    if !probe_answered {
        debug!("{}: probe not answered", protocol);
        return ProtocolSupport::unsupported(Vendor::Unknown, None);
    }

    let Some((name, version_text)) = parse_xtversion(response) else {
        debug!("{}: no terminal identification", protocol);
        return ProtocolSupport::unsupported(Vendor::Unknown, None);
    };
    let vendor = Vendor::from_name(&name);
    let Some(version) = Version::parse(&version_text) else {
        debug!("{}: unparseable version {:?} from {}", protocol, version_text, name);
        return ProtocolSupport::unsupported(vendor, None);
    };

    let supported = match minimum_version(protocol, vendor) {
        Some(floor) => version >= floor,
        None => false,
    };

    ProtocolSupport {
        supported: if supported { Support::Yes } else { Support::No },
        vendor,
        version: Some(version),
    }
}

/// Lowest vendor version known to implement the features used.
/// None if the vendor isn't supported at all for `protocol`.
pub fn minimum_version(protocol: Protocol, vendor: Vendor) -> Option<Version> {
    match (protocol, vendor) {
        (Protocol::Kitty, Vendor::Kitty) => Some(Version(0, 20, 0)),
        (_, Vendor::Konsole) => Some(Version(22, 4, 0)),
        (Protocol::Iterm2, Vendor::Iterm2 | Vendor::WezTerm) => Some(Version(0, 0, 0)),
        _ => None,
    }
}

/// Send the batched probe and evaluate the reply
pub fn probe<T: TerminalIo + ?Sized>(io: &mut T, protocol: Protocol, timeout: Duration) -> Probe {
    let mut query = protocol.probe_query();
    query.extend_from_slice(XTVERSION_QUERY);
    query.extend_from_slice(DA1_QUERY);

    let reply = match io.send_and_read(&query, &tty::da1_complete, timeout) {
        Ok(reply) => reply,
        Err(e) => {
            debug!("{}: terminal query failed: {}", protocol, e);
            return Probe::Resolved(ProtocolSupport::unsupported(Vendor::Unknown, None));
        }
    };

    // Without the DA1 reply the rest may still be on its way
    if !reply.complete {
        debug!(
            "{}: reply incomplete at deadline ({} bytes)",
            protocol,
            reply.bytes.len()
        );
        return Probe::TimedOut;
    }
    Probe::Resolved(evaluate(protocol, &reply.bytes))
}

/// Per-protocol capability cache
///
/// Written only while the terminal gate is held; read freely.
pub struct CapabilityCache {
    entries: Mutex<[Option<ProtocolSupport>; 2]>,
}

impl CapabilityCache {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new([None, None]),
        }
    }

    /// Cached result, without probing
    pub fn get(&self, protocol: Protocol) -> Option<ProtocolSupport> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())[protocol.index()]
    }

    fn set(&self, protocol: Protocol, support: ProtocolSupport) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())[protocol.index()] = Some(support);
    }

    /// Forget the cached result so the next detection probes again
    pub fn reset(&self, protocol: Protocol) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())[protocol.index()] = None;
    }

    pub fn reset_all(&self) {
        *self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = [None, None];
    }

    /// Return the cached result or probe through `io`.
    ///
    /// A timeout, including a reply cut off at the deadline, yields
    /// "unsupported" without caching it.
    pub fn detect_with<T: TerminalIo + ?Sized>(
        &self,
        io: &mut T,
        protocol: Protocol,
        timeout: Duration,
    ) -> ProtocolSupport {
        if let Some(cached) = self.get(protocol) {
            return cached;
        }

        match probe(io, protocol, timeout) {
            Probe::Resolved(support) => {
                info!(
                    "{} graphics: {} (vendor={:?}, version={})",
                    protocol,
                    if support.is_supported() { "supported" } else { "unsupported" },
                    support.vendor,
                    support
                        .version
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
                self.set(protocol, support);
                support
            }
            Probe::TimedOut => {
                info!("{} graphics: terminal did not answer, will retry", protocol);
                ProtocolSupport::unsupported(Vendor::Unknown, None)
            }
        }
    }
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide capability state
static CACHE: CapabilityCache = CapabilityCache::new();

/// Detect support for `protocol` on the controlling terminal
pub fn detect(protocol: Protocol) -> ProtocolSupport {
    detect_with_timeout(protocol, Duration::from_millis(QUERY_TIMEOUT_MS))
}

/// [`detect`] with an explicit per-query timeout
pub fn detect_with_timeout(protocol: Protocol, timeout: Duration) -> ProtocolSupport {
    if let Some(cached) = CACHE.get(protocol) {
        return cached;
    }

    match tty::with_exclusive_terminal_access(|tty| CACHE.detect_with(tty, protocol, timeout)) {
        Ok(support) => support,
        Err(e) => {
            // No controlling terminal: nothing will ever answer
            info!("{} graphics: no terminal ({}), unsupported", protocol, e);
            let support = ProtocolSupport::unsupported(Vendor::Unknown, None);
            CACHE.set(protocol, support);
            support
        }
    }
}

/// Cached result for `protocol`, if detection already ran
pub fn support(protocol: Protocol) -> Option<ProtocolSupport> {
    CACHE.get(protocol)
}

/// Invalidate the cached result for `protocol`
pub fn reset(protocol: Protocol) {
    CACHE.reset(protocol);
}

/// Invalidate every cached result
pub fn reset_all() {
    CACHE.reset_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tty::Reply;
    use std::io;

    /// Terminal that answers with a fixed reply
    struct Scripted {
        reply: Vec<u8>,
        queries: Vec<Vec<u8>>,
    }

    impl Scripted {
        fn new(reply: &[u8]) -> Self {
            Self {
                reply: reply.to_vec(),
                queries: Vec::new(),
            }
        }
    }

    impl TerminalIo for Scripted {
        fn send_and_read(
            &mut self,
            query: &[u8],
            stop: &dyn Fn(&[u8]) -> bool,
            _timeout: Duration,
        ) -> io::Result<Reply> {
            self.queries.push(query.to_vec());
            let mut bytes = Vec::new();
            for &b in &self.reply {
                bytes.push(b);
                if stop(&bytes) {
                    return Ok(Reply {
                        bytes,
                        complete: true,
                    });
                }
            }
            Ok(Reply {
                bytes,
                complete: false,
            })
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn test_parse_version() {
        assert_eq!(Version::parse("22.04.0"), Some(Version(22, 4, 0)));
        assert_eq!(Version::parse("0.31"), Some(Version(0, 31, 0)));
        assert_eq!(Version::parse("3"), Some(Version(3, 0, 0)));
        assert_eq!(Version::parse("20230712-072601-f4abf8fd"), None);
        assert_eq!(Version::parse("1.2.3.4"), None);
        assert_eq!(Version::parse(""), None);
    }

    #[test]
    fn test_parse_xtversion() {
        assert_eq!(
            parse_xtversion(b"\x1bP>|kitty(0.31.0)\x1b\\"),
            Some(("kitty".into(), "0.31.0".into()))
        );
        assert_eq!(
            parse_xtversion(b"\x1bP>|WezTerm 20230712-072601-f4abf8fd\x1b\\"),
            Some(("WezTerm".into(), "20230712-072601-f4abf8fd".into()))
        );
        assert_eq!(
            parse_xtversion(b"\x1b_Gi=31;OK\x1b\\\x1bP>|konsole(22.04.0)\x1b\\\x1b[?62c"),
            Some(("konsole".into(), "22.04.0".into()))
        );
        assert_eq!(parse_xtversion(b"\x1b[?62c"), None);
        assert_eq!(parse_xtversion(b"\x1bP>|(1.0)\x1b\\"), None);
    }

    #[test]
    fn test_kitty_supported() {
        let cache = CapabilityCache::new();
        let mut term = Scripted::new(b"\x1b_Gi=31;OK\x1b\\\x1bP>|kitty(0.31.0)\x1b\\\x1b[?62;c");
        let support = cache.detect_with(&mut term, Protocol::Kitty, TIMEOUT);
        assert!(support.is_supported());
        assert_eq!(support.vendor, Vendor::Kitty);
        assert_eq!(support.version, Some(Version(0, 31, 0)));

        // One batched write: probe, XTVERSION, DA1
        let query = &term.queries[0];
        assert!(query.starts_with(b"\x1b_Ga=q,t=d,i=31,f=24,s=1,v=1,C=1,c=1,r=1;AAAA\x1b\\"));
        assert!(query.ends_with(b"\x1b[>q\x1b[c"));
    }

    #[test]
    fn test_kitty_old_version() {
        let cache = CapabilityCache::new();
        let mut term = Scripted::new(b"\x1b_Gi=31;OK\x1b\\\x1bP>|kitty(0.19.3)\x1b\\\x1b[?62c");
        assert!(!cache.detect_with(&mut term, Protocol::Kitty, TIMEOUT).is_supported());
    }

    #[test]
    fn test_kitty_probe_unanswered() {
        let cache = CapabilityCache::new();
        let mut term = Scripted::new(b"\x1bP>|kitty(0.31.0)\x1b\\\x1b[?62c");
        let support = cache.detect_with(&mut term, Protocol::Kitty, TIMEOUT);
        assert_eq!(support.supported, Support::No);
        // Definitive: cached
        assert_eq!(cache.get(Protocol::Kitty), Some(support));
    }

    #[test]
    fn test_other_vendor_unsupported_for_kitty() {
        let cache = CapabilityCache::new();
        let mut term = Scripted::new(b"\x1b_Gi=31;OK\x1b\\\x1bP>|WezTerm 20230712\x1b\\\x1b[?62c");
        let support = cache.detect_with(&mut term, Protocol::Kitty, TIMEOUT);
        assert!(!support.is_supported());
        assert_eq!(support.vendor, Vendor::WezTerm);
    }

    #[test]
    fn test_konsole_version_floor() {
        let cache = CapabilityCache::new();
        let mut old = Scripted::new(b"\x1bP>|konsole(21.08.0)\x1b\\\x1b[?62c");
        assert!(!cache.detect_with(&mut old, Protocol::Iterm2, TIMEOUT).is_supported());

        cache.reset(Protocol::Iterm2);
        let mut new = Scripted::new(b"\x1bP>|konsole(22.04.0)\x1b\\\x1b[?62c");
        let support = cache.detect_with(&mut new, Protocol::Iterm2, TIMEOUT);
        assert!(support.is_supported());
        assert_eq!(support.vendor, Vendor::Konsole);
    }

    #[test]
    fn test_iterm2_vendors() {
        for reply in [
            &b"\x1bP>|iTerm2 3.5.0\x1b\\\x1b[?62c"[..],
            &b"\x1bP>|WezTerm 20240203\x1b\\\x1b[?62c"[..],
        ] {
            let cache = CapabilityCache::new();
            let mut term = Scripted::new(reply);
            assert!(cache.detect_with(&mut term, Protocol::Iterm2, TIMEOUT).is_supported());
        }

        // WezTerm's date-stamped versions with dashes don't parse
        let cache = CapabilityCache::new();
        let mut term = Scripted::new(b"\x1bP>|WezTerm 20230712-072601-f4abf8fd\x1b\\\x1b[?62c");
        assert!(!cache.detect_with(&mut term, Protocol::Iterm2, TIMEOUT).is_supported());
    }

    #[test]
    fn test_timeout_not_cached() {
        let cache = CapabilityCache::new();
        let mut silent = Scripted::new(b"");
        assert!(!cache.detect_with(&mut silent, Protocol::Kitty, TIMEOUT).is_supported());
        assert_eq!(cache.get(Protocol::Kitty), None);

        // The next call probes again
        let mut term = Scripted::new(b"\x1b_Gi=31;OK\x1b\\\x1bP>|kitty(0.31.0)\x1b\\\x1b[?62c");
        assert!(cache.detect_with(&mut term, Protocol::Kitty, TIMEOUT).is_supported());
    }

    #[test]
    fn test_partial_reply_not_cached() {
        // Kitty query answered, but XTVERSION and DA1 missed the deadline
        let cache = CapabilityCache::new();
        let mut slow = Scripted::new(b"\x1b_Gi=31;OK\x1b\\");
        let support = cache.detect_with(&mut slow, Protocol::Kitty, TIMEOUT);
        assert!(!support.is_supported());
        assert_eq!(cache.get(Protocol::Kitty), None);

        let mut term = Scripted::new(b"\x1b_Gi=31;OK\x1b\\\x1bP>|kitty(0.31.0)\x1b\\\x1b[?62c");
        assert!(cache.detect_with(&mut term, Protocol::Kitty, TIMEOUT).is_supported());
        assert!(cache.get(Protocol::Kitty).is_some());
    }

    #[test]
    fn test_cached_result_not_reprobed() {
        let cache = CapabilityCache::new();
        let mut term = Scripted::new(b"\x1bP>|iTerm2 3.5.0\x1b\\\x1b[?62c");
        cache.detect_with(&mut term, Protocol::Iterm2, TIMEOUT);
        cache.detect_with(&mut term, Protocol::Iterm2, TIMEOUT);
        assert_eq!(term.queries.len(), 1);

        cache.reset_all();
        cache.detect_with(&mut term, Protocol::Iterm2, TIMEOUT);
        assert_eq!(term.queries.len(), 2);
    }
}
