//! `MEMGUARD_OPTIONS` parsing.
//!
//! The option string is parsed before the real-symbol table is sealed, so the
//! parser works on borrowed byte slices only: no allocation, no `str`
//! conversion, no C-string helpers.

use serde::Serialize;

/// Environment variable holding colon-separated `key=value` options.
pub const OPTIONS_ENV: &[u8] = b"MEMGUARD_OPTIONS";

/// Runtime knobs of the interception layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterceptOptions {
    /// Default reporter verdict: abort (true) or continue (false).
    pub halt_on_error: bool,
    /// Report overlapping source/destination for `memcpy` and `strncpy`.
    pub check_overlap: bool,
    /// Frames captured per violation report.
    pub stack_depth: usize,
    /// 0 quiet, 1 log the resolved table, 2 also log binding modules.
    pub verbosity: u8,
}

impl Default for InterceptOptions {
    fn default() -> Self {
        Self {
            halt_on_error: true,
            check_overlap: true,
            stack_depth: 32,
            verbosity: 0,
        }
    }
}

impl InterceptOptions {
    pub const MAX_STACK_DEPTH: usize = 64;
    pub const MAX_VERBOSITY: u8 = 2;

    /// Parse an option string such as `halt_on_error=0:verbosity=1`.
    ///
    /// Unknown keys and malformed values leave the default in place.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let mut options = Self::default();
        for pair in raw.split(|byte| *byte == b':' || *byte == b',') {
            let Some(eq) = pair.iter().position(|byte| *byte == b'=') else {
                continue;
            };
            let (key, value) = (&pair[..eq], &pair[eq + 1..]);
            options.apply(key, value);
        }
        options
    }

    fn apply(&mut self, key: &[u8], value: &[u8]) {
        match key {
            b"halt_on_error" => {
                if let Some(flag) = parse_bool(value) {
                    self.halt_on_error = flag;
                }
            }
            b"check_overlap" => {
                if let Some(flag) = parse_bool(value) {
                    self.check_overlap = flag;
                }
            }
            b"stack_depth" => {
                if let Some(depth) = parse_decimal(value) {
                    self.stack_depth = depth.min(Self::MAX_STACK_DEPTH);
                }
            }
            b"verbosity" => {
                if let Some(level) = parse_decimal(value) {
                    self.verbosity = level.min(usize::from(Self::MAX_VERBOSITY)) as u8;
                }
            }
            _ => {}
        }
    }
}

fn parse_bool(value: &[u8]) -> Option<bool> {
    match value {
        b"1" | b"true" | b"yes" => Some(true),
        b"0" | b"false" | b"no" => Some(false),
        _ => None,
    }
}

fn parse_decimal(value: &[u8]) -> Option<usize> {
    if value.is_empty() || value.len() > 6 {
        return None;
    }
    let mut out = 0usize;
    for byte in value {
        if !byte.is_ascii_digit() {
            return None;
        }
        out = out * 10 + usize::from(byte - b'0');
    }
    Some(out)
}
