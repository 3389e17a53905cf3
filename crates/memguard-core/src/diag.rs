//! Formatter-free stderr diagnostics.
//!
//! Used where the real-symbol table may not be sealed: every write goes
//! straight to `write(2)` from fixed byte slices.

use crate::error::InterceptError;

const PREFIX: &[u8] = b"memguard: ";

/// Write `bytes` to stderr, ignoring short writes and errors.
pub fn write_stderr(bytes: &[u8]) {
    let mut rest = bytes;
    while !rest.is_empty() {
        // SAFETY: `rest` is a live slice; write(2) reads at most its length.
        let written = unsafe { libc::write(libc::STDERR_FILENO, rest.as_ptr().cast(), rest.len()) };
        if written <= 0 {
            return;
        }
        rest = &rest[written as usize..];
    }
}

/// Print `memguard: fatal: <code> [<symbol>] [(<detail>)]`.
pub fn write_fatal(err: &InterceptError) {
    write_stderr(PREFIX);
    write_stderr(b"fatal: ");
    write_stderr(err.code().as_bytes());
    if let Some(symbol) = err.symbol() {
        write_stderr(b" `");
        write_stderr(symbol.as_bytes());
        write_stderr(b"`");
    }
    if let Some(detail) = err.detail() {
        write_stderr(b" (");
        write_stderr(detail.as_bytes());
        write_stderr(b")");
    }
    write_stderr(b"\n");
}

/// Print the diagnostic for `err` and abort the process.
#[cold]
pub fn fatal(err: &InterceptError) -> ! {
    write_fatal(err);
    // SAFETY: abort(3) never returns and needs no preconditions.
    unsafe { libc::abort() }
}
