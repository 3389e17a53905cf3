//! Raw `environ` access for bootstrap-time configuration.
//!
//! `getenv` and `std::env` may reach `strlen`/`memcpy` before the table is
//! sealed, so the scan walks the pointer vector by hand.

use std::ffi::c_char;
use std::mem::MaybeUninit;

use memguard_core::options::OPTIONS_ENV;
use memguard_core::{InterceptOptions, raw};

#[cfg(not(target_vendor = "apple"))]
unsafe extern "C" {
    static mut environ: *mut *mut c_char;
}

#[cfg(not(target_vendor = "apple"))]
fn environ_vector() -> *mut *mut c_char {
    // SAFETY: process-owned env pointer table, read by value.
    unsafe { environ }
}

// Dynamic libraries cannot link `environ` directly on Apple targets.
#[cfg(target_vendor = "apple")]
fn environ_vector() -> *mut *mut c_char {
    // SAFETY: _NSGetEnviron always returns a valid pointer to the table.
    unsafe { *libc::_NSGetEnviron() }
}

const MAX_SCAN: usize = 4096;
const MAX_VALUE: usize = 512;

/// Options from `MEMGUARD_OPTIONS`, or the defaults when unset.
#[must_use]
pub fn options_from_environ() -> InterceptOptions {
    // Left uninitialized: zeroing would lower to a memset call.
    let mut buf = [MaybeUninit::<u8>::uninit(); MAX_VALUE];
    match lookup(OPTIONS_ENV, &mut buf) {
        Some(value) => InterceptOptions::parse(value),
        None => InterceptOptions::default(),
    }
}

/// Copy the value of `key` into `buf`, truncating at its capacity.
fn lookup<'b>(key: &[u8], buf: &'b mut [MaybeUninit<u8>]) -> Option<&'b [u8]> {
    let mut envp = environ_vector();
    if envp.is_null() {
        return None;
    }
    for _ in 0..MAX_SCAN {
        // SAFETY: envp points to a readable slot of the env vector.
        let entry = unsafe { *envp };
        if entry.is_null() {
            return None;
        }
        // SAFETY: entry is a NUL-terminated `KEY=value` string.
        let matched = unsafe { raw::c_str_starts_with(entry, key) && *entry.add(key.len()) as u8 == b'=' };
        if matched {
            // SAFETY: the prefix matched, so the value starts inside entry.
            let value = unsafe { entry.add(key.len() + 1) };
            // SAFETY: value is the NUL-terminated tail of entry.
            let len = unsafe { raw::c_str_len(value, buf.len()) }.unwrap_or(buf.len());
            // SAFETY: `len` bytes of value are readable and fit in `buf`;
            // exactly those bytes are initialized by the copy.
            return Some(unsafe {
                raw::copy_bytes(buf.as_mut_ptr().cast(), value.cast(), len);
                std::slice::from_raw_parts(buf.as_ptr().cast(), len)
            });
        }
        // SAFETY: advance to the next env slot.
        envp = unsafe { envp.add(1) };
    }
    None
}
