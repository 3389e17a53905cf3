//! Exported dispatch functions for the intercepted `<string.h>` primitives.
//!
//! Each entry point validates through the process interceptors and then
//! calls the genuine implementation. Release builds export them under the
//! conventional names on flat-namespace targets and as `wrap_<name>` where
//! the trampoline resolver redirects the genuine entry points here. Debug
//! builds keep Rust mangling so test binaries never interpose on themselves.
//!
//! There is no readiness check: bootstrap runs from a load-time initializer
//! before any caller can reach these symbols.

use std::ffi::{c_char, c_int, c_void};

use crate::bootstrap::{PROCESS, ProcessInterceptors};

#[inline(always)]
fn interceptors() -> &'static ProcessInterceptors {
    // SAFETY: bootstrap is sequenced before every caller; debug builds
    // verify it.
    unsafe { PROCESS.interceptors_unchecked() }
}

/// POSIX `memcpy`.
///
/// # Safety
///
/// Caller must ensure `src` and `dst` are valid for `n` bytes and do not overlap.
#[cfg_attr(all(not(debug_assertions), not(memguard_isolated_namespace)), unsafe(no_mangle))]
#[cfg_attr(all(not(debug_assertions), memguard_isolated_namespace), unsafe(export_name = "wrap_memcpy"))]
pub unsafe extern "C" fn memcpy(dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    unsafe { interceptors().copy(dst, src, n) }
}

/// POSIX `memmove`.
///
/// # Safety
///
/// Caller must ensure `src` and `dst` are valid for `n` bytes.
#[cfg_attr(all(not(debug_assertions), not(memguard_isolated_namespace)), unsafe(no_mangle))]
#[cfg_attr(all(not(debug_assertions), memguard_isolated_namespace), unsafe(export_name = "wrap_memmove"))]
pub unsafe extern "C" fn memmove(dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    unsafe { interceptors().overlap_move(dst, src, n) }
}

/// POSIX `memset`.
///
/// # Safety
///
/// Caller must ensure `dst` is valid for `n` bytes.
#[cfg_attr(all(not(debug_assertions), not(memguard_isolated_namespace)), unsafe(no_mangle))]
#[cfg_attr(all(not(debug_assertions), memguard_isolated_namespace), unsafe(export_name = "wrap_memset"))]
pub unsafe extern "C" fn memset(dst: *mut c_void, c: c_int, n: usize) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    unsafe { interceptors().fill(dst, c, n) }
}

/// POSIX `strlen`.
///
/// # Safety
///
/// Caller must ensure `s` points to a NUL-terminated string.
#[cfg_attr(all(not(debug_assertions), not(memguard_isolated_namespace)), unsafe(no_mangle))]
#[cfg_attr(all(not(debug_assertions), memguard_isolated_namespace), unsafe(export_name = "wrap_strlen"))]
pub unsafe extern "C" fn strlen(s: *const c_char) -> usize {
    // SAFETY: forwarded caller contract.
    unsafe { interceptors().length(s) }
}

/// POSIX `strncpy`.
///
/// # Safety
///
/// Caller must ensure `dst` is valid for `n` bytes and `src` is readable up
/// to its terminator or `n` bytes.
#[cfg_attr(all(not(debug_assertions), not(memguard_isolated_namespace)), unsafe(no_mangle))]
#[cfg_attr(all(not(debug_assertions), memguard_isolated_namespace), unsafe(export_name = "wrap_strncpy"))]
pub unsafe extern "C" fn strncpy(dst: *mut c_char, src: *const c_char, n: usize) -> *mut c_char {
    // SAFETY: forwarded caller contract.
    unsafe { interceptors().bounded_copy(dst, src, n) }
}
