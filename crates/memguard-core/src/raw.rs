//! Byte loops that never lower to an intercepted primitive.
//!
//! Volatile accesses keep the optimizer from recognizing these loops as
//! `memcpy`/`memset`/`strlen` idioms and emitting calls to the very symbols
//! being resolved. Anything that runs before the real-symbol table is sealed
//! goes through here.

use std::ffi::c_char;
use std::mem::ManuallyDrop;

/// Copy `n` bytes front to back.
///
/// # Safety
///
/// `src` must be readable and `dst` writable for `n` bytes; the regions must
/// not overlap.
#[inline(never)]
pub unsafe fn copy_bytes(dst: *mut u8, src: *const u8, n: usize) {
    let mut i = 0usize;
    while i < n {
        // SAFETY: caller guarantees valid non-overlapping regions for `n` bytes.
        unsafe {
            let byte = std::ptr::read_volatile(src.add(i));
            std::ptr::write_volatile(dst.add(i), byte);
        }
        i += 1;
    }
}

/// Move `value` into `dst` through [`copy_bytes`].
///
/// # Safety
///
/// `dst` must be valid for writes and aligned for `T`; any previous value is
/// overwritten without being dropped.
pub unsafe fn move_into<T>(dst: *mut T, value: T) {
    let value = ManuallyDrop::new(value);
    // SAFETY: `value` is a live local; ownership passes to `dst` and the
    // local is never dropped.
    unsafe { copy_bytes(dst.cast(), std::ptr::from_ref::<T>(&*value).cast(), size_of::<T>()) };
}

/// Length of a NUL-terminated string, giving up after `limit` bytes.
///
/// # Safety
///
/// `ptr` must be readable up to the terminator or `limit`, whichever is first.
#[inline(never)]
pub unsafe fn c_str_len(ptr: *const c_char, limit: usize) -> Option<usize> {
    let mut i = 0usize;
    while i < limit {
        // SAFETY: bounded read inside the caller-provided extent.
        if unsafe { std::ptr::read_volatile(ptr.add(i)) } == 0 {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Whether the NUL-terminated string at `ptr` starts with `prefix`.
///
/// # Safety
///
/// `ptr` must be a valid NUL-terminated string.
pub unsafe fn c_str_starts_with(ptr: *const c_char, prefix: &[u8]) -> bool {
    for (idx, want) in prefix.iter().enumerate() {
        // SAFETY: reading stops at the first mismatch, which includes the NUL.
        let got = unsafe { std::ptr::read_volatile(ptr.add(idx)) } as u8;
        if got != *want {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_bytes_copies_exactly_n() {
        let src = [1u8, 2, 3, 4, 5];
        let mut dst = [0u8; 5];
        // SAFETY: both arrays hold at least three bytes and do not overlap.
        unsafe { copy_bytes(dst.as_mut_ptr(), src.as_ptr(), 3) };
        assert_eq!(dst, [1, 2, 3, 0, 0]);
    }

    #[test]
    fn move_into_transfers_ownership_once() {
        use std::rc::Rc;

        let shared = Rc::new(5u32);
        let mut slot = std::mem::MaybeUninit::<(u64, Rc<u32>)>::uninit();
        // SAFETY: `slot` is a live, aligned local.
        unsafe { move_into(slot.as_mut_ptr(), (9, Rc::clone(&shared))) };
        assert_eq!(Rc::strong_count(&shared), 2);
        // SAFETY: written above.
        let (word, rc) = unsafe { slot.assume_init() };
        assert_eq!((word, *rc), (9, 5));
        drop(rc);
        assert_eq!(Rc::strong_count(&shared), 1);
    }

    #[test]
    fn c_str_len_respects_limit() {
        let s = c"hello";
        // SAFETY: static NUL-terminated string.
        unsafe {
            assert_eq!(c_str_len(s.as_ptr(), 16), Some(5));
            assert_eq!(c_str_len(s.as_ptr(), 3), None);
        }
    }

    #[test]
    fn prefix_match_stops_at_terminator() {
        let s = c"MEMGUARD_OPTIONS=halt_on_error=0";
        // SAFETY: static NUL-terminated strings.
        unsafe {
            assert!(c_str_starts_with(s.as_ptr(), b"MEMGUARD_OPTIONS="));
            assert!(!c_str_starts_with(s.as_ptr(), b"MEMGUARD_OPTS="));
            assert!(!c_str_starts_with(c"MEM".as_ptr(), b"MEMGUARD"));
        }
    }
}
