//! Runs each exported dispatch function and its genuine binding on identical
//! buffers and compares every byte and the return value.

use std::ffi::{c_char, c_int, c_void};

use serde::Serialize;

use memguard_abi::ProcessInterceptors;
use memguard_abi::string_abi;
use memguard_core::PrimitiveId;

const BUF_LEN: usize = 256;
const CANARY: u8 = 0x5A;

/// Outcome of one self-test case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub primitive: PrimitiveId,
    pub case_name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

/// Two identical buffers, one per side of the comparison.
struct Pair {
    ours: Vec<u8>,
    genuine: Vec<u8>,
}

impl Pair {
    fn patterned() -> Self {
        let buf: Vec<u8> = (0..BUF_LEN).map(|i| (i * 7 + 3) as u8).collect();
        Self {
            ours: buf.clone(),
            genuine: buf,
        }
    }

    fn with_string(text: &[u8]) -> Self {
        let mut pair = Self {
            ours: vec![CANARY; BUF_LEN],
            genuine: vec![CANARY; BUF_LEN],
        };
        for buf in [&mut pair.ours, &mut pair.genuine] {
            buf[..text.len()].copy_from_slice(text);
            buf[text.len()] = 0;
        }
        pair
    }

    fn verdict(&self, primitive: PrimitiveId, case_name: &str, returns: (usize, usize)) -> CaseResult {
        let detail = if returns.0 != returns.1 {
            Some(format!("return value differs: {:#x} vs {:#x}", returns.0, returns.1))
        } else {
            self.ours
                .iter()
                .zip(&self.genuine)
                .position(|(a, b)| a != b)
                .map(|at| format!("first difference at byte {at}"))
        };
        CaseResult {
            primitive,
            case_name: case_name.to_owned(),
            passed: detail.is_none(),
            detail,
        }
    }
}

/// Offsets relative to each buffer's base, so return values compare equal
/// when both sides return the same position in their own buffer.
fn rel(base: *const u8, ret: *const c_void) -> usize {
    (ret as usize).wrapping_sub(base as usize)
}

fn copy_case(table: &ProcessInterceptors, name: &str, dst: usize, src: usize, n: usize) -> CaseResult {
    let mut pair = Pair::patterned();
    let real = table.table().real_memcpy();
    let (o, g) = (pair.ours.as_mut_ptr(), pair.genuine.as_mut_ptr());
    // SAFETY: offsets + n stay inside BUF_LEN and the ranges are disjoint.
    let returns = unsafe {
        (
            rel(o, string_abi::memcpy(o.add(dst).cast(), o.add(src).cast(), n)),
            rel(g, real(g.add(dst).cast(), g.add(src).cast(), n)),
        )
    };
    pair.verdict(PrimitiveId::Copy, name, returns)
}

fn move_case(table: &ProcessInterceptors, name: &str, dst: usize, src: usize, n: usize) -> CaseResult {
    let mut pair = Pair::patterned();
    let real = table.table().real_memmove();
    let (o, g) = (pair.ours.as_mut_ptr(), pair.genuine.as_mut_ptr());
    // SAFETY: offsets + n stay inside BUF_LEN.
    let returns = unsafe {
        (
            rel(o, string_abi::memmove(o.add(dst).cast(), o.add(src).cast(), n)),
            rel(g, real(g.add(dst).cast(), g.add(src).cast(), n)),
        )
    };
    pair.verdict(PrimitiveId::OverlapMove, name, returns)
}

fn fill_case(table: &ProcessInterceptors, name: &str, at: usize, value: c_int, n: usize) -> CaseResult {
    let mut pair = Pair::patterned();
    let real = table.table().real_memset();
    let (o, g) = (pair.ours.as_mut_ptr(), pair.genuine.as_mut_ptr());
    // SAFETY: at + n stays inside BUF_LEN.
    let returns = unsafe {
        (
            rel(o, string_abi::memset(o.add(at).cast(), value, n)),
            rel(g, real(g.add(at).cast(), value, n)),
        )
    };
    pair.verdict(PrimitiveId::Fill, name, returns)
}

fn length_case(table: &ProcessInterceptors, name: &str, text: &[u8]) -> CaseResult {
    let pair = Pair::with_string(text);
    let real = table.table().real_strlen();
    // SAFETY: both buffers hold a NUL-terminated copy of `text`.
    let returns = unsafe {
        (
            string_abi::strlen(pair.ours.as_ptr().cast()),
            real(pair.genuine.as_ptr().cast()),
        )
    };
    pair.verdict(PrimitiveId::Length, name, returns)
}

fn bounded_copy_case(table: &ProcessInterceptors, name: &str, text: &[u8], n: usize) -> CaseResult {
    let mut pair = Pair::with_string(text);
    let real = table.table().real_strncpy();
    let dst = 128;
    let (o, g) = (pair.ours.as_mut_ptr(), pair.genuine.as_mut_ptr());
    // SAFETY: the string sits below offset 128, the destination spans
    // [128, 128 + n) with n <= 128.
    let returns = unsafe {
        (
            rel(o, string_abi::strncpy(o.add(dst).cast::<c_char>(), o.cast(), n).cast()),
            rel(g, real(g.add(dst).cast::<c_char>(), g.cast(), n).cast()),
        )
    };
    pair.verdict(PrimitiveId::BoundedCopy, name, returns)
}

/// Run every case against the sealed process interceptors.
#[must_use]
pub fn run_selftest(interceptors: &ProcessInterceptors) -> Vec<CaseResult> {
    let results = vec![
        copy_case(interceptors, "empty", 0, 128, 0),
        copy_case(interceptors, "16 bytes", 0, 128, 16),
        copy_case(interceptors, "unaligned 77 bytes", 3, 130, 77),
        move_case(interceptors, "forward overlap", 8, 0, 100),
        move_case(interceptors, "backward overlap", 0, 8, 100),
        move_case(interceptors, "disjoint", 0, 128, 64),
        fill_case(interceptors, "zero", 0, 0, 64),
        fill_case(interceptors, "truncated value", 5, 0x1A5, 99),
        fill_case(interceptors, "empty", 0, 0xFF, 0),
        length_case(interceptors, "empty", b""),
        length_case(interceptors, "short", b"memguard"),
        length_case(interceptors, "long", &[b'x'; 200]),
        bounded_copy_case(interceptors, "padding", b"abc", 16),
        bounded_copy_case(interceptors, "truncation", b"overflowing", 4),
        bounded_copy_case(interceptors, "exact", b"exact", 5),
        bounded_copy_case(interceptors, "empty bound", b"ignored", 0),
    ];
    for result in results.iter().filter(|r| !r.passed) {
        log::warn!(
            target: "memguard",
            "selftest {} / {} failed: {}",
            result.primitive,
            result.case_name,
            result.detail.as_deref().unwrap_or("")
        );
    }
    results
}
