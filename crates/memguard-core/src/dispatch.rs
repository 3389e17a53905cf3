//! Validate-then-delegate logic shared by every exported interceptor.
//!
//! Each method checks the bytes its primitive is about to touch, routes at
//! most one violation per call to the reporter, and then calls the genuine
//! implementation with the original arguments. No byte is read or written by
//! the genuine primitive before validation finishes.

use std::ffi::{c_char, c_int, c_void};

use crate::binding::{RealBinding, RealSymbolTable};
use crate::options::InterceptOptions;
use crate::primitive::PrimitiveId;
use crate::raw;
use crate::report::{Decision, ErrorReporter, StackTrace, ViolationReport};
use crate::validate::{AccessKind, AccessRange, RangeCheck, Validator, Violation, ViolationKind};

/// Outcome of a lazy string probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    /// Terminator found; the value counts it.
    Terminated(usize),
    /// Bound reached without a terminator.
    Bounded(usize),
    /// A violation was reported and the reporter let the call continue.
    Reported,
}

/// Sealed interception state: genuine bindings plus the collaborators that
/// judge each call.
pub struct Interceptors<V, R> {
    table: RealSymbolTable,
    validator: V,
    reporter: R,
    options: InterceptOptions,
}

impl<V: Validator, R: ErrorReporter> Interceptors<V, R> {
    pub fn new(table: RealSymbolTable, validator: V, reporter: R, options: InterceptOptions) -> Self {
        Self {
            table,
            validator,
            reporter,
            options,
        }
    }

    /// Construct the value at `slot` field by field through byte loops, so
    /// no whole-value move can be lowered to a `memcpy` call.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for writes and aligned; any previous value is
    /// overwritten without being dropped.
    #[inline(never)]
    pub(crate) unsafe fn write_in_place(
        slot: *mut Self,
        table: &RealSymbolTable,
        validator: V,
        reporter: R,
        options: InterceptOptions,
    ) {
        // SAFETY: caller guarantees `slot` is writable; the field pointers
        // stay inside it.
        unsafe {
            raw::copy_bytes(
                (&raw mut (*slot).table).cast(),
                std::ptr::from_ref(table).cast(),
                size_of::<RealSymbolTable>(),
            );
            raw::move_into(&raw mut (*slot).validator, validator);
            raw::move_into(&raw mut (*slot).reporter, reporter);
            raw::move_into(&raw mut (*slot).options, options);
        }
    }

    #[must_use]
    pub fn table(&self) -> &RealSymbolTable {
        &self.table
    }

    /// Resolved binding of every primitive, in resolution order.
    #[must_use]
    pub fn bindings(&self) -> [RealBinding; PrimitiveId::COUNT] {
        self.table.bindings()
    }

    #[must_use]
    pub fn options(&self) -> &InterceptOptions {
        &self.options
    }

    /// `memcpy` with validation.
    ///
    /// # Safety
    ///
    /// Same contract as the platform `memcpy`, except that ranges the
    /// validator rejects are reported instead of silently corrupting memory.
    #[inline]
    pub unsafe fn copy(&self, dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
        if n != 0 {
            self.guard_transfer(PrimitiveId::Copy, dst as usize, src as usize, n, self.options.check_overlap);
        }
        // SAFETY: ranges validated (or the reporter chose to continue).
        unsafe { (self.table.real_memcpy())(dst, src, n) }
    }

    /// `memmove` with validation; overlap is permitted.
    ///
    /// # Safety
    ///
    /// Same contract as the platform `memmove`.
    #[inline]
    pub unsafe fn overlap_move(&self, dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
        if n != 0 {
            self.guard_transfer(PrimitiveId::OverlapMove, dst as usize, src as usize, n, false);
        }
        // SAFETY: ranges validated (or the reporter chose to continue).
        unsafe { (self.table.real_memmove())(dst, src, n) }
    }

    /// `memset` with validation.
    ///
    /// # Safety
    ///
    /// Same contract as the platform `memset`.
    #[inline]
    pub unsafe fn fill(&self, dst: *mut c_void, value: c_int, n: usize) -> *mut c_void {
        if n != 0 {
            self.check(PrimitiveId::Fill, AccessRange::new(dst as usize, n), AccessKind::Write, None);
        }
        // SAFETY: range validated (or the reporter chose to continue).
        unsafe { (self.table.real_memset())(dst, value, n) }
    }

    /// `strlen` with a lazy byte-by-byte probe that stops at the first
    /// inaccessible byte, even one before the terminator.
    ///
    /// # Safety
    ///
    /// Same contract as the platform `strlen`.
    #[inline]
    pub unsafe fn length(&self, s: *const c_char) -> usize {
        // SAFETY: the probe reads only bytes the validator accepted.
        let _ = unsafe { self.probe_c_string(PrimitiveId::Length, s, usize::MAX) };
        // SAFETY: string validated up to its terminator (or the reporter
        // chose to continue).
        unsafe { (self.table.real_strlen())(s) }
    }

    /// `strncpy` with validation: the source is probed up to its terminator
    /// or `n` bytes, the destination is checked for all `n` bytes (padding
    /// included).
    ///
    /// # Safety
    ///
    /// Same contract as the platform `strncpy`.
    #[inline]
    pub unsafe fn bounded_copy(&self, dst: *mut c_char, src: *const c_char, n: usize) -> *mut c_char {
        if n != 0 {
            // SAFETY: the probe reads only bytes the validator accepted.
            let read = match unsafe { self.probe_c_string(PrimitiveId::BoundedCopy, src, n) } {
                Probe::Terminated(len) | Probe::Bounded(len) => Some(len),
                Probe::Reported => None,
            };
            if let Some(read) = read {
                let src_range = AccessRange::new(src as usize, read);
                let dst_range = AccessRange::new(dst as usize, n);
                if self.options.check_overlap && src_range.overlaps(&dst_range) {
                    self.raise_overlap(PrimitiveId::BoundedCopy, dst_range, src_range);
                } else {
                    self.check(PrimitiveId::BoundedCopy, dst_range, AccessKind::Write, None);
                }
            }
        }
        // SAFETY: ranges validated (or the reporter chose to continue).
        unsafe { (self.table.real_strncpy())(dst, src, n) }
    }

    fn guard_transfer(&self, primitive: PrimitiveId, dst: usize, src: usize, n: usize, check_overlap: bool) {
        let src_range = AccessRange::new(src, n);
        let dst_range = AccessRange::new(dst, n);
        if check_overlap && src_range.overlaps(&dst_range) {
            self.raise_overlap(primitive, dst_range, src_range);
            return;
        }
        if self.check(primitive, src_range, AccessKind::Read, Some(dst_range)) {
            return;
        }
        self.check(primitive, dst_range, AccessKind::Write, Some(src_range));
    }

    /// Validate one range; returns whether a violation was reported.
    #[inline]
    fn check(
        &self,
        primitive: PrimitiveId,
        range: AccessRange,
        access: AccessKind,
        other: Option<AccessRange>,
    ) -> bool {
        match self.validator.check_range(range.start, range.len, access) {
            RangeCheck::Accessible => false,
            RangeCheck::Violation(violation) => {
                self.raise(primitive, violation, access, range, other);
                true
            }
        }
    }

    /// Probe a NUL-terminated string one byte at a time, at most `limit`
    /// bytes, failing fast on the first byte the validator rejects.
    unsafe fn probe_c_string(&self, primitive: PrimitiveId, s: *const c_char, limit: usize) -> Probe {
        let base = s as usize;
        let mut i = 0usize;
        while i < limit {
            let addr = base.wrapping_add(i);
            if let RangeCheck::Violation(violation) = self.validator.check_range(addr, 1, AccessKind::Read) {
                // Extent known so far: the accepted prefix plus the bad byte.
                self.raise(primitive, violation, AccessKind::Read, AccessRange::new(base, i + 1), None);
                return Probe::Reported;
            }
            // SAFETY: the validator accepted this byte.
            if unsafe { *s.wrapping_add(i) } == 0 {
                return Probe::Terminated(i + 1);
            }
            i += 1;
        }
        Probe::Bounded(limit)
    }

    #[cold]
    fn raise_overlap(&self, primitive: PrimitiveId, dst: AccessRange, src: AccessRange) {
        let violation = Violation {
            kind: ViolationKind::ParamOverlap,
            address: dst.start.max(src.start),
        };
        self.raise(primitive, violation, AccessKind::Write, dst, Some(src));
    }

    #[cold]
    #[inline(never)]
    fn raise(
        &self,
        primitive: PrimitiveId,
        violation: Violation,
        access: AccessKind,
        range: AccessRange,
        other: Option<AccessRange>,
    ) {
        let report = ViolationReport {
            primitive,
            violation,
            access,
            range,
            other,
            stack: StackTrace::capture(self.options.stack_depth),
        };
        match self.reporter.report(&report) {
            Decision::Abort => self.reporter.terminate(),
            Decision::Continue => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::panic::{self, AssertUnwindSafe};

    use proptest::prelude::*;

    use super::*;
    use crate::resolver::FixedResolver;

    thread_local! {
        static GENUINE_CALLS: Cell<usize> = const { Cell::new(0) };
        static REPORTS: RefCell<Vec<(ViolationReport, usize)>> = const { RefCell::new(Vec::new()) };
    }

    fn genuine_calls() -> usize {
        GENUINE_CALLS.with(Cell::get)
    }

    fn bump() {
        GENUINE_CALLS.with(|calls| calls.set(calls.get() + 1));
    }

    // memmove-backed so overlap scenarios that continue stay defined.
    unsafe extern "C" fn counting_memcpy(d: *mut c_void, s: *const c_void, n: usize) -> *mut c_void {
        bump();
        unsafe { libc::memmove(d, s, n) }
    }

    unsafe extern "C" fn counting_memmove(d: *mut c_void, s: *const c_void, n: usize) -> *mut c_void {
        bump();
        unsafe { libc::memmove(d, s, n) }
    }

    unsafe extern "C" fn counting_memset(d: *mut c_void, c: c_int, n: usize) -> *mut c_void {
        bump();
        unsafe { libc::memset(d, c, n) }
    }

    unsafe extern "C" fn counting_strlen(s: *const c_char) -> usize {
        bump();
        unsafe { libc::strlen(s) }
    }

    unsafe extern "C" fn counting_strncpy(d: *mut c_char, s: *const c_char, n: usize) -> *mut c_char {
        bump();
        unsafe { libc::strncpy(d, s, n) }
    }

    fn counting_table() -> RealSymbolTable {
        let mut resolver = FixedResolver::new([
            counting_memcpy as *const c_void,
            counting_memmove as *const c_void,
            counting_memset as *const c_void,
            counting_strlen as *const c_void,
            counting_strncpy as *const c_void,
        ]);
        RealSymbolTable::resolve_all(&mut resolver).unwrap()
    }

    /// Validator that rejects a fixed set of byte ranges.
    #[derive(Default)]
    struct Poison {
        ranges: Vec<AccessRange>,
    }

    impl Poison {
        fn bytes(start: *const u8, len: usize) -> Self {
            Self {
                ranges: vec![AccessRange::new(start as usize, len)],
            }
        }
    }

    impl Validator for Poison {
        fn check_range(&self, address: usize, length: usize, _access: AccessKind) -> RangeCheck {
            let probe = AccessRange::new(address, length);
            let first_bad = self
                .ranges
                .iter()
                .filter(|poisoned| poisoned.overlaps(&probe))
                .map(|poisoned| poisoned.start.max(address))
                .min();
            match first_bad {
                Some(address) => RangeCheck::Violation(Violation {
                    kind: ViolationKind::BufferOverflow,
                    address,
                }),
                None => RangeCheck::Accessible,
            }
        }
    }

    /// Records each report with the genuine-call count seen at report time.
    struct Recorder {
        decision: Decision,
    }

    impl ErrorReporter for Recorder {
        fn report(&self, report: &ViolationReport) -> Decision {
            REPORTS.with(|reports| reports.borrow_mut().push((*report, genuine_calls())));
            self.decision
        }

        fn terminate(&self) -> ! {
            panic!("terminated by reporter");
        }
    }

    fn interceptors(poison: Poison, decision: Decision) -> Interceptors<Poison, Recorder> {
        GENUINE_CALLS.with(|calls| calls.set(0));
        REPORTS.with(|reports| reports.borrow_mut().clear());
        Interceptors::new(counting_table(), poison, Recorder { decision }, InterceptOptions::default())
    }

    fn reports() -> Vec<(ViolationReport, usize)> {
        REPORTS.with(|reports| reports.borrow().clone())
    }

    #[test]
    fn copy_of_sixteen_accessible_bytes_returns_dst() {
        let guard = interceptors(Poison::default(), Decision::Abort);
        let src: [u8; 16] = std::array::from_fn(|i| i as u8 * 3);
        let mut dst = [0u8; 16];

        // SAFETY: both buffers hold 16 bytes and do not overlap.
        let ret = unsafe { guard.copy(dst.as_mut_ptr().cast(), src.as_ptr().cast(), 16) };

        assert_eq!(ret, dst.as_mut_ptr().cast());
        assert_eq!(dst, src);
        assert_eq!(genuine_calls(), 1);
        assert!(reports().is_empty());
    }

    #[test]
    fn copy_reports_before_touching_destination() {
        let src = [0xAAu8; 32];
        let mut dst = [0u8; 32];
        let guard = interceptors(Poison::bytes(dst[20..].as_ptr(), 1), Decision::Continue);

        // SAFETY: buffers are 32 bytes each; poison is simulated.
        unsafe { guard.copy(dst.as_mut_ptr().cast(), src.as_ptr().cast(), 32) };

        let reports = reports();
        assert_eq!(reports.len(), 1);
        let (report, calls_at_report) = reports[0];
        assert_eq!(calls_at_report, 0, "genuine memcpy ran before the report");
        assert_eq!(report.primitive, PrimitiveId::Copy);
        assert_eq!(report.access, AccessKind::Write);
        assert_eq!(report.violation.address, dst[20..].as_ptr() as usize);
        // Continue honors the original call.
        assert_eq!(genuine_calls(), 1);
        assert_eq!(dst, src);
    }

    #[test]
    fn abort_decision_terminates_without_copying() {
        let src = [0x55u8; 8];
        let mut dst = [0u8; 8];
        let guard = interceptors(Poison::bytes(src.as_ptr(), 8), Decision::Abort);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: buffers are 8 bytes each; poison is simulated.
            unsafe { guard.copy(dst.as_mut_ptr().cast(), src.as_ptr().cast(), 8) };
        }));

        assert!(outcome.is_err());
        assert_eq!(genuine_calls(), 0);
        assert_eq!(dst, [0u8; 8]);
        let reports = reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0.access, AccessKind::Read);
    }

    #[test]
    fn copy_reports_only_first_violation() {
        let src = [1u8; 8];
        let mut dst = [0u8; 8];
        let poison = Poison {
            ranges: vec![
                AccessRange::new(src.as_ptr() as usize, 8),
                AccessRange::new(dst.as_ptr() as usize, 8),
            ],
        };
        let guard = interceptors(poison, Decision::Continue);

        // SAFETY: buffers are 8 bytes each; poison is simulated.
        unsafe { guard.copy(dst.as_mut_ptr().cast(), src.as_ptr().cast(), 8) };

        assert_eq!(reports().len(), 1);
    }

    #[test]
    fn copy_reports_overlap() {
        let mut buf = [0u8; 32];
        let guard = interceptors(Poison::default(), Decision::Continue);
        let base = buf.as_mut_ptr();

        // SAFETY: both ranges lie inside `buf`.
        unsafe { guard.copy(base.add(4).cast(), base.cast_const().cast(), 8) };

        let reports = reports();
        assert_eq!(reports.len(), 1);
        let (report, calls_at_report) = reports[0];
        assert_eq!(calls_at_report, 0);
        assert_eq!(report.violation.kind, ViolationKind::ParamOverlap);
        assert_eq!(report.other, Some(AccessRange::new(base as usize, 8)));
    }

    #[test]
    fn overlap_move_allows_overlap() {
        let mut buf = *b"abcdefgh";
        let guard = interceptors(Poison::default(), Decision::Abort);
        let base = buf.as_mut_ptr();

        // SAFETY: both ranges lie inside `buf`.
        unsafe { guard.overlap_move(base.add(2).cast(), base.cast_const().cast(), 6) };

        assert_eq!(&buf, b"ababcdef");
        assert!(reports().is_empty());
    }

    #[test]
    fn zero_length_calls_skip_validation() {
        let guard = interceptors(Poison::bytes(std::ptr::null(), usize::MAX), Decision::Abort);
        let mut byte = 0u8;

        // SAFETY: zero-length operations touch no memory.
        unsafe {
            guard.copy((&raw mut byte).cast(), (&raw const byte).cast(), 0);
            guard.fill((&raw mut byte).cast(), 1, 0);
            guard.bounded_copy((&raw mut byte).cast(), (&raw const byte).cast(), 0);
        }

        assert!(reports().is_empty());
        assert_eq!(genuine_calls(), 3);
    }

    #[test]
    fn fill_sets_every_byte() {
        let mut buf = [0u8; 24];
        let guard = interceptors(Poison::default(), Decision::Abort);

        // SAFETY: `buf` holds 24 bytes.
        let ret = unsafe { guard.fill(buf.as_mut_ptr().cast(), 0x5A, 24) };

        assert_eq!(ret, buf.as_mut_ptr().cast());
        assert!(buf.iter().all(|byte| *byte == 0x5A));
    }

    #[test]
    fn fill_reports_poisoned_tail() {
        let mut buf = [0u8; 24];
        let guard = interceptors(Poison::bytes(buf[23..].as_ptr(), 1), Decision::Continue);

        // SAFETY: `buf` holds 24 bytes; poison is simulated.
        unsafe { guard.fill(buf.as_mut_ptr().cast(), 1, 24) };

        let reports = reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0.range, AccessRange::new(buf.as_ptr() as usize, 24));
        assert_eq!(reports[0].1, 0);
    }

    #[test]
    fn length_matches_genuine_strlen() {
        let guard = interceptors(Poison::default(), Decision::Abort);
        // SAFETY: static NUL-terminated string.
        assert_eq!(unsafe { guard.length(c"interceptor".as_ptr()) }, 11);
        // SAFETY: static NUL-terminated string.
        assert_eq!(unsafe { guard.length(c"".as_ptr()) }, 0);
    }

    #[test]
    fn length_fails_fast_on_byte_before_terminator() {
        // "AB", one inaccessible byte, then the terminator two bytes later.
        let buf = [b'A' as c_char, b'B' as c_char, b'X' as c_char, b'Y' as c_char, 0];
        let bad = buf[2..].as_ptr();
        let guard = interceptors(Poison::bytes(bad.cast(), 1), Decision::Continue);

        // SAFETY: `buf` is NUL-terminated; poison is simulated.
        let len = unsafe { guard.length(buf.as_ptr()) };

        let reports = reports();
        assert_eq!(reports.len(), 1);
        let (report, calls_at_report) = reports[0];
        assert_eq!(calls_at_report, 0);
        assert_eq!(report.primitive, PrimitiveId::Length);
        assert_eq!(report.violation.address, bad as usize);
        assert_eq!(report.range, AccessRange::new(buf.as_ptr() as usize, 3));
        assert_eq!(len, 4);
    }

    #[test]
    fn length_ignores_poison_after_terminator() {
        let buf = [b'o' as c_char, b'k' as c_char, 0, b'Z' as c_char];
        let guard = interceptors(Poison::bytes(buf[3..].as_ptr().cast(), 1), Decision::Abort);

        // SAFETY: `buf` is NUL-terminated.
        assert_eq!(unsafe { guard.length(buf.as_ptr()) }, 2);
        assert!(reports().is_empty());
    }

    #[test]
    fn bounded_copy_pads_like_strncpy() {
        let guard = interceptors(Poison::default(), Decision::Abort);
        let mut dst = [0x7F as c_char; 6];

        // SAFETY: `dst` holds 6 bytes; source is a static C string.
        let ret = unsafe { guard.bounded_copy(dst.as_mut_ptr(), c"hi".as_ptr(), 6) };

        assert_eq!(ret, dst.as_mut_ptr());
        assert_eq!(dst, [b'h' as c_char, b'i' as c_char, 0, 0, 0, 0]);
    }

    #[test]
    fn bounded_copy_probes_source_only_up_to_n() {
        // No terminator inside the first 4 bytes; the poisoned 5th byte is
        // never read by strncpy(dst, src, 4).
        let src = [b'a' as c_char, b'b' as c_char, b'c' as c_char, b'd' as c_char, b'e' as c_char, 0];
        let mut dst = [0 as c_char; 4];
        let guard = interceptors(Poison::bytes(src[4..].as_ptr().cast(), 2), Decision::Abort);

        // SAFETY: `dst` holds 4 bytes; `src` holds 6.
        unsafe { guard.bounded_copy(dst.as_mut_ptr(), src.as_ptr(), 4) };

        assert!(reports().is_empty());
        assert_eq!(dst, [b'a' as c_char, b'b' as c_char, b'c' as c_char, b'd' as c_char]);
    }

    #[test]
    fn bounded_copy_checks_whole_destination() {
        let mut dst = [0 as c_char; 8];
        let guard = interceptors(Poison::bytes(dst[7..].as_ptr().cast(), 1), Decision::Continue);

        // SAFETY: `dst` holds 8 bytes; source is a static C string.
        unsafe { guard.bounded_copy(dst.as_mut_ptr(), c"ab".as_ptr(), 8) };

        let reports = reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0.access, AccessKind::Write);
        assert_eq!(reports[0].1, 0);
    }

    #[test]
    fn overlap_check_can_be_disabled() {
        let mut buf = [0u8; 16];
        GENUINE_CALLS.with(|calls| calls.set(0));
        REPORTS.with(|reports| reports.borrow_mut().clear());
        let options = InterceptOptions {
            check_overlap: false,
            ..InterceptOptions::default()
        };
        let guard = Interceptors::new(
            counting_table(),
            Poison::default(),
            Recorder {
                decision: Decision::Abort,
            },
            options,
        );
        let base = buf.as_mut_ptr();

        // SAFETY: both ranges lie inside `buf`.
        unsafe { guard.copy(base.add(4).cast(), base.cast_const().cast(), 8) };
        assert!(reports().is_empty());
        assert_eq!(genuine_calls(), 1);
        assert!(!guard.options().check_overlap);
    }

    proptest! {
        #[test]
        fn prop_copy_is_byte_identical_to_genuine(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let guard = interceptors(Poison::default(), Decision::Abort);
            let mut via_guard = vec![0u8; data.len()];
            let mut via_libc = vec![0u8; data.len()];
            // SAFETY: all buffers hold `data.len()` bytes and are distinct.
            unsafe {
                guard.copy(via_guard.as_mut_ptr().cast(), data.as_ptr().cast(), data.len());
                libc::memcpy(via_libc.as_mut_ptr().cast(), data.as_ptr().cast(), data.len());
            }
            prop_assert_eq!(via_guard, via_libc);
        }

        #[test]
        fn prop_move_matches_copy_within(
            data in proptest::collection::vec(any::<u8>(), 1..128),
            from in 0usize..128,
            to in 0usize..128,
            len in 0usize..128,
        ) {
            let mut data = data;
            let size = data.len();
            let from = from % size;
            let to = to % size;
            let len = len.min(size - from).min(size - to);
            let mut expected = data.clone();
            expected.copy_within(from..from + len, to);

            let guard = interceptors(Poison::default(), Decision::Abort);
            let base = data.as_mut_ptr();
            // SAFETY: both ranges lie inside `data`.
            unsafe { guard.overlap_move(base.add(to).cast(), base.add(from).cast_const().cast(), len) };
            prop_assert_eq!(data, expected);
        }

        #[test]
        fn prop_length_matches_first_nul(raw in proptest::collection::vec(1u8..=255, 0..96)) {
            let guard = interceptors(Poison::default(), Decision::Abort);
            let mut c_string: Vec<c_char> = raw.iter().map(|byte| *byte as c_char).collect();
            c_string.push(0);
            // SAFETY: `c_string` is NUL-terminated.
            let len = unsafe { guard.length(c_string.as_ptr()) };
            prop_assert_eq!(len, raw.len());
        }
    }
}
