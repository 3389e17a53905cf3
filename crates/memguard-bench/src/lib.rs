//! Shared fixtures for the dispatch benchmarks.

use std::ffi::c_void;
use std::time::Duration;

use memguard_core::{
    AccessKind, BasicValidator, Decision, ErrorReporter, FixedResolver, InterceptOptions, Interceptors, RangeCheck,
    RealSymbolTable, Validator, ViolationReport,
};

/// Accepts every range; isolates dispatch cost from validation cost.
pub struct AcceptAll;

impl Validator for AcceptAll {
    #[inline]
    fn check_range(&self, _addr: usize, _len: usize, _access: AccessKind) -> RangeCheck {
        RangeCheck::Accessible
    }
}

/// Never aborts; benchmarks never trigger violations anyway.
pub struct Discard;

impl ErrorReporter for Discard {
    fn report(&self, _report: &ViolationReport) -> Decision {
        Decision::Continue
    }
}

/// Table bound straight to the platform library.
#[must_use]
pub fn libc_table() -> RealSymbolTable {
    let mut resolver = FixedResolver::new([
        libc::memcpy as *const c_void,
        libc::memmove as *const c_void,
        libc::memset as *const c_void,
        libc::strlen as *const c_void,
        libc::strncpy as *const c_void,
    ]);
    match RealSymbolTable::resolve_all(&mut resolver) {
        Ok(table) => table,
        Err(err) => panic!("libc table: {err}"),
    }
}

#[must_use]
pub fn permissive_interceptors() -> Interceptors<AcceptAll, Discard> {
    Interceptors::new(libc_table(), AcceptAll, Discard, InterceptOptions::default())
}

#[must_use]
pub fn basic_interceptors() -> Interceptors<BasicValidator, Discard> {
    Interceptors::new(libc_table(), BasicValidator, Discard, InterceptOptions::default())
}

/// Per-sample ns/op collector with percentile summaries.
#[derive(Default)]
pub struct BenchStats {
    samples_ns_per_op: Vec<f64>,
    total_iters: u64,
    total_ns: u128,
}

impl BenchStats {
    pub fn record(&mut self, iters: u64, dur: Duration) {
        let ns = dur.as_nanos();
        self.total_iters = self.total_iters.saturating_add(iters);
        self.total_ns = self.total_ns.saturating_add(ns);
        self.samples_ns_per_op.push(ns as f64 / iters.max(1) as f64);
    }

    #[must_use]
    pub fn percentile(&self, p: f64) -> f64 {
        let mut samples = self.samples_ns_per_op.clone();
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        percentile_sorted(&samples, p)
    }

    pub fn report(&self, bench_label: &str) {
        if self.samples_ns_per_op.is_empty() {
            return;
        }
        let mean = self.samples_ns_per_op.iter().sum::<f64>() / self.samples_ns_per_op.len() as f64;
        println!(
            "DISPATCH_BENCH bench={} samples={} p50_ns_op={:.3} p95_ns_op={:.3} p99_ns_op={:.3} mean_ns_op={:.3}",
            bench_label,
            self.samples_ns_per_op.len(),
            self.percentile(0.50),
            self.percentile(0.95),
            self.percentile(0.99),
            mean,
        );
    }
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_pick_sorted_samples() {
        let mut stats = BenchStats::default();
        for ns in [40u64, 10, 30, 20, 50] {
            stats.record(1, Duration::from_nanos(ns));
        }
        assert_eq!(stats.percentile(0.0), 10.0);
        assert_eq!(stats.percentile(0.5), 30.0);
        assert_eq!(stats.percentile(1.0), 50.0);
    }

    #[test]
    fn permissive_copy_matches_input() {
        let interceptors = permissive_interceptors();
        let src = [9u8; 64];
        let mut dst = [0u8; 64];
        // SAFETY: both buffers hold 64 bytes.
        unsafe { interceptors.copy(dst.as_mut_ptr().cast(), src.as_ptr().cast(), 64) };
        assert_eq!(dst, src);
    }
}
