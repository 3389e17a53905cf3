//! Contract with the external error reporter.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::primitive::PrimitiveId;
use crate::validate::{AccessKind, AccessRange, Violation};

/// Reporter verdict for a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Terminate the process.
    Abort,
    /// Perform the primitive anyway and keep running.
    Continue,
}

/// Return addresses captured at the point of violation.
///
/// Frames live in a fixed array so capturing never touches the heap.
#[derive(Clone, Copy)]
pub struct StackTrace {
    frames: [usize; StackTrace::MAX_FRAMES],
    len: usize,
}

impl StackTrace {
    pub const MAX_FRAMES: usize = 64;

    #[must_use]
    pub const fn empty() -> Self {
        Self {
            frames: [0; Self::MAX_FRAMES],
            len: 0,
        }
    }

    /// Capture up to `depth` frames of the current thread's stack, skipping
    /// the capture machinery itself.
    #[inline(never)]
    #[must_use]
    pub fn capture(depth: usize) -> Self {
        let depth = depth.min(Self::MAX_FRAMES);
        let mut trace = Self::empty();
        if depth == 0 {
            return trace;
        }
        let mut skipped = false;
        backtrace::trace(|frame| {
            // The first frame is `capture` itself.
            if !skipped {
                skipped = true;
                return true;
            }
            trace.frames[trace.len] = frame.ip() as usize;
            trace.len += 1;
            trace.len < depth
        });
        trace
    }

    #[must_use]
    pub fn frames(&self) -> &[usize] {
        &self.frames[..self.len]
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

}

impl Default for StackTrace {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.frames().iter().copied().map(Hex))
            .finish()
    }
}

struct Hex(usize);

impl fmt::Debug for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Serialize for StackTrace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.frames().iter().map(|ip| format!("{ip:#x}")))
    }
}

/// Everything the reporter is told about one violation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ViolationReport {
    pub primitive: PrimitiveId,
    pub violation: Violation,
    pub access: AccessKind,
    /// Range the primitive was about to touch.
    pub range: AccessRange,
    /// Other range involved, for overlap reports.
    pub other: Option<AccessRange>,
    pub stack: StackTrace,
}

impl fmt::Display for ViolationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {}: {} of {} bytes at {:#x} (first bad address {:#x})",
            self.violation.kind,
            self.primitive,
            self.access,
            self.range.len,
            self.range.start,
            self.violation.address
        )?;
        if let Some(other) = self.other {
            write!(f, ", overlapping {} bytes at {:#x}", other.len, other.start)?;
        }
        Ok(())
    }
}

/// Receives violations and decides whether the process survives them.
pub trait ErrorReporter: Sync {
    fn report(&self, report: &ViolationReport) -> Decision;

    /// Carry out an [`Decision::Abort`] verdict.
    fn terminate(&self) -> ! {
        std::process::abort()
    }
}

impl<R: ErrorReporter + ?Sized> ErrorReporter for &R {
    fn report(&self, report: &ViolationReport) -> Decision {
        (**self).report(report)
    }

    fn terminate(&self) -> ! {
        (**self).terminate()
    }
}
