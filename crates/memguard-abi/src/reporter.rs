//! Default error reporter: one human-readable line plus frames on stderr,
//! and the structured report through `log`.

use std::cell::Cell;
use std::fmt::{self, Write as _};

use memguard_core::diag;
use memguard_core::{Decision, ErrorReporter, ViolationReport};

const LINE_CAPACITY: usize = 256;

thread_local! {
    static IN_REPORT: Cell<bool> = const { Cell::new(false) };
}

/// Reporter used when the embedding runtime registers none.
#[derive(Debug, Clone, Copy)]
pub struct StderrReporter {
    halt_on_error: bool,
}

impl StderrReporter {
    #[must_use]
    pub const fn new(halt_on_error: bool) -> Self {
        Self { halt_on_error }
    }

    fn decision(&self) -> Decision {
        if self.halt_on_error { Decision::Abort } else { Decision::Continue }
    }
}

impl ErrorReporter for StderrReporter {
    fn report(&self, report: &ViolationReport) -> Decision {
        // Formatting below runs through the interceptors again; a violation
        // raised while reporting is not reported a second time.
        let Some(_guard) = ReentryGuard::enter() else {
            return Decision::Continue;
        };

        let mut line = LineBuf::new();
        let _ = write!(line, "memguard: {report}");
        line.finish();

        for (depth, ip) in report.stack.frames().iter().enumerate() {
            line.clear();
            let _ = write!(line, "    #{depth} {ip:#x}");
            line.finish();
        }

        if log::log_enabled!(target: "memguard", log::Level::Error) {
            match serde_json::to_string(report) {
                Ok(json) => log::error!(target: "memguard", "{json}"),
                Err(err) => log::error!(target: "memguard", "{report} (unserializable: {err})"),
            }
        }

        let decision = self.decision();
        if decision == Decision::Continue {
            log::debug!(target: "memguard", "continuing after {}", report.violation.kind);
        }
        decision
    }
}

struct ReentryGuard;

impl ReentryGuard {
    fn enter() -> Option<Self> {
        IN_REPORT
            .try_with(|flag| if flag.replace(true) { None } else { Some(Self) })
            .ok()
            .flatten()
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        let _ = IN_REPORT.try_with(|flag| flag.set(false));
    }
}

/// Fixed-capacity line that truncates instead of allocating.
struct LineBuf {
    buf: [u8; LINE_CAPACITY],
    len: usize,
}

impl LineBuf {
    fn new() -> Self {
        Self {
            buf: [0; LINE_CAPACITY],
            len: 0,
        }
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    /// Terminate with a newline and write to stderr.
    fn finish(&mut self) {
        if self.len == LINE_CAPACITY {
            self.len -= 1;
        }
        self.buf[self.len] = b'\n';
        diag::write_stderr(&self.buf[..=self.len]);
    }
}

impl fmt::Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // Leave room for the newline.
        let room = LINE_CAPACITY - 1 - self.len;
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}
