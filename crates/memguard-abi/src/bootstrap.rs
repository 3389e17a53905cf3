//! Process-wide bootstrap.
//!
//! [`bootstrap`] seals the process [`Sequencer`]: it reads `MEMGUARD_OPTIONS`,
//! picks up registered collaborators, resolves every genuine primitive with
//! the platform resolver and, with the `preinit` feature, runs from a
//! load-time initializer ahead of ordinary constructors.

use std::sync::atomic::{AtomicBool, Ordering};

use memguard_core::{
    BasicValidator, Collaborators, ErrorReporter, InterceptError, Interceptors, RangeCheck, Sequencer, Validator,
    ViolationReport,
};
use memguard_core::{AccessKind, Decision};
use parking_lot::Mutex;

use crate::env;
use crate::reporter::StderrReporter;
use crate::resolve;

/// Validator the process interceptors consult.
pub enum ProcessValidator {
    Basic(BasicValidator),
    Registered(&'static dyn Validator),
}

impl Validator for ProcessValidator {
    #[inline]
    fn check_range(&self, address: usize, length: usize, access: AccessKind) -> RangeCheck {
        match self {
            Self::Basic(validator) => validator.check_range(address, length, access),
            Self::Registered(validator) => validator.check_range(address, length, access),
        }
    }
}

/// Reporter the process interceptors consult.
pub enum ProcessReporter {
    Stderr(StderrReporter),
    Registered(&'static dyn ErrorReporter),
}

impl ErrorReporter for ProcessReporter {
    fn report(&self, report: &ViolationReport) -> Decision {
        match self {
            Self::Stderr(reporter) => reporter.report(report),
            Self::Registered(reporter) => reporter.report(report),
        }
    }

    fn terminate(&self) -> ! {
        match self {
            Self::Stderr(reporter) => reporter.terminate(),
            Self::Registered(reporter) => reporter.terminate(),
        }
    }
}

pub type ProcessInterceptors = Interceptors<ProcessValidator, ProcessReporter>;

pub(crate) static PROCESS: Sequencer<ProcessValidator, ProcessReporter> = Sequencer::new();

struct Registration {
    validator: Option<&'static dyn Validator>,
    reporter: Option<&'static dyn ErrorReporter>,
    sealed: bool,
}

static REGISTRATION: Mutex<Registration> = parking_lot::const_mutex(Registration {
    validator: None,
    reporter: None,
    sealed: false,
});

static TABLE_LOGGED: AtomicBool = AtomicBool::new(false);

/// Install the validator and reporter the interceptors will use.
///
/// Must run before bootstrap; afterwards the configuration is immutable and
/// the call fails with [`InterceptError::AlreadyBootstrapped`].
pub fn register_collaborators(
    validator: &'static dyn Validator,
    reporter: &'static dyn ErrorReporter,
) -> Result<(), InterceptError> {
    let mut registration = REGISTRATION.lock();
    if registration.sealed {
        return Err(InterceptError::AlreadyBootstrapped);
    }
    registration.validator = Some(validator);
    registration.reporter = Some(reporter);
    Ok(())
}

/// Runs at most once, before resolution; touches no intercepted primitive.
fn collaborators() -> Collaborators<ProcessValidator, ProcessReporter> {
    let options = env::options_from_environ();
    let mut registration = REGISTRATION.lock();
    registration.sealed = true;
    Collaborators {
        validator: registration
            .validator
            .map_or(ProcessValidator::Basic(BasicValidator), ProcessValidator::Registered),
        reporter: registration.reporter.map_or(
            ProcessReporter::Stderr(StderrReporter::new(options.halt_on_error)),
            ProcessReporter::Registered,
        ),
        options,
    }
}

/// Resolve every genuine primitive and seal the process interceptors.
///
/// Idempotent: later calls return the sealed state. Resolution failure
/// aborts the process with a diagnostic naming the missing symbol.
pub fn bootstrap() -> &'static ProcessInterceptors {
    let interceptors = PROCESS.run(&mut resolve::platform_resolver(), collaborators);
    log_table_once(interceptors);
    interceptors
}

/// Like [`bootstrap`], but hands back the error instead of aborting.
pub fn try_bootstrap() -> Result<&'static ProcessInterceptors, InterceptError> {
    let interceptors = PROCESS.try_run(&mut resolve::platform_resolver(), collaborators)?;
    log_table_once(interceptors);
    Ok(interceptors)
}

/// The sealed process interceptors, if bootstrap has completed.
#[must_use]
pub fn process_interceptors() -> Option<&'static ProcessInterceptors> {
    PROCESS.get()
}

/// C entry point for runtimes that sequence initialization themselves.
#[unsafe(no_mangle)]
pub extern "C" fn memguard_bootstrap() {
    bootstrap();
}

/// Log the resolved table the first time a logger accepts it.
///
/// The load-time bootstrap runs before any logger is installed, so a later
/// `bootstrap` call from the embedding program gets another chance.
fn log_table_once(interceptors: &ProcessInterceptors) {
    if TABLE_LOGGED.load(Ordering::Acquire) {
        return;
    }
    let verbosity = interceptors.options().verbosity;
    let level = if verbosity >= 1 {
        log::Level::Info
    } else {
        log::Level::Debug
    };
    if !log::log_enabled!(target: "memguard", level) || TABLE_LOGGED.swap(true, Ordering::AcqRel) {
        return;
    }
    let table = interceptors.table();
    log::log!(target: "memguard", level, "resolved {} primitives via {}", table.bindings().len(), table.strategy());
    for binding in table.bindings() {
        let Some(entry) = binding.entry_point else {
            continue;
        };
        if verbosity >= 2 {
            let module = resolve::module_path(entry).unwrap_or_else(|| "<unknown>".to_owned());
            log::log!(target: "memguard", level, "  {} -> {:#x} ({module})", binding.id, entry.addr());
        } else {
            log::log!(target: "memguard", level, "  {} -> {:#x}", binding.id, entry.addr());
        }
    }
}

#[cfg(all(feature = "preinit", any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
#[unsafe(link_section = ".init_array.00101")]
#[used]
static PREINIT: extern "C" fn() = memguard_bootstrap;

#[cfg(all(feature = "preinit", target_vendor = "apple"))]
#[unsafe(link_section = "__DATA,__mod_init_func")]
#[used]
static PREINIT: extern "C" fn() = memguard_bootstrap;
