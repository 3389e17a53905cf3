//! Write-once bootstrap of the interception state.
//!
//! State machine: UNINIT -> RESOLVING -> READY | FAILED. The slot is written
//! exactly once, by the thread that wins the UNINIT -> RESOLVING transition,
//! and only read after READY is published with release ordering. Atomics are
//! used directly instead of `OnceLock` so a re-entrant call from the
//! resolving thread is detected instead of deadlocking on the futex.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::binding::{EntryPoint, RealSymbolTable};
use crate::diag;
use crate::dispatch::Interceptors;
use crate::error::InterceptError;
use crate::options::InterceptOptions;
use crate::primitive::PrimitiveId;
use crate::report::ErrorReporter;
use crate::resolver::{ResolutionRequest, ResolverStrategy, SymbolResolver};
use crate::validate::Validator;

const UNINIT: u8 = 0;
const RESOLVING: u8 = 1;
const READY: u8 = 2;
const FAILED: u8 = 3;

const NO_PRIMITIVE: u8 = u8::MAX;

/// Everything besides the genuine bindings that a sealed [`Interceptors`]
/// needs.
pub struct Collaborators<V, R> {
    pub validator: V,
    pub reporter: R,
    pub options: InterceptOptions,
}

/// Owner of the process-wide [`Interceptors`] slot.
pub struct Sequencer<V, R> {
    state: AtomicU8,
    /// `pthread_self` of the resolving thread, 0 otherwise.
    owner: AtomicUsize,
    /// Primitive currently being resolved, for hazard diagnostics.
    current: AtomicU8,
    slot: UnsafeCell<MaybeUninit<Interceptors<V, R>>>,
}

// SAFETY: the slot is written once by a single thread before READY is
// published (release) and only read after READY is observed (acquire).
unsafe impl<V: Send + Sync, R: Send + Sync> Sync for Sequencer<V, R> {}

impl<V, R> Sequencer<V, R> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            owner: AtomicUsize::new(0),
            current: AtomicU8::new(NO_PRIMITIVE),
            slot: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Whether bootstrap completed successfully.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// Whether a bootstrap attempt failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state.load(Ordering::Acquire) == FAILED
    }
}

impl<V, R> Default for Sequencer<V, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Validator + Send, R: ErrorReporter + Send> Sequencer<V, R> {
    /// Bootstrap, aborting the process with a diagnostic on failure.
    ///
    /// The first call resolves every primitive through `resolver`; later
    /// calls return the same state without touching `resolver` or
    /// `collaborators`.
    pub fn run<S, F>(&self, resolver: &mut S, collaborators: F) -> &Interceptors<V, R>
    where
        S: SymbolResolver + ?Sized,
        F: FnOnce() -> Collaborators<V, R>,
    {
        match self.try_run(resolver, collaborators) {
            Ok(interceptors) => interceptors,
            Err(err) => diag::fatal(&err),
        }
    }

    /// Bootstrap, returning the error instead of aborting.
    ///
    /// `collaborators` runs before resolution and must not call any
    /// intercepted primitive.
    pub fn try_run<S, F>(&self, resolver: &mut S, collaborators: F) -> Result<&Interceptors<V, R>, InterceptError>
    where
        S: SymbolResolver + ?Sized,
        F: FnOnce() -> Collaborators<V, R>,
    {
        loop {
            match self
                .state
                .compare_exchange(UNINIT, RESOLVING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return self.resolve(resolver, collaborators),
                // SAFETY: READY observed with acquire ordering.
                Err(READY) => return Ok(unsafe { self.ready() }),
                Err(FAILED) => return Err(InterceptError::BootstrapFailed),
                Err(_) => {
                    if self.owner.load(Ordering::Relaxed) == thread_token() {
                        return Err(self.hazard());
                    }
                    wait_while_resolving(&self.state);
                }
            }
        }
    }

    /// The sealed state, if bootstrap completed.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&Interceptors<V, R>> {
        if self.is_ready() {
            // SAFETY: READY observed with acquire ordering.
            Some(unsafe { self.ready() })
        } else {
            None
        }
    }

    /// The sealed state without a readiness branch.
    ///
    /// Debug builds verify readiness and abort with
    /// `RecursiveResolutionHazard` when called mid-bootstrap.
    ///
    /// # Safety
    ///
    /// Bootstrap must have completed successfully before the call.
    #[inline(always)]
    pub unsafe fn interceptors_unchecked(&self) -> &Interceptors<V, R> {
        #[cfg(debug_assertions)]
        {
            match self.state.load(Ordering::Acquire) {
                READY => {}
                RESOLVING => diag::fatal(&self.hazard()),
                FAILED => diag::fatal(&InterceptError::BootstrapFailed),
                _ => diag::fatal(&InterceptError::RecursiveResolutionHazard { symbol: "<uninitialized>" }),
            }
        }
        // SAFETY: the caller guarantees bootstrap completed.
        unsafe { self.ready() }
    }

    fn resolve<S, F>(&self, resolver: &mut S, collaborators: F) -> Result<&Interceptors<V, R>, InterceptError>
    where
        S: SymbolResolver + ?Sized,
        F: FnOnce() -> Collaborators<V, R>,
    {
        self.owner.store(thread_token(), Ordering::Relaxed);
        let Collaborators {
            validator,
            reporter,
            options,
        } = collaborators();

        let mut tracked = Tracked {
            inner: resolver,
            current: &self.current,
        };
        let resolved = RealSymbolTable::resolve_all(&mut tracked);
        self.current.store(NO_PRIMITIVE, Ordering::Relaxed);
        self.owner.store(0, Ordering::Relaxed);

        // Until READY is stored the exported primitives are unusable: nothing
        // on this path may move a value large enough to become a `memcpy`.
        match &resolved {
            Ok(table) => {
                // SAFETY: this thread won UNINIT -> RESOLVING, so nobody else
                // reads or writes the slot until READY is published.
                unsafe {
                    Interceptors::write_in_place(self.slot.get().cast(), table, validator, reporter, options);
                }
                self.state.store(READY, Ordering::Release);
                // SAFETY: written above.
                Ok(unsafe { self.ready() })
            }
            Err(err) => {
                self.state.store(FAILED, Ordering::Release);
                Err(*err)
            }
        }
    }

    fn hazard(&self) -> InterceptError {
        let symbol = PrimitiveId::ALL
            .get(usize::from(self.current.load(Ordering::Relaxed)))
            .map_or("<bootstrap>", |id| id.name());
        InterceptError::RecursiveResolutionHazard { symbol }
    }

    /// # Safety
    ///
    /// State must be READY.
    #[inline(always)]
    unsafe fn ready(&self) -> &Interceptors<V, R> {
        // SAFETY: READY implies the slot was initialized.
        unsafe { (*self.slot.get()).assume_init_ref() }
    }
}

impl<V, R> Drop for Sequencer<V, R> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // SAFETY: READY implies the slot was initialized; `&mut self`
            // rules out outstanding borrows.
            unsafe { self.slot.get_mut().assume_init_drop() };
        }
    }
}

/// Records which primitive is in flight before delegating.
struct Tracked<'a, S: ?Sized> {
    inner: &'a mut S,
    current: &'a AtomicU8,
}

impl<S: SymbolResolver + ?Sized> SymbolResolver for Tracked<'_, S> {
    fn strategy(&self) -> ResolverStrategy {
        self.inner.strategy()
    }

    fn resolve(&mut self, request: ResolutionRequest) -> Result<EntryPoint, InterceptError> {
        self.current.store(request.id as u8, Ordering::Relaxed);
        self.inner.resolve(request)
    }
}

fn thread_token() -> usize {
    // SAFETY: pthread_self has no preconditions.
    unsafe { libc::pthread_self() as usize }
}

fn wait_while_resolving(state: &AtomicU8) {
    let mut spins = 0u32;
    while state.load(Ordering::Acquire) == RESOLVING {
        if spins < 64 {
            std::hint::spin_loop();
            spins += 1;
        } else {
            std::thread::yield_now();
        }
    }
}
