//! # memguard-core
//!
//! Platform-independent half of the memguard interception layer: the five
//! intercepted primitives, the write-once table of genuine bindings, the
//! resolver capability, the validator and reporter contracts, and the
//! validate-then-delegate dispatch logic.
//!
//! Nothing in this crate exports C symbols. `memguard-abi` owns the
//! `extern "C"` surface, the platform resolvers and the process bootstrap.

pub mod binding;
pub mod diag;
pub mod dispatch;
pub mod error;
pub mod options;
pub mod primitive;
pub mod raw;
pub mod report;
pub mod resolver;
pub mod sequencer;
pub mod validate;

pub use binding::{EntryPoint, RealBinding, RealSymbolTable};
pub use dispatch::Interceptors;
pub use error::{InterceptError, PatchError};
pub use options::InterceptOptions;
pub use primitive::PrimitiveId;
pub use report::{Decision, ErrorReporter, StackTrace, ViolationReport};
pub use resolver::{FixedResolver, ResolutionRequest, ResolverStrategy, SymbolResolver};
pub use sequencer::{Collaborators, Sequencer};
pub use validate::{AccessKind, AccessRange, BasicValidator, RangeCheck, Validator, Violation, ViolationKind};
