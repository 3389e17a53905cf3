//! # memguard-abi
//!
//! C ABI surface of the memguard interception layer: the exported dispatch
//! functions, the build-selected platform resolver, the code patcher behind
//! the trampoline strategy, and the process bootstrap.
//!
//! Built as a `cdylib` for preloading, or linked as an `rlib` into a runtime
//! that calls [`bootstrap::bootstrap`] (or `memguard_bootstrap`) itself.

pub mod bootstrap;
pub mod env;
pub mod reporter;
pub mod resolve;
pub mod string_abi;
pub mod trampoline;

pub use bootstrap::{
    ProcessInterceptors, bootstrap, memguard_bootstrap, process_interceptors, register_collaborators, try_bootstrap,
};
pub use reporter::StderrReporter;
pub use resolve::{DynamicResolver, PlatformResolver, TrampolineResolver};
pub use trampoline::Patcher;
