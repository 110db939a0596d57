//! Operator dispatch registry.
//!
//! Independently loaded components register operator definitions (a
//! [`FunctionSchema`](opdispatch_primitives::FunctionSchema)) and, separately,
//! backend-specific kernels for those operators. A lookup by operator name plus
//! backend tag yields the kernel to invoke, falling back to a per-backend fallback
//! kernel or the operator's catch-all kernel.
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`Dispatcher`] | The registry: registration, release, lookup, invariants. |
//! | [`RegistrationHandle`] | Release-once token returned by every registration. |
//! | [`OperatorHandle`] | Generation-checked operator reference, cheap to copy. |
//! | [`OperatorRef`] | Pinned view of an operator for inspection and dispatch. |
//! | [`OpRegistrationListener`] | Observer of definitions coming and going. |
//!
//! # Concurrency
//!
//! - **Reads:** lock-free, against an atomically published snapshot.
//! - **Writes:** serialized on a single writer lock; linearizable.
//!
//! A process normally creates one dispatcher at its entry point and passes it by
//! reference to every registration site. Nothing here is global, so tests can run
//! any number of isolated instances.

pub mod config;
pub mod dispatcher;
mod entry;
pub mod error;
mod fallback;
pub mod listener;
pub mod token;

pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, OperatorHandle, OperatorRef};
pub use error::{ConfigError, DispatchError, UnresolvedDispatch};
pub use listener::OpRegistrationListener;
pub use token::{RegistrationHandle, RegistrationKind};
