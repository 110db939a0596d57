//! Value types shared by the operator dispatch registry and its collaborators.
//!
//! Nothing in this crate holds registry state. These are the identity, tagging,
//! signature and kernel vocabulary that registration sites and the dispatcher
//! exchange.
//!
//! | Type | Role |
//! |------|------|
//! | [`OperatorName`] | Base name plus overload discriminator, the lookup key. |
//! | [`DispatchKey`] / [`DispatchKeySet`] | Backend tags and the bitset over them. |
//! | [`FunctionSchema`] | Signature and alias-analysis metadata of a definition. |
//! | [`KernelFunction`] | Opaque callable or trivial pass-through marker. |

pub mod dispatch_key;
pub mod kernel;
pub mod operator_name;
pub mod schema;

pub use dispatch_key::{DispatchKey, DispatchKeySet};
pub use kernel::{KernelFunction, Stack};
pub use operator_name::{OperatorName, ParseOperatorNameError};
pub use schema::{AliasAnalysisKind, FunctionSchema, SchemaArgument};
