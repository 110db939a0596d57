//! Release-once registration tokens.
//!
//! Every registration call returns a [`RegistrationHandle`]. Passing it to
//! [`Dispatcher::release`](crate::Dispatcher::release) reverses exactly that
//! registration. Release consumes the handle, so it cannot run twice.
//!
//! Tokens must be released before their dispatcher is dropped. A token dropped
//! without release leaks its registration; the dispatcher logs a warning but keeps
//! the registration alive.

use opdispatch_primitives::{DispatchKey, OperatorName};

use crate::dispatcher::{DispatcherId, OperatorHandle};
use crate::entry::KernelId;

/// What a [`RegistrationHandle`] reverses on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
	/// A schema attached by `register_def`.
	Def,
	/// A kernel attached by `register_impl`.
	Impl,
	/// A backend fallback attached by `register_fallback`.
	Fallback,
}

#[derive(Debug)]
pub(crate) enum Registration {
	Def {
		op: OperatorHandle,
		name: OperatorName,
	},
	Impl {
		op: OperatorHandle,
		name: OperatorName,
		key: Option<DispatchKey>,
		kernel: KernelId,
	},
	Fallback {
		key: DispatchKey,
	},
}

impl Registration {
	fn kind(&self) -> RegistrationKind {
		match self {
			Self::Def { .. } => RegistrationKind::Def,
			Self::Impl { .. } => RegistrationKind::Impl,
			Self::Fallback { .. } => RegistrationKind::Fallback,
		}
	}
}

/// Pending deregistration obligation for one registration.
#[derive(Debug)]
#[must_use = "dropping a RegistrationHandle without releasing it leaks the registration"]
pub struct RegistrationHandle {
	owner: DispatcherId,
	registration: Option<Registration>,
}

impl RegistrationHandle {
	pub(crate) fn new(owner: DispatcherId, registration: Registration) -> Self {
		Self {
			owner,
			registration: Some(registration),
		}
	}

	pub fn kind(&self) -> RegistrationKind {
		match &self.registration {
			Some(registration) => registration.kind(),
			None => unreachable!("registration handle used after release"),
		}
	}

	/// Operator this registration targets. `None` for backend fallbacks.
	pub fn operator_name(&self) -> Option<&OperatorName> {
		match self.registration.as_ref()? {
			Registration::Def { name, .. } | Registration::Impl { name, .. } => Some(name),
			Registration::Fallback { .. } => None,
		}
	}

	/// Backend tag of a kernel or fallback registration. `None` for definitions
	/// and catch-all kernels.
	pub fn dispatch_key(&self) -> Option<DispatchKey> {
		match self.registration.as_ref()? {
			Registration::Impl { key, .. } => *key,
			Registration::Fallback { key } => Some(*key),
			Registration::Def { .. } => None,
		}
	}

	/// Releases this registration. Equivalent to `dispatcher.release(self)`.
	pub fn release(self, dispatcher: &crate::Dispatcher) {
		dispatcher.release(self);
	}

	pub(crate) fn owner(&self) -> DispatcherId {
		self.owner
	}

	pub(crate) fn take(&mut self) -> Option<Registration> {
		self.registration.take()
	}
}

impl Drop for RegistrationHandle {
	fn drop(&mut self) {
		if let Some(registration) = &self.registration {
			tracing::warn!(
				kind = ?registration.kind(),
				registration = ?registration,
				"registration handle dropped without release; registration leaked"
			);
		}
	}
}
