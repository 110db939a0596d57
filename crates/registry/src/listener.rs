use crate::dispatcher::OperatorRef;

/// Observer of operator definitions coming and going.
///
/// Callbacks run synchronously while the dispatcher holds its writer lock.
/// Lookups from inside a callback are fine; registering, releasing or adding
/// listeners from inside a callback deadlocks.
pub trait OpRegistrationListener: Send + Sync {
	/// An operator gained its first live definition. The schema is attached.
	fn on_operator_registered(&self, op: &OperatorRef);

	/// An operator lost its last live definition.
	///
	/// The view already reflects the release (`def_count() == 0`) but still
	/// carries the schema for the duration of the call. Lookups through the
	/// dispatcher observe the state from before the release until the callback
	/// returns.
	fn on_operator_deregistered(&self, op: &OperatorRef);
}

#[derive(Default)]
pub(crate) struct ListenerList {
	listeners: Vec<Box<dyn OpRegistrationListener>>,
}

impl ListenerList {
	pub(crate) fn push(&mut self, listener: Box<dyn OpRegistrationListener>) {
		self.listeners.push(listener);
	}

	pub(crate) fn len(&self) -> usize {
		self.listeners.len()
	}

	pub(crate) fn call_on_operator_registered(&self, op: &OperatorRef) {
		for listener in &self.listeners {
			listener.on_operator_registered(op);
		}
	}

	pub(crate) fn call_on_operator_deregistered(&self, op: &OperatorRef) {
		for listener in &self.listeners {
			listener.on_operator_deregistered(op);
		}
	}
}
