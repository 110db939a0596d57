use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::OperatorName;

/// Argument and result stack a kernel operates on. Its contents are opaque to the
/// registry.
pub type Stack = Vec<Box<dyn Any + Send>>;

type KernelBody = dyn Fn(&OperatorName, &mut Stack) + Send + Sync;

/// A kernel: either a callable body or a trivial pass-through.
///
/// A pass-through ("fallthrough") kernel performs no work of its own and defers
/// resolution to whatever applies next. Cloning is cheap; clones share the body.
#[derive(Clone)]
pub struct KernelFunction {
	body: Option<Arc<KernelBody>>,
}

impl KernelFunction {
	pub fn from_fn<F>(f: F) -> Self
	where
		F: Fn(&OperatorName, &mut Stack) + Send + Sync + 'static,
	{
		Self {
			body: Some(Arc::new(f)),
		}
	}

	pub fn fallthrough() -> Self {
		Self { body: None }
	}

	pub fn is_fallthrough(&self) -> bool {
		self.body.is_none()
	}

	/// Invokes the kernel body.
	///
	/// # Panics
	///
	/// Panics when called on a pass-through kernel. Dispatch must skip those.
	pub fn call(&self, op: &OperatorName, stack: &mut Stack) {
		match &self.body {
			Some(body) => body(op, stack),
			None => panic!("fallthrough kernel for {op} was invoked directly"),
		}
	}

	/// True if both handles share the same body. Two pass-throughs compare equal.
	pub fn same_body(&self, other: &Self) -> bool {
		match (&self.body, &other.body) {
			(Some(a), Some(b)) => Arc::ptr_eq(a, b),
			(None, None) => true,
			_ => false,
		}
	}
}

impl fmt::Debug for KernelFunction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_fallthrough() {
			f.write_str("KernelFunction(fallthrough)")
		} else {
			f.write_str("KernelFunction(boxed)")
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn boxed_kernel_sees_operator_and_stack() {
		let kernel = KernelFunction::from_fn(|op, stack| {
			let a = *stack[0].downcast_ref::<i64>().unwrap();
			let b = *stack[1].downcast_ref::<i64>().unwrap();
			stack.clear();
			stack.push(Box::new(format!("{op}={}", a + b)));
		});
		let mut stack: Stack = vec![Box::new(2i64), Box::new(3i64)];
		kernel.call(&OperatorName::new("pkg::add", ""), &mut stack);
		assert_eq!(stack[0].downcast_ref::<String>().unwrap(), "pkg::add=5");
		assert!(!kernel.is_fallthrough());
	}

	#[test]
	fn clones_share_the_body() {
		let kernel = KernelFunction::from_fn(|_, _| {});
		let other = KernelFunction::from_fn(|_, _| {});
		assert!(kernel.same_body(&kernel.clone()));
		assert!(!kernel.same_body(&other));
		assert!(KernelFunction::fallthrough().same_body(&KernelFunction::fallthrough()));
	}

	#[test]
	#[should_panic(expected = "fallthrough kernel")]
	fn calling_fallthrough_panics() {
		KernelFunction::fallthrough().call(&OperatorName::new("pkg::add", ""), &mut Vec::new());
	}
}
