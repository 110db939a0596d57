//! Random register/release sequences checked against a plain bookkeeping model.

use opdispatch_primitives::{
	DispatchKey, DispatchKeySet, FunctionSchema, KernelFunction, OperatorName, SchemaArgument,
};
use opdispatch_registry::{DispatchError, Dispatcher, DispatcherConfig, RegistrationHandle};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use proptest::sample::Index;
use rstest::rstest;

const OPS: [&str; 3] = ["pkg::add", "pkg::sub", "pkg::mul"];
const KEYS: [DispatchKey; 3] = [DispatchKey::CPU, DispatchKey::CUDA, DispatchKey::Autograd];
const TYPES: [&str; 2] = ["Int", "Float"];

#[derive(Debug, Clone)]
enum Step {
	Def { op: usize, ty: usize },
	Impl { op: usize, key: Option<usize>, fallthrough: bool },
	Fallback { key: usize, fallthrough: bool },
	Release(Index),
}

#[derive(Debug, Clone, Copy)]
enum Tracked {
	Def(usize),
	Impl(usize),
	Fallback(usize),
}

#[derive(Debug, Default)]
struct OpModel {
	defs: usize,
	impls: usize,
	ty: Option<usize>,
}

#[derive(Default)]
struct Model {
	ops: [OpModel; OPS.len()],
	/// Per key: `Some(is_fallthrough)` while a fallback is installed.
	fallbacks: [Option<bool>; KEYS.len()],
	live: Vec<(RegistrationHandle, Tracked)>,
}

fn name(op: usize) -> OperatorName {
	OperatorName::new(OPS[op], "")
}

fn schema(op: usize, ty: usize) -> FunctionSchema {
	FunctionSchema::new(name(op), [SchemaArgument::named("x", TYPES[ty])], [SchemaArgument::new(TYPES[ty])])
}

fn kernel(fallthrough: bool) -> KernelFunction {
	if fallthrough {
		KernelFunction::fallthrough()
	} else {
		KernelFunction::from_fn(|_, _| {})
	}
}

fn step() -> impl Strategy<Value = Step> {
	prop_oneof![
		3 => (0..OPS.len(), 0..TYPES.len()).prop_map(|(op, ty)| Step::Def { op, ty }),
		3 => (0..OPS.len(), proptest::option::of(0..KEYS.len()), any::<bool>())
			.prop_map(|(op, key, fallthrough)| Step::Impl { op, key, fallthrough }),
		1 => (0..KEYS.len(), any::<bool>())
			.prop_map(|(key, fallthrough)| Step::Fallback { key, fallthrough }),
		4 => any::<Index>().prop_map(Step::Release),
	]
}

impl Model {
	fn apply(&mut self, d: &Dispatcher, step: Step) -> Result<(), TestCaseError> {
		match step {
			Step::Def { op, ty } => {
				let result = d.register_def(schema(op, ty));
				let model = &mut self.ops[op];
				match model.ty {
					Some(stored) if stored != ty => {
						prop_assert!(matches!(result, Err(DispatchError::SchemaConflict { .. })), "expected SchemaConflict, got {:?}", result);
					}
					_ => {
						let token = result.map_err(|e| TestCaseError::fail(e.to_string()))?;
						model.defs += 1;
						model.ty = Some(ty);
						self.live.push((token, Tracked::Def(op)));
					}
				}
			}
			Step::Impl { op, key, fallthrough } => {
				let token = d.register_impl(name(op), key.map(|k| KEYS[k]), kernel(fallthrough), None, "model");
				self.ops[op].impls += 1;
				self.live.push((token, Tracked::Impl(op)));
			}
			Step::Fallback { key, fallthrough } => {
				let result = d.register_fallback(KEYS[key], kernel(fallthrough));
				if self.fallbacks[key].is_some() {
					prop_assert!(matches!(result, Err(DispatchError::DuplicateFallback { .. })), "expected DuplicateFallback, got {:?}", result);
				} else {
					let token = result.map_err(|e| TestCaseError::fail(e.to_string()))?;
					self.fallbacks[key] = Some(fallthrough);
					self.live.push((token, Tracked::Fallback(key)));
				}
			}
			Step::Release(index) => {
				if self.live.is_empty() {
					return Ok(());
				}
				let (token, tracked) = self.live.swap_remove(index.index(self.live.len()));
				self.forget(tracked);
				d.release(token);
			}
		}
		Ok(())
	}

	fn forget(&mut self, tracked: Tracked) {
		match tracked {
			Tracked::Def(op) => {
				let model = &mut self.ops[op];
				model.defs -= 1;
				if model.defs == 0 {
					model.ty = None;
				}
			}
			Tracked::Impl(op) => self.ops[op].impls -= 1,
			Tracked::Fallback(key) => self.fallbacks[key] = None,
		}
	}

	fn check(&self, d: &Dispatcher) -> Result<(), TestCaseError> {
		for (op, model) in self.ops.iter().enumerate() {
			let Some(op_ref) = d.find_operator(&name(op)) else {
				prop_assert_eq!(model.defs + model.impls, 0, "{} missing", OPS[op]);
				continue;
			};
			prop_assert_eq!(op_ref.def_count(), model.defs);
			prop_assert_eq!(op_ref.def_and_impl_count(), model.defs + model.impls);
			prop_assert_eq!(op_ref.has_schema(), model.defs > 0);
			prop_assert_eq!(d.find_schema(&name(op)).is_some(), model.defs > 0);
			if let (Some(schema), Some(ty)) = (op_ref.schema(), model.ty) {
				prop_assert_eq!(schema.arguments()[0].ty(), TYPES[ty]);
			}
		}
		let mask = d.backends_without_fallthrough();
		for (key, fallback) in KEYS.iter().zip(&self.fallbacks) {
			prop_assert_eq!(mask.has(*key), *fallback != Some(true), "mask for {}", key);
		}
		prop_assert_eq!(d.len(), self.ops.iter().filter(|m| m.defs + m.impls > 0).count());
		Ok(())
	}

	fn drain(&mut self, d: &Dispatcher) {
		while let Some((token, tracked)) = self.live.pop() {
			self.forget(tracked);
			d.release(token);
		}
	}
}

fn verified() -> Dispatcher {
	let mut config = DispatcherConfig::default().with_label("model");
	config.verify_invariants = true;
	Dispatcher::with_config(config)
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(128))]

	#[test]
	fn registry_tracks_model(steps in proptest::collection::vec(step(), 1..120)) {
		let d = verified();
		let mut model = Model::default();
		for step in steps {
			model.apply(&d, step)?;
			model.check(&d)?;
		}
		model.drain(&d);
		model.check(&d)?;
		prop_assert!(d.is_empty());
		prop_assert_eq!(d.backends_without_fallthrough(), DispatchKeySet::FULL);
		d.check_invariants();
	}
}

#[rstest]
#[case(0, 1)]
#[case(1, 0)]
fn conflicting_types_reject_until_all_released(#[case] first: usize, #[case] second: usize) {
	let d = verified();
	let def = d.register_def(schema(0, first)).unwrap();
	assert!(matches!(d.register_def(schema(0, second)), Err(DispatchError::SchemaConflict { .. })));
	d.release(def);

	let def = d.register_def(schema(0, second)).unwrap();
	assert_eq!(
		d.find_operator(&name(0)).unwrap().schema().unwrap().arguments()[0].ty(),
		TYPES[second]
	);
	d.release(def);
	assert!(d.is_empty());
}
