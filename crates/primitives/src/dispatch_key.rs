//! Backend tags and the bitset over them.
//!
//! [`DispatchKey`] is the enumerable universe of tags. Declaration order is
//! priority order: a later variant takes precedence over an earlier one when a
//! caller picks the key to dispatch on. [`DispatchKey::Undefined`] marks a call
//! that carried no backend-taggable arguments and has no bit in [`DispatchKeySet`].

use strum::{EnumCount, IntoEnumIterator};

/// A backend tag that selects among an operator's kernels.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	strum_macros::Display,
	strum_macros::EnumCount,
	strum_macros::EnumIter,
	strum_macros::EnumString,
	strum_macros::IntoStaticStr,
)]
pub enum DispatchKey {
	/// No backend-taggable argument was supplied.
	Undefined,
	CPU,
	CUDA,
	HIP,
	XLA,
	MPS,
	Meta,
	QuantizedCPU,
	SparseCPU,
	PrivateUse1,
	BackendSelect,
	Named,
	Autograd,
	Tracer,
	Autocast,
	Batched,
	VmapMode,
}

bitflags::bitflags! {
	/// A set of backend tags.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct DispatchKeySet: u64 {
		const CPU = 1 << 0;
		const CUDA = 1 << 1;
		const HIP = 1 << 2;
		const XLA = 1 << 3;
		const MPS = 1 << 4;
		const META = 1 << 5;
		const QUANTIZED_CPU = 1 << 6;
		const SPARSE_CPU = 1 << 7;
		const PRIVATE_USE1 = 1 << 8;
		const BACKEND_SELECT = 1 << 9;
		const NAMED = 1 << 10;
		const AUTOGRAD = 1 << 11;
		const TRACER = 1 << 12;
		const AUTOCAST = 1 << 13;
		const BATCHED = 1 << 14;
		const VMAP_MODE = 1 << 15;
	}
}

impl DispatchKey {
	/// Number of tags, including [`DispatchKey::Undefined`].
	pub const NUM_KEYS: usize = Self::COUNT;

	/// Dense index of this tag, usable for fixed-size tables.
	#[inline]
	pub const fn index(self) -> usize {
		self as usize
	}

	/// Returns the single-bit set for this tag. `Undefined` maps to the empty set.
	pub const fn as_set(self) -> DispatchKeySet {
		match self {
			Self::Undefined => DispatchKeySet::empty(),
			Self::CPU => DispatchKeySet::CPU,
			Self::CUDA => DispatchKeySet::CUDA,
			Self::HIP => DispatchKeySet::HIP,
			Self::XLA => DispatchKeySet::XLA,
			Self::MPS => DispatchKeySet::MPS,
			Self::Meta => DispatchKeySet::META,
			Self::QuantizedCPU => DispatchKeySet::QUANTIZED_CPU,
			Self::SparseCPU => DispatchKeySet::SPARSE_CPU,
			Self::PrivateUse1 => DispatchKeySet::PRIVATE_USE1,
			Self::BackendSelect => DispatchKeySet::BACKEND_SELECT,
			Self::Named => DispatchKeySet::NAMED,
			Self::Autograd => DispatchKeySet::AUTOGRAD,
			Self::Tracer => DispatchKeySet::TRACER,
			Self::Autocast => DispatchKeySet::AUTOCAST,
			Self::Batched => DispatchKeySet::BATCHED,
			Self::VmapMode => DispatchKeySet::VMAP_MODE,
		}
	}

	/// Iterates every tag in priority order, lowest first.
	pub fn all() -> impl Iterator<Item = DispatchKey> {
		Self::iter()
	}
}

impl From<DispatchKey> for DispatchKeySet {
	fn from(key: DispatchKey) -> Self {
		key.as_set()
	}
}

impl FromIterator<DispatchKey> for DispatchKeySet {
	fn from_iter<I: IntoIterator<Item = DispatchKey>>(iter: I) -> Self {
		let mut set = DispatchKeySet::empty();
		for key in iter {
			set |= key.as_set();
		}
		set
	}
}

impl DispatchKeySet {
	/// Every representable tag.
	pub const FULL: Self = Self::all();

	/// Returns true if `key` is in the set. `Undefined` is never a member.
	#[inline]
	pub const fn has(self, key: DispatchKey) -> bool {
		let bit = key.as_set();
		!bit.is_empty() && self.contains(bit)
	}

	#[inline]
	#[must_use]
	pub const fn added(self, key: DispatchKey) -> Self {
		self.union(key.as_set())
	}

	#[inline]
	#[must_use]
	pub const fn removed(self, key: DispatchKey) -> Self {
		self.difference(key.as_set())
	}

	/// Iterates the member tags in priority order, lowest first.
	pub fn keys(self) -> impl Iterator<Item = DispatchKey> {
		DispatchKey::iter().filter(move |key| self.has(*key))
	}

	/// Highest-priority member, or `Undefined` for the empty set.
	pub fn highest_priority_key(self) -> DispatchKey {
		self.keys().last().unwrap_or(DispatchKey::Undefined)
	}
}
