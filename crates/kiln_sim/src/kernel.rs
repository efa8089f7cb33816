//! The evaluation seam shared by the in-process backends.
//!
//! A [`Kernel`] owns one session's mutable state and knows how to evaluate
//! the netlist's expressions against it. The edge algorithm that drives a
//! kernel lives in [`Session`](crate::Session), so every kernel gets the same
//! settle, edge-detection, and atomic-commit behavior.

use kiln_common::BitVec;
use kiln_ir::{MemoryId, Netlist, SignalId};

use crate::error::SimError;

/// Mutable state of one session: a value per slot plus memory contents.
///
/// Slots `0..signals` hold signal values indexed by [`SignalId`]; kernels may
/// append scratch slots after them.
#[derive(Debug, Clone)]
pub struct SimState<V> {
    /// Slot values.
    pub values: Vec<V>,
    /// Contents of every memory, indexed by [`MemoryId`], one masked word per entry.
    pub memories: Vec<Vec<u64>>,
}

impl<V: Clone> SimState<V> {
    /// Zeroed state for `netlist` with `scratch` extra slots.
    pub fn zeroed(netlist: &Netlist, scratch: usize, zero: impl Fn(u32) -> V) -> Self {
        let module = netlist.module();
        let mut values: Vec<V> = module.signals.values().map(|s| zero(s.width)).collect();
        values.extend(std::iter::repeat(zero(64)).take(scratch));
        let memories = module
            .memories
            .values()
            .map(|m| vec![0; m.depth as usize])
            .collect();
        Self { values, memories }
    }

    /// Replaces every memory with its initial image and every slot with `zero`.
    pub fn clear(&mut self, netlist: &Netlist, zero: impl Fn(u32) -> V) {
        let module = netlist.module();
        let widths: Vec<u32> = module.signals.values().map(|s| s.width).collect();
        for (slot, value) in self.values.iter_mut().enumerate() {
            *value = zero(widths.get(slot).copied().unwrap_or(64));
        }
        for (words, mem) in self.memories.iter_mut().zip(module.memories.values()) {
            *words = mem.initial_contents();
        }
    }
}

/// Expression evaluation over one session's state.
///
/// Sampling methods read state without committing anything; the caller
/// commits sampled values only after every sample of an edge round succeeded.
pub trait Kernel {
    /// The per-slot value representation.
    type Value: Clone;

    /// The netlist being simulated.
    fn netlist(&self) -> &Netlist;

    /// One ordered pass over the assignment list.
    fn settle(&mut self) -> Result<(), SimError>;

    /// Evaluates register `index`'s next-state expression.
    fn sample_register(&mut self, index: usize) -> Result<Self::Value, SimError>;

    /// Register `index`'s reset value, or zero without a reset.
    fn reset_value(&self, index: usize) -> Self::Value;

    /// Evaluates a write port; `Some((addr, data))` when its enable is set.
    fn sample_write(&mut self, memory: MemoryId, port: usize)
        -> Result<Option<(u64, u64)>, SimError>;

    /// Stores a sampled value into a signal.
    fn commit(&mut self, signal: SignalId, value: Self::Value);

    /// Low bit of a signal, as used by edge detection.
    fn level(&self, signal: SignalId) -> bool;

    /// Current value of a signal.
    fn read(&self, signal: SignalId) -> BitVec;

    /// Overwrites a signal, truncating or extending to its width.
    fn write(&mut self, signal: SignalId, value: &BitVec);

    /// Contents of a memory.
    fn memory(&self, memory: MemoryId) -> &[u64];

    /// Mutable contents of a memory.
    fn memory_mut(&mut self, memory: MemoryId) -> &mut [u64];

    /// Zeroes every signal and reloads every memory's initial image.
    fn clear(&mut self);
}
