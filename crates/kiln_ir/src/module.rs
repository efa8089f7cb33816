//! Module definitions: signals, ordered assignments, registers, memories, instances.

use crate::arena::Arena;
use crate::expr::Expr;
use crate::ids::{MemoryId, ModuleId, SignalId};
use kiln_common::{BitVec, ContentHash, Ident};
use serde::{Deserialize, Serialize};

/// The role a signal plays within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Input port; driven from outside (poke or parent binding).
    Input,
    /// Output port; driven by an assignment.
    Output,
    /// Internal net driven by assignments.
    Wire,
    /// State element driven only by its [`Register`] entry.
    Register,
}

impl SignalKind {
    /// Returns `true` for input and output ports.
    pub fn is_port(self) -> bool {
        matches!(self, SignalKind::Input | SignalKind::Output)
    }

    /// Returns `true` if an assignment may drive a signal of this kind.
    pub fn is_assignable(self) -> bool {
        matches!(self, SignalKind::Output | SignalKind::Wire)
    }
}

/// A named, fixed-width port, net, or register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal name, unique within the module.
    pub name: Ident,
    /// Width in bits.
    pub width: u32,
    /// Role of the signal.
    pub kind: SignalKind,
}

/// One entry of the ordered combinational assignment list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assign {
    /// The driven net or output.
    pub target: SignalId,
    /// The value, evaluated against the most recent values in the pass.
    pub value: Expr,
}

/// Synchronous reset of a register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reset {
    /// 1-bit reset signal; active high.
    pub signal: SignalId,
    /// Value loaded while reset is active.
    pub value: BitVec,
}

/// A clocked state element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    /// The register's signal (kind [`SignalKind::Register`]).
    pub signal: SignalId,
    /// 1-bit clock; the register commits on its rising edge.
    pub clock: SignalId,
    /// Optional synchronous reset with priority over `next`.
    pub reset: Option<Reset>,
    /// Next-state value: the prioritized rules folded into nested selects,
    /// holding the current value when no rule applies.
    pub next: Expr,
}

impl Register {
    /// Value taken after a power-on reset: the reset value, otherwise zero.
    pub fn initial_value(&self, width: u32) -> BitVec {
        self.reset
            .as_ref()
            .map(|r| r.value.clone())
            .unwrap_or_else(|| BitVec::zero(width))
    }
}

/// A clocked memory write port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritePort {
    /// 1-bit clock; writes commit on its rising edge.
    pub clock: SignalId,
    /// 1-bit write enable.
    pub enable: Expr,
    /// Word address; out-of-range writes are dropped.
    pub addr: Expr,
    /// Data; same width as the memory.
    pub data: Expr,
}

/// An addressable array of fixed-width words.
///
/// Reads are expressions ([`Expr::MemRead`]): placed in an assignment they are
/// asynchronous; placed in a register's next value they are synchronous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Memory name, unique within the module.
    pub name: Ident,
    /// Word width in bits, at most 64.
    pub width: u32,
    /// Number of words.
    pub depth: u32,
    /// Initial contents from address 0; missing words start at zero.
    pub init: Vec<u64>,
    /// Clocked write ports, applied in declaration order within an edge.
    pub write_ports: Vec<WritePort>,
}

impl Memory {
    /// Power-on contents: the init image padded to `depth`.
    pub fn initial_contents(&self) -> Vec<u64> {
        let mask = kiln_common::mask(self.width);
        let mut words: Vec<u64> = self.init.iter().map(|w| w & mask).collect();
        words.resize(self.depth as usize, 0);
        words
    }

    /// Bytes per word in bulk load/dump transfers.
    pub fn bytes_per_word(&self) -> usize {
        self.width.div_ceil(8).max(1) as usize
    }
}

/// Binds one child port to a signal of the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Name of the child port.
    pub port: Ident,
    /// Parent signal connected to it.
    pub signal: SignalId,
}

/// A named embedding of another module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance name, used as the path segment when flattening.
    pub name: Ident,
    /// The instantiated definition.
    pub module: ModuleId,
    /// Port bindings.
    pub bindings: Vec<Binding>,
    /// Index into the parent's assignment list at which the instance's
    /// logic is evaluated.
    pub position: usize,
}

/// A module definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Definition name.
    pub name: Ident,
    /// All ports, nets, and registers in declaration order.
    pub signals: Arena<SignalId, Signal>,
    /// Ordered combinational assignments.
    pub assigns: Vec<Assign>,
    /// Clocked state elements.
    pub registers: Vec<Register>,
    /// Memory blocks.
    pub memories: Arena<MemoryId, Memory>,
    /// Sub-module instances.
    pub instances: Vec<Instance>,
    /// Fingerprint of the definition's structure.
    pub content_hash: ContentHash,
}

impl Module {
    /// Iterates over ports in declaration order.
    pub fn ports(&self) -> impl Iterator<Item = (SignalId, &Signal)> {
        self.signals.iter().filter(|(_, s)| s.kind.is_port())
    }

    /// Iterates over input ports in declaration order.
    pub fn inputs(&self) -> impl Iterator<Item = (SignalId, &Signal)> {
        self.signals
            .iter()
            .filter(|(_, s)| s.kind == SignalKind::Input)
    }

    /// Finds a signal by interned name.
    pub fn find_signal(&self, name: Ident) -> Option<SignalId> {
        self.signals
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(id, _)| id)
    }

    /// Finds a memory by interned name.
    pub fn find_memory(&self, name: Ident) -> Option<MemoryId> {
        self.memories
            .iter()
            .find(|(_, m)| m.name == name)
            .map(|(id, _)| id)
    }

    /// Returns the register entry driving `signal`, if any.
    pub fn register_for(&self, signal: SignalId) -> Option<&Register> {
        self.registers.iter().find(|r| r.signal == signal)
    }

    /// Distinct clock signals used by registers and write ports, in first-use order.
    pub fn clocks(&self) -> Vec<SignalId> {
        let mut clocks = Vec::new();
        let used = self
            .registers
            .iter()
            .map(|r| r.clock)
            .chain(self.memories.values().flat_map(|m| m.write_ports.iter().map(|p| p.clock)));
        for clock in used {
            if !clocks.contains(&clock) {
                clocks.push(clock);
            }
        }
        clocks
    }

    /// Returns `true` if the module has no sub-instances.
    pub fn is_flat(&self) -> bool {
        self.instances.is_empty()
    }

    /// Recomputes the structural fingerprint from everything except the hash itself.
    pub fn compute_hash(&self) -> ContentHash {
        let parts = [
            serde_json::to_vec(&self.name),
            serde_json::to_vec(&self.signals),
            serde_json::to_vec(&self.assigns),
            serde_json::to_vec(&self.registers),
            serde_json::to_vec(&self.memories),
            serde_json::to_vec(&self.instances),
        ];
        let bytes: Vec<Vec<u8>> = parts.into_iter().map(|p| p.unwrap_or_default()).collect();
        ContentHash::from_parts(bytes.iter().map(Vec::as_slice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(width: u32, depth: u32, init: Vec<u64>) -> Memory {
        Memory {
            name: Ident::from_raw(0),
            width,
            depth,
            init,
            write_ports: Vec::new(),
        }
    }

    #[test]
    fn signal_kind_predicates() {
        assert!(SignalKind::Input.is_port());
        assert!(!SignalKind::Register.is_port());
        assert!(SignalKind::Wire.is_assignable());
        assert!(!SignalKind::Input.is_assignable());
        assert!(!SignalKind::Register.is_assignable());
    }

    #[test]
    fn memory_initial_contents_pad_and_mask() {
        let m = memory(4, 4, vec![0x1f, 2]);
        assert_eq!(m.initial_contents(), vec![0xf, 2, 0, 0]);
    }

    #[test]
    fn bytes_per_word_rounds_up() {
        assert_eq!(memory(8, 1, vec![]).bytes_per_word(), 1);
        assert_eq!(memory(9, 1, vec![]).bytes_per_word(), 2);
        assert_eq!(memory(64, 1, vec![]).bytes_per_word(), 8);
    }

    #[test]
    fn register_initial_value_defaults_to_zero() {
        let reg = Register {
            signal: SignalId::from_raw(0),
            clock: SignalId::from_raw(1),
            reset: None,
            next: Expr::lit(0, 4),
        };
        assert_eq!(reg.initial_value(4), BitVec::zero(4));
    }
}
