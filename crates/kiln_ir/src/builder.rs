//! Explicit builder for module definitions.
//!
//! A [`ModuleBuilder`] collects ports, nets, registers, memories, and
//! instances for one definition and turns them into an immutable, checked
//! [`Module`]. Its state is local to the definition being built.
//!
//! Conditional writes keep imperative "last write wins" meaning: every write
//! to a combinational target is folded, in declaration order, into one nested
//! select, placed in the assignment list at the target's last write. Register
//! rules fold the other way round: the first declared matching condition wins,
//! and a register with no matching rule holds its value.

use std::collections::HashMap;

use kiln_common::{BitVec, ContentHash, NameTable};

use crate::arena::Arena;
use crate::check::check_module;
use crate::error::IrError;
use crate::expr::Expr;
use crate::ids::{MemoryId, ModuleId, SignalId};
use crate::module::{
    Assign, Binding, Instance, Memory, Module, Register, Reset, Signal, SignalKind, WritePort,
};

enum Item {
    Write {
        target: SignalId,
        cond: Option<Expr>,
        value: Expr,
    },
    Instance {
        name: String,
        module: ModuleId,
        bindings: Vec<(String, SignalId)>,
    },
}

struct RegisterDraft {
    signal: SignalId,
    clock: SignalId,
    reset: Option<(SignalId, BitVec)>,
    rules: Vec<(Option<Expr>, Expr)>,
}

struct MemoryDraft {
    name: String,
    width: u32,
    depth: u32,
    init: Vec<u64>,
    write_ports: Vec<WritePort>,
}

/// Builds one module definition.
pub struct ModuleBuilder {
    name: String,
    signals: Vec<(String, u32, SignalKind)>,
    items: Vec<Item>,
    registers: Vec<RegisterDraft>,
    register_index: HashMap<SignalId, usize>,
    memories: Vec<MemoryDraft>,
    errors: Vec<IrError>,
}

impl ModuleBuilder {
    /// Starts a definition called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signals: Vec::new(),
            items: Vec::new(),
            registers: Vec::new(),
            register_index: HashMap::new(),
            memories: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Returns the definition name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn add_signal(&mut self, name: &str, width: u32, kind: SignalKind) -> SignalId {
        let id = SignalId::from_raw(self.signals.len() as u32);
        self.signals.push((name.to_string(), width, kind));
        id
    }

    /// Declares an input port.
    pub fn input(&mut self, name: &str, width: u32) -> SignalId {
        self.add_signal(name, width, SignalKind::Input)
    }

    /// Declares an output port.
    pub fn output(&mut self, name: &str, width: u32) -> SignalId {
        self.add_signal(name, width, SignalKind::Output)
    }

    /// Declares an internal net.
    pub fn wire(&mut self, name: &str, width: u32) -> SignalId {
        self.add_signal(name, width, SignalKind::Wire)
    }

    /// Declares a register clocked by the rising edge of `clock`.
    pub fn register(&mut self, name: &str, width: u32, clock: SignalId) -> SignalId {
        let id = self.add_signal(name, width, SignalKind::Register);
        self.register_index.insert(id, self.registers.len());
        self.registers.push(RegisterDraft {
            signal: id,
            clock,
            reset: None,
            rules: Vec::new(),
        });
        id
    }

    /// Returns the width of a declared signal, or 0 for an unknown ID.
    pub fn width(&self, id: SignalId) -> u32 {
        self.signals
            .get(id.as_raw() as usize)
            .map(|(_, w, _)| *w)
            .unwrap_or(0)
    }

    /// Returns a reference expression for a declared signal.
    pub fn sig(&self, id: SignalId) -> Expr {
        Expr::signal(id, self.width(id))
    }

    fn draft(&mut self, reg: SignalId, what: &str) -> Option<&mut RegisterDraft> {
        match self.register_index.get(&reg) {
            Some(&index) => Some(&mut self.registers[index]),
            None => {
                let name = self
                    .signals
                    .get(reg.as_raw() as usize)
                    .map(|(n, _, _)| n.clone())
                    .unwrap_or_else(|| format!("#{}", reg.as_raw()));
                self.errors.push(IrError::InvalidDriver {
                    name,
                    reason: format!("{what} applies only to registers"),
                });
                None
            }
        }
    }

    /// Gives `reg` a synchronous, active-high reset to `value`.
    pub fn reset(&mut self, reg: SignalId, signal: SignalId, value: u64) {
        let width = self.width(reg);
        if let Some(draft) = self.draft(reg, "reset") {
            draft.reset = Some((signal, BitVec::from_u64(value, width)));
        }
    }

    /// Adds an unconditional next-state rule. Later rules never apply after it.
    pub fn next(&mut self, reg: SignalId, value: Expr) {
        if let Some(draft) = self.draft(reg, "next") {
            draft.rules.push((None, value));
        }
    }

    /// Adds a conditional next-state rule with lower priority than earlier rules.
    pub fn next_when(&mut self, reg: SignalId, cond: Expr, value: Expr) {
        if let Some(draft) = self.draft(reg, "next_when") {
            draft.rules.push((Some(cond), value));
        }
    }

    /// Drives a net or output, overriding earlier writes to it.
    pub fn assign(&mut self, target: SignalId, value: Expr) {
        self.items.push(Item::Write {
            target,
            cond: None,
            value,
        });
    }

    /// Drives a net or output when `cond` holds, overriding earlier writes.
    pub fn assign_when(&mut self, target: SignalId, cond: Expr, value: Expr) {
        self.items.push(Item::Write {
            target,
            cond: Some(cond),
            value,
        });
    }

    /// Declares a memory of `depth` words of `width` bits.
    pub fn memory(&mut self, name: &str, width: u32, depth: u32) -> MemoryId {
        let id = MemoryId::from_raw(self.memories.len() as u32);
        self.memories.push(MemoryDraft {
            name: name.to_string(),
            width,
            depth,
            init: Vec::new(),
            write_ports: Vec::new(),
        });
        id
    }

    /// Sets the power-on contents of a memory, starting at address 0.
    pub fn memory_init(&mut self, mem: MemoryId, words: &[u64]) {
        if let Some(draft) = self.memories.get_mut(mem.as_raw() as usize) {
            draft.init = words.to_vec();
        }
    }

    /// Adds a clocked write port.
    pub fn write_port(
        &mut self,
        mem: MemoryId,
        clock: SignalId,
        enable: Expr,
        addr: Expr,
        data: Expr,
    ) {
        if let Some(draft) = self.memories.get_mut(mem.as_raw() as usize) {
            draft.write_ports.push(WritePort {
                clock,
                enable,
                addr,
                data,
            });
        }
    }

    /// Returns an asynchronous read of `mem` at `addr`.
    pub fn read(&self, mem: MemoryId, addr: Expr) -> Expr {
        let width = self
            .memories
            .get(mem.as_raw() as usize)
            .map(|m| m.width)
            .unwrap_or(0);
        Expr::mem_read(mem, addr, width)
    }

    /// Instantiates `module`, binding child port names to signals of this module.
    ///
    /// The child's logic is evaluated at this point of the assignment order.
    pub fn instance(&mut self, name: &str, module: ModuleId, bindings: &[(&str, SignalId)]) {
        self.items.push(Item::Instance {
            name: name.to_string(),
            module,
            bindings: bindings
                .iter()
                .map(|(port, sig)| (port.to_string(), *sig))
                .collect(),
        });
    }

    /// Finishes the definition, interning its names into `names` and checking it.
    pub fn build(mut self, names: &mut NameTable) -> Result<Module, IrError> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }

        let mut signals = Arena::new();
        for (name, width, kind) in &self.signals {
            signals.alloc(Signal {
                name: names.intern(name),
                width: *width,
                kind: *kind,
            });
        }

        let mut last_write = HashMap::new();
        for (index, item) in self.items.iter().enumerate() {
            if let Item::Write { target, .. } = item {
                last_write.insert(*target, index);
            }
        }

        let mut folded: HashMap<SignalId, Expr> = HashMap::new();
        let mut assigns = Vec::new();
        let mut instances = Vec::new();
        for (index, item) in self.items.into_iter().enumerate() {
            match item {
                Item::Write {
                    target,
                    cond,
                    value,
                } => {
                    let prior = folded.remove(&target);
                    let merged = match cond {
                        None => value,
                        Some(cond) => {
                            let width = value.width();
                            let fallback = prior.unwrap_or_else(|| Expr::lit(0, width));
                            Expr::mux(cond, value, fallback)
                        }
                    };
                    if last_write.get(&target) == Some(&index) {
                        assigns.push(Assign {
                            target,
                            value: merged,
                        });
                    } else {
                        folded.insert(target, merged);
                    }
                }
                Item::Instance {
                    name,
                    module,
                    bindings,
                } => instances.push(Instance {
                    name: names.intern(&name),
                    module,
                    bindings: bindings
                        .iter()
                        .map(|(port, signal)| Binding {
                            port: names.intern(port),
                            signal: *signal,
                        })
                        .collect(),
                    position: assigns.len(),
                }),
            }
        }

        let registers = self
            .registers
            .into_iter()
            .map(|draft| {
                let width = signals.get(draft.signal).map(|s| s.width).unwrap_or(0);
                let hold = Expr::signal(draft.signal, width);
                let next = draft
                    .rules
                    .into_iter()
                    .rev()
                    .fold(hold, |acc, (cond, value)| match cond {
                        None => value,
                        Some(cond) => Expr::mux(cond, value, acc),
                    });
                Register {
                    signal: draft.signal,
                    clock: draft.clock,
                    reset: draft
                        .reset
                        .map(|(signal, value)| Reset { signal, value }),
                    next,
                }
            })
            .collect();

        let mut memories = Arena::new();
        for draft in self.memories {
            memories.alloc(Memory {
                name: names.intern(&draft.name),
                width: draft.width,
                depth: draft.depth,
                init: draft.init,
                write_ports: draft.write_ports,
            });
        }

        let mut module = Module {
            name: names.intern(&self.name),
            signals,
            assigns,
            registers,
            memories,
            instances,
            content_hash: ContentHash::from_bytes(&[]),
        };
        check_module(&module, names)?;
        module.content_hash = module.compute_hash();
        tracing::debug!(
            module = %self.name,
            signals = module.signals.len(),
            assigns = module.assigns.len(),
            registers = module.registers.len(),
            "built module"
        );
        Ok(module)
    }
}
