//! Hierarchical flattening for kiln designs.
//!
//! [`flatten`] walks the instance tree below the top module and produces one
//! instance-free [`Netlist`]. Nested entities are renamed with a dotted path
//! of instance names (`u0.u1.count`); top-level names are kept as they are.
//! Port connections become pass-through assignments: child inputs are
//! driven at the instance's position in the parent's assignment order, child
//! outputs are copied out right after the child's own assignments. Registers
//! keep their clock and reset association and memories are carried over
//! verbatim.
//!
//! The [`NameMap`] returned alongside the netlist maps every flat signal back
//! to its instance path and original signal ID, and back again.

#![warn(missing_docs)]

pub mod error;

use std::collections::{HashMap, HashSet};

use kiln_common::{Ident, NameTable};
use kiln_ir::{
    Arena, ArenaId, Assign, Design, Expr, Instance, Memory, MemoryId, Module, ModuleId, Netlist,
    Register, Reset, Signal, SignalId, SignalKind, WritePort,
};

pub use error::FlattenError;

/// Where a flat signal came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Instance names from the top module down; empty for top-level signals.
    pub path: Vec<Ident>,
    /// The definition that declared the signal.
    pub module: ModuleId,
    /// The signal's ID within that definition.
    pub signal: SignalId,
}

/// Bijection between flat signal IDs and `(instance path, original ID)`.
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    origins: Vec<Origin>,
    reverse: HashMap<(Vec<Ident>, SignalId), SignalId>,
}

impl NameMap {
    fn push(&mut self, flat: SignalId, origin: Origin) {
        self.reverse
            .insert((origin.path.clone(), origin.signal), flat);
        self.origins.push(origin);
    }

    /// Returns where a flat signal came from.
    pub fn origin(&self, flat: SignalId) -> Option<&Origin> {
        self.origins.get(flat.index())
    }

    /// Returns the flat ID of `signal` inside the instance at `path`.
    pub fn flat_id(&self, path: &[Ident], signal: SignalId) -> Option<SignalId> {
        self.reverse.get(&(path.to_vec(), signal)).copied()
    }

    /// Number of mapped signals.
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

/// A flattened netlist with its name map.
#[derive(Debug, Clone)]
pub struct Flattened {
    /// The instance-free netlist.
    pub netlist: Netlist,
    /// Flat ↔ hierarchical signal mapping.
    pub map: NameMap,
}

impl Flattened {
    /// Dotted hierarchical name of a flat signal.
    pub fn hierarchical_name(&self, flat: SignalId) -> &str {
        self.netlist.signal_name(flat)
    }

    /// Finds a flat signal by its dotted hierarchical name.
    pub fn lookup(&self, path: &str) -> Option<SignalId> {
        self.netlist.find_signal(path)
    }
}

/// Flattens the design's top module and everything it instantiates.
///
/// The design is checked first, so dangling or unknown bindings, width
/// mismatches across ports, and recursive hierarchies are reported here as
/// errors rather than producing a partial netlist.
pub fn flatten(design: &Design) -> Result<Flattened, FlattenError> {
    design.check()?;
    let top = design.top_id()?;
    let mut flattener = Flattener {
        design,
        names: design.names.clone(),
        signals: Arena::new(),
        memories: Arena::new(),
        assigns: Vec::new(),
        registers: Vec::new(),
        map: NameMap::default(),
        taken: HashSet::new(),
    };
    let scope = flattener.declare(top, "", &[], true)?;
    flattener.emit(top, &scope)?;

    let top_module = design.module(top)?;
    let mut module = Module {
        name: top_module.name,
        signals: flattener.signals,
        assigns: flattener.assigns,
        registers: flattener.registers,
        memories: flattener.memories,
        instances: Vec::new(),
        content_hash: top_module.content_hash,
    };
    module.content_hash = module.compute_hash();
    tracing::debug!(
        top = design.module_name(top),
        signals = module.signals.len(),
        assigns = module.assigns.len(),
        "flattened design"
    );
    let netlist = Netlist::new(module, flattener.names)?;
    Ok(Flattened {
        netlist,
        map: flattener.map,
    })
}

/// Flat IDs of one instance's signals and memories, indexed by original ID.
struct Scope {
    prefix: String,
    path: Vec<Ident>,
    signals: Vec<SignalId>,
    memories: Vec<MemoryId>,
}

impl Scope {
    fn signal(&self, id: SignalId) -> SignalId {
        self.signals[id.index()]
    }

    fn memory(&self, id: MemoryId) -> MemoryId {
        self.memories[id.index()]
    }

    fn remap(&self, expr: &Expr) -> Expr {
        expr.remap(&|s| self.signal(s), &|m| self.memory(m))
    }
}

struct Flattener<'d> {
    design: &'d Design,
    names: NameTable,
    signals: Arena<SignalId, Signal>,
    memories: Arena<MemoryId, Memory>,
    assigns: Vec<Assign>,
    registers: Vec<Register>,
    map: NameMap,
    taken: HashSet<Ident>,
}

impl Flattener<'_> {
    fn claim(&mut self, prefix: &str, name: Ident) -> Result<Ident, FlattenError> {
        let full = format!("{prefix}{}", self.design.names.resolve(name));
        let ident = self.names.intern(&full);
        if !self.taken.insert(ident) {
            return Err(FlattenError::NameCollision { name: full });
        }
        Ok(ident)
    }

    /// Allocates flat signals and memories for one instance of `module_id`.
    fn declare(
        &mut self,
        module_id: ModuleId,
        prefix: &str,
        path: &[Ident],
        top: bool,
    ) -> Result<Scope, FlattenError> {
        let design = self.design;
        let module = design.module(module_id)?;
        let mut scope = Scope {
            prefix: prefix.to_string(),
            path: path.to_vec(),
            signals: Vec::with_capacity(module.signals.len()),
            memories: Vec::with_capacity(module.memories.len()),
        };
        for (id, sig) in module.signals.iter() {
            let name = self.claim(prefix, sig.name)?;
            let kind = match sig.kind {
                SignalKind::Input | SignalKind::Output if !top => SignalKind::Wire,
                kind => kind,
            };
            let flat = self.signals.alloc(Signal {
                name,
                width: sig.width,
                kind,
            });
            self.map.push(
                flat,
                Origin {
                    path: path.to_vec(),
                    module: module_id,
                    signal: id,
                },
            );
            scope.signals.push(flat);
        }
        for mem in module.memories.values() {
            let name = self.claim(prefix, mem.name)?;
            let flat = self.memories.alloc(Memory {
                name,
                width: mem.width,
                depth: mem.depth,
                init: mem.init.clone(),
                write_ports: Vec::new(),
            });
            scope.memories.push(flat);
        }
        Ok(scope)
    }

    /// Emits the assignments, registers, and write ports of one instance,
    /// inlining sub-instances at their positions.
    fn emit(&mut self, module_id: ModuleId, scope: &Scope) -> Result<(), FlattenError> {
        let design = self.design;
        let module = design.module(module_id)?;

        for reg in &module.registers {
            self.registers.push(Register {
                signal: scope.signal(reg.signal),
                clock: scope.signal(reg.clock),
                reset: reg.reset.as_ref().map(|r| Reset {
                    signal: scope.signal(r.signal),
                    value: r.value.clone(),
                }),
                next: scope.remap(&reg.next),
            });
        }
        for (id, mem) in module.memories.iter() {
            let ports = mem
                .write_ports
                .iter()
                .map(|p| WritePort {
                    clock: scope.signal(p.clock),
                    enable: scope.remap(&p.enable),
                    addr: scope.remap(&p.addr),
                    data: scope.remap(&p.data),
                })
                .collect();
            self.memories[scope.memory(id)].write_ports = ports;
        }

        let mut pending = module.instances.iter().peekable();
        for (index, assign) in module.assigns.iter().enumerate() {
            while let Some(inst) = pending.next_if(|i| i.position <= index) {
                self.inline(inst, scope)?;
            }
            self.assigns.push(Assign {
                target: scope.signal(assign.target),
                value: scope.remap(&assign.value),
            });
        }
        for inst in pending {
            self.inline(inst, scope)?;
        }
        Ok(())
    }

    fn inline(&mut self, inst: &Instance, parent: &Scope) -> Result<(), FlattenError> {
        let design = self.design;
        let child = design.module(inst.module)?;
        let prefix = format!("{}{}.", parent.prefix, design.names.resolve(inst.name));
        let mut path = parent.path.clone();
        path.push(inst.name);
        let scope = self.declare(inst.module, &prefix, &path, false)?;

        let mut outputs = Vec::new();
        for binding in &inst.bindings {
            // Bindings were validated by `Design::check`.
            let Some(port) = child.find_signal(binding.port) else {
                continue;
            };
            let parent_sig = parent.signal(binding.signal);
            let child_sig = scope.signal(port);
            let width = child.signals[port].width;
            match child.signals[port].kind {
                SignalKind::Input => self.assigns.push(Assign {
                    target: child_sig,
                    value: Expr::signal(parent_sig, width),
                }),
                SignalKind::Output => outputs.push(Assign {
                    target: parent_sig,
                    value: Expr::signal(child_sig, width),
                }),
                SignalKind::Wire | SignalKind::Register => {}
            }
        }
        self.emit(inst.module, &scope)?;
        self.assigns.extend(outputs);
        Ok(())
    }
}
