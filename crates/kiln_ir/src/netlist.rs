//! Flat, instance-free netlists handed to simulation backends.

use std::collections::HashMap;

use kiln_common::NameTable;

use crate::check::{check_module, feedback_warnings, FeedbackWarning};
use crate::error::IrError;
use crate::ids::{MemoryId, SignalId};
use crate::module::{Module, Signal};

/// One flat module with its names and a name index.
///
/// Immutable once built; sessions share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Netlist {
    module: Module,
    names: NameTable,
    signal_index: HashMap<String, SignalId>,
    memory_index: HashMap<String, MemoryId>,
}

impl Netlist {
    /// Wraps a checked, instance-free module.
    pub fn new(module: Module, names: NameTable) -> Result<Self, IrError> {
        if let Some(inst) = module.instances.first() {
            return Err(IrError::InvalidBinding {
                instance: names.resolve(inst.name).to_string(),
                port: String::new(),
                reason: "netlists must be flattened before simulation".into(),
            });
        }
        check_module(&module, &names)?;
        for warning in feedback_warnings(&module) {
            tracing::warn!(
                signal = names.resolve(module.signals[warning.signal].name),
                assign = warning.reader,
                "net is read before it is assigned; the read sees the previous settle"
            );
        }
        let signal_index = module
            .signals
            .iter()
            .map(|(id, s)| (names.resolve(s.name).to_string(), id))
            .collect();
        let memory_index = module
            .memories
            .iter()
            .map(|(id, m)| (names.resolve(m.name).to_string(), id))
            .collect();
        Ok(Self {
            module,
            names,
            signal_index,
            memory_index,
        })
    }

    /// The flat module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// The name table for the module's idents.
    pub fn names(&self) -> &NameTable {
        &self.names
    }

    /// Looks up a signal by its (possibly dotted) name.
    pub fn find_signal(&self, name: &str) -> Option<SignalId> {
        self.signal_index.get(name).copied()
    }

    /// Looks up a memory by its (possibly dotted) name.
    pub fn find_memory(&self, name: &str) -> Option<MemoryId> {
        self.memory_index.get(name).copied()
    }

    /// Returns a signal's definition.
    pub fn signal(&self, id: SignalId) -> &Signal {
        &self.module.signals[id]
    }

    /// Returns a signal's name.
    pub fn signal_name(&self, id: SignalId) -> &str {
        self.names.resolve(self.module.signals[id].name)
    }

    /// Returns a memory's name.
    pub fn memory_name(&self, id: MemoryId) -> &str {
        self.names.resolve(self.module.memories[id].name)
    }

    /// Nets read before assignment in the ordered list.
    pub fn feedback(&self) -> Vec<FeedbackWarning> {
        feedback_warnings(&self.module)
    }
}
