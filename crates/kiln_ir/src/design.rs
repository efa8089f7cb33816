//! Top-level design container.
//!
//! A [`Design`] owns every module definition, the shared [`NameTable`], and the
//! choice of top module. It is the unit that is checked, flattened, exported,
//! and saved to or loaded from JSON.

use std::collections::VecDeque;

use kiln_common::{ContentHash, NameTable};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use crate::arena::Arena;
use crate::check::{check_instances, check_module};
use crate::error::IrError;
use crate::ids::ModuleId;
use crate::module::Module;

/// A set of module definitions plus the top-level choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Design {
    /// All module definitions.
    pub modules: Arena<ModuleId, Module>,
    /// The top-level module, once chosen.
    pub top: Option<ModuleId>,
    /// Names of every module, signal, memory, instance, and port.
    pub names: NameTable,
}

impl Design {
    /// Creates an empty design.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a built module and returns its ID.
    pub fn add_module(&mut self, module: Module) -> ModuleId {
        self.modules.alloc(module)
    }

    /// Chooses the top-level module.
    pub fn set_top(&mut self, top: ModuleId) {
        self.top = Some(top);
    }

    /// Returns the module with the given ID.
    pub fn module(&self, id: ModuleId) -> Result<&Module, IrError> {
        self.modules.get(id).ok_or_else(|| IrError::UnknownModule {
            name: format!("#{}", id.as_raw()),
        })
    }

    /// Returns the top-level module ID.
    pub fn top_id(&self) -> Result<ModuleId, IrError> {
        self.top.ok_or(IrError::NoTopModule)
    }

    /// Returns the top-level module.
    pub fn top_module(&self) -> Result<&Module, IrError> {
        self.module(self.top_id()?)
    }

    /// Finds a module definition by name.
    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        let ident = self.names.get(name)?;
        self.modules
            .iter()
            .find(|(_, m)| m.name == ident)
            .map(|(id, _)| id)
    }

    /// Returns the number of module definitions.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Returns the name of a module.
    pub fn module_name(&self, id: ModuleId) -> &str {
        self.modules
            .get(id)
            .map(|m| self.names.resolve(m.name))
            .unwrap_or("<unknown>")
    }

    /// Returns `root` and every definition it instantiates, children first.
    ///
    /// Fails if the instance hierarchy below `root` is recursive.
    pub fn hierarchy_order(&self, root: ModuleId) -> Result<Vec<ModuleId>, IrError> {
        let mut graph: DiGraphMap<ModuleId, ()> = DiGraphMap::new();
        let mut queue = VecDeque::from([root]);
        graph.add_node(root);
        while let Some(id) = queue.pop_front() {
            for inst in &self.module(id)?.instances {
                if !graph.contains_node(inst.module) {
                    queue.push_back(inst.module);
                }
                graph.add_edge(id, inst.module, ());
            }
        }
        let mut order = toposort(&graph, None).map_err(|cycle| IrError::RecursiveInstance {
            module: self.module_name(cycle.node_id()).to_string(),
        })?;
        order.reverse();
        Ok(order)
    }

    /// Checks every definition reachable from the top module.
    pub fn check(&self) -> Result<(), IrError> {
        for id in self.hierarchy_order(self.top_id()?)? {
            check_module(self.module(id)?, &self.names)?;
            check_instances(self, id)?;
        }
        Ok(())
    }

    /// Fingerprint of the whole design, combining every module hash.
    pub fn fingerprint(&self) -> ContentHash {
        let hashes: Vec<String> = self
            .modules
            .values()
            .map(|m| m.content_hash.to_string())
            .collect();
        ContentHash::from_parts(hashes.iter().map(|h| h.as_bytes()))
    }

    /// Serializes the design to JSON.
    pub fn to_json(&self) -> Result<String, IrError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses and checks a design from JSON.
    pub fn from_json(text: &str) -> Result<Self, IrError> {
        let design: Design = serde_json::from_str(text)?;
        design.check()?;
        Ok(design)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use crate::expr::Expr;

    fn inverter(design: &mut Design) -> ModuleId {
        let mut b = ModuleBuilder::new("inv");
        let a = b.input("a", 1);
        let y = b.output("y", 1);
        b.assign(y, !b.sig(a));
        let m = b.build(&mut design.names).unwrap();
        design.add_module(m)
    }

    fn wrapper(design: &mut Design, child: ModuleId, name: &str) -> ModuleId {
        let mut b = ModuleBuilder::new(name);
        let a = b.input("a", 1);
        let y = b.output("y", 1);
        b.instance("u0", child, &[("a", a), ("y", y)]);
        let m = b.build(&mut design.names).unwrap();
        design.add_module(m)
    }

    #[test]
    fn top_module_requires_top() {
        let design = Design::new();
        assert!(matches!(design.top_module(), Err(IrError::NoTopModule)));
    }

    #[test]
    fn hierarchy_order_is_children_first() {
        let mut design = Design::new();
        let leaf = inverter(&mut design);
        let mid = wrapper(&mut design, leaf, "mid");
        let top = wrapper(&mut design, mid, "top");
        assert_eq!(design.hierarchy_order(top).unwrap(), vec![leaf, mid, top]);
    }

    #[test]
    fn recursion_is_rejected() {
        let mut design = Design::new();
        let self_id = design.modules.next_id();
        let looped = wrapper(&mut design, self_id, "looped");
        assert_eq!(looped, self_id);
        design.set_top(looped);
        assert!(matches!(
            design.check(),
            Err(IrError::RecursiveInstance { .. })
        ));
    }

    #[test]
    fn check_rejects_unbound_input() {
        let mut design = Design::new();
        let leaf = inverter(&mut design);
        let mut b = ModuleBuilder::new("top");
        let y = b.output("y", 1);
        b.instance("u0", leaf, &[("y", y)]);
        let top = b.build(&mut design.names).unwrap();
        let top = design.add_module(top);
        design.set_top(top);
        assert!(matches!(design.check(), Err(IrError::UnboundInput { .. })));
    }

    #[test]
    fn check_rejects_unknown_port() {
        let mut design = Design::new();
        let leaf = inverter(&mut design);
        let mut b = ModuleBuilder::new("top");
        let a = b.input("a", 1);
        b.instance("u0", leaf, &[("a", a), ("nope", a)]);
        let top = b.build(&mut design.names).unwrap();
        let top = design.add_module(top);
        design.set_top(top);
        assert!(matches!(design.check(), Err(IrError::UnknownPort { .. })));
    }

    #[test]
    fn check_rejects_output_driving_input() {
        let mut design = Design::new();
        let leaf = inverter(&mut design);
        let mut b = ModuleBuilder::new("top");
        let a = b.input("a", 1);
        let other = b.input("other", 1);
        b.instance("u0", leaf, &[("a", a), ("y", other)]);
        let top = b.build(&mut design.names).unwrap();
        let top = design.add_module(top);
        design.set_top(top);
        assert!(matches!(
            design.check(),
            Err(IrError::InvalidBinding { .. })
        ));
    }

    #[test]
    fn find_module_by_name() {
        let mut design = Design::new();
        let leaf = inverter(&mut design);
        assert_eq!(design.find_module("inv"), Some(leaf));
        assert_eq!(design.find_module("missing"), None);
        assert_eq!(design.module_name(leaf), "inv");
    }

    #[test]
    fn json_roundtrip() {
        let mut design = Design::new();
        let leaf = inverter(&mut design);
        let top = wrapper(&mut design, leaf, "top");
        design.set_top(top);
        let json = design.to_json().unwrap();
        let back = Design::from_json(&json).unwrap();
        assert_eq!(back.module_count(), 2);
        assert_eq!(back.module_name(top), "top");
        assert_eq!(
            back.top_module().unwrap().assigns,
            design.top_module().unwrap().assigns
        );
        assert_eq!(back.fingerprint(), design.fingerprint());
    }

    #[test]
    fn from_json_checks_design() {
        let mut design = Design::new();
        let leaf = inverter(&mut design);
        design.set_top(leaf);
        let mut json: serde_json::Value = serde_json::from_str(&design.to_json().unwrap()).unwrap();
        json["modules"][0]["assigns"][0]["value"] = serde_json::to_value(Expr::lit(0, 3)).unwrap();
        assert!(matches!(
            Design::from_json(&json.to_string()),
            Err(IrError::WidthMismatch { .. })
        ));
    }
}
