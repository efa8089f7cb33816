//! Construction cache keyed by definition name.
//!
//! Building the same definition twice returns the cached [`ModuleId`]
//! without running the construction closure again, so a circuit library can
//! ask for its building blocks freely.

use std::collections::HashMap;

use crate::builder::ModuleBuilder;
use crate::design::Design;
use crate::error::IrError;
use crate::ids::ModuleId;

/// Builds module definitions into a [`Design`] at most once each.
#[derive(Default)]
pub struct ModuleLibrary {
    design: Design,
    by_name: HashMap<String, ModuleId>,
}

impl ModuleLibrary {
    /// Creates an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached definition `name`, building it with `build` on first use.
    ///
    /// `build` receives the library so it can request child definitions.
    pub fn get_or_build<F>(&mut self, name: &str, build: F) -> Result<ModuleId, IrError>
    where
        F: FnOnce(&mut ModuleLibrary, &mut ModuleBuilder) -> Result<(), IrError>,
    {
        if let Some(&id) = self.by_name.get(name) {
            tracing::trace!(module = name, "construction cache hit");
            return Ok(id);
        }
        let mut builder = ModuleBuilder::new(name);
        build(self, &mut builder)?;
        let module = builder.build(&mut self.design.names)?;
        let id = self.design.add_module(module);
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Returns the ID of an already built definition.
    pub fn get(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    /// Returns the design built so far.
    pub fn design(&self) -> &Design {
        &self.design
    }

    /// Finishes the library with `top` as the top module, checking the hierarchy.
    pub fn into_design(mut self, top: ModuleId) -> Result<Design, IrError> {
        self.design.set_top(top);
        self.design.check()?;
        Ok(self.design)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use std::cell::Cell;

    fn inverter(lib: &mut ModuleLibrary, calls: &Cell<u32>) -> Result<ModuleId, IrError> {
        lib.get_or_build("inv", |_, b| {
            calls.set(calls.get() + 1);
            let a = b.input("a", 1);
            let y = b.output("y", 1);
            b.assign(y, !b.sig(a));
            Ok(())
        })
    }

    #[test]
    fn builds_each_definition_once() {
        let calls = Cell::new(0);
        let mut lib = ModuleLibrary::new();
        let first = inverter(&mut lib, &calls).unwrap();
        let second = inverter(&mut lib, &calls).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
        assert_eq!(lib.design().module_count(), 1);
    }

    #[test]
    fn children_are_built_through_the_library() {
        let calls = Cell::new(0);
        let mut lib = ModuleLibrary::new();
        let top = lib
            .get_or_build("pair", |lib, b| {
                let inv = inverter(lib, &calls)?;
                let a = b.input("a", 1);
                let mid = b.wire("mid", 1);
                let y = b.output("y", 1);
                b.instance("u0", inv, &[("a", a), ("y", mid)]);
                b.instance("u1", inv, &[("a", mid), ("y", y)]);
                Ok(())
            })
            .unwrap();
        assert_eq!(calls.get(), 1);
        let design = lib.into_design(top).unwrap();
        assert_eq!(design.module_count(), 2);
        assert_eq!(design.top_module().unwrap().instances.len(), 2);
    }

    #[test]
    fn build_errors_propagate() {
        let mut lib = ModuleLibrary::new();
        let err = lib
            .get_or_build("bad", |_, b| {
                let y = b.output("y", 2);
                b.assign(y, Expr::lit(0, 1));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, IrError::WidthMismatch { .. }));
        assert!(lib.get("bad").is_none());
    }
}
