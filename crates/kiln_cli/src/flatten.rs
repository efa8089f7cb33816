//! `kiln flatten`: write the instance-free form of a design.

use kiln_ir::Design;

use crate::pipeline::{load_design, write_output};
use crate::{FlattenArgs, GlobalArgs};

/// Runs the `kiln flatten` command.
///
/// The output is itself a design file with a single top module, so it can be
/// fed back to every other subcommand.
pub fn run(args: &FlattenArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let design = load_design(&args.design)?;
    let flat = flatten_design(&design)?;
    write_output(args.output.as_deref(), &flat.to_json()?)?;
    if !global.quiet && args.output.is_some() {
        let top = flat.top_id()?;
        eprintln!(
            "   Flattened {} definitions into {} signals",
            design.module_count(),
            flat.module(top)?.signals.len()
        );
    }
    Ok(0)
}

/// Wraps the flattened netlist of `design` in a one-module design.
pub fn flatten_design(design: &Design) -> Result<Design, Box<dyn std::error::Error>> {
    let flat = kiln_flatten::flatten(design)?;
    let mut out = Design::new();
    out.names = flat.netlist.names().clone();
    let top = out.add_module(flat.netlist.module().clone());
    out.set_top(top);
    Ok(out)
}
