//! `kiln info`: summarize a design's structure.

use kiln_ir::Design;

use crate::pipeline::load_design;
use crate::{GlobalArgs, InfoArgs};

/// Runs the `kiln info` command.
pub fn run(args: &InfoArgs, _global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let design = load_design(&args.design)?;
    print!("{}", describe(&design)?);
    Ok(0)
}

/// Renders the per-module table, flat totals, and feedback warnings.
pub fn describe(design: &Design) -> Result<String, Box<dyn std::error::Error>> {
    let top = design.top_id()?;
    let mut out = String::new();
    out.push_str(&format!("top: {}\n", design.module_name(top)));
    out.push_str(&format!("fingerprint: {}\n", design.fingerprint()));
    out.push_str(&format!("modules: {}\n", design.module_count()));
    for id in design.hierarchy_order(top)? {
        let module = design.module(id)?;
        out.push_str(&format!(
            "  {:<16} signals {:>5}  registers {:>4}  memories {:>3}  instances {:>3}\n",
            design.module_name(id),
            module.signals.len(),
            module.registers.len(),
            module.memories.len(),
            module.instances.len(),
        ));
    }

    let flat = kiln_flatten::flatten(design)?;
    let module = flat.netlist.module();
    out.push_str(&format!(
        "flat: {} signals, {} assignments, {} registers, {} memories, {} clocks\n",
        module.signals.len(),
        module.assigns.len(),
        module.registers.len(),
        module.memories.len(),
        module.clocks().len(),
    ));
    let warnings = flat.netlist.feedback();
    if warnings.is_empty() {
        out.push_str("feedback: none\n");
    } else {
        out.push_str(&format!("feedback: {} early reads\n", warnings.len()));
        for w in &warnings {
            out.push_str(&format!(
                "  {} read by assignment {} before it is assigned\n",
                flat.netlist.signal_name(w.signal),
                w.reader
            ));
        }
    }
    Ok(out)
}
