//! Construction-time validation of modules and instance bindings.
//!
//! [`check_module`] enforces the width and reference rules on one definition;
//! [`check_instances`] verifies port bindings against the instantiated
//! definitions. [`feedback_warnings`] reports nets read before they are
//! assigned in the ordered assignment list.

use std::collections::HashSet;

use kiln_common::NameTable;

use crate::design::Design;
use crate::error::IrError;
use crate::expr::Expr;
use crate::ids::{ModuleId, SignalId};
use crate::module::{Module, SignalKind};

/// Validates every expression, driver, register, and memory of `module`.
pub fn check_module(module: &Module, names: &NameTable) -> Result<(), IrError> {
    let module_name = names.resolve(module.name);
    check_unique_names(module, names)?;

    for assign in &module.assigns {
        let ctx = format!("assign in module '{module_name}'");
        let target = signal(module, assign.target, &ctx)?;
        let target_name = names.resolve(target.name);
        if !target.kind.is_assignable() {
            return Err(IrError::InvalidDriver {
                name: target_name.to_string(),
                reason: format!("{:?} signals cannot be assigned", target.kind).to_lowercase(),
            });
        }
        let ctx = format!("assign to '{target_name}'");
        check_expr(&assign.value, module, &ctx)?;
        expect_width(&ctx, target.width, assign.value.width())?;
    }

    let mut registered = HashSet::new();
    for reg in &module.registers {
        let ctx = format!("register in module '{module_name}'");
        let sig = signal(module, reg.signal, &ctx)?;
        let reg_name = names.resolve(sig.name);
        if sig.kind != SignalKind::Register {
            return Err(IrError::InvalidDriver {
                name: reg_name.to_string(),
                reason: "only register signals take clocked updates".into(),
            });
        }
        if !registered.insert(reg.signal) {
            return Err(IrError::InvalidDriver {
                name: reg_name.to_string(),
                reason: "register has more than one clocked update".into(),
            });
        }
        let ctx = format!("register '{reg_name}'");
        expect_width(&format!("clock of {ctx}"), 1, signal(module, reg.clock, &ctx)?.width)?;
        if let Some(reset) = &reg.reset {
            expect_width(&format!("reset of {ctx}"), 1, signal(module, reset.signal, &ctx)?.width)?;
            expect_width(&format!("reset value of {ctx}"), sig.width, reset.value.width())?;
        }
        check_expr(&reg.next, module, &ctx)?;
        expect_width(&format!("next state of {ctx}"), sig.width, reg.next.width())?;
    }
    for (id, sig) in module.signals.iter() {
        if sig.kind == SignalKind::Register && !registered.contains(&id) {
            return Err(IrError::InvalidDriver {
                name: names.resolve(sig.name).to_string(),
                reason: "register has no clocked update".into(),
            });
        }
    }

    for mem in module.memories.values() {
        let mem_name = names.resolve(mem.name);
        if mem.width == 0 || mem.width > 64 {
            return Err(IrError::InvalidMemory {
                name: mem_name.to_string(),
                reason: format!("word width {} is outside 1..=64", mem.width),
            });
        }
        if mem.depth == 0 {
            return Err(IrError::InvalidMemory {
                name: mem_name.to_string(),
                reason: "depth is zero".into(),
            });
        }
        if mem.init.len() > mem.depth as usize {
            return Err(IrError::InvalidMemory {
                name: mem_name.to_string(),
                reason: format!("{} init words exceed depth {}", mem.init.len(), mem.depth),
            });
        }
        for port in &mem.write_ports {
            let ctx = format!("write port of '{mem_name}'");
            expect_width(&ctx, 1, signal(module, port.clock, &ctx)?.width)?;
            check_expr(&port.enable, module, &ctx)?;
            check_expr(&port.addr, module, &ctx)?;
            check_expr(&port.data, module, &ctx)?;
            expect_width(&format!("enable of {ctx}"), 1, port.enable.width())?;
            expect_width(&format!("data of {ctx}"), mem.width, port.data.width())?;
        }
    }

    for inst in &module.instances {
        if inst.position > module.assigns.len() {
            return Err(IrError::InvalidBinding {
                instance: names.resolve(inst.name).to_string(),
                port: String::new(),
                reason: format!("position {} is past the assignment list", inst.position),
            });
        }
    }
    Ok(())
}

/// Validates the port bindings of every instance in `parent`.
pub fn check_instances(design: &Design, parent: ModuleId) -> Result<(), IrError> {
    let names = &design.names;
    let module = design.module(parent)?;
    for inst in &module.instances {
        let inst_name = names.resolve(inst.name).to_string();
        let child = design.module(inst.module)?;
        let mut bound = HashSet::new();
        for binding in &inst.bindings {
            let port_name = names.resolve(binding.port).to_string();
            let port = child
                .find_signal(binding.port)
                .map(|id| &child.signals[id])
                .filter(|s| s.kind.is_port())
                .ok_or_else(|| IrError::UnknownPort {
                    instance: inst_name.clone(),
                    port: port_name.clone(),
                })?;
            if !bound.insert(binding.port) {
                return Err(IrError::InvalidBinding {
                    instance: inst_name,
                    port: port_name,
                    reason: "bound more than once".into(),
                });
            }
            let parent_sig = signal(module, binding.signal, &format!("instance '{inst_name}'"))?;
            expect_width(
                &format!("binding of '{inst_name}.{port_name}'"),
                port.width,
                parent_sig.width,
            )?;
            if port.kind == SignalKind::Output && !parent_sig.kind.is_assignable() {
                return Err(IrError::InvalidBinding {
                    instance: inst_name,
                    port: port_name,
                    reason: format!(
                        "output drives '{}', which is not a wire or output",
                        names.resolve(parent_sig.name)
                    ),
                });
            }
        }
        for (_, input) in child.inputs() {
            if !bound.contains(&input.name) {
                return Err(IrError::UnboundInput {
                    instance: inst_name,
                    port: names.resolve(input.name).to_string(),
                });
            }
        }
    }
    Ok(())
}

/// A net read by an assignment before any assignment to it in the same pass.
///
/// Such a read observes the value from the previous settle, which is only
/// meaningful for genuine combinational feedback. It is reported, never
/// reordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackWarning {
    /// The net read early.
    pub signal: SignalId,
    /// Index of the reading assignment.
    pub reader: usize,
}

/// Finds assignments that read a net whose own assignment comes later.
pub fn feedback_warnings(module: &Module) -> Vec<FeedbackWarning> {
    let assigned: HashSet<SignalId> = module.assigns.iter().map(|a| a.target).collect();
    let mut done = HashSet::new();
    let mut warnings = Vec::new();
    for (index, assign) in module.assigns.iter().enumerate() {
        for read in assign.value.signals() {
            if assigned.contains(&read) && !done.contains(&read) {
                warnings.push(FeedbackWarning {
                    signal: read,
                    reader: index,
                });
            }
        }
        done.insert(assign.target);
    }
    warnings
}

fn check_unique_names(module: &Module, names: &NameTable) -> Result<(), IrError> {
    let mut seen = HashSet::new();
    let entity_names = module
        .signals
        .values()
        .map(|s| s.name)
        .chain(module.memories.values().map(|m| m.name))
        .chain(module.instances.iter().map(|i| i.name));
    for name in entity_names {
        if !seen.insert(name) {
            return Err(IrError::DuplicateName {
                name: names.resolve(name).to_string(),
                module: names.resolve(module.name).to_string(),
            });
        }
    }
    Ok(())
}

fn signal<'m>(
    module: &'m Module,
    id: SignalId,
    ctx: &str,
) -> Result<&'m crate::module::Signal, IrError> {
    module.signals.get(id).ok_or_else(|| IrError::UnknownSignal {
        id: id.as_raw(),
        context: ctx.to_string(),
    })
}

fn expect_width(ctx: &str, expected: u32, found: u32) -> Result<(), IrError> {
    if expected == found {
        Ok(())
    } else {
        Err(IrError::WidthMismatch {
            context: ctx.to_string(),
            expected,
            found,
        })
    }
}

/// Checks references and static widths of an expression tree.
pub fn check_expr(expr: &Expr, module: &Module, ctx: &str) -> Result<(), IrError> {
    match expr {
        Expr::Signal { id, width } => {
            let sig = signal(module, *id, ctx)?;
            expect_width(ctx, sig.width, *width)
        }
        Expr::Literal { .. } => Ok(()),
        Expr::Unary { op, operand, width } => {
            check_expr(operand, module, ctx)?;
            let expected = if op.is_reduction() { 1 } else { operand.width() };
            expect_width(ctx, expected, *width)
        }
        Expr::Binary {
            op,
            lhs,
            rhs,
            width,
        } => {
            check_expr(lhs, module, ctx)?;
            check_expr(rhs, module, ctx)?;
            if op.needs_matching_operands() {
                expect_width(ctx, lhs.width(), rhs.width())?;
            }
            let expected = if op.is_predicate() { 1 } else { lhs.width() };
            expect_width(ctx, expected, *width)
        }
        Expr::Mux {
            cond,
            then_expr,
            else_expr,
            width,
        } => {
            check_expr(cond, module, ctx)?;
            check_expr(then_expr, module, ctx)?;
            check_expr(else_expr, module, ctx)?;
            expect_width(ctx, 1, cond.width())?;
            expect_width(ctx, *width, then_expr.width())?;
            expect_width(ctx, *width, else_expr.width())
        }
        Expr::Case {
            subject,
            arms,
            default,
            width,
        } => {
            check_expr(subject, module, ctx)?;
            for arm in arms {
                expect_width(ctx, subject.width(), arm.key.width())?;
                check_expr(&arm.value, module, ctx)?;
                expect_width(ctx, *width, arm.value.width())?;
            }
            check_expr(default, module, ctx)?;
            expect_width(ctx, *width, default.width())
        }
        Expr::Slice { base, high, low } => {
            check_expr(base, module, ctx)?;
            if *high >= base.width() || high < low {
                return Err(IrError::SliceOutOfRange {
                    high: *high,
                    low: *low,
                    width: base.width(),
                    context: ctx.to_string(),
                });
            }
            Ok(())
        }
        Expr::Concat { parts, width } => {
            for part in parts {
                check_expr(part, module, ctx)?;
            }
            expect_width(ctx, *width, parts.iter().map(Expr::width).sum())
        }
        Expr::Resize { operand, .. } => check_expr(operand, module, ctx),
        Expr::MemRead {
            memory,
            addr,
            width,
        } => {
            let mem = module.memories.get(*memory).ok_or_else(|| IrError::UnknownMemory {
                id: memory.as_raw(),
                context: ctx.to_string(),
            })?;
            check_expr(addr, module, ctx)?;
            expect_width(ctx, mem.width, *width)
        }
    }
}
