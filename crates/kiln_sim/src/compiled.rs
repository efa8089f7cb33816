//! In-process compiled backend.
//!
//! [`Compiled`] lowers every expression of a netlist once, at construction,
//! into flat tapes of [`Op`]s over a `u64` slot array: one tape for the whole
//! assignment list, one per register next-state, one per memory write port.
//! Operators dispatch through static tables indexed by opcode. Selects
//! compile to conditional jumps, so unselected branches are skipped exactly
//! as in the interpreter.
//!
//! Every value must fit one machine word. Netlists with anything wider than
//! 64 bits are rejected with [`SimError::Unsupported`] before any tape is
//! built, never truncated.

use std::sync::Arc;

use kiln_common::{mask, BitVec};
use kiln_ir::{BinaryOp, Expr, MemoryId, Netlist, SignalId, UnaryOp};

use crate::error::SimError;
use crate::kernel::{Kernel, SimState};

type Slot = u32;

/// One tape instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Const { dst: Slot, value: u64 },
    Copy { dst: Slot, src: Slot },
    Unary { op: UnaryOp, dst: Slot, src: Slot, src_width: u32, width: u32 },
    Binary { op: BinaryOp, dst: Slot, lhs: Slot, rhs: Slot, width: u32 },
    Slice { dst: Slot, src: Slot, low: u32, width: u32 },
    /// `dst = (dst << width) | src`
    Concat { dst: Slot, src: Slot, width: u32 },
    Resize { dst: Slot, src: Slot, width: u32 },
    MemRead { dst: Slot, memory: u32, addr: Slot },
    JumpIfZero { cond: Slot, target: u32 },
    JumpIfNe { lhs: Slot, value: u64, target: u32 },
    Jump { target: u32 },
}

type UnaryFn = fn(u64, u32, u32) -> u64;
type BinaryFn = fn(u64, u64, u32) -> Option<u64>;

/// Indexed by `UnaryOp as usize`; arguments are value, operand width, result width.
static UNARY: [UnaryFn; 6] = [u_not, u_neg, u_red_and, u_red_or, u_red_xor, u_logic_not];

/// Indexed by `BinaryOp as usize`; `None` means division by zero.
static BINARY: [BinaryFn; 18] = [
    b_add, b_sub, b_mul, b_div, b_rem, b_and, b_or, b_xor, b_shl, b_shr, b_eq, b_ne, b_lt, b_le,
    b_gt, b_ge, b_logic_and, b_logic_or,
];

fn u_not(a: u64, _: u32, w: u32) -> u64 {
    !a & mask(w)
}
fn u_neg(a: u64, _: u32, w: u32) -> u64 {
    a.wrapping_neg() & mask(w)
}
fn u_red_and(a: u64, aw: u32, _: u32) -> u64 {
    u64::from(a == mask(aw))
}
fn u_red_or(a: u64, _: u32, _: u32) -> u64 {
    u64::from(a != 0)
}
fn u_red_xor(a: u64, _: u32, _: u32) -> u64 {
    u64::from(a.count_ones() % 2 == 1)
}
fn u_logic_not(a: u64, _: u32, _: u32) -> u64 {
    u64::from(a == 0)
}

fn b_add(a: u64, b: u64, w: u32) -> Option<u64> {
    Some(a.wrapping_add(b) & mask(w))
}
fn b_sub(a: u64, b: u64, w: u32) -> Option<u64> {
    Some(a.wrapping_sub(b) & mask(w))
}
fn b_mul(a: u64, b: u64, w: u32) -> Option<u64> {
    Some(a.wrapping_mul(b) & mask(w))
}
fn b_div(a: u64, b: u64, w: u32) -> Option<u64> {
    a.checked_div(b).map(|q| q & mask(w))
}
fn b_rem(a: u64, b: u64, w: u32) -> Option<u64> {
    a.checked_rem(b).map(|r| r & mask(w))
}
fn b_and(a: u64, b: u64, w: u32) -> Option<u64> {
    Some(a & b & mask(w))
}
fn b_or(a: u64, b: u64, w: u32) -> Option<u64> {
    Some((a | b) & mask(w))
}
fn b_xor(a: u64, b: u64, w: u32) -> Option<u64> {
    Some((a ^ b) & mask(w))
}
fn b_shl(a: u64, b: u64, w: u32) -> Option<u64> {
    Some(if b >= u64::from(w) { 0 } else { (a << b) & mask(w) })
}
fn b_shr(a: u64, b: u64, w: u32) -> Option<u64> {
    Some(if b >= u64::from(w) { 0 } else { a >> b })
}
fn b_eq(a: u64, b: u64, _: u32) -> Option<u64> {
    Some(u64::from(a == b))
}
fn b_ne(a: u64, b: u64, _: u32) -> Option<u64> {
    Some(u64::from(a != b))
}
fn b_lt(a: u64, b: u64, _: u32) -> Option<u64> {
    Some(u64::from(a < b))
}
fn b_le(a: u64, b: u64, _: u32) -> Option<u64> {
    Some(u64::from(a <= b))
}
fn b_gt(a: u64, b: u64, _: u32) -> Option<u64> {
    Some(u64::from(a > b))
}
fn b_ge(a: u64, b: u64, _: u32) -> Option<u64> {
    Some(u64::from(a >= b))
}
fn b_logic_and(a: u64, b: u64, _: u32) -> Option<u64> {
    Some(u64::from(a != 0 && b != 0))
}
fn b_logic_or(a: u64, b: u64, _: u32) -> Option<u64> {
    Some(u64::from(a != 0 || b != 0))
}

fn run(ops: &[Op], slots: &mut [u64], memories: &[Vec<u64>]) -> Result<(), SimError> {
    let mut pc = 0usize;
    while let Some(op) = ops.get(pc) {
        pc += 1;
        match *op {
            Op::Const { dst, value } => slots[dst as usize] = value,
            Op::Copy { dst, src } => slots[dst as usize] = slots[src as usize],
            Op::Unary {
                op,
                dst,
                src,
                src_width,
                width,
            } => slots[dst as usize] = UNARY[op as usize](slots[src as usize], src_width, width),
            Op::Binary {
                op,
                dst,
                lhs,
                rhs,
                width,
            } => {
                slots[dst as usize] =
                    BINARY[op as usize](slots[lhs as usize], slots[rhs as usize], width)
                        .ok_or(SimError::DivisionByZero)?;
            }
            Op::Slice {
                dst,
                src,
                low,
                width,
            } => slots[dst as usize] = (slots[src as usize] >> low) & mask(width),
            Op::Concat { dst, src, width } => {
                let high = slots[dst as usize].checked_shl(width).unwrap_or(0);
                slots[dst as usize] = high | slots[src as usize];
            }
            Op::Resize { dst, src, width } => slots[dst as usize] = slots[src as usize] & mask(width),
            Op::MemRead { dst, memory, addr } => {
                let words = &memories[memory as usize];
                slots[dst as usize] = usize::try_from(slots[addr as usize])
                    .ok()
                    .and_then(|a| words.get(a).copied())
                    .unwrap_or(0);
            }
            Op::JumpIfZero { cond, target } => {
                if slots[cond as usize] == 0 {
                    pc = target as usize;
                }
            }
            Op::JumpIfNe { lhs, value, target } => {
                if slots[lhs as usize] != value {
                    pc = target as usize;
                }
            }
            Op::Jump { target } => pc = target as usize,
        }
    }
    Ok(())
}

/// Emits ops for expressions, allocating scratch slots from a shared counter.
struct TapeBuilder<'a> {
    ops: Vec<Op>,
    next_slot: &'a mut u32,
}

impl TapeBuilder<'_> {
    fn temp(&mut self) -> Slot {
        let slot = *self.next_slot;
        *self.next_slot += 1;
        slot
    }

    fn here(&self) -> u32 {
        self.ops.len() as u32
    }

    fn patch(&mut self, at: usize, to: u32) {
        match &mut self.ops[at] {
            Op::JumpIfZero { target, .. } | Op::JumpIfNe { target, .. } | Op::Jump { target } => {
                *target = to
            }
            _ => {}
        }
    }

    /// Emits `expr` and returns the slot holding its value.
    fn expr(&mut self, expr: &Expr) -> Slot {
        match expr {
            Expr::Signal { id, .. } => id.as_raw(),
            Expr::Literal { value } => {
                let dst = self.temp();
                self.ops.push(Op::Const {
                    dst,
                    value: value.to_u64(),
                });
                dst
            }
            Expr::Unary { op, operand, width } => {
                let src = self.expr(operand);
                let dst = self.temp();
                self.ops.push(Op::Unary {
                    op: *op,
                    dst,
                    src,
                    src_width: operand.width(),
                    width: *width,
                });
                dst
            }
            Expr::Binary {
                op,
                lhs,
                rhs,
                width,
            } => {
                let lhs = self.expr(lhs);
                let rhs = self.expr(rhs);
                let dst = self.temp();
                self.ops.push(Op::Binary {
                    op: *op,
                    dst,
                    lhs,
                    rhs,
                    width: *width,
                });
                dst
            }
            Expr::Mux {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let dst = self.temp();
                let cond = self.expr(cond);
                let to_else = self.ops.len();
                self.ops.push(Op::JumpIfZero { cond, target: 0 });
                let then_slot = self.expr(then_expr);
                self.ops.push(Op::Copy {
                    dst,
                    src: then_slot,
                });
                let to_end = self.ops.len();
                self.ops.push(Op::Jump { target: 0 });
                let else_start = self.here();
                self.patch(to_else, else_start);
                let else_slot = self.expr(else_expr);
                self.ops.push(Op::Copy {
                    dst,
                    src: else_slot,
                });
                let end = self.here();
                self.patch(to_end, end);
                dst
            }
            Expr::Case {
                subject,
                arms,
                default,
                ..
            } => {
                let dst = self.temp();
                let subject = self.expr(subject);
                let mut exits = Vec::with_capacity(arms.len());
                for arm in arms {
                    let skip = self.ops.len();
                    self.ops.push(Op::JumpIfNe {
                        lhs: subject,
                        value: arm.key.to_u64(),
                        target: 0,
                    });
                    let value = self.expr(&arm.value);
                    self.ops.push(Op::Copy { dst, src: value });
                    exits.push(self.ops.len());
                    self.ops.push(Op::Jump { target: 0 });
                    let next = self.here();
                    self.patch(skip, next);
                }
                let value = self.expr(default);
                self.ops.push(Op::Copy { dst, src: value });
                let end = self.here();
                for exit in exits {
                    self.patch(exit, end);
                }
                dst
            }
            Expr::Slice { base, high, low } => {
                let src = self.expr(base);
                let dst = self.temp();
                self.ops.push(Op::Slice {
                    dst,
                    src,
                    low: *low,
                    width: high - low + 1,
                });
                dst
            }
            Expr::Concat { parts, .. } => {
                let dst = self.temp();
                self.ops.push(Op::Const { dst, value: 0 });
                for part in parts {
                    let src = self.expr(part);
                    self.ops.push(Op::Concat {
                        dst,
                        src,
                        width: part.width(),
                    });
                }
                dst
            }
            Expr::Resize { operand, width } => {
                let src = self.expr(operand);
                let dst = self.temp();
                self.ops.push(Op::Resize {
                    dst,
                    src,
                    width: *width,
                });
                dst
            }
            Expr::MemRead { memory, addr, .. } => {
                let addr = self.expr(addr);
                let dst = self.temp();
                self.ops.push(Op::MemRead {
                    dst,
                    memory: memory.as_raw(),
                    addr,
                });
                dst
            }
        }
    }
}

struct RegisterTape {
    ops: Vec<Op>,
    result: Slot,
}

struct WriteTape {
    ops: Vec<Op>,
    enable: Slot,
    addr: Slot,
    data: Slot,
}

/// Checks that every signal and expression node of `netlist` fits 64 bits.
pub fn check_supported(netlist: &Netlist) -> Result<(), SimError> {
    let module = netlist.module();
    for (id, sig) in module.signals.iter() {
        if sig.width > 64 {
            return Err(SimError::Unsupported {
                reason: format!(
                    "signal '{}' is {} bits wide; compiled backends are limited to 64",
                    netlist.signal_name(id),
                    sig.width
                ),
            });
        }
    }
    let exprs = module
        .assigns
        .iter()
        .map(|a| (a.target, &a.value))
        .chain(module.registers.iter().map(|r| (r.signal, &r.next)));
    for (target, expr) in exprs {
        if expr.max_width() > 64 {
            return Err(SimError::Unsupported {
                reason: format!(
                    "expression driving '{}' has a {}-bit intermediate value",
                    netlist.signal_name(target),
                    expr.max_width()
                ),
            });
        }
    }
    for (id, mem) in module.memories.iter() {
        for port in &mem.write_ports {
            let widest = port
                .enable
                .max_width()
                .max(port.addr.max_width())
                .max(port.data.max_width());
            if widest > 64 {
                return Err(SimError::Unsupported {
                    reason: format!(
                        "write port of memory '{}' has a {widest}-bit intermediate value",
                        netlist.memory_name(id)
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Kernel executing precompiled op tapes over 64-bit slots.
pub struct Compiled {
    netlist: Arc<Netlist>,
    state: SimState<u64>,
    settle: Vec<Op>,
    registers: Vec<RegisterTape>,
    writes: Vec<Vec<WriteTape>>,
    reset_values: Vec<u64>,
}

impl Compiled {
    /// Compiles `netlist`, failing closed on anything wider than 64 bits.
    pub fn new(netlist: Arc<Netlist>) -> Result<Self, SimError> {
        check_supported(&netlist)?;
        let module = netlist.module();
        let mut next_slot = module.signals.len() as u32;

        let mut settle = TapeBuilder {
            ops: Vec::new(),
            next_slot: &mut next_slot,
        };
        for assign in &module.assigns {
            let src = settle.expr(&assign.value);
            settle.ops.push(Op::Copy {
                dst: assign.target.as_raw(),
                src,
            });
        }
        let settle = settle.ops;

        let mut registers = Vec::with_capacity(module.registers.len());
        for reg in &module.registers {
            let mut tape = TapeBuilder {
                ops: Vec::new(),
                next_slot: &mut next_slot,
            };
            let result = tape.expr(&reg.next);
            registers.push(RegisterTape {
                ops: tape.ops,
                result,
            });
        }

        let mut writes = Vec::with_capacity(module.memories.len());
        for mem in module.memories.values() {
            let mut ports = Vec::with_capacity(mem.write_ports.len());
            for port in &mem.write_ports {
                let mut tape = TapeBuilder {
                    ops: Vec::new(),
                    next_slot: &mut next_slot,
                };
                let enable = tape.expr(&port.enable);
                let addr = tape.expr(&port.addr);
                let data = tape.expr(&port.data);
                ports.push(WriteTape {
                    ops: tape.ops,
                    enable,
                    addr,
                    data,
                });
            }
            writes.push(ports);
        }

        let reset_values = module
            .registers
            .iter()
            .map(|r| r.initial_value(module.signals[r.signal].width).to_u64())
            .collect();
        let scratch = next_slot as usize - module.signals.len();
        let state = SimState::zeroed(&netlist, scratch, |_| 0);
        tracing::debug!(
            settle_ops = settle.len(),
            registers = registers.len(),
            slots = next_slot,
            "compiled netlist"
        );
        Ok(Self {
            netlist,
            state,
            settle,
            registers,
            writes,
            reset_values,
        })
    }

    /// Number of ops in the settle tape.
    pub fn settle_len(&self) -> usize {
        self.settle.len()
    }
}

impl Kernel for Compiled {
    type Value = u64;

    fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    fn settle(&mut self) -> Result<(), SimError> {
        run(&self.settle, &mut self.state.values, &self.state.memories)
    }

    fn sample_register(&mut self, index: usize) -> Result<u64, SimError> {
        let tape = &self.registers[index];
        run(&tape.ops, &mut self.state.values, &self.state.memories)?;
        Ok(self.state.values[tape.result as usize])
    }

    fn reset_value(&self, index: usize) -> u64 {
        self.reset_values[index]
    }

    fn sample_write(
        &mut self,
        memory: MemoryId,
        port: usize,
    ) -> Result<Option<(u64, u64)>, SimError> {
        let tape = &self.writes[memory.as_raw() as usize][port];
        run(&tape.ops, &mut self.state.values, &self.state.memories)?;
        let values = &self.state.values;
        if values[tape.enable as usize] == 0 {
            return Ok(None);
        }
        Ok(Some((
            values[tape.addr as usize],
            values[tape.data as usize],
        )))
    }

    fn commit(&mut self, signal: SignalId, value: u64) {
        self.state.values[signal.as_raw() as usize] = value;
    }

    fn level(&self, signal: SignalId) -> bool {
        self.state.values[signal.as_raw() as usize] & 1 == 1
    }

    fn read(&self, signal: SignalId) -> BitVec {
        let width = self.netlist.signal(signal).width;
        BitVec::from_u64(self.state.values[signal.as_raw() as usize], width)
    }

    fn write(&mut self, signal: SignalId, value: &BitVec) {
        let width = self.netlist.signal(signal).width;
        self.state.values[signal.as_raw() as usize] = value.to_u64() & mask(width);
    }

    fn memory(&self, memory: MemoryId) -> &[u64] {
        &self.state.memories[memory.as_raw() as usize]
    }

    fn memory_mut(&mut self, memory: MemoryId) -> &mut [u64] {
        &mut self.state.memories[memory.as_raw() as usize]
    }

    fn clear(&mut self) {
        self.state.clear(&self.netlist, |_| 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use kiln_common::NameTable;
    use kiln_ir::ModuleBuilder;

    const UNARY_OPS: [UnaryOp; 6] = [
        UnaryOp::Not,
        UnaryOp::Neg,
        UnaryOp::RedAnd,
        UnaryOp::RedOr,
        UnaryOp::RedXor,
        UnaryOp::LogicNot,
    ];

    const BINARY_OPS: [BinaryOp; 18] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Rem,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Xor,
        BinaryOp::Shl,
        BinaryOp::Shr,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::LogicAnd,
        BinaryOp::LogicOr,
    ];

    const SAMPLES: [u64; 6] = [0, 1, 2, 5, 0x7f, u64::MAX];
    const WIDTHS: [u32; 5] = [1, 3, 8, 63, 64];

    fn empty_netlist() -> Arc<Netlist> {
        let mut names = NameTable::new();
        let module = ModuleBuilder::new("t").build(&mut names).unwrap();
        Arc::new(Netlist::new(module, names).unwrap())
    }

    #[test]
    fn tables_match_interpreter() {
        let interp = Interpreter::new(empty_netlist());
        for w in WIDTHS {
            for a in SAMPLES {
                let a = a & mask(w);
                for op in UNARY_OPS {
                    let expr = Expr::unary(op, Expr::lit(a, w));
                    let expected = interp.eval(&expr).unwrap().to_u64();
                    assert_eq!(UNARY[op as usize](a, w, expr.width()), expected, "{op:?} {a} w{w}");
                }
                for b in SAMPLES {
                    let b = b & mask(w);
                    for op in BINARY_OPS {
                        let expr = Expr::binary(op, Expr::lit(a, w), Expr::lit(b, w));
                        let expected = interp.eval(&expr).ok().map(|v| v.to_u64());
                        assert_eq!(
                            BINARY[op as usize](a, b, expr.width()),
                            expected,
                            "{op:?} {a} {b} w{w}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn rejects_wide_signals() {
        let mut names = NameTable::new();
        let mut b = ModuleBuilder::new("wide");
        let a = b.input("a", 65);
        let y = b.output("y", 65);
        b.assign(y, b.sig(a));
        let module = b.build(&mut names).unwrap();
        let netlist = Arc::new(Netlist::new(module, names).unwrap());
        let err = Compiled::new(netlist).err().unwrap();
        assert!(matches!(err, SimError::Unsupported { .. }));
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn rejects_wide_intermediates() {
        let mut names = NameTable::new();
        let mut b = ModuleBuilder::new("wide");
        let a = b.input("a", 64);
        let y = b.output("y", 8);
        b.assign(y, Expr::concat(vec![b.sig(a), b.sig(a)]).slice(7, 0));
        let module = b.build(&mut names).unwrap();
        let netlist = Arc::new(Netlist::new(module, names).unwrap());
        assert!(matches!(
            Compiled::new(netlist),
            Err(SimError::Unsupported { .. })
        ));
    }

    #[test]
    fn selects_jump_over_unselected_branches() {
        let mut names = NameTable::new();
        let mut b = ModuleBuilder::new("sel");
        let s = b.input("s", 2);
        let y = b.output("y", 8);
        let risky = Expr::lit(1, 8) / Expr::lit(0, 8);
        let case = Expr::case(
            b.sig(s),
            vec![
                (BitVec::from_u64(0, 2), Expr::lit(10, 8)),
                (BitVec::from_u64(1, 2), risky.clone()),
            ],
            Expr::mux(b.sig(s).bit(0), risky, Expr::lit(30, 8)),
        );
        b.assign(y, case);
        let module = b.build(&mut names).unwrap();
        let netlist = Arc::new(Netlist::new(module, names).unwrap());
        let s = netlist.find_signal("s").unwrap();
        let y = netlist.find_signal("y").unwrap();
        let mut kernel = Compiled::new(netlist).unwrap();

        kernel.settle().unwrap();
        assert_eq!(kernel.read(y).to_u64(), 10);
        kernel.write(s, &BitVec::from_u64(2, 2));
        kernel.settle().unwrap();
        assert_eq!(kernel.read(y).to_u64(), 30);
        kernel.write(s, &BitVec::from_u64(1, 2));
        assert!(matches!(kernel.settle(), Err(SimError::DivisionByZero)));
    }

    #[test]
    fn concat_packs_msb_first() {
        let mut names = NameTable::new();
        let mut b = ModuleBuilder::new("cat");
        let hi = b.input("hi", 4);
        let lo = b.input("lo", 60);
        let y = b.output("y", 64);
        b.assign(y, Expr::concat(vec![b.sig(hi), b.sig(lo)]));
        let module = b.build(&mut names).unwrap();
        let netlist = Arc::new(Netlist::new(module, names).unwrap());
        let mut kernel = Compiled::new(Arc::clone(&netlist)).unwrap();
        kernel.write(netlist.find_signal("hi").unwrap(), &BitVec::from_u64(0xa, 4));
        kernel.write(netlist.find_signal("lo").unwrap(), &BitVec::from_u64(1, 60));
        kernel.settle().unwrap();
        let y = netlist.find_signal("y").unwrap();
        assert_eq!(kernel.read(y).to_u64(), 0xa000_0000_0000_0001);
    }
}
