//! Tree-walking reference evaluator.
//!
//! [`Interpreter`] evaluates expression trees directly over [`BitVec`]
//! values, with no width limit and no precompilation. It is the ground truth
//! the other backends are checked against.

use std::cmp::Ordering;
use std::sync::Arc;

use kiln_common::BitVec;
use kiln_ir::{BinaryOp, Expr, MemoryId, Netlist, SignalId, UnaryOp};

use crate::error::SimError;
use crate::kernel::{Kernel, SimState};

/// Kernel that walks expression trees on every evaluation.
#[derive(Debug, Clone)]
pub struct Interpreter {
    netlist: Arc<Netlist>,
    state: SimState<BitVec>,
}

impl Interpreter {
    /// Creates an interpreter with all signals zero and memories empty.
    pub fn new(netlist: Arc<Netlist>) -> Self {
        let state = SimState::zeroed(&netlist, 0, BitVec::zero);
        Self { netlist, state }
    }

    /// Evaluates `expr` against the current state.
    ///
    /// `Mux` and `Case` only evaluate the selected branch, so an unselected
    /// division by zero is not an error.
    pub fn eval(&self, expr: &Expr) -> Result<BitVec, SimError> {
        eval(expr, &self.state)
    }
}

fn eval(expr: &Expr, state: &SimState<BitVec>) -> Result<BitVec, SimError> {
    Ok(match expr {
        Expr::Signal { id, .. } => state.values[id.as_raw() as usize].clone(),
        Expr::Literal { value } => value.clone(),
        Expr::Unary { op, operand, width } => {
            let v = eval(operand, state)?;
            match op {
                UnaryOp::Not => !&v,
                UnaryOp::Neg => v.neg(),
                UnaryOp::RedAnd => BitVec::from_bool(v.reduce_and()),
                UnaryOp::RedOr => BitVec::from_bool(v.reduce_or()),
                UnaryOp::RedXor => BitVec::from_bool(v.reduce_xor()),
                UnaryOp::LogicNot => BitVec::from_bool(v.is_zero()),
            }
            .resize(*width)
        }
        Expr::Binary {
            op,
            lhs,
            rhs,
            width,
        } => {
            let a = eval(lhs, state)?;
            let b = eval(rhs, state)?;
            binary(*op, &a, &b, *width)?
        }
        Expr::Mux {
            cond,
            then_expr,
            else_expr,
            ..
        } => {
            if eval(cond, state)?.is_zero() {
                eval(else_expr, state)?
            } else {
                eval(then_expr, state)?
            }
        }
        Expr::Case {
            subject,
            arms,
            default,
            ..
        } => {
            let key = eval(subject, state)?;
            match arms.iter().find(|arm| arm.key.ucmp(&key) == Ordering::Equal) {
                Some(arm) => eval(&arm.value, state)?,
                None => eval(default, state)?,
            }
        }
        Expr::Slice { base, high, low } => {
            let v = eval(base, state)?;
            v.slice(*high, *low).ok_or(SimError::SliceOutOfRange {
                high: *high,
                low: *low,
                width: v.width(),
            })?
        }
        Expr::Concat { parts, .. } => {
            let values = parts
                .iter()
                .map(|p| eval(p, state))
                .collect::<Result<Vec<_>, _>>()?;
            BitVec::concat(&values)
        }
        Expr::Resize { operand, width } => eval(operand, state)?.resize(*width),
        Expr::MemRead {
            memory,
            addr,
            width,
        } => {
            let words = &state.memories[memory.as_raw() as usize];
            let word = eval(addr, state)?
                .to_u64_exact()
                .and_then(|a| usize::try_from(a).ok())
                .and_then(|a| words.get(a).copied())
                .unwrap_or(0);
            BitVec::from_u64(word, *width)
        }
    })
}

fn binary(op: BinaryOp, a: &BitVec, b: &BitVec, width: u32) -> Result<BitVec, SimError> {
    let flag = BitVec::from_bool;
    Ok(match op {
        BinaryOp::Add => a.add(b, width),
        BinaryOp::Sub => a.sub(b, width),
        BinaryOp::Mul => a.mul(b, width),
        BinaryOp::Div => a.udiv(b, width).ok_or(SimError::DivisionByZero)?,
        BinaryOp::Rem => a.urem(b, width).ok_or(SimError::DivisionByZero)?,
        BinaryOp::And => (a & b).resize(width),
        BinaryOp::Or => (a | b).resize(width),
        BinaryOp::Xor => (a ^ b).resize(width),
        BinaryOp::Shl => a.resize(width).shl(b.shift_amount()),
        BinaryOp::Shr => a.resize(width).shr(b.shift_amount()),
        BinaryOp::Eq => flag(a.ucmp(b) == Ordering::Equal),
        BinaryOp::Ne => flag(a.ucmp(b) != Ordering::Equal),
        BinaryOp::Lt => flag(a.ucmp(b) == Ordering::Less),
        BinaryOp::Le => flag(a.ucmp(b) != Ordering::Greater),
        BinaryOp::Gt => flag(a.ucmp(b) == Ordering::Greater),
        BinaryOp::Ge => flag(a.ucmp(b) != Ordering::Less),
        BinaryOp::LogicAnd => flag(!a.is_zero() && !b.is_zero()),
        BinaryOp::LogicOr => flag(!a.is_zero() || !b.is_zero()),
    })
}

impl Kernel for Interpreter {
    type Value = BitVec;

    fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    fn settle(&mut self) -> Result<(), SimError> {
        let netlist = Arc::clone(&self.netlist);
        for assign in &netlist.module().assigns {
            let value = eval(&assign.value, &self.state)?;
            self.state.values[assign.target.as_raw() as usize] = value;
        }
        Ok(())
    }

    fn sample_register(&mut self, index: usize) -> Result<BitVec, SimError> {
        eval(&self.netlist.module().registers[index].next, &self.state)
    }

    fn reset_value(&self, index: usize) -> BitVec {
        let module = self.netlist.module();
        let reg = &module.registers[index];
        reg.initial_value(module.signals[reg.signal].width)
    }

    fn sample_write(
        &mut self,
        memory: MemoryId,
        port: usize,
    ) -> Result<Option<(u64, u64)>, SimError> {
        let port = &self.netlist.module().memories[memory].write_ports[port];
        let enable = eval(&port.enable, &self.state)?;
        let addr = eval(&port.addr, &self.state)?;
        let data = eval(&port.data, &self.state)?;
        if enable.is_zero() {
            return Ok(None);
        }
        Ok(Some((addr.shift_amount(), data.to_u64())))
    }

    fn commit(&mut self, signal: SignalId, value: BitVec) {
        self.state.values[signal.as_raw() as usize] = value;
    }

    fn level(&self, signal: SignalId) -> bool {
        self.state.values[signal.as_raw() as usize].bit(0)
    }

    fn read(&self, signal: SignalId) -> BitVec {
        self.state.values[signal.as_raw() as usize].clone()
    }

    fn write(&mut self, signal: SignalId, value: &BitVec) {
        let width = self.netlist.signal(signal).width;
        self.state.values[signal.as_raw() as usize] = value.resize(width);
    }

    fn memory(&self, memory: MemoryId) -> &[u64] {
        &self.state.memories[memory.as_raw() as usize]
    }

    fn memory_mut(&mut self, memory: MemoryId) -> &mut [u64] {
        &mut self.state.memories[memory.as_raw() as usize]
    }

    fn clear(&mut self) {
        self.state.clear(&self.netlist, BitVec::zero);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::NameTable;
    use kiln_ir::ModuleBuilder;

    fn netlist(build: impl FnOnce(&mut ModuleBuilder)) -> Arc<Netlist> {
        let mut names = NameTable::new();
        let mut b = ModuleBuilder::new("t");
        build(&mut b);
        let module = b.build(&mut names).unwrap();
        Arc::new(Netlist::new(module, names).unwrap())
    }

    fn eval_const(expr: Expr) -> Result<BitVec, SimError> {
        Interpreter::new(netlist(|_| {})).eval(&expr)
    }

    #[test]
    fn arithmetic_wraps_at_width() {
        let sum = eval_const(Expr::lit(3, 2) + Expr::lit(1, 2)).unwrap();
        assert_eq!(sum, BitVec::from_u64(0, 2));
        let diff = eval_const(Expr::lit(0, 4) - Expr::lit(1, 4)).unwrap();
        assert_eq!(diff, BitVec::from_u64(15, 4));
        let prod = eval_const(Expr::lit(0xff, 8) * Expr::lit(0xff, 8)).unwrap();
        assert_eq!(prod, BitVec::from_u64(0x01, 8));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(matches!(
            eval_const(Expr::lit(4, 8) / Expr::lit(0, 8)),
            Err(SimError::DivisionByZero)
        ));
        assert!(matches!(
            eval_const(Expr::lit(4, 8) % Expr::lit(0, 8)),
            Err(SimError::DivisionByZero)
        ));
        assert_eq!(
            eval_const(Expr::lit(9, 8) / Expr::lit(2, 8)).unwrap(),
            BitVec::from_u64(4, 8)
        );
    }

    #[test]
    fn unselected_branch_is_not_evaluated() {
        let risky = Expr::lit(1, 8) / Expr::lit(0, 8);
        let mux = Expr::mux(Expr::lit(1, 1), Expr::lit(7, 8), risky.clone());
        assert_eq!(eval_const(mux).unwrap(), BitVec::from_u64(7, 8));
        let case = Expr::case(
            Expr::lit(2, 2),
            vec![(BitVec::from_u64(1, 2), risky), (BitVec::from_u64(2, 2), Expr::lit(5, 8))],
            Expr::lit(0, 8),
        );
        assert_eq!(eval_const(case).unwrap(), BitVec::from_u64(5, 8));
    }

    #[test]
    fn case_first_matching_arm_wins() {
        let case = Expr::case(
            Expr::lit(1, 2),
            vec![
                (BitVec::from_u64(1, 2), Expr::lit(10, 8)),
                (BitVec::from_u64(1, 2), Expr::lit(20, 8)),
            ],
            Expr::lit(30, 8),
        );
        assert_eq!(eval_const(case).unwrap(), BitVec::from_u64(10, 8));
        let miss = Expr::case(
            Expr::lit(3, 2),
            vec![(BitVec::from_u64(1, 2), Expr::lit(10, 8))],
            Expr::lit(30, 8),
        );
        assert_eq!(eval_const(miss).unwrap(), BitVec::from_u64(30, 8));
    }

    #[test]
    fn shifts_past_width_give_zero() {
        assert_eq!(
            eval_const(Expr::lit(1, 8) << Expr::lit(8, 4)).unwrap(),
            BitVec::zero(8)
        );
        assert_eq!(
            eval_const(Expr::lit(0x80, 8) >> Expr::lit(7, 4)).unwrap(),
            BitVec::from_u64(1, 8)
        );
    }

    #[test]
    fn comparisons_and_reductions() {
        assert_eq!(
            eval_const(Expr::lit(3, 4).less_than(Expr::lit(4, 4))).unwrap(),
            BitVec::from_bool(true)
        );
        assert_eq!(
            eval_const(Expr::unary(UnaryOp::RedAnd, Expr::lit(0xf, 4))).unwrap(),
            BitVec::from_bool(true)
        );
        assert_eq!(
            eval_const(Expr::unary(UnaryOp::RedXor, Expr::lit(0b0111, 4))).unwrap(),
            BitVec::from_bool(true)
        );
        assert_eq!(
            eval_const(Expr::unary(UnaryOp::LogicNot, Expr::lit(0, 4))).unwrap(),
            BitVec::from_bool(true)
        );
    }

    #[test]
    fn concat_and_slice() {
        let cat = Expr::concat(vec![Expr::lit(0b10, 2), Expr::lit(0b0111, 4)]);
        assert_eq!(eval_const(cat.clone()).unwrap(), BitVec::from_u64(0b100111, 6));
        assert_eq!(
            eval_const(cat.slice(5, 4)).unwrap(),
            BitVec::from_u64(0b10, 2)
        );
    }

    #[test]
    fn wide_values_are_supported() {
        let wide = Expr::lit(1, 64).resize(100) << Expr::lit(80, 8);
        let v = eval_const(wide).unwrap();
        assert_eq!(v.width(), 100);
        assert!(v.bit(80));
    }

    #[test]
    fn settle_runs_assignments_in_order() {
        let mut ids = None;
        let net = netlist(|b| {
            let a = b.input("a", 4);
            let t = b.wire("t", 4);
            let y = b.output("y", 4);
            b.assign(t, b.sig(a) + Expr::lit(1, 4));
            b.assign(y, b.sig(t) + Expr::lit(1, 4));
            ids = Some((a, y));
        });
        let (a, y) = ids.unwrap();
        let mut interp = Interpreter::new(net);
        interp.write(a, &BitVec::from_u64(5, 4));
        interp.settle().unwrap();
        assert_eq!(interp.read(y), BitVec::from_u64(7, 4));
    }

    #[test]
    fn out_of_range_memory_read_is_zero() {
        let mut ids = None;
        let net = netlist(|b| {
            let addr = b.input("addr", 4);
            let y = b.output("y", 8);
            let mem = b.memory("m", 8, 4);
            b.memory_init(mem, &[1, 2, 3, 4]);
            b.assign(y, b.read(mem, b.sig(addr)));
            ids = Some((addr, y));
        });
        let (addr, y) = ids.unwrap();
        let mut interp = Interpreter::new(net);
        interp.clear();
        interp.write(addr, &BitVec::from_u64(3, 4));
        interp.settle().unwrap();
        assert_eq!(interp.read(y), BitVec::from_u64(4, 8));
        interp.write(addr, &BitVec::from_u64(9, 4));
        interp.settle().unwrap();
        assert_eq!(interp.read(y), BitVec::zero(8));
    }
}
