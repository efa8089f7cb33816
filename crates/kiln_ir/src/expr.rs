//! Combinational expression trees.
//!
//! Every [`Expr`] node carries its result width, so widths are known
//! statically and checked once at construction. Operators never widen or
//! narrow silently: use [`Expr::resize`] for explicit extension or truncation.

use crate::ids::{MemoryId, SignalId};
use kiln_common::BitVec;
use serde::{Deserialize, Serialize};

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Bitwise NOT.
    Not,
    /// Two's complement negation.
    Neg,
    /// Reduction AND, 1 bit.
    RedAnd,
    /// Reduction OR, 1 bit.
    RedOr,
    /// Reduction XOR, 1 bit.
    RedXor,
    /// Logical NOT (operand is zero), 1 bit.
    LogicNot,
}

impl UnaryOp {
    /// Returns `true` if the result is a single bit regardless of operand width.
    pub fn is_reduction(self) -> bool {
        !matches!(self, UnaryOp::Not | UnaryOp::Neg)
    }
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Unsigned division; division by zero is an evaluation error.
    Div,
    /// Unsigned remainder; division by zero is an evaluation error.
    Rem,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Logical shift left by the right operand.
    Shl,
    /// Logical shift right by the right operand.
    Shr,
    /// Equality, 1 bit.
    Eq,
    /// Inequality, 1 bit.
    Ne,
    /// Unsigned less-than, 1 bit.
    Lt,
    /// Unsigned less-or-equal, 1 bit.
    Le,
    /// Unsigned greater-than, 1 bit.
    Gt,
    /// Unsigned greater-or-equal, 1 bit.
    Ge,
    /// Both operands non-zero, 1 bit.
    LogicAnd,
    /// Either operand non-zero, 1 bit.
    LogicOr,
}

impl BinaryOp {
    /// Returns `true` for operators yielding a single-bit truth value.
    pub fn is_predicate(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::LogicAnd
                | BinaryOp::LogicOr
        )
    }

    /// Returns `true` for shifts, whose right operand may have any width.
    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }

    /// Returns `true` if both operands must share the result's width.
    pub fn needs_matching_operands(self) -> bool {
        !self.is_shift() && !matches!(self, BinaryOp::LogicAnd | BinaryOp::LogicOr)
    }
}

/// One keyed arm of an [`Expr::Case`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseArm {
    /// Key compared against the subject; same width as the subject.
    pub key: BitVec,
    /// Value selected when the key matches.
    pub value: Expr,
}

/// A combinational expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    /// Current value of a port, net, or register.
    Signal {
        /// The referenced signal.
        id: SignalId,
        /// The signal's width.
        width: u32,
    },
    /// A constant.
    Literal {
        /// The constant value, whose width is the expression width.
        value: BitVec,
    },
    /// A unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<Expr>,
        /// Result width.
        width: u32,
    },
    /// A binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
        /// Result width.
        width: u32,
    },
    /// Two-way select: `cond ? then_expr : else_expr`.
    Mux {
        /// 1-bit selector.
        cond: Box<Expr>,
        /// Value when `cond` is 1.
        then_expr: Box<Expr>,
        /// Value when `cond` is 0.
        else_expr: Box<Expr>,
        /// Result width.
        width: u32,
    },
    /// Keyed select; the first arm whose key equals the subject wins.
    Case {
        /// Value compared against each key.
        subject: Box<Expr>,
        /// Arms in priority order.
        arms: Vec<CaseArm>,
        /// Value when no key matches.
        default: Box<Expr>,
        /// Result width.
        width: u32,
    },
    /// Bits `high..=low` of `base`.
    Slice {
        /// The sliced expression.
        base: Box<Expr>,
        /// Most significant selected bit.
        high: u32,
        /// Least significant selected bit.
        low: u32,
    },
    /// Concatenation; `parts[0]` occupies the most significant bits.
    Concat {
        /// The parts, MSB first.
        parts: Vec<Expr>,
        /// Sum of part widths.
        width: u32,
    },
    /// Zero-extension or truncation to `width`.
    Resize {
        /// The resized expression.
        operand: Box<Expr>,
        /// Target width.
        width: u32,
    },
    /// Asynchronous memory read; out-of-range addresses read as zero.
    MemRead {
        /// The memory read.
        memory: MemoryId,
        /// Word address.
        addr: Box<Expr>,
        /// Memory word width.
        width: u32,
    },
}

impl Expr {
    /// Builds a signal reference.
    pub fn signal(id: SignalId, width: u32) -> Self {
        Expr::Signal { id, width }
    }

    /// Builds a literal of the given width.
    pub fn lit(value: u64, width: u32) -> Self {
        Expr::Literal {
            value: BitVec::from_u64(value, width),
        }
    }

    /// Builds a literal from an arbitrary-width value.
    pub fn literal(value: BitVec) -> Self {
        Expr::Literal { value }
    }

    /// Returns the statically declared result width.
    pub fn width(&self) -> u32 {
        match self {
            Expr::Signal { width, .. }
            | Expr::Unary { width, .. }
            | Expr::Binary { width, .. }
            | Expr::Mux { width, .. }
            | Expr::Case { width, .. }
            | Expr::Concat { width, .. }
            | Expr::Resize { width, .. }
            | Expr::MemRead { width, .. } => *width,
            Expr::Literal { value } => value.width(),
            Expr::Slice { high, low, .. } => high.saturating_sub(*low) + 1,
        }
    }

    /// Applies a unary operator, deriving the result width.
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        let width = if op.is_reduction() { 1 } else { operand.width() };
        Expr::Unary {
            op,
            operand: Box::new(operand),
            width,
        }
    }

    /// Applies a binary operator, deriving the result width from `lhs`.
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        let width = if op.is_predicate() { 1 } else { lhs.width() };
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            width,
        }
    }

    /// `self == rhs`.
    pub fn equals(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Eq, self, rhs)
    }

    /// `self != rhs`.
    pub fn not_equals(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Ne, self, rhs)
    }

    /// `self < rhs`, unsigned.
    pub fn less_than(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Lt, self, rhs)
    }

    /// `cond ? then_expr : else_expr`, taking the width of `then_expr`.
    pub fn mux(cond: Expr, then_expr: Expr, else_expr: Expr) -> Self {
        let width = then_expr.width();
        Expr::Mux {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
            width,
        }
    }

    /// Keyed select over `subject`, taking the width of `default`.
    pub fn case(subject: Expr, arms: Vec<(BitVec, Expr)>, default: Expr) -> Self {
        let width = default.width();
        Expr::Case {
            subject: Box::new(subject),
            arms: arms
                .into_iter()
                .map(|(key, value)| CaseArm { key, value })
                .collect(),
            default: Box::new(default),
            width,
        }
    }

    /// Bits `high..=low`.
    pub fn slice(self, high: u32, low: u32) -> Self {
        Expr::Slice {
            base: Box::new(self),
            high,
            low,
        }
    }

    /// The single bit at `index`.
    pub fn bit(self, index: u32) -> Self {
        self.slice(index, index)
    }

    /// Concatenation, MSB first.
    pub fn concat(parts: Vec<Expr>) -> Self {
        let width = parts.iter().map(Expr::width).sum();
        Expr::Concat { parts, width }
    }

    /// Zero-extend or truncate to `width`.
    pub fn resize(self, width: u32) -> Self {
        Expr::Resize {
            operand: Box::new(self),
            width,
        }
    }

    /// Asynchronous read of `memory` at `addr`.
    pub fn mem_read(memory: MemoryId, addr: Expr, width: u32) -> Self {
        Expr::MemRead {
            memory,
            addr: Box::new(addr),
            width,
        }
    }

    /// Calls `f` on every direct sub-expression.
    pub fn for_each_child<'a>(&'a self, mut f: impl FnMut(&'a Expr)) {
        match self {
            Expr::Signal { .. } | Expr::Literal { .. } => {}
            Expr::Unary { operand, .. } | Expr::Resize { operand, .. } => f(operand),
            Expr::Slice { base, .. } => f(base),
            Expr::MemRead { addr, .. } => f(addr),
            Expr::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Expr::Mux {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                f(cond);
                f(then_expr);
                f(else_expr);
            }
            Expr::Case {
                subject,
                arms,
                default,
                ..
            } => {
                f(subject);
                for arm in arms {
                    f(&arm.value);
                }
                f(default);
            }
            Expr::Concat { parts, .. } => parts.iter().for_each(f),
        }
    }

    /// Collects every signal read by this expression, in first-visit order.
    pub fn signals(&self) -> Vec<SignalId> {
        let mut out = Vec::new();
        self.visit_signals(&mut out);
        out
    }

    fn visit_signals(&self, out: &mut Vec<SignalId>) {
        if let Expr::Signal { id, .. } = self {
            if !out.contains(id) {
                out.push(*id);
            }
        }
        self.for_each_child(|child| child.visit_signals(out));
    }

    /// Returns `true` if any node is a [`Expr::MemRead`] of `memory`.
    pub fn reads_memory(&self, memory: MemoryId) -> bool {
        if let Expr::MemRead { memory: m, .. } = self {
            if *m == memory {
                return true;
            }
        }
        let mut found = false;
        self.for_each_child(|child| found |= child.reads_memory(memory));
        found
    }

    /// Returns the widest node in the tree, used by backends with a fixed word size.
    pub fn max_width(&self) -> u32 {
        let mut widest = self.width();
        self.for_each_child(|child| widest = widest.max(child.max_width()));
        widest
    }

    /// Rewrites every signal and memory reference through the given maps.
    pub fn remap(
        &self,
        signal: &impl Fn(SignalId) -> SignalId,
        memory: &impl Fn(MemoryId) -> MemoryId,
    ) -> Expr {
        let sub = |e: &Expr| Box::new(e.remap(signal, memory));
        match self {
            Expr::Signal { id, width } => Expr::Signal {
                id: signal(*id),
                width: *width,
            },
            Expr::Literal { value } => Expr::Literal {
                value: value.clone(),
            },
            Expr::Unary { op, operand, width } => Expr::Unary {
                op: *op,
                operand: sub(operand),
                width: *width,
            },
            Expr::Binary {
                op,
                lhs,
                rhs,
                width,
            } => Expr::Binary {
                op: *op,
                lhs: sub(lhs),
                rhs: sub(rhs),
                width: *width,
            },
            Expr::Mux {
                cond,
                then_expr,
                else_expr,
                width,
            } => Expr::Mux {
                cond: sub(cond),
                then_expr: sub(then_expr),
                else_expr: sub(else_expr),
                width: *width,
            },
            Expr::Case {
                subject,
                arms,
                default,
                width,
            } => Expr::Case {
                subject: sub(subject),
                arms: arms
                    .iter()
                    .map(|arm| CaseArm {
                        key: arm.key.clone(),
                        value: arm.value.remap(signal, memory),
                    })
                    .collect(),
                default: sub(default),
                width: *width,
            },
            Expr::Slice { base, high, low } => Expr::Slice {
                base: sub(base),
                high: *high,
                low: *low,
            },
            Expr::Concat { parts, width } => Expr::Concat {
                parts: parts.iter().map(|p| p.remap(signal, memory)).collect(),
                width: *width,
            },
            Expr::Resize { operand, width } => Expr::Resize {
                operand: sub(operand),
                width: *width,
            },
            Expr::MemRead {
                memory: m,
                addr,
                width,
            } => Expr::MemRead {
                memory: memory(*m),
                addr: sub(addr),
                width: *width,
            },
        }
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:ident) => {
        impl std::ops::$trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary(BinaryOp::$op, self, rhs)
            }
        }
    };
}

binary_operator!(Add, add, Add);
binary_operator!(Sub, sub, Sub);
binary_operator!(Mul, mul, Mul);
binary_operator!(Div, div, Div);
binary_operator!(Rem, rem, Rem);
binary_operator!(BitAnd, bitand, And);
binary_operator!(BitOr, bitor, Or);
binary_operator!(BitXor, bitxor, Xor);
binary_operator!(Shl, shl, Shl);
binary_operator!(Shr, shr, Shr);

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::unary(UnaryOp::Not, self)
    }
}
