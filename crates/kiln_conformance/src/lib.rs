//! Conformance helpers for kiln.
//!
//! Provides a small library of reference circuits built through the public
//! builder API, and [`Lockstep`], which drives the same poke/step sequence
//! through several backends at once and reports the first peek on which they
//! disagree. The integration tests under `tests/` use both to check the
//! execution model's properties on every available backend.

#![warn(missing_docs)]

use std::sync::Arc;

use kiln_common::BitVec;
use kiln_flatten::FlattenError;
use kiln_ir::{BinaryOp, Design, Expr, IrError, ModuleBuilder, ModuleId, ModuleLibrary, Netlist, UnaryOp};
use kiln_sim::{create_backend, Backend, BackendKind, NativeToolchain, RunSummary, SimError, SimOptions};

/// Errors raised while building or driving a conformance run.
#[derive(Debug, thiserror::Error)]
pub enum ConformanceError {
    /// A reference circuit failed to build.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// The design failed to flatten.
    #[error(transparent)]
    Flatten(#[from] FlattenError),

    /// A backend raised an error.
    #[error(transparent)]
    Sim(#[from] SimError),

    /// Two backends produced different values.
    #[error("backends disagree on '{what}' at cycle {cycle}: {values}")]
    Mismatch {
        /// The signal, memory, or summary that differed.
        what: String,
        /// Cycle count of the first backend when the values were read.
        cycle: u64,
        /// Every backend's value, `kind=value` separated by commas.
        values: String,
    },
}

/// Flattens `design` into a shareable netlist.
pub fn netlist(design: &Design) -> Result<Arc<Netlist>, ConformanceError> {
    Ok(Arc::new(kiln_flatten::flatten(design)?.netlist))
}

/// An up-counter with synchronous reset to 0.
///
/// Ports: `clk`, `rst`, `q[width]`.
pub fn counter(width: u32) -> Result<Design, ConformanceError> {
    let mut design = Design::new();
    let mut b = ModuleBuilder::new("counter");
    let clk = b.input("clk", 1);
    let rst = b.input("rst", 1);
    let q = b.output("q", width);
    let count = b.register("count", width, clk);
    b.reset(count, rst, 0);
    b.next(count, b.sig(count) + Expr::lit(1, width));
    b.assign(q, b.sig(count));
    let module = b.build(&mut design.names)?;
    let id = design.add_module(module);
    design.set_top(id);
    Ok(design)
}

/// A 256 x 8 memory with one synchronous write port and one asynchronous read.
///
/// Ports: `clk`, `we`, `waddr[8]`, `wdata[8]`, `raddr[8]`, `rdata[8]`.
/// The memory is named `mem` and powers on holding `0x10, 0x11, 0x12, 0x13`
/// at addresses 0 through 3.
pub fn memory() -> Result<Design, ConformanceError> {
    let mut design = Design::new();
    let mut b = ModuleBuilder::new("ram");
    let clk = b.input("clk", 1);
    let we = b.input("we", 1);
    let waddr = b.input("waddr", 8);
    let wdata = b.input("wdata", 8);
    let raddr = b.input("raddr", 8);
    let rdata = b.output("rdata", 8);
    let mem = b.memory("mem", 8, 256);
    b.memory_init(mem, &[0x10, 0x11, 0x12, 0x13]);
    b.write_port(mem, clk, b.sig(we), b.sig(waddr), b.sig(wdata));
    b.assign(rdata, b.read(mem, b.sig(raddr)));
    let module = b.build(&mut design.names)?;
    let id = design.add_module(module);
    design.set_top(id);
    Ok(design)
}

/// Two registers that exchange values every edge, and a two-stage shift chain.
///
/// Ports: `clk`, `rst`, `d[8]`, `a_out[8]`, `b_out[8]`, `s1_out[8]`.
/// Reset loads `a = 1`, `b = 2`.
pub fn swap_pair() -> Result<Design, ConformanceError> {
    let mut design = Design::new();
    let mut b = ModuleBuilder::new("swap");
    let clk = b.input("clk", 1);
    let rst = b.input("rst", 1);
    let d = b.input("d", 8);
    let a_out = b.output("a_out", 8);
    let b_out = b.output("b_out", 8);
    let s1_out = b.output("s1_out", 8);
    let ra = b.register("a", 8, clk);
    let rb = b.register("b", 8, clk);
    let s0 = b.register("s0", 8, clk);
    let s1 = b.register("s1", 8, clk);
    b.reset(ra, rst, 1);
    b.reset(rb, rst, 2);
    b.next(ra, b.sig(rb));
    b.next(rb, b.sig(ra));
    b.next(s0, b.sig(d));
    b.next(s1, b.sig(s0));
    b.assign(a_out, b.sig(ra));
    b.assign(b_out, b.sig(rb));
    b.assign(s1_out, b.sig(s1));
    let module = b.build(&mut design.names)?;
    let id = design.add_module(module);
    design.set_top(id);
    Ok(design)
}

/// ALU opcodes, indexed by the `op` input.
pub const ALU_OPS: [BinaryOp; 8] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::And,
    BinaryOp::Or,
    BinaryOp::Xor,
    BinaryOp::Shl,
    BinaryOp::Shr,
    BinaryOp::Mul,
];

/// An 8-bit ALU selected by a case table, feeding an enabled accumulator.
///
/// Ports: `clk`, `rst`, `en`, `op[3]`, `a[8]`, `b[8]`, `y[8]`, `zero`,
/// `acc_out[8]`. Shifts use the low three bits of `b` as the amount.
pub fn alu() -> Result<Design, ConformanceError> {
    let mut design = Design::new();
    let mut b = ModuleBuilder::new("alu");
    let clk = b.input("clk", 1);
    let rst = b.input("rst", 1);
    let en = b.input("en", 1);
    let op = b.input("op", 3);
    let a = b.input("a", 8);
    let rhs = b.input("b", 8);
    let y = b.output("y", 8);
    let zero = b.output("zero", 1);
    let acc_out = b.output("acc_out", 8);
    let acc = b.register("acc", 8, clk);

    let arms: Vec<(BitVec, Expr)> = ALU_OPS
        .iter()
        .enumerate()
        .map(|(code, op)| {
            let operand = if op.is_shift() {
                b.sig(rhs).slice(2, 0)
            } else {
                b.sig(rhs)
            };
            (
                BitVec::from_u64(code as u64, 3),
                Expr::binary(*op, b.sig(a), operand),
            )
        })
        .collect();
    b.assign(y, Expr::case(b.sig(op), arms, Expr::lit(0, 8)));
    b.assign(zero, b.sig(y).equals(Expr::lit(0, 8)));
    b.reset(acc, rst, 0);
    b.next_when(acc, b.sig(en), b.sig(acc) + b.sig(y));
    b.assign(acc_out, b.sig(acc));
    let module = b.build(&mut design.names)?;
    let id = design.add_module(module);
    design.set_top(id);
    Ok(design)
}

/// Operators the ALU leaves out, a select chain, and a register-derived clock.
///
/// Inputs: `clk`, `rst`, `a[8]`, `b[8]`, `sh[4]`, `sel[2]`, `w0[64]`, `w1[64]`.
///
/// - `cat[16]` is `{a, b}` and `neg[8]` is `-a`.
/// - `flags[9]` packs, MSB first: `&a`, `|b`, `^a`, `!b`, `a != b`, `a < b`,
///   `a <= b`, `a > b`, `a >= b`.
/// - `logic[2]` is `{a && sh, sel || b}`.
/// - `shl[8]`/`shr[8]` shift `a`/`b` by `sh`, which may exceed the width.
/// - `quot[8]`/`rem[8]` divide `a` by `b | 1`.
/// - `pick[8]` is `a`, overridden by `b` when `sel == 1` and by `-(a + b)`
///   when `sel == 2`.
/// - `wide[64]` is `w0 * w1 ^ -w0` and `wsh[64]` is `w0 << w1[6:0]`.
/// - `half` toggles every `clk` edge and clocks `slow`, which accumulates
///   `pick`. `hist` folds in `a` when `sel == 3` and holds otherwise.
pub fn datapath() -> Result<Design, ConformanceError> {
    let mut design = Design::new();
    let mut b = ModuleBuilder::new("datapath");
    let clk = b.input("clk", 1);
    let rst = b.input("rst", 1);
    let a = b.input("a", 8);
    let rhs = b.input("b", 8);
    let sh = b.input("sh", 4);
    let sel = b.input("sel", 2);
    let w0 = b.input("w0", 64);
    let w1 = b.input("w1", 64);
    let cat = b.output("cat", 16);
    let neg = b.output("neg", 8);
    let flags = b.output("flags", 9);
    let logic = b.output("logic", 2);
    let shl = b.output("shl", 8);
    let shr = b.output("shr", 8);
    let quot = b.output("quot", 8);
    let rem = b.output("rem", 8);
    let pick = b.output("pick", 8);
    let wide = b.output("wide", 64);
    let wsh = b.output("wsh", 64);

    b.assign(cat, Expr::concat(vec![b.sig(a), b.sig(rhs)]));
    b.assign(neg, Expr::unary(UnaryOp::Neg, b.sig(a)));
    let compare = |op| Expr::binary(op, b.sig(a), b.sig(rhs));
    let flag_bits = vec![
        Expr::unary(UnaryOp::RedAnd, b.sig(a)),
        Expr::unary(UnaryOp::RedOr, b.sig(rhs)),
        Expr::unary(UnaryOp::RedXor, b.sig(a)),
        Expr::unary(UnaryOp::LogicNot, b.sig(rhs)),
        compare(BinaryOp::Ne),
        compare(BinaryOp::Lt),
        compare(BinaryOp::Le),
        compare(BinaryOp::Gt),
        compare(BinaryOp::Ge),
    ];
    b.assign(flags, Expr::concat(flag_bits));
    b.assign(
        logic,
        Expr::concat(vec![
            Expr::binary(BinaryOp::LogicAnd, b.sig(a), b.sig(sh)),
            Expr::binary(BinaryOp::LogicOr, b.sig(sel), b.sig(rhs)),
        ]),
    );
    b.assign(shl, b.sig(a) << b.sig(sh));
    b.assign(shr, b.sig(rhs) >> b.sig(sh));
    let divisor = b.sig(rhs) | Expr::lit(1, 8);
    b.assign(quot, b.sig(a) / divisor.clone());
    b.assign(rem, b.sig(a) % divisor);

    b.assign(pick, b.sig(a));
    b.assign_when(pick, b.sig(sel).equals(Expr::lit(1, 2)), b.sig(rhs));
    b.assign_when(
        pick,
        b.sig(sel).equals(Expr::lit(2, 2)),
        Expr::unary(UnaryOp::Neg, b.sig(a) + b.sig(rhs)),
    );

    b.assign(
        wide,
        (b.sig(w0) * b.sig(w1)) ^ Expr::unary(UnaryOp::Neg, b.sig(w0)),
    );
    b.assign(wsh, b.sig(w0) << b.sig(w1).slice(6, 0));

    let half = b.register("half", 1, clk);
    b.reset(half, rst, 0);
    b.next(half, !b.sig(half));
    let slow = b.register("slow", 8, half);
    b.reset(slow, rst, 0);
    b.next(slow, b.sig(slow) + b.sig(pick));
    let hist = b.register("hist", 8, clk);
    b.next_when(hist, b.sig(sel).equals(Expr::lit(3, 2)), b.sig(hist) ^ b.sig(a));

    let module = b.build(&mut design.names)?;
    let id = design.add_module(module);
    design.set_top(id);
    Ok(design)
}

fn accumulator(lib: &mut ModuleLibrary) -> Result<ModuleId, IrError> {
    lib.get_or_build("accum", |_, b| {
        let clk = b.input("clk", 1);
        let rst = b.input("rst", 1);
        let inc = b.input("inc", 4);
        let q = b.output("q", 4);
        let count = b.register("count", 4, clk);
        b.reset(count, rst, 0);
        b.next(count, b.sig(count) + b.sig(inc));
        b.assign(q, b.sig(count));
        Ok(())
    })
}

fn adder(lib: &mut ModuleLibrary) -> Result<ModuleId, IrError> {
    lib.get_or_build("adder", |_, b| {
        let x = b.input("x", 4);
        let y = b.input("y", 4);
        let s = b.output("s", 4);
        b.assign(s, b.sig(x) + b.sig(y));
        Ok(())
    })
}

/// Two accumulators and an adder, one level below the top.
///
/// `top` instantiates `pair` as `p0`; `pair` holds accumulators `u0` and `u1`
/// (stepping by `inc0` and `inc1`) and an adder `sum` driving `total[4]`.
pub fn hierarchy() -> Result<Design, ConformanceError> {
    let mut lib = ModuleLibrary::new();
    let pair = lib.get_or_build("pair", |lib, b| {
        let accum = accumulator(lib)?;
        let add = adder(lib)?;
        let clk = b.input("clk", 1);
        let rst = b.input("rst", 1);
        let inc0 = b.input("inc0", 4);
        let inc1 = b.input("inc1", 4);
        let total = b.output("total", 4);
        let q0 = b.wire("q0", 4);
        let q1 = b.wire("q1", 4);
        b.instance("u0", accum, &[("clk", clk), ("rst", rst), ("inc", inc0), ("q", q0)]);
        b.instance("u1", accum, &[("clk", clk), ("rst", rst), ("inc", inc1), ("q", q1)]);
        b.instance("sum", add, &[("x", q0), ("y", q1), ("s", total)]);
        Ok(())
    })?;
    let top = lib.get_or_build("top", |_, b| {
        let clk = b.input("clk", 1);
        let rst = b.input("rst", 1);
        let inc0 = b.input("inc0", 4);
        let inc1 = b.input("inc1", 4);
        let total = b.output("total", 4);
        b.instance(
            "p0",
            pair,
            &[
                ("clk", clk),
                ("rst", rst),
                ("inc0", inc0),
                ("inc1", inc1),
                ("total", total),
            ],
        );
        Ok(())
    })?;
    Ok(lib.into_design(top)?)
}

/// Every reference circuit with a short name.
pub fn reference_circuits() -> Result<Vec<(&'static str, Design)>, ConformanceError> {
    Ok(vec![
        ("counter", counter(4)?),
        ("memory", memory()?),
        ("swap_pair", swap_pair()?),
        ("alu", alu()?),
        ("datapath", datapath()?),
        ("hierarchy", hierarchy()?),
    ])
}

/// Options for conformance sessions: default clock, unoptimized native builds.
pub fn test_options() -> SimOptions {
    let mut options = SimOptions::default();
    options.native.opt_level = 0;
    options
}

/// The same stimulus driven through several backends in lock step.
pub struct Lockstep {
    sims: Vec<Box<dyn Backend>>,
}

impl Lockstep {
    /// Opens one session per backend in `kinds` on the flattened design.
    pub fn new(
        design: &Design,
        kinds: &[BackendKind],
        options: &SimOptions,
    ) -> Result<Self, ConformanceError> {
        let netlist = netlist(design)?;
        let sims = kinds
            .iter()
            .map(|kind| create_backend(*kind, Arc::clone(&netlist), options))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sims })
    }

    /// Interpreter and compiled, plus native when a compiler is found.
    pub fn available(design: &Design) -> Result<Self, ConformanceError> {
        let options = test_options();
        Self::new(design, &available_backends(&options), &options)
    }

    /// Backends in this run.
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.sims.iter().map(|s| s.kind()).collect()
    }

    /// One session, for backend-specific assertions.
    pub fn session(&self, index: usize) -> Option<&dyn Backend> {
        self.sims.get(index).map(|s| s.as_ref())
    }

    /// Pokes every session.
    pub fn poke_u64(&mut self, name: &str, value: u64) -> Result<(), ConformanceError> {
        self.each(|s| s.poke_u64(name, value))
    }

    /// Settles every session.
    pub fn settle(&mut self) -> Result<(), ConformanceError> {
        self.each(|s| s.settle())
    }

    /// Ticks every session.
    pub fn tick(&mut self) -> Result<(), ConformanceError> {
        self.each(|s| s.tick())
    }

    /// Steps every session one cycle.
    pub fn step(&mut self) -> Result<(), ConformanceError> {
        self.each(|s| s.step())
    }

    /// Resets every session.
    pub fn reset(&mut self) -> Result<(), ConformanceError> {
        self.each(|s| s.reset())
    }

    /// Loads the same bytes into every session's memory.
    pub fn load_memory(&mut self, name: &str, offset: u64, bytes: &[u8]) -> Result<(), ConformanceError> {
        self.each(|s| s.load_memory(name, offset, bytes))
    }

    /// Runs `n` cycles everywhere and checks the summaries agree.
    pub fn run_cycles(&mut self, n: u64) -> Result<RunSummary, ConformanceError> {
        let summaries = self
            .sims
            .iter_mut()
            .map(|s| s.run_cycles(n))
            .collect::<Result<Vec<_>, _>>()?;
        self.agree("run summary", summaries)
    }

    /// Peeks a signal on every session and checks they agree.
    pub fn peek(&self, name: &str) -> Result<BitVec, ConformanceError> {
        let values = self
            .sims
            .iter()
            .map(|s| s.peek(name))
            .collect::<Result<Vec<_>, _>>()?;
        self.agree(name, values)
    }

    /// Peeks the low 64 bits of a signal on every session.
    pub fn peek_u64(&self, name: &str) -> Result<u64, ConformanceError> {
        Ok(self.peek(name)?.to_u64())
    }

    /// Dumps a memory range on every session and checks they agree.
    pub fn dump_memory(&self, name: &str, offset: u64, count: u64) -> Result<Vec<u8>, ConformanceError> {
        let dumps = self
            .sims
            .iter()
            .map(|s| s.dump_memory(name, offset, count))
            .collect::<Result<Vec<_>, _>>()?;
        self.agree(name, dumps)
    }

    fn each(
        &mut self,
        mut f: impl FnMut(&mut dyn Backend) -> Result<(), SimError>,
    ) -> Result<(), ConformanceError> {
        for sim in &mut self.sims {
            f(sim.as_mut())?;
        }
        Ok(())
    }

    fn agree<T: PartialEq + std::fmt::Debug>(
        &self,
        what: &str,
        mut values: Vec<T>,
    ) -> Result<T, ConformanceError> {
        if values.windows(2).all(|w| w[0] == w[1]) {
            if let Some(value) = values.pop() {
                return Ok(value);
            }
        }
        Err(ConformanceError::Mismatch {
            what: what.to_string(),
            cycle: self.sims.first().map_or(0, |s| s.cycle()),
            values: self
                .sims
                .iter()
                .zip(&values)
                .map(|(s, v)| format!("{}={v:?}", s.kind()))
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

/// Backends usable here: always interpreter and compiled, native when
/// `rustc` answers.
pub fn available_backends(options: &SimOptions) -> Vec<BackendKind> {
    let mut kinds = vec![BackendKind::Interpreter, BackendKind::Compiled];
    match NativeToolchain::detect(&options.native) {
        Ok(_) => kinds.push(BackendKind::Native),
        Err(e) => tracing::info!(error = %e, "skipping native backend"),
    }
    kinds
}
