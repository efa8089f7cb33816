//! Rust source generation for native models.
//!
//! The generated crate is self-contained (no dependencies) and exposes the C
//! ABI consumed by [`NativeModel`](super::ffi::NativeModel). State lives in
//! one heap-allocated `Ctx` owned by the library; the host only ever holds an
//! opaque pointer to it and exchanges `u64` values and word buffers.
//!
//! The edge algorithm is emitted verbatim from the same rules the in-process
//! session follows: sample everything against pre-edge state, commit, settle,
//! and repeat for derived clocks up to the same round limit.

use std::fmt::Write as _;

use kiln_common::mask;
use kiln_ir::{BinaryOp, Expr, Netlist, UnaryOp, WritePort};

use crate::compiled::check_supported;
use crate::error::SimError;
use crate::session::DERIVED_CLOCK_ROUNDS;

/// Version of the generated C ABI.
pub const ABI_VERSION: u32 = 2;

/// Status returned by `kiln_settle`, `kiln_tick`, and `kiln_run_cycles` when a
/// division or remainder saw a zero divisor.
pub const STATUS_DIVISION_BY_ZERO: i32 = 1;

/// Generates the model source for `netlist`.
///
/// A zero divisor raises the context's fault flag; the assignment or edge
/// round that raised it is not committed and the call reports
/// [`STATUS_DIVISION_BY_ZERO`].
pub fn generate(netlist: &Netlist) -> Result<String, SimError> {
    check_supported(netlist)?;
    let module = netlist.module();
    let mut gen = Generator::default();
    let clocks = module.clocks();
    let clock_index = |id: kiln_ir::SignalId| clocks.iter().position(|c| *c == id).unwrap_or(usize::MAX);

    gen.line(format!(
        "// Generated native model for `{}`. Do not edit.",
        netlist.names().resolve(module.name)
    ));
    gen.line("#![allow(warnings)]");
    gen.line("");
    gen.line(format!("const ABI_VERSION: u32 = {ABI_VERSION};"));
    gen.line(format!("const SIGNALS: usize = {};", module.signals.len()));
    gen.line(format!("const REGS: usize = {};", module.registers.len()));
    gen.line(format!("const CLOCKS: usize = {};", clocks.len()));
    gen.line(format!("const ROUNDS: usize = {DERIVED_CLOCK_ROUNDS};"));
    gen.line("const NONE: usize = usize::MAX;");
    gen.line(format!("const DIV_ZERO: i32 = {STATUS_DIVISION_BY_ZERO};"));

    let widths: Vec<String> = module.signals.values().map(|s| s.width.to_string()).collect();
    gen.line(format!("static WIDTHS: [u32; SIGNALS] = [{}];", widths.join(", ")));
    let names: Vec<String> = module
        .signals
        .ids()
        .map(|id| format!("{:?}", netlist.signal_name(id)))
        .collect();
    gen.line(format!("static NAMES: [&str; SIGNALS] = [{}];", names.join(", ")));
    let clock_slots: Vec<String> = clocks.iter().map(|c| c.as_raw().to_string()).collect();
    gen.line(format!(
        "static CLOCK_SLOTS: [usize; CLOCKS] = [{}];",
        clock_slots.join(", ")
    ));

    let registers: Vec<String> = module
        .registers
        .iter()
        .map(|r| {
            let reset = r
                .reset
                .as_ref()
                .map_or("NONE".to_string(), |r| r.signal.as_raw().to_string());
            let value = r.initial_value(module.signals[r.signal].width).to_u64();
            format!(
                "({}, {}, {reset}, {value:#x})",
                r.signal.as_raw(),
                clock_index(r.clock)
            )
        })
        .collect();
    gen.line("// (signal, clock index, reset signal, reset value)");
    gen.line(format!(
        "static REGISTERS: [(usize, usize, usize, u64); REGS] = [{}];",
        registers.join(", ")
    ));

    let ports: Vec<(u32, &WritePort)> = module
        .memories
        .iter()
        .flat_map(|(id, m)| m.write_ports.iter().map(move |p| (id.as_raw(), p)))
        .collect();
    let port_table: Vec<String> = ports
        .iter()
        .map(|(mem, p)| format!("({mem}, {})", clock_index(p.clock)))
        .collect();
    gen.line("// (memory, clock index)");
    gen.line(format!(
        "static PORTS: [(usize, usize); {}] = [{}];",
        ports.len(),
        port_table.join(", ")
    ));
    let depths: Vec<String> = module.memories.values().map(|m| m.depth.to_string()).collect();
    let mem_widths: Vec<String> = module.memories.values().map(|m| m.width.to_string()).collect();
    gen.line(format!(
        "static DEPTHS: [usize; {}] = [{}];",
        depths.len(),
        depths.join(", ")
    ));
    gen.line(format!(
        "static MEM_WIDTHS: [u32; {}] = [{}];",
        mem_widths.len(),
        mem_widths.join(", ")
    ));
    gen.line("");
    gen.line(PRELUDE);

    gen.line("fn settle(c: &mut Ctx) -> bool {");
    gen.line("    c.fault.set(false);");
    for assign in &module.assigns {
        let value = gen.expr(&assign.value)?;
        gen.line(format!(
            "    {{ let v = {value}; if c.fault.get() {{ return false; }} c.s[{}] = v; }}",
            assign.target.as_raw()
        ));
    }
    gen.line("    true");
    gen.line("}");
    gen.line("");

    gen.line("fn next(c: &Ctx, r: usize) -> u64 {");
    gen.line("    match r {");
    for (index, reg) in module.registers.iter().enumerate() {
        let value = gen.expr(&reg.next)?;
        gen.line(format!("        {index} => {value},"));
    }
    gen.line("        _ => 0,");
    gen.line("    }");
    gen.line("}");
    gen.line("");

    gen.line("fn write(c: &Ctx, p: usize) -> (u64, u64, u64) {");
    gen.line("    match p {");
    for (index, (_, port)) in ports.iter().enumerate() {
        let enable = gen.expr(&port.enable)?;
        let addr = gen.expr(&port.addr)?;
        let data = gen.expr(&port.data)?;
        gen.line(format!("        {index} => ({enable}, {addr}, {data}),"));
    }
    gen.line("        _ => (0, 0, 0),");
    gen.line("    }");
    gen.line("}");
    gen.line("");
    gen.line(RUNTIME);

    tracing::debug!(bytes = gen.out.len(), "generated native model source");
    Ok(gen.out)
}

#[derive(Default)]
struct Generator {
    out: String,
    case_depth: usize,
}

impl Generator {
    fn line(&mut self, text: impl AsRef<str>) {
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn expr(&mut self, expr: &Expr) -> Result<String, SimError> {
        let m = |w: u32| format!("{:#x}u64", mask(w));
        Ok(match expr {
            Expr::Signal { id, .. } => format!("c.s[{}]", id.as_raw()),
            Expr::Literal { value } => format!("{:#x}u64", value.to_u64()),
            Expr::Unary { op, operand, width } => {
                let a = self.expr(operand)?;
                match op {
                    UnaryOp::Not => format!("(!({a}) & {})", m(*width)),
                    UnaryOp::Neg => format!("(({a}).wrapping_neg() & {})", m(*width)),
                    UnaryOp::RedAnd => format!("((({a}) == {}) as u64)", m(operand.width())),
                    UnaryOp::RedOr => format!("((({a}) != 0) as u64)"),
                    UnaryOp::RedXor => format!("((({a}).count_ones() & 1) as u64)"),
                    UnaryOp::LogicNot => format!("((({a}) == 0) as u64)"),
                }
            }
            Expr::Binary {
                op,
                lhs,
                rhs,
                width,
            } => {
                let a = self.expr(lhs)?;
                let b = self.expr(rhs)?;
                let w = *width;
                match op {
                    BinaryOp::Add => format!("(({a}).wrapping_add({b}) & {})", m(w)),
                    BinaryOp::Sub => format!("(({a}).wrapping_sub({b}) & {})", m(w)),
                    BinaryOp::Mul => format!("(({a}).wrapping_mul({b}) & {})", m(w)),
                    BinaryOp::Div => format!("div(&c.fault, {a}, {b})"),
                    BinaryOp::Rem => format!("rem(&c.fault, {a}, {b})"),
                    BinaryOp::And => format!("(({a}) & ({b}) & {})", m(w)),
                    BinaryOp::Or => format!("((({a}) | ({b})) & {})", m(w)),
                    BinaryOp::Xor => format!("((({a}) ^ ({b})) & {})", m(w)),
                    BinaryOp::Shl => format!("shl({a}, {b}, {w})"),
                    BinaryOp::Shr => format!("shr({a}, {b}, {w})"),
                    BinaryOp::Eq => format!("((({a}) == ({b})) as u64)"),
                    BinaryOp::Ne => format!("((({a}) != ({b})) as u64)"),
                    BinaryOp::Lt => format!("((({a}) < ({b})) as u64)"),
                    BinaryOp::Le => format!("((({a}) <= ({b})) as u64)"),
                    BinaryOp::Gt => format!("((({a}) > ({b})) as u64)"),
                    BinaryOp::Ge => format!("((({a}) >= ({b})) as u64)"),
                    BinaryOp::LogicAnd => format!("(((({a}) != 0) & (({b}) != 0)) as u64)"),
                    BinaryOp::LogicOr => format!("(((({a}) != 0) | (({b}) != 0)) as u64)"),
                }
            }
            Expr::Mux {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let c = self.expr(cond)?;
                let t = self.expr(then_expr)?;
                let e = self.expr(else_expr)?;
                format!("(if ({c}) != 0 {{ {t} }} else {{ {e} }})")
            }
            Expr::Case {
                subject,
                arms,
                default,
                ..
            } => {
                let key = format!("k{}", self.case_depth);
                self.case_depth += 1;
                let s = self.expr(subject)?;
                let mut text = format!("({{ let {key} = {s}; ");
                for arm in arms {
                    let v = self.expr(&arm.value)?;
                    let _ = write!(text, "if {key} == {:#x}u64 {{ {v} }} else ", arm.key.to_u64());
                }
                let d = self.expr(default)?;
                let _ = write!(text, "{{ {d} }} }})");
                self.case_depth -= 1;
                text
            }
            Expr::Slice { base, high, low } => {
                let a = self.expr(base)?;
                format!("((({a}) >> {low}) & {})", m(high - low + 1))
            }
            Expr::Concat { parts, .. } => {
                let mut shift: u32 = parts.iter().map(Expr::width).sum();
                let mut terms = Vec::new();
                for part in parts {
                    shift -= part.width();
                    if part.width() == 0 {
                        continue;
                    }
                    let p = self.expr(part)?;
                    terms.push(if shift == 0 {
                        format!("({p})")
                    } else {
                        format!("(({p}) << {shift})")
                    });
                }
                if terms.is_empty() {
                    "0u64".to_string()
                } else {
                    format!("({})", terms.join(" | "))
                }
            }
            Expr::Resize { operand, width } => {
                let a = self.expr(operand)?;
                format!("(({a}) & {})", m(*width))
            }
            Expr::MemRead { memory, addr, .. } => {
                let a = self.expr(addr)?;
                format!("rd(&c.m[{}], {a})", memory.as_raw())
            }
        })
    }
}

const PRELUDE: &str = r#"use std::cell::Cell;

#[repr(C)]
pub struct RunResult {
    pub cycles_run: u64,
    pub frames_completed: u64,
    pub status: i32,
}

pub struct Ctx {
    s: Vec<u64>,
    m: Vec<Vec<u64>>,
    levels: Vec<bool>,
    fault: Cell<bool>,
}

fn mask(w: u32) -> u64 {
    if w >= 64 { u64::MAX } else { (1u64 << w) - 1 }
}

fn shl(a: u64, b: u64, w: u32) -> u64 {
    if b >= w as u64 { 0 } else { (a << b) & mask(w) }
}

fn shr(a: u64, b: u64, w: u32) -> u64 {
    if b >= w as u64 { 0 } else { a >> b }
}

fn div(f: &Cell<bool>, a: u64, b: u64) -> u64 {
    if b == 0 { f.set(true); 0 } else { a / b }
}

fn rem(f: &Cell<bool>, a: u64, b: u64) -> u64 {
    if b == 0 { f.set(true); 0 } else { a % b }
}

fn rd(mem: &[u64], a: u64) -> u64 {
    if a < mem.len() as u64 { mem[a as usize] } else { 0 }
}

impl Ctx {
    fn new() -> Ctx {
        let mut c = Ctx {
            s: vec![0; SIGNALS],
            m: DEPTHS.iter().map(|d| vec![0; *d]).collect(),
            levels: vec![false; CLOCKS],
            fault: Cell::new(false),
        };
        c.power_on();
        c
    }

    fn power_on(&mut self) {
        for v in self.s.iter_mut() {
            *v = 0;
        }
        for mem in self.m.iter_mut() {
            for w in mem.iter_mut() {
                *w = 0;
            }
        }
        for &(sig, _, _, value) in REGISTERS.iter() {
            self.s[sig] = value;
        }
        self.record();
    }

    fn level(&self, sig: usize) -> bool {
        self.s[sig] & 1 == 1
    }

    fn record(&mut self) {
        for i in 0..CLOCKS {
            self.levels[i] = self.s[CLOCK_SLOTS[i]] & 1 == 1;
        }
    }
}
"#;

const RUNTIME: &str = r#"fn tick(c: &mut Ctx) -> bool {
    if !settle(c) {
        return false;
    }
    let mut updated = [false; REGS];
    for round in 0..=ROUNDS {
        let mut rose = [false; CLOCKS];
        for i in 0..CLOCKS {
            rose[i] = c.level(CLOCK_SLOTS[i]) && !c.levels[i];
        }
        c.fault.set(false);
        let mut samples: Vec<(usize, u64)> = Vec::new();
        for (r, &(_, clk, rst, value)) in REGISTERS.iter().enumerate() {
            if updated[r] {
                continue;
            }
            if round == 0 && rst != NONE && c.level(rst) {
                samples.push((r, value));
            } else if rose[clk] {
                samples.push((r, next(c, r)));
            }
        }
        let mut writes: Vec<(usize, u64, u64)> = Vec::new();
        let mut triggered = false;
        for (p, &(mem, clk)) in PORTS.iter().enumerate() {
            if rose[clk] {
                triggered = true;
                let (en, addr, data) = write(c, p);
                if en != 0 {
                    writes.push((mem, addr, data));
                }
            }
        }
        if c.fault.get() {
            return false;
        }
        if samples.is_empty() && !triggered {
            break;
        }
        c.record();
        for (r, value) in samples {
            c.s[REGISTERS[r].0] = value;
            updated[r] = true;
        }
        for (mem, addr, data) in writes {
            if addr < c.m[mem].len() as u64 {
                c.m[mem][addr as usize] = data;
            }
        }
        if !settle(c) {
            return false;
        }
    }
    c.record();
    true
}

#[no_mangle]
pub extern "C" fn kiln_abi_version() -> u32 {
    ABI_VERSION
}

#[no_mangle]
pub extern "C" fn kiln_signal_count() -> u64 {
    SIGNALS as u64
}

#[no_mangle]
pub unsafe extern "C" fn kiln_signal_index(name: *const u8, len: u64) -> u64 {
    if name.is_null() {
        return u64::MAX;
    }
    let bytes = std::slice::from_raw_parts(name, len as usize);
    match NAMES.iter().position(|n| n.as_bytes() == bytes) {
        Some(i) => i as u64,
        None => u64::MAX,
    }
}

#[no_mangle]
pub extern "C" fn kiln_create() -> *mut Ctx {
    Box::into_raw(Box::new(Ctx::new()))
}

#[no_mangle]
pub unsafe extern "C" fn kiln_destroy(ctx: *mut Ctx) {
    if !ctx.is_null() {
        drop(Box::from_raw(ctx));
    }
}

#[no_mangle]
pub unsafe extern "C" fn kiln_reset(ctx: *mut Ctx) {
    let c = &mut *ctx;
    c.power_on();
}

#[no_mangle]
pub unsafe extern "C" fn kiln_poke(ctx: *mut Ctx, slot: u64, value: u64) -> i32 {
    let c = &mut *ctx;
    let i = slot as usize;
    if i >= SIGNALS {
        return -1;
    }
    c.s[i] = value & mask(WIDTHS[i]);
    0
}

#[no_mangle]
pub unsafe extern "C" fn kiln_peek(ctx: *const Ctx, slot: u64) -> u64 {
    let c = &*ctx;
    c.s.get(slot as usize).copied().unwrap_or(0)
}

#[no_mangle]
pub unsafe extern "C" fn kiln_settle(ctx: *mut Ctx) -> i32 {
    let c = &mut *ctx;
    if !settle(c) {
        return DIV_ZERO;
    }
    c.record();
    0
}

#[no_mangle]
pub unsafe extern "C" fn kiln_tick(ctx: *mut Ctx) -> i32 {
    let c = &mut *ctx;
    if tick(c) { 0 } else { DIV_ZERO }
}

#[no_mangle]
pub unsafe extern "C" fn kiln_run_cycles(ctx: *mut Ctx, n: u64, clock: u64, frame: u64) -> RunResult {
    let c = &mut *ctx;
    let mut out = RunResult { cycles_run: 0, frames_completed: 0, status: 0 };
    let clock = clock as usize;
    let frame = frame as usize;
    if clock >= SIGNALS {
        return out;
    }
    for _ in 0..n {
        let before = frame < SIGNALS && c.level(frame);
        c.s[clock] = 0;
        if !settle(c) {
            out.status = DIV_ZERO;
            return out;
        }
        c.record();
        c.s[clock] = 1;
        if !tick(c) {
            out.status = DIV_ZERO;
            return out;
        }
        out.cycles_run += 1;
        if frame < SIGNALS && c.level(frame) && !before {
            out.frames_completed += 1;
        }
    }
    out
}

#[no_mangle]
pub unsafe extern "C" fn kiln_mem_write(ctx: *mut Ctx, mem: u64, offset: u64, words: *const u64, len: u64) -> i32 {
    let c = &mut *ctx;
    let mem = mem as usize;
    if mem >= c.m.len() {
        return -1;
    }
    let (start, len) = (offset as usize, len as usize);
    if start > c.m[mem].len() || len > c.m[mem].len() - start {
        return -1;
    }
    if len == 0 {
        return 0;
    }
    if words.is_null() {
        return -1;
    }
    let src = std::slice::from_raw_parts(words, len);
    let word_mask = mask(MEM_WIDTHS[mem]);
    for (dst, w) in c.m[mem][start..start + len].iter_mut().zip(src) {
        *dst = *w & word_mask;
    }
    0
}

#[no_mangle]
pub unsafe extern "C" fn kiln_mem_read(ctx: *const Ctx, mem: u64, offset: u64, out: *mut u64, len: u64) -> i32 {
    let c = &*ctx;
    let mem = mem as usize;
    if mem >= c.m.len() {
        return -1;
    }
    let (start, len) = (offset as usize, len as usize);
    if start > c.m[mem].len() || len > c.m[mem].len() - start {
        return -1;
    }
    if len == 0 {
        return 0;
    }
    if out.is_null() {
        return -1;
    }
    let dst = std::slice::from_raw_parts_mut(out, len);
    dst.copy_from_slice(&c.m[mem][start..start + len]);
    0
}

#[no_mangle]
pub extern "C" fn kiln_mem_len(mem: u64) -> u64 {
    match DEPTHS.get(mem as usize) {
        Some(d) => *d as u64,
        None => u64::MAX,
    }
}
"#;
