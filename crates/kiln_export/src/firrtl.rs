//! FIRRTL lowering in single-assignment style.
//!
//! Every non-leaf expression becomes a `node`, and every node is fitted to
//! the kiln result width with `bits` or `pad` so the text computes exactly
//! what the simulators compute (wrapping arithmetic, shifts past the width
//! giving zero). Memories are CHIRRTL `cmem`s with combinational `read
//! mport`s and `when`-guarded `write mport`s.
//!
//! Input ports used only as clocks are typed `Clock`; any other clock source
//! is converted with `asClock` where a register or port needs it.

use std::collections::HashSet;

use kiln_common::{BitVec, NameTable};
use kiln_ir::{BinaryOp, Design, Expr, Module, ModuleId, SignalId, SignalKind, UnaryOp};

use crate::error::ExportError;
use crate::naming::{module_names, sanitize, Namer, FIRRTL_KEYWORDS};

/// Header line naming the language version the output follows.
pub const FIRRTL_VERSION: &str = "FIRRTL version 3.3.0";

/// Lowers the top module and everything it instantiates into one circuit.
pub fn to_firrtl(design: &Design) -> Result<String, ExportError> {
    let top = design.top_id()?;
    let order = design.hierarchy_order(top)?;
    let mut out = format!(
        "{FIRRTL_VERSION}\ncircuit {} :\n",
        sanitize(design.module_name(top), FIRRTL_KEYWORDS)
    );
    for id in &order {
        out.push_str(&emit_module(design, *id)?);
    }
    tracing::debug!(modules = order.len(), bytes = out.len(), "exported firrtl");
    Ok(out)
}

/// Signals typed `Clock`: input ports that drive a register or write port.
fn clock_ports(module: &Module) -> HashSet<SignalId> {
    module
        .clocks()
        .into_iter()
        .filter(|c| module.signals[*c].kind == SignalKind::Input)
        .collect()
}

fn ty(width: u32) -> String {
    format!("UInt<{width}>")
}

fn literal(value: &BitVec) -> String {
    format!("UInt<{}>(0h{})", value.width(), value.to_hex())
}

/// Bits needed to write `value` in binary, at least one.
fn bits_for(value: u32) -> u32 {
    (32 - value.leading_zeros()).max(1)
}

fn emit_module(design: &Design, id: ModuleId) -> Result<String, ExportError> {
    let module = design.module(id)?;
    let names = &design.names;
    let (namer, signals, memories) = module_names(module, names, FIRRTL_KEYWORDS);
    let clocks = clock_ports(module);
    let mut w = Writer {
        module,
        namer,
        signals,
        memories,
        clocks,
        body: Vec::new(),
    };
    w.write(design, names)
}

struct Writer<'a> {
    module: &'a Module,
    namer: Namer,
    signals: Vec<String>,
    memories: Vec<String>,
    clocks: HashSet<SignalId>,
    body: Vec<String>,
}

impl Writer<'_> {
    fn name(&self, id: SignalId) -> &str {
        &self.signals[id.as_raw() as usize]
    }

    /// `id` as a clock.
    fn clock_ref(&self, id: SignalId) -> String {
        if self.clocks.contains(&id) {
            self.name(id).to_string()
        } else {
            format!("asClock({})", self.name(id))
        }
    }

    /// The clock used by combinational read ports.
    fn read_clock(&self) -> String {
        match self.module.clocks().first() {
            Some(c) => self.clock_ref(*c),
            None => "asClock(UInt<1>(0h0))".to_string(),
        }
    }

    fn write(&mut self, design: &Design, names: &NameTable) -> Result<String, ExportError> {
        let module = self.module;
        let mut out = format!(
            "  module {} :\n",
            sanitize(names.resolve(module.name), FIRRTL_KEYWORDS)
        );
        for (id, s) in module.ports() {
            let dir = if s.kind == SignalKind::Input { "input" } else { "output" };
            let t = if self.clocks.contains(&id) {
                "Clock".to_string()
            } else {
                ty(s.width)
            };
            out.push_str(&format!("    {dir} {} : {t}\n", self.name(id)));
        }
        out.push('\n');

        for (id, s) in module.signals.iter() {
            match s.kind {
                SignalKind::Wire => out.push_str(&format!("    wire {} : {}\n", self.name(id), ty(s.width))),
                SignalKind::Register => {
                    let Some(reg) = module.register_for(id) else {
                        continue;
                    };
                    let clock = self.clock_ref(reg.clock);
                    match &reg.reset {
                        Some(reset) => out.push_str(&format!(
                            "    regreset {} : {}, {clock}, {}, {}\n",
                            self.name(id),
                            ty(s.width),
                            self.name(reset.signal),
                            literal(&reset.value)
                        )),
                        None => out.push_str(&format!(
                            "    reg {} : {}, {clock}\n",
                            self.name(id),
                            ty(s.width)
                        )),
                    }
                }
                SignalKind::Input | SignalKind::Output => {}
            }
        }
        for (id, mem) in module.memories.iter() {
            let name = &self.memories[id.as_raw() as usize];
            out.push_str(&format!("    cmem {name} : {}[{}]\n", ty(mem.width), mem.depth));
            if !mem.init.is_empty() {
                out.push_str(&format!("    ; initial contents of {name} are not exported\n"));
            }
        }

        for inst in &module.instances {
            self.instance(design, names, inst)?;
        }
        for assign in &module.assigns {
            let width = module.signals[assign.target].width;
            let value = self.fitted(&assign.value, width)?;
            self.body
                .push(format!("    connect {}, {value}", self.name(assign.target)));
        }
        for reg in &module.registers {
            let width = module.signals[reg.signal].width;
            let next = self.fitted(&reg.next, width)?;
            self.body.push(format!("    connect {}, {next}", self.name(reg.signal)));
        }
        for (id, mem) in module.memories.iter() {
            for port in &mem.write_ports {
                let enable = self.expr(&port.enable)?;
                let enable = if enable.1 == 1 {
                    enable.0
                } else {
                    self.node(format!("orr({})", enable.0))
                };
                let (addr, _) = self.expr(&port.addr)?;
                let data = self.fitted(&port.data, mem.width)?;
                let slot = self.namer.temp("_W_");
                let clock = self.clock_ref(port.clock);
                let name = &self.memories[id.as_raw() as usize];
                self.body.push(format!("    when {enable} :"));
                self.body
                    .push(format!("      write mport {slot} = {name}[{addr}], {clock}"));
                self.body.push(format!("      connect {slot}, {data}"));
            }
        }

        for line in &self.body {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Ok(out)
    }

    fn instance(
        &mut self,
        design: &Design,
        names: &NameTable,
        inst: &kiln_ir::Instance,
    ) -> Result<(), ExportError> {
        let child = design.module(inst.module)?;
        let (_, child_signals, _) = module_names(child, names, FIRRTL_KEYWORDS);
        let child_clocks = clock_ports(child);
        let inst_name = self.namer.claim(names.resolve(inst.name));
        self.body.push(format!(
            "    inst {inst_name} of {}",
            sanitize(names.resolve(child.name), FIRRTL_KEYWORDS)
        ));
        for binding in &inst.bindings {
            let Some(port) = child.find_signal(binding.port) else {
                continue;
            };
            let port_ref = format!("{inst_name}.{}", child_signals[port.as_raw() as usize]);
            if child.signals[port].kind == SignalKind::Input {
                let source = if child_clocks.contains(&port) {
                    self.clock_ref(binding.signal)
                } else {
                    self.data_ref(binding.signal)
                };
                self.body.push(format!("    connect {port_ref}, {source}"));
            } else {
                self.body
                    .push(format!("    connect {}, {port_ref}", self.name(binding.signal)));
            }
        }
        Ok(())
    }

    /// `id` as a `UInt` value.
    fn data_ref(&self, id: SignalId) -> String {
        if self.clocks.contains(&id) {
            format!("asUInt({})", self.name(id))
        } else {
            self.name(id).to_string()
        }
    }

    fn node(&mut self, text: String) -> String {
        let name = self.namer.temp("_T_");
        self.body.push(format!("    node {name} = {text}"));
        name
    }

    /// Truncates or zero-extends `value` to `to` bits.
    fn fit(&mut self, value: (String, u32), to: u32) -> String {
        let (text, from) = value;
        if from == to {
            text
        } else if to == 0 {
            "UInt<0>(0h0)".to_string()
        } else if from > to {
            self.node(format!("bits({text}, {}, 0)", to - 1))
        } else {
            self.node(format!("pad({text}, {to})"))
        }
    }

    fn fitted(&mut self, expr: &Expr, to: u32) -> Result<String, ExportError> {
        let value = self.expr(expr)?;
        Ok(self.fit(value, to))
    }

    /// Lowers `expr` to a leaf or node name and its width.
    fn expr(&mut self, expr: &Expr) -> Result<(String, u32), ExportError> {
        let width = expr.width();
        Ok(match expr {
            Expr::Signal { id, .. } => {
                if self.clocks.contains(id) {
                    let text = self.data_ref(*id);
                    (self.node(text), width)
                } else {
                    (self.name(*id).to_string(), width)
                }
            }
            Expr::Literal { value } => (literal(value), width),
            Expr::Unary { op, operand, .. } => {
                let (a, wa) = self.expr(operand)?;
                match op {
                    UnaryOp::Not => {
                        let n = self.node(format!("not({a})"));
                        (self.fit((n, wa), width), width)
                    }
                    UnaryOp::Neg => {
                        let n = self.node(format!("sub({}, {a})", literal(&BitVec::zero(width))));
                        (self.fit((n, width.max(wa) + 1), width), width)
                    }
                    UnaryOp::RedAnd => (self.node(format!("andr({a})")), 1),
                    UnaryOp::RedOr => (self.node(format!("orr({a})")), 1),
                    UnaryOp::RedXor => (self.node(format!("xorr({a})")), 1),
                    UnaryOp::LogicNot => (
                        self.node(format!("eq({a}, {})", literal(&BitVec::zero(wa)))),
                        1,
                    ),
                }
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                let a = self.expr(lhs)?;
                let b = self.expr(rhs)?;
                (self.binary(*op, a, b, width), width)
            }
            Expr::Mux {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let (c, _) = self.expr(cond)?;
                let t = self.fitted(then_expr, width)?;
                let e = self.fitted(else_expr, width)?;
                (self.node(format!("mux({c}, {t}, {e})")), width)
            }
            Expr::Case {
                subject,
                arms,
                default,
                ..
            } => {
                let (s, _) = self.expr(subject)?;
                let mut acc = self.fitted(default, width)?;
                for arm in arms.iter().rev() {
                    let v = self.fitted(&arm.value, width)?;
                    let hit = self.node(format!("eq({s}, {})", literal(&arm.key)));
                    acc = self.node(format!("mux({hit}, {v}, {acc})"));
                }
                (acc, width)
            }
            Expr::Slice { base, high, low } => {
                let (a, _) = self.expr(base)?;
                (self.node(format!("bits({a}, {high}, {low})")), width)
            }
            Expr::Concat { parts, .. } => {
                let mut acc: Option<(String, u32)> = None;
                for part in parts.iter().filter(|p| p.width() > 0) {
                    let (p, wp) = self.expr(part)?;
                    acc = Some(match acc {
                        None => (p, wp),
                        Some((a, wa)) => (self.node(format!("cat({a}, {p})")), wa + wp),
                    });
                }
                acc.unwrap_or_else(|| ("UInt<0>(0h0)".to_string(), 0))
            }
            Expr::Resize { operand, .. } => (self.fitted(operand, width)?, width),
            Expr::MemRead { memory, addr, .. } => {
                let (a, _) = self.expr(addr)?;
                let port = self.namer.temp("_R_");
                let clock = self.read_clock();
                let mem = &self.memories[memory.as_raw() as usize];
                self.body
                    .push(format!("    read mport {port} = {mem}[{a}], {clock}"));
                (port, width)
            }
        })
    }

    fn binary(&mut self, op: BinaryOp, a: (String, u32), b: (String, u32), w: u32) -> String {
        let (wa, wb) = (a.1, b.1);
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                let x = self.fit(a, w);
                let y = self.fit(b, w);
                let (prim, natural) = match op {
                    BinaryOp::Add => ("add", w + 1),
                    BinaryOp::Sub => ("sub", w + 1),
                    _ => ("mul", 2 * w),
                };
                let n = self.node(format!("{prim}({x}, {y})"));
                self.fit((n, natural), w)
            }
            BinaryOp::Div => {
                let n = self.node(format!("div({}, {})", a.0, b.0));
                self.fit((n, wa), w)
            }
            BinaryOp::Rem => {
                let n = self.node(format!("rem({}, {})", a.0, b.0));
                self.fit((n, wa.min(wb)), w)
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                let prim = match op {
                    BinaryOp::And => "and",
                    BinaryOp::Or => "or",
                    _ => "xor",
                };
                let n = self.node(format!("{prim}({}, {})", a.0, b.0));
                self.fit((n, wa.max(wb)), w)
            }
            BinaryOp::Shl => {
                if w == 0 {
                    return "UInt<0>(0h0)".to_string();
                }
                // Bound the dynamic shift so the intermediate stays small,
                // then select zero for amounts of `w` or more.
                let k = bits_for(w - 1);
                let amount = if wb > k {
                    self.node(format!("bits({}, {}, 0)", b.0, k - 1))
                } else {
                    b.0.clone()
                };
                let shifted = self.node(format!("dshl({}, {amount})", a.0));
                let natural = wa + (1u32 << k.min(wb)) - 1;
                let kept = self.fit((shifted, natural), w);
                let limit = BitVec::from_u64(u64::from(w), bits_for(w));
                let over = self.node(format!("geq({}, {})", b.0, literal(&limit)));
                self.node(format!("mux({over}, {}, {kept})", literal(&BitVec::zero(w))))
            }
            BinaryOp::Shr => {
                let n = self.node(format!("dshr({}, {})", a.0, b.0));
                self.fit((n, wa), w)
            }
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => {
                let prim = match op {
                    BinaryOp::Eq => "eq",
                    BinaryOp::Ne => "neq",
                    BinaryOp::Lt => "lt",
                    BinaryOp::Le => "leq",
                    BinaryOp::Gt => "gt",
                    _ => "geq",
                };
                self.node(format!("{prim}({}, {})", a.0, b.0))
            }
            BinaryOp::LogicAnd | BinaryOp::LogicOr => {
                let x = self.node(format!("orr({})", a.0));
                let y = self.node(format!("orr({})", b.0));
                let prim = if op == BinaryOp::LogicAnd { "and" } else { "or" };
                self.node(format!("{prim}({x}, {y})"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_ir::ModuleBuilder;

    fn counter(design: &mut Design) -> ModuleId {
        let mut b = ModuleBuilder::new("counter");
        let clk = b.input("clk", 1);
        let rst = b.input("rst", 1);
        let q = b.output("q", 4);
        let count = b.register("count", 4, clk);
        b.reset(count, rst, 0);
        b.next(count, b.sig(count) + Expr::lit(1, 4));
        b.assign(q, b.sig(count));
        let m = b.build(&mut design.names).unwrap();
        design.add_module(m)
    }

    #[test]
    fn counter_circuit_shape() {
        let mut design = Design::new();
        let id = counter(&mut design);
        design.set_top(id);
        let text = to_firrtl(&design).unwrap();
        assert!(text.starts_with("FIRRTL version 3.3.0\ncircuit counter :\n  module counter :\n"));
        assert!(text.contains("    input clk : Clock\n"));
        assert!(text.contains("    input rst : UInt<1>\n"));
        assert!(text.contains("    output q : UInt<4>\n"));
        assert!(text.contains("    regreset count : UInt<4>, clk, rst, UInt<4>(0h0)\n"));
        assert!(text.contains("    node _T_0 = add(count, UInt<4>(0h1))\n"));
        assert!(text.contains("    node _T_1 = bits(_T_0, 3, 0)\n"));
        assert!(text.contains("    connect count, _T_1\n"));
        assert!(text.contains("    connect q, count\n"));
    }

    #[test]
    fn requires_a_top_module() {
        let mut design = Design::new();
        counter(&mut design);
        assert!(matches!(to_firrtl(&design), Err(ExportError::Ir(_))));
    }

    #[test]
    fn instances_connect_by_direction() {
        let mut design = Design::new();
        let child = counter(&mut design);
        let mut b = ModuleBuilder::new("top");
        let clk = b.input("clk", 1);
        let rst = b.input("rst", 1);
        let a = b.output("a", 4);
        b.instance("u0", child, &[("clk", clk), ("rst", rst), ("q", a)]);
        let m = b.build(&mut design.names).unwrap();
        let top = design.add_module(m);
        design.set_top(top);
        let text = to_firrtl(&design).unwrap();
        assert!(text.contains("circuit top :"));
        assert!(text.find("  module counter :").unwrap() < text.find("  module top :").unwrap());
        assert!(text.contains("    inst u0 of counter\n"));
        assert!(text.contains("    connect u0.clk, asClock(clk)\n"));
        assert!(text.contains("    connect u0.rst, rst\n"));
        assert!(text.contains("    connect a, u0.q\n"));
    }

    #[test]
    fn memories_use_mports() {
        let mut design = Design::new();
        let mut b = ModuleBuilder::new("ram");
        let clk = b.input("clk", 1);
        let we = b.input("we", 1);
        let addr = b.input("addr", 2);
        let d = b.input("d", 8);
        let q = b.output("q", 8);
        let mem = b.memory("store", 8, 4);
        b.write_port(mem, clk, b.sig(we), b.sig(addr), b.sig(d));
        b.assign(q, b.read(mem, b.sig(addr)));
        let m = b.build(&mut design.names).unwrap();
        let id = design.add_module(m);
        design.set_top(id);
        let text = to_firrtl(&design).unwrap();
        assert!(text.contains("    cmem store : UInt<8>[4]\n"));
        assert!(text.contains("    read mport _R_0 = store[addr], clk\n"));
        assert!(text.contains("    connect q, _R_0\n"));
        assert!(text.contains("    when we :\n      write mport _W_1 = store[addr], clk\n      connect _W_1, d\n"));
    }

    #[test]
    fn keyword_names_are_escaped() {
        let mut design = Design::new();
        let mut b = ModuleBuilder::new("when");
        let clk = b.input("clk", 1);
        let node = b.input("node", 2);
        let reg = b.output("reg", 8);
        let mem = b.memory("mem", 8, 4);
        b.write_port(mem, clk, Expr::lit(1, 1), b.sig(node), Expr::lit(7, 8));
        b.assign(reg, b.read(mem, b.sig(node)));
        let m = b.build(&mut design.names).unwrap();
        let id = design.add_module(m);
        design.set_top(id);
        let text = to_firrtl(&design).unwrap();
        assert!(text.contains("module when_ :"));
        assert!(text.contains("    input node_ : UInt<2>\n"));
        assert!(text.contains("    output reg_ : UInt<8>\n"));
        assert!(text.contains("    cmem mem_ : UInt<8>[4]\n"));
        assert!(text.contains("= mem_[node_], clk\n"));
        assert!(!text.contains(" mem[") && !text.contains("cmem mem :"));
    }

    #[test]
    fn shifts_saturate_to_zero() {
        let mut design = Design::new();
        let mut b = ModuleBuilder::new("sh");
        let a = b.input("a", 8);
        let s = b.input("s", 8);
        let y = b.output("y", 8);
        b.assign(y, b.sig(a) << b.sig(s));
        let m = b.build(&mut design.names).unwrap();
        let id = design.add_module(m);
        design.set_top(id);
        let text = to_firrtl(&design).unwrap();
        assert!(text.contains("node _T_0 = bits(s, 2, 0)"));
        assert!(text.contains("node _T_1 = dshl(a, _T_0)"));
        assert!(text.contains("node _T_2 = bits(_T_1, 7, 0)"));
        assert!(text.contains("node _T_3 = geq(s, UInt<4>(0h8))"));
        assert!(text.contains("node _T_4 = mux(_T_3, UInt<8>(0h00), _T_2)"));
    }
}
