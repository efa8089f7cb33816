//! Verilog-2001 lowering.
//!
//! Each definition becomes one `module`. Combinational targets get one
//! continuous `assign`, registers and memory write ports share one
//! `always @(posedge clk)` block per clock, and synchronous resets are
//! written as `if (rst) r <= v; else r <= next;`. Verilog cannot select bits
//! of an arbitrary expression, so slices and truncations of non-signal
//! operands go through a `wire` temporary.

use kiln_common::{BitVec, NameTable};
use kiln_ir::{BinaryOp, Design, Expr, Module, SignalKind, UnaryOp};

use crate::error::ExportError;
use crate::naming::{module_names, sanitize, Namer, VERILOG_KEYWORDS};

const FORMAT: &str = "verilog";

/// Lowers every definition reachable from the top module, children first.
///
/// Without a top module every definition is emitted in declaration order.
pub fn to_verilog(design: &Design) -> Result<String, ExportError> {
    let order = match design.top {
        Some(top) => design.hierarchy_order(top)?,
        None => design.modules.ids().collect(),
    };
    let mut out = String::new();
    for (i, id) in order.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&emit_module(design.module(*id)?, &design.names, Some(design))?);
    }
    tracing::debug!(modules = order.len(), bytes = out.len(), "exported verilog");
    Ok(out)
}

/// Flattens the design and lowers it as one self-contained module.
///
/// Hierarchical names keep their path with `.` written as `__`.
pub fn to_verilog_hierarchical(design: &Design) -> Result<String, ExportError> {
    let flat = kiln_flatten::flatten(design)?;
    let netlist = &flat.netlist;
    let mut out = format!(
        "// {} flattened from {} definitions\n",
        netlist.names().resolve(netlist.module().name),
        design.hierarchy_order(design.top_id()?)?.len()
    );
    out.push_str(&emit_module(netlist.module(), netlist.names(), None)?);
    tracing::debug!(
        signals = netlist.module().signals.len(),
        bytes = out.len(),
        "exported hierarchical verilog"
    );
    Ok(out)
}

/// Lowers one definition. `design` resolves instantiated definitions.
pub fn emit_module(
    module: &Module,
    names: &NameTable,
    design: Option<&Design>,
) -> Result<String, ExportError> {
    let (namer, signals, memories) = module_names(module, names, VERILOG_KEYWORDS);
    let mut w = Writer {
        module,
        namer,
        signals,
        memories,
        body: Vec::new(),
    };
    w.write(names, design)
}

struct Writer<'a> {
    module: &'a Module,
    namer: Namer,
    signals: Vec<String>,
    memories: Vec<String>,
    body: Vec<String>,
}

fn range(width: u32) -> String {
    if width == 1 {
        String::new()
    } else {
        format!("[{}:0] ", width - 1)
    }
}

fn literal(value: &BitVec) -> String {
    format!("{}'h{}", value.width().max(1), value.to_hex())
}

impl Writer<'_> {
    fn write(&mut self, names: &NameTable, design: Option<&Design>) -> Result<String, ExportError> {
        let module = self.module;
        let mut out = String::new();
        let ports: Vec<String> = module
            .ports()
            .map(|(id, s)| {
                let dir = if s.kind == SignalKind::Input { "input" } else { "output" };
                format!("    {dir} {}{}", range(s.width), self.signals[id.as_raw() as usize])
            })
            .collect();
        out.push_str(&format!(
            "module {} (\n{}\n);\n",
            sanitize(names.resolve(module.name), VERILOG_KEYWORDS),
            ports.join(",\n")
        ));

        let mut decls = Vec::new();
        for (id, s) in module.signals.iter() {
            let name = &self.signals[id.as_raw() as usize];
            if s.width == 0 {
                return Err(ExportError::Unsupported {
                    format: FORMAT,
                    name: names.resolve(s.name).to_string(),
                    reason: "zero-width signals have no declaration".into(),
                });
            }
            match s.kind {
                SignalKind::Input | SignalKind::Output => {}
                SignalKind::Wire => decls.push(format!("    wire {}{name};", range(s.width))),
                SignalKind::Register => {
                    let init = module
                        .register_for(id)
                        .map(|r| r.initial_value(s.width))
                        .filter(|v| !v.is_zero());
                    match init {
                        Some(v) => decls.push(format!("    reg {}{name} = {};", range(s.width), literal(&v))),
                        None => decls.push(format!("    reg {}{name};", range(s.width))),
                    }
                }
            }
        }
        for (id, mem) in module.memories.iter() {
            let name = &self.memories[id.as_raw() as usize];
            decls.push(format!(
                "    reg {}{name} [0:{}];",
                range(mem.width),
                mem.depth.saturating_sub(1)
            ));
        }
        if !decls.is_empty() {
            out.push('\n');
            for d in decls {
                out.push_str(&d);
                out.push('\n');
            }
        }

        for (id, mem) in module.memories.iter() {
            if mem.init.is_empty() {
                continue;
            }
            let name = &self.memories[id.as_raw() as usize];
            self.body.push("    initial begin".into());
            for (addr, word) in mem.init.iter().enumerate() {
                self.body.push(format!(
                    "        {name}[{addr}] = {};",
                    literal(&BitVec::from_u64(*word, mem.width))
                ));
            }
            self.body.push("    end".into());
        }

        for assign in &module.assigns {
            let value = self.expr(&assign.value)?;
            let target = self.signals[assign.target.as_raw() as usize].clone();
            self.body.push(format!("    assign {target} = {value};"));
        }

        for clock in module.clocks() {
            let mut stmts = Vec::new();
            for reg in module.registers.iter().filter(|r| r.clock == clock) {
                let target = self.signals[reg.signal.as_raw() as usize].clone();
                let next = self.expr(&reg.next)?;
                match &reg.reset {
                    Some(reset) => {
                        let rst = self.signals[reset.signal.as_raw() as usize].clone();
                        stmts.push(format!("        if ({rst}) {target} <= {};", literal(&reset.value)));
                        stmts.push(format!("        else {target} <= {next};"));
                    }
                    None => stmts.push(format!("        {target} <= {next};")),
                }
            }
            for (id, mem) in module.memories.iter() {
                for port in mem.write_ports.iter().filter(|p| p.clock == clock) {
                    let name = self.memories[id.as_raw() as usize].clone();
                    let enable = self.expr(&port.enable)?;
                    let addr = self.expr(&port.addr)?;
                    let data = self.expr(&port.data)?;
                    stmts.push(format!("        if ({enable}) {name}[{addr}] <= {data};"));
                }
            }
            self.body.push(format!(
                "    always @(posedge {}) begin",
                self.signals[clock.as_raw() as usize]
            ));
            self.body.append(&mut stmts);
            self.body.push("    end".into());
        }

        if let Some(design) = design {
            for inst in &module.instances {
                let child = design.module(inst.module)?;
                let (_, child_signals, _) = module_names(child, names, VERILOG_KEYWORDS);
                let conns: Vec<String> = inst
                    .bindings
                    .iter()
                    .filter_map(|b| {
                        let port = child.find_signal(b.port)?;
                        Some(format!(
                            ".{}({})",
                            child_signals[port.as_raw() as usize],
                            self.signals[b.signal.as_raw() as usize]
                        ))
                    })
                    .collect();
                self.body.push(format!(
                    "    {} {} ({});",
                    sanitize(names.resolve(child.name), VERILOG_KEYWORDS),
                    sanitize(names.resolve(inst.name), VERILOG_KEYWORDS),
                    conns.join(", ")
                ));
            }
        }

        if !self.body.is_empty() {
            out.push('\n');
            for line in &self.body {
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str("endmodule\n");
        Ok(out)
    }

    /// A plain identifier holding `expr`, hoisting it into a wire if needed.
    fn operand(&mut self, expr: &Expr) -> Result<String, ExportError> {
        if let Expr::Signal { id, .. } = expr {
            return Ok(self.signals[id.as_raw() as usize].clone());
        }
        let text = self.expr(expr)?;
        let name = self.namer.temp("_t");
        self.body
            .push(format!("    wire {}{name} = {text};", range(expr.width().max(1))));
        Ok(name)
    }

    fn select(&mut self, base: &Expr, high: u32, low: u32) -> Result<String, ExportError> {
        let name = self.operand(base)?;
        Ok(if base.width() <= 1 {
            name
        } else if high == low {
            format!("{name}[{high}]")
        } else {
            format!("{name}[{high}:{low}]")
        })
    }

    fn expr(&mut self, expr: &Expr) -> Result<String, ExportError> {
        Ok(match expr {
            Expr::Signal { id, .. } => self.signals[id.as_raw() as usize].clone(),
            Expr::Literal { value } => literal(value),
            Expr::Unary { op, operand, .. } => {
                let a = self.expr(operand)?;
                let sym = match op {
                    UnaryOp::Not => "~",
                    UnaryOp::Neg => "-",
                    UnaryOp::RedAnd => "&",
                    UnaryOp::RedOr => "|",
                    UnaryOp::RedXor => "^",
                    UnaryOp::LogicNot => "!",
                };
                format!("({sym}{a})")
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                let a = self.expr(lhs)?;
                let b = self.expr(rhs)?;
                format!("({a} {} {b})", binary_symbol(*op))
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
                format!("({c} ? {t} : {e})")
            }
            Expr::Case {
                subject,
                arms,
                default,
                ..
            } => {
                let s = self.operand(subject)?;
                let mut text = self.expr(default)?;
                for arm in arms.iter().rev() {
                    let v = self.expr(&arm.value)?;
                    text = format!("(({s} == {}) ? {v} : {text})", literal(&arm.key));
                }
                text
            }
            Expr::Slice { base, high, low } => self.select(base, *high, *low)?,
            Expr::Concat { parts, .. } => {
                let mut texts = Vec::new();
                for part in parts.iter().filter(|p| p.width() > 0) {
                    texts.push(self.expr(part)?);
                }
                match texts.len() {
                    0 => "1'h0".to_string(),
                    1 => texts.remove(0),
                    _ => format!("{{{}}}", texts.join(", ")),
                }
            }
            Expr::Resize { operand, width } => {
                let from = operand.width();
                if *width == from {
                    self.expr(operand)?
                } else if *width > from {
                    let x = self.expr(operand)?;
                    if from == 0 {
                        literal(&BitVec::zero(*width))
                    } else {
                        format!("{{{{{}{{1'b0}}}}, {x}}}", width - from)
                    }
                } else if *width == 0 {
                    "1'h0".to_string()
                } else {
                    self.select(operand, width - 1, 0)?
                }
            }
            Expr::MemRead { memory, addr, .. } => {
                let a = self.expr(addr)?;
                format!("{}[{a}]", self.memories[memory.as_raw() as usize])
            }
        })
    }
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::And => "&",
        BinaryOp::Or => "|",
        BinaryOp::Xor => "^",
        BinaryOp::Shl => "<<",
        BinaryOp::Shr => ">>",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::LogicAnd => "&&",
        BinaryOp::LogicOr => "||",
    }
}
