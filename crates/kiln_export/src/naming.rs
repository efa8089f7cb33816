//! Identifier legalization shared by the text formats.

use std::collections::HashSet;

use kiln_common::NameTable;
use kiln_ir::Module;

pub(crate) const VERILOG_KEYWORDS: &[&str] = &[
    "always", "and", "assign", "begin", "buf", "case", "casex", "casez", "default", "else", "end",
    "endcase", "endfunction", "endmodule", "for", "function", "if", "initial", "inout", "input",
    "integer", "logic", "module", "negedge", "not", "or", "output", "parameter", "posedge", "reg",
    "signed", "task", "wire", "xor",
];

pub(crate) const FIRRTL_KEYWORDS: &[&str] = &[
    "circuit", "cmem", "connect", "else", "infer", "input", "inst", "mem", "module", "mport",
    "node", "of", "output", "read", "reg", "regreset", "skip", "when", "wire", "write",
];

/// Maps a kiln name onto `[A-Za-z_][A-Za-z0-9_]*`.
///
/// Hierarchy dots become `__`; any other illegal character becomes `_`.
pub(crate) fn sanitize(raw: &str, keywords: &[&str]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '.' => out.push_str("__"),
            c if c.is_ascii_alphanumeric() || c == '_' => out.push(c),
            _ => out.push('_'),
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if keywords.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

/// Hands out unique legal identifiers within one module.
pub(crate) struct Namer {
    used: HashSet<String>,
    keywords: &'static [&'static str],
    temps: usize,
}

impl Namer {
    pub(crate) fn new(keywords: &'static [&'static str]) -> Self {
        Self {
            used: HashSet::new(),
            keywords,
            temps: 0,
        }
    }

    /// Legalizes `raw`, appending `_1`, `_2`, ... until it is unique.
    pub(crate) fn claim(&mut self, raw: &str) -> String {
        let base = sanitize(raw, self.keywords);
        let mut name = base.clone();
        let mut n = 1;
        while !self.used.insert(name.clone()) {
            name = format!("{base}_{n}");
            n += 1;
        }
        name
    }

    /// A fresh temporary named `{prefix}{n}`.
    pub(crate) fn temp(&mut self, prefix: &str) -> String {
        let raw = format!("{prefix}{}", self.temps);
        self.temps += 1;
        self.claim(&raw)
    }
}

/// Legal names for every signal and then every memory of `module`.
///
/// Deterministic, so a parent can recompute a child's port names.
pub(crate) fn module_names(
    module: &Module,
    names: &NameTable,
    keywords: &'static [&'static str],
) -> (Namer, Vec<String>, Vec<String>) {
    let mut namer = Namer::new(keywords);
    let signals = module
        .signals
        .values()
        .map(|s| namer.claim(names.resolve(s.name)))
        .collect();
    let memories = module
        .memories
        .values()
        .map(|m| namer.claim(names.resolve(m.name)))
        .collect();
    (namer, signals, memories)
}
