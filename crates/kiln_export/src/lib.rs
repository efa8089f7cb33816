//! One-way lowering of kiln designs to hardware-exchange text.
//!
//! - [`to_verilog`]: one Verilog-2001 `module` per definition.
//! - [`to_firrtl`]: a FIRRTL circuit in single-assignment style, suitable for
//!   cross-checking against independent compilers.
//! - [`to_verilog_hierarchical`]: the flattened design as one self-contained
//!   Verilog module, for tools without separate compilation.
//!
//! Nothing here parses either format back in.

#![warn(missing_docs)]

pub mod error;
pub mod firrtl;
mod naming;
pub mod verilog;

use std::fmt;
use std::str::FromStr;

use kiln_ir::Design;

pub use error::ExportError;
pub use firrtl::to_firrtl;
pub use verilog::{to_verilog, to_verilog_hierarchical};

/// Output format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// Verilog, one module per definition.
    Verilog,
    /// FIRRTL circuit.
    Firrtl,
    /// Flattened single-module Verilog.
    Hierarchical,
}

impl ExportFormat {
    /// Every format.
    pub const ALL: [ExportFormat; 3] = [
        ExportFormat::Verilog,
        ExportFormat::Firrtl,
        ExportFormat::Hierarchical,
    ];

    /// The lowercase name used in configuration and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            ExportFormat::Verilog => "verilog",
            ExportFormat::Firrtl => "firrtl",
            ExportFormat::Hierarchical => "hierarchical",
        }
    }

    /// Conventional file extension.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Verilog | ExportFormat::Hierarchical => "v",
            ExportFormat::Firrtl => "fir",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExportFormat::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| format!("unknown export format '{s}' (expected verilog, firrtl, or hierarchical)"))
    }
}

/// Lowers `design` in the chosen format.
pub fn export(design: &Design, format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Verilog => to_verilog(design),
        ExportFormat::Firrtl => to_firrtl(design),
        ExportFormat::Hierarchical => to_verilog_hierarchical(design),
    }
}
