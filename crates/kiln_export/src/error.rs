//! Export error types.

use kiln_flatten::FlattenError;
use kiln_ir::IrError;

/// Errors raised while lowering a design to text.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The design is malformed or has no top module.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// Flattening for hierarchical export failed.
    #[error(transparent)]
    Flatten(#[from] FlattenError),

    /// The target format cannot express a construct.
    #[error("cannot export '{name}' to {format}: {reason}")]
    Unsupported {
        /// Target format name.
        format: &'static str,
        /// The offending signal or memory.
        name: String,
        /// What the format lacks.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_display() {
        let e = ExportError::Unsupported {
            format: "verilog",
            name: "empty".into(),
            reason: "zero-width signals have no declaration".into(),
        };
        assert_eq!(
            e.to_string(),
            "cannot export 'empty' to verilog: zero-width signals have no declaration"
        );
    }

    #[test]
    fn ir_errors_pass_through() {
        let e = ExportError::from(IrError::NoTopModule);
        assert_eq!(e.to_string(), IrError::NoTopModule.to_string());
    }
}
