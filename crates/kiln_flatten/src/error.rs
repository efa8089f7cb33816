//! Flattening errors.

use kiln_ir::IrError;

/// Errors raised while resolving an instance hierarchy.
#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    /// The design failed construction checks (bindings, widths, recursion).
    #[error(transparent)]
    Ir(#[from] IrError),

    /// A generated hierarchical name is already used by another entity.
    #[error("flattened name '{name}' is already taken")]
    NameCollision {
        /// The colliding dotted name.
        name: String,
    },
}
