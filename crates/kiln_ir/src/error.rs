//! Construction errors for the netlist IR.
//!
//! Every variant is fatal: a design that fails a check is never handed to a
//! backend, and nothing is coerced to make it pass.

/// Errors raised while building, checking, or loading a design.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// An expression or connection has the wrong width.
    #[error("width mismatch in {context}: expected {expected}, found {found}")]
    WidthMismatch {
        /// Where the mismatch was found.
        context: String,
        /// Required width.
        expected: u32,
        /// Actual width.
        found: u32,
    },

    /// A signal ID does not belong to the module.
    #[error("unknown signal #{id} in {context}")]
    UnknownSignal {
        /// Raw signal ID.
        id: u32,
        /// Where the reference was found.
        context: String,
    },

    /// A memory ID does not belong to the module.
    #[error("unknown memory #{id} in {context}")]
    UnknownMemory {
        /// Raw memory ID.
        id: u32,
        /// Where the reference was found.
        context: String,
    },

    /// A module ID or name does not exist in the design.
    #[error("unknown module '{name}'")]
    UnknownModule {
        /// Module name or raw ID.
        name: String,
    },

    /// A slice selects bits outside its base.
    #[error("slice [{high}:{low}] out of range for width {width} in {context}")]
    SliceOutOfRange {
        /// Most significant selected bit.
        high: u32,
        /// Least significant selected bit.
        low: u32,
        /// Width of the sliced value.
        width: u32,
        /// Where the slice was found.
        context: String,
    },

    /// A signal is driven in a way its kind does not allow.
    #[error("invalid driver for '{name}': {reason}")]
    InvalidDriver {
        /// Signal name.
        name: String,
        /// Why the driver is not allowed.
        reason: String,
    },

    /// Two entities in one scope share a name.
    #[error("duplicate name '{name}' in module '{module}'")]
    DuplicateName {
        /// The repeated name.
        name: String,
        /// Module being built.
        module: String,
    },

    /// A memory is wider than a machine word or has no words.
    #[error("memory '{name}' has unsupported shape: {reason}")]
    InvalidMemory {
        /// Memory name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An instance binding names a port the child does not have.
    #[error("instance '{instance}' binds unknown port '{port}'")]
    UnknownPort {
        /// Instance name.
        instance: String,
        /// Port name.
        port: String,
    },

    /// A child input port has no binding.
    #[error("instance '{instance}' leaves input '{port}' unbound")]
    UnboundInput {
        /// Instance name.
        instance: String,
        /// Port name.
        port: String,
    },

    /// A port binding is repeated or drives a signal against its direction.
    #[error("instance '{instance}' port '{port}': {reason}")]
    InvalidBinding {
        /// Instance name.
        instance: String,
        /// Port name.
        port: String,
        /// Why the binding is not allowed.
        reason: String,
    },

    /// The instance hierarchy contains a cycle.
    #[error("recursive instantiation of module '{module}'")]
    RecursiveInstance {
        /// A module on the cycle.
        module: String,
    },

    /// The design has no top-level module set.
    #[error("design has no top-level module")]
    NoTopModule,

    /// A design file could not be parsed.
    #[error("invalid design file: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_mismatch_display() {
        let e = IrError::WidthMismatch {
            context: "assign to 'q'".into(),
            expected: 4,
            found: 8,
        };
        assert_eq!(
            e.to_string(),
            "width mismatch in assign to 'q': expected 4, found 8"
        );
    }

    #[test]
    fn unknown_signal_display() {
        let e = IrError::UnknownSignal {
            id: 7,
            context: "module 'top'".into(),
        };
        assert_eq!(e.to_string(), "unknown signal #7 in module 'top'");
    }

    #[test]
    fn slice_out_of_range_display() {
        let e = IrError::SliceOutOfRange {
            high: 9,
            low: 2,
            width: 8,
            context: "assign to 'y'".into(),
        };
        assert_eq!(
            e.to_string(),
            "slice [9:2] out of range for width 8 in assign to 'y'"
        );
    }

    #[test]
    fn unbound_input_display() {
        let e = IrError::UnboundInput {
            instance: "u0".into(),
            port: "a".into(),
        };
        assert_eq!(e.to_string(), "instance 'u0' leaves input 'a' unbound");
    }

    #[test]
    fn unknown_port_display() {
        let e = IrError::UnknownPort {
            instance: "u0".into(),
            port: "zz".into(),
        };
        assert_eq!(e.to_string(), "instance 'u0' binds unknown port 'zz'");
    }

    #[test]
    fn invalid_binding_display() {
        let e = IrError::InvalidBinding {
            instance: "u0".into(),
            port: "q".into(),
            reason: "bound twice".into(),
        };
        assert_eq!(e.to_string(), "instance 'u0' port 'q': bound twice");
    }

    #[test]
    fn invalid_driver_display() {
        let e = IrError::InvalidDriver {
            name: "a".into(),
            reason: "inputs cannot be assigned".into(),
        };
        assert_eq!(
            e.to_string(),
            "invalid driver for 'a': inputs cannot be assigned"
        );
    }

    #[test]
    fn no_top_display() {
        assert_eq!(
            IrError::NoTopModule.to_string(),
            "design has no top-level module"
        );
    }

    #[test]
    fn recursive_display() {
        let e = IrError::RecursiveInstance {
            module: "loop".into(),
        };
        assert_eq!(e.to_string(), "recursive instantiation of module 'loop'");
    }

    #[test]
    fn json_error_display() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(IrError::from(err).to_string().starts_with("invalid design file:"));
    }
}
