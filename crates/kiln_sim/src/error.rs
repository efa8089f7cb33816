//! Simulation error types.
//!
//! Evaluation errors abort the call that raised them without committing any
//! register or memory state sampled in the same edge round. Backend-boundary
//! errors ([`SimError::BackendUnavailable`]) are a capability report: hosts
//! match on them to choose another backend.

use std::io;

use kiln_common::InternalError;
use kiln_ir::IrError;

/// Errors that can occur during session setup or execution.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A division or remainder had a zero divisor.
    #[error("division by zero")]
    DivisionByZero,

    /// A slice selected bits outside its operand at run time.
    #[error("slice [{high}:{low}] out of range for width {width}")]
    SliceOutOfRange {
        /// Most significant selected bit.
        high: u32,
        /// Least significant selected bit.
        low: u32,
        /// Width of the sliced value.
        width: u32,
    },

    /// The backend cannot execute a construct in this netlist.
    #[error("unsupported: {reason}")]
    Unsupported {
        /// What the backend refused.
        reason: String,
    },

    /// No signal has the given name.
    #[error("unknown signal '{name}'")]
    UnknownSignal {
        /// The requested name.
        name: String,
    },

    /// No memory has the given name.
    #[error("unknown memory '{name}'")]
    UnknownMemory {
        /// The requested name.
        name: String,
    },

    /// Only input ports can be poked.
    #[error("signal '{name}' is not an input port")]
    NotAnInput {
        /// The signal's name.
        name: String,
    },

    /// A bulk transfer reached past the end of a memory.
    #[error("address {addr} out of range for memory '{name}'")]
    MemoryOutOfRange {
        /// Memory name.
        name: String,
        /// First address outside the memory.
        addr: u64,
    },

    /// The backend cannot be used in this environment.
    #[error("backend unavailable: {reason}")]
    BackendUnavailable {
        /// Why the backend cannot run.
        reason: String,
    },

    /// The native model misbehaved after it was loaded.
    #[error("native model error: {reason}")]
    Native {
        /// Description of the failure.
        reason: String,
    },

    /// An I/O error occurred while compiling a model or writing a waveform.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An internal invariant was broken.
    #[error(transparent)]
    Internal(#[from] InternalError),

    /// The netlist was rejected.
    #[error(transparent)]
    Ir(#[from] IrError),
}
