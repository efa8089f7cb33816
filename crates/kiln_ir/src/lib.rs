//! Netlist IR for the kiln simulation toolchain.
//!
//! A [`Design`] holds [`Module`] definitions built with a [`ModuleBuilder`]:
//! ports, nets, and registers, an ordered list of combinational assignments,
//! clocked register updates, memories, and sub-module [`Instance`]s. Every
//! expression carries its width, and [`check`] rejects malformed IR before
//! it reaches a backend. A [`Netlist`] is the flat, instance-free form that
//! backends execute.

#![warn(missing_docs)]

pub mod arena;
pub mod builder;
pub mod check;
pub mod design;
pub mod error;
pub mod expr;
pub mod ids;
pub mod library;
pub mod module;
pub mod netlist;

pub use arena::{Arena, ArenaId};
pub use builder::ModuleBuilder;
pub use check::{check_expr, check_instances, check_module, feedback_warnings, FeedbackWarning};
pub use design::Design;
pub use error::IrError;
pub use expr::{BinaryOp, CaseArm, Expr, UnaryOp};
pub use ids::{MemoryId, ModuleId, SignalId};
pub use library::ModuleLibrary;
pub use module::{
    Assign, Binding, Instance, Memory, Module, Register, Reset, Signal, SignalKind, WritePort,
};
pub use netlist::Netlist;
