//! Shared foundational types used across the kiln simulation toolchain.
//!
//! This crate provides the two-state bit-vector value model, interned names,
//! content hashing, and common result types.

#![warn(missing_docs)]

pub mod bitvec;
pub mod hash;
pub mod ident;
pub mod result;

pub use bitvec::{mask, BitVec};
pub use hash::ContentHash;
pub use ident::{Ident, NameTable};
pub use result::{InternalError, KilnResult};
