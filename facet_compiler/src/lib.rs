//! Facet ahead-of-time compiler core.
//!
//! This crate provides:
//! - The IR data model and builder (`ir`)
//! - The generic outlining engine over integer streams (`outliner`)
//! - Module-level optimization passes, currently outlining (`opt`)
//!
//! The outliner discovers instruction sequences repeated across the module
//! and factors each into a shared function, replacing every occurrence with
//! a direct call.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod ir;
pub mod opt;
pub mod outliner;

pub use ir::{IrBuilder, Module};
pub use opt::outline::{Outlining, OutliningStats};
pub use opt::{ModulePass, OptimizationSettings, OutliningSettings};
