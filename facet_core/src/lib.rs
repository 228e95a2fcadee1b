//! Core support types for the Facet engine.
//!
//! This crate provides:
//! - Symbol interning (`SymbolTable`, `SymbolID`)
//!
//! Property names are interned once and referred to by `SymbolID` everywhere
//! else in the engine, so name comparison is an integer compare and hash
//! tables can key directly on the identifier.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod intern;

pub use intern::{SymbolID, SymbolTable};
