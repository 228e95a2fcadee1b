//! Facet object-model runtime.
//!
//! This crate provides the hidden-class system:
//! - Property flags and descriptors (`PropertyFlags`, `NamedPropertyDescriptor`)
//! - The ordered property map (`PropertyMap`)
//! - Hidden classes with shared transition trees (`HiddenClass`)
//! - The runtime context tying the heap and symbol table together (`Runtime`)
//!
//! Objects with the same sequence of property additions share a
//! `HiddenClass`, so property layout is described once per shape instead of
//! once per object, and property offsets can be cached against the class
//! identity.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod object;
pub mod runtime;

pub use object::hidden_class::{ClassFlags, HiddenClass, NameList, Transition};
pub use object::property::{NamedPropertyDescriptor, PropertyFlags, SlotIndex};
pub use object::property_map::{PropertyMap, PropertyPos};
pub use runtime::Runtime;

// Re-export the allocation facility types operations surface.
pub use facet_gc::{GcRef, GcResult, OutOfMemory};
