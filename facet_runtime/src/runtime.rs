//! The runtime context.
//!
//! Ties together the managed heap and the symbol table. Hidden-class
//! operations that allocate or classify property names take a `&Runtime`.

use facet_core::{SymbolID, SymbolTable};
use facet_gc::{GcConfig, GcHeap, GcRef, GcResult};

use crate::object::hidden_class::HiddenClass;

/// The engine's execution context: heap plus interned names.
///
/// Execution is serialized: one operation runs at a time against a given
/// runtime, so hidden-class operations never race each other.
pub struct Runtime {
    heap: GcHeap,
    symbols: SymbolTable,
}

impl Runtime {
    /// Create a runtime with the default heap configuration.
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Create a runtime with a specific heap configuration.
    pub fn with_config(config: GcConfig) -> Self {
        Self {
            heap: GcHeap::new(config),
            symbols: SymbolTable::new(),
        }
    }

    /// The managed heap.
    #[inline]
    pub fn heap(&self) -> &GcHeap {
        &self.heap
    }

    /// The symbol table.
    #[inline]
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Intern a property name.
    #[inline]
    pub fn intern(&mut self, name: &str) -> SymbolID {
        self.symbols.intern(name)
    }

    /// Create a fresh root hidden class: zero properties, no parent.
    pub fn create_root_class(&self) -> GcResult<GcRef<HiddenClass>> {
        HiddenClass::create_root(self)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_root_class() {
        let rt = Runtime::new();
        let root = rt.create_root_class().unwrap();
        assert_eq!(root.num_properties(), 0);
        assert!(!root.is_dictionary());
    }

    #[test]
    fn test_intern_through_runtime() {
        let mut rt = Runtime::new();
        let a = rt.intern("a");
        let b = rt.intern("a");
        assert_eq!(a, b);
    }
}
