//! Symbol interning.
//!
//! A `SymbolTable` maps property-name strings to dense `SymbolID`s. Interning
//! the same string twice yields the same identifier, so equality and hashing
//! of names never touch string data again.
//!
//! Two identifier values are reserved and never returned by `intern`:
//! [`SymbolID::EMPTY`] and [`SymbolID::DELETED`]. Hash tables keyed on
//! `SymbolID` use them as the vacant and tombstone markers.

use rustc_hash::FxHashMap;
use std::sync::Arc;

// =============================================================================
// Symbol ID
// =============================================================================

/// An opaque identifier for an interned property name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SymbolID(u32);

impl SymbolID {
    /// Sentinel for vacant hash-table slots. Never assigned to a real symbol.
    pub const EMPTY: Self = Self(u32::MAX);

    /// Sentinel for deleted hash-table slots. Never assigned to a real symbol.
    pub const DELETED: Self = Self(u32::MAX - 1);

    /// Largest identifier `intern` may hand out.
    pub const MAX_VALID: u32 = u32::MAX - 2;

    /// Check that this is a real symbol, not a reserved sentinel.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 <= Self::MAX_VALID
    }

    /// Get the raw value. Only meaningful as a hash key.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

// =============================================================================
// Symbol Table
// =============================================================================

/// Per-symbol data stored by the table.
struct SymbolInfo {
    /// The interned name.
    text: Arc<str>,
    /// Whether the name is a canonical non-negative integer (see
    /// [`SymbolTable::is_index_like`]). Computed once at intern time.
    index_like: bool,
}

/// Interns property-name strings into dense `SymbolID`s.
///
/// The table is append-only: symbols are never removed, so a `SymbolID` stays
/// valid for the table's lifetime.
pub struct SymbolTable {
    map: FxHashMap<Arc<str>, SymbolID>,
    symbols: Vec<SymbolInfo>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            map: FxHashMap::default(),
            symbols: Vec::new(),
        }
    }

    /// Intern a name, returning the existing identifier if already present.
    pub fn intern(&mut self, name: &str) -> SymbolID {
        if let Some(&id) = self.map.get(name) {
            return id;
        }
        assert!(
            self.symbols.len() as u64 <= SymbolID::MAX_VALID as u64,
            "symbol table overflow"
        );
        let id = SymbolID(self.symbols.len() as u32);
        let text: Arc<str> = Arc::from(name);
        self.symbols.push(SymbolInfo {
            text: Arc::clone(&text),
            index_like: str_is_index_like(name),
        });
        self.map.insert(text, id);
        id
    }

    /// Get the string for a symbol.
    ///
    /// Panics if `id` is a sentinel or from another table.
    pub fn name(&self, id: SymbolID) -> &str {
        &self.symbols[id.0 as usize].text
    }

    /// Whether the symbol's name parses as a canonical array index: base-10,
    /// non-negative, no leading zeros (except `"0"` itself), fitting in `u32`.
    pub fn is_index_like(&self, id: SymbolID) -> bool {
        self.symbols[id.0 as usize].index_like
    }

    /// Number of interned symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical-index test on the raw string.
fn str_is_index_like(s: &str) -> bool {
    if s.is_empty() || s.len() > 10 {
        return false;
    }
    if s.len() > 1 && s.starts_with('0') {
        return false;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    s.parse::<u32>().is_ok()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedup() {
        let mut table = SymbolTable::new();
        let a = table.intern("x");
        let b = table.intern("y");
        let c = table.intern("x");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_name_roundtrip() {
        let mut table = SymbolTable::new();
        let id = table.intern("hello");
        assert_eq!(table.name(id), "hello");
    }

    #[test]
    fn test_sentinels_invalid() {
        assert!(!SymbolID::EMPTY.is_valid());
        assert!(!SymbolID::DELETED.is_valid());
        assert_ne!(SymbolID::EMPTY, SymbolID::DELETED);
    }

    #[test]
    fn test_interned_ids_valid() {
        let mut table = SymbolTable::new();
        for i in 0..100 {
            let id = table.intern(&format!("sym{}", i));
            assert!(id.is_valid());
        }
    }

    #[test]
    fn test_index_like() {
        let mut table = SymbolTable::new();
        let zero = table.intern("0");
        let one = table.intern("1");
        let big = table.intern("4294967295");
        assert!(table.is_index_like(zero));
        assert!(table.is_index_like(one));
        assert!(table.is_index_like(big));

        let padded = table.intern("01");
        let negative = table.intern("-1");
        let word = table.intern("length");
        let empty = table.intern("");
        let huge = table.intern("4294967296");
        assert!(!table.is_index_like(padded));
        assert!(!table.is_index_like(negative));
        assert!(!table.is_index_like(word));
        assert!(!table.is_index_like(empty));
        assert!(!table.is_index_like(huge));
    }
}
