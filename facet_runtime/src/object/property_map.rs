//! Ordered property map.
//!
//! Maps `SymbolID` to `NamedPropertyDescriptor` while preserving insertion
//! order. The map is an ordered entry array plus a linear-probed
//! open-addressed hash index into it; the index uses the reserved
//! `SymbolID` sentinels for vacant and deleted slots.
//!
//! Value slots are handed out sequentially from zero. Removing a property
//! returns its slot to a free pool that later inserts drain before growing
//! `next_slot` again. Hidden classes that are not dictionaries never remove
//! entries, so only dictionaries ever reuse slots.
//!
//! # Position stability
//!
//! A [`PropertyPos`] indexes the entry array. Positions are stable across
//! reads and across inserts: removals leave a tombstone behind rather than
//! shifting entries. A position is invalidated by `remove` of that entry,
//! and by compaction, which runs only during an `insert` once tombstones
//! outnumber live entries.

use facet_core::SymbolID;
use std::hash::{Hash, Hasher};

use super::property::{NamedPropertyDescriptor, PropertyFlags, SlotIndex};

/// Vacant marker in the hash index.
const EMPTY_SLOT: u32 = u32::MAX;
/// Tombstone marker in the hash index.
const DELETED_SLOT: u32 = u32::MAX - 1;

/// Initial hash-index capacity. Must be a power of two.
const INITIAL_CAPACITY: usize = 8;

// =============================================================================
// Property Position
// =============================================================================

/// An opaque reference to a valid entry in a [`PropertyMap`].
///
/// See the module docs for the stability contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyPos(u32);

impl PropertyPos {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// Property Map
// =============================================================================

/// One entry: `name == SymbolID::DELETED` marks a tombstone.
#[derive(Debug, Clone)]
struct Entry {
    name: SymbolID,
    desc: NamedPropertyDescriptor,
}

/// An insertion-ordered mapping from property names to descriptors.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    /// Entries in insertion order, tombstones included.
    entries: Vec<Entry>,
    /// Open-addressed index; values are entry indices.
    table: Vec<u32>,
    /// Live entry count.
    live: u32,
    /// Tombstone count.
    deleted: u32,
    /// Next never-used value slot.
    next_slot: SlotIndex,
    /// Slots freed by `remove`, reused before `next_slot` advances.
    freed_slots: Vec<SlotIndex>,
}

impl PropertyMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live properties.
    #[inline]
    pub fn len(&self) -> usize {
        self.live as usize
    }

    /// Whether the map has no live properties.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Find a property by name.
    pub fn find(&self, name: SymbolID) -> Option<PropertyPos> {
        debug_assert!(name.is_valid(), "cannot look up a sentinel name");
        if self.table.is_empty() {
            return None;
        }
        let mask = self.table.len() - 1;
        let mut idx = hash_symbol(name) & mask;
        loop {
            match self.table[idx] {
                EMPTY_SLOT => return None,
                DELETED_SLOT => {}
                entry => {
                    if self.entries[entry as usize].name == name {
                        return Some(PropertyPos(entry));
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Read the entry at a position.
    ///
    /// Panics if the position has been invalidated by `remove`.
    pub fn get(&self, pos: PropertyPos) -> (SymbolID, NamedPropertyDescriptor) {
        let entry = &self.entries[pos.index()];
        assert!(entry.name.is_valid(), "position refers to a removed property");
        (entry.name, entry.desc)
    }

    /// Replace the flags of the entry at a position. The slot is unchanged.
    pub fn set_flags(&mut self, pos: PropertyPos, flags: PropertyFlags) {
        debug_assert!(flags.is_valid());
        let entry = &mut self.entries[pos.index()];
        assert!(entry.name.is_valid(), "position refers to a removed property");
        entry.desc.flags = flags;
    }

    /// Insert a new property, allocating its value slot.
    ///
    /// The property must not already be present. May compact the map; see
    /// the module docs for what that does to outstanding positions.
    pub fn insert(&mut self, name: SymbolID, flags: PropertyFlags) -> (PropertyPos, SlotIndex) {
        debug_assert!(name.is_valid(), "cannot insert a sentinel name");
        debug_assert!(flags.is_valid(), "cannot insert invalid flags");
        debug_assert!(self.find(name).is_none(), "property already present");

        if self.deleted > self.live {
            self.compact();
        }
        self.ensure_table_space();

        let slot = self.freed_slots.pop().unwrap_or_else(|| {
            let slot = self.next_slot;
            self.next_slot += 1;
            slot
        });

        let entry_index = self.entries.len() as u32;
        self.entries.push(Entry {
            name,
            desc: NamedPropertyDescriptor::new(slot, flags),
        });
        self.live += 1;

        let mask = self.table.len() - 1;
        let mut idx = hash_symbol(name) & mask;
        while self.table[idx] != EMPTY_SLOT && self.table[idx] != DELETED_SLOT {
            idx = (idx + 1) & mask;
        }
        self.table[idx] = entry_index;

        (PropertyPos(entry_index), slot)
    }

    /// Remove the property at a position, freeing its slot for reuse.
    pub fn remove(&mut self, pos: PropertyPos) {
        let name = {
            let entry = &self.entries[pos.index()];
            assert!(entry.name.is_valid(), "position already removed");
            entry.name
        };

        let mask = self.table.len() - 1;
        let mut idx = hash_symbol(name) & mask;
        loop {
            match self.table[idx] {
                EMPTY_SLOT => unreachable!("entry missing from hash index"),
                entry if entry == pos.0 => {
                    self.table[idx] = DELETED_SLOT;
                    break;
                }
                _ => idx = (idx + 1) & mask,
            }
        }

        let entry = &mut self.entries[pos.index()];
        self.freed_slots.push(entry.desc.slot);
        entry.name = SymbolID::DELETED;
        self.live -= 1;
        self.deleted += 1;
    }

    /// Visit every live property in insertion order.
    pub fn for_each<F>(&self, mut callback: F)
    where
        F: FnMut(SymbolID, NamedPropertyDescriptor),
    {
        for entry in &self.entries {
            if entry.name.is_valid() {
                callback(entry.name, entry.desc);
            }
        }
    }

    /// Visit live properties in insertion order until the callback returns
    /// false. Returns false if it did.
    pub fn for_each_while<F>(&self, mut callback: F) -> bool
    where
        F: FnMut(SymbolID, NamedPropertyDescriptor) -> bool,
    {
        for entry in &self.entries {
            if entry.name.is_valid() && !callback(entry.name, entry.desc) {
                return false;
            }
        }
        true
    }

    /// Visit every live property with a mutable descriptor, in insertion
    /// order. Slots must not be changed; only flags are meant to be edited.
    pub fn for_each_mut<F>(&mut self, mut callback: F)
    where
        F: FnMut(SymbolID, &mut NamedPropertyDescriptor),
    {
        for entry in &mut self.entries {
            if entry.name.is_valid() {
                let slot = entry.desc.slot;
                callback(entry.name, &mut entry.desc);
                debug_assert_eq!(entry.desc.slot, slot, "slots are not editable");
            }
        }
    }

    /// Iterate live `(name, descriptor)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (SymbolID, NamedPropertyDescriptor)> + '_ {
        self.entries
            .iter()
            .filter(|e| e.name.is_valid())
            .map(|e| (e.name, e.desc))
    }

    /// Bytes of out-of-line storage held by the map.
    pub fn malloc_size(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
            + self.table.capacity() * std::mem::size_of::<u32>()
            + self.freed_slots.capacity() * std::mem::size_of::<SlotIndex>()
    }

    /// Grow the hash index when it gets crowded (3/4 load).
    fn ensure_table_space(&mut self) {
        let occupied = (self.live + self.deleted) as usize;
        if self.table.is_empty() {
            self.rebuild_table(INITIAL_CAPACITY);
        } else if (occupied + 1) * 4 > self.table.len() * 3 {
            self.rebuild_table(self.table.len() * 2);
        }
    }

    /// Drop tombstoned entries and rebuild the index. Invalidates positions.
    fn compact(&mut self) {
        self.entries.retain(|e| e.name.is_valid());
        self.deleted = 0;
        let capacity = self
            .table
            .len()
            .max(INITIAL_CAPACITY)
            .max((self.live as usize * 2).next_power_of_two());
        self.rebuild_table(capacity);
    }

    fn rebuild_table(&mut self, capacity: usize) {
        debug_assert!(capacity.is_power_of_two());
        self.table.clear();
        self.table.resize(capacity, EMPTY_SLOT);
        let mask = capacity - 1;
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.name.is_valid() {
                continue;
            }
            let mut idx = hash_symbol(entry.name) & mask;
            while self.table[idx] != EMPTY_SLOT {
                idx = (idx + 1) & mask;
            }
            self.table[idx] = i as u32;
        }
    }
}

#[inline]
fn hash_symbol(name: SymbolID) -> usize {
    let mut hasher = rustc_hash::FxHasher::default();
    name.raw().hash(&mut hasher);
    hasher.finish() as usize
}

// =============================================================================
// Tests
// =============================================================================
