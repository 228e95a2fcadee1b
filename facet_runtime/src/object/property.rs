//! Property attributes and descriptors.

// =============================================================================
// Property Flags
// =============================================================================

bitflags::bitflags! {
    /// Property descriptor attributes.
    ///
    /// A flag value without [`PropertyFlags::VALID`] set is "invalid": it
    /// carries no information and is used where a caller may have no flags
    /// to offer (see `HiddenClass::find_property`). Every real property
    /// carries `VALID`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u8 {
        /// Property appears in for-in enumeration.
        const ENUMERABLE = 1 << 0;
        /// Property value can be changed.
        const WRITABLE = 1 << 1;
        /// Property can be deleted or have attributes changed.
        const CONFIGURABLE = 1 << 2;
        /// Property is a getter/setter pair rather than a data slot.
        const ACCESSOR = 1 << 3;
        /// Stores to the property trap into the runtime.
        const INTERNAL_SETTER = 1 << 4;
        /// Marks the value as carrying real flags.
        const VALID = 1 << 5;
    }
}

impl PropertyFlags {
    /// The invalid value: no information.
    #[inline]
    pub const fn invalid() -> Self {
        Self::empty()
    }

    /// Default flags for a newly defined named property.
    #[inline]
    pub const fn default_new() -> Self {
        Self::VALID
            .union(Self::ENUMERABLE)
            .union(Self::WRITABLE)
            .union(Self::CONFIGURABLE)
    }

    /// Flags for a non-writable, non-configurable, non-enumerable property.
    #[inline]
    pub const fn frozen() -> Self {
        Self::VALID
    }

    /// Check whether this value carries real flags.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.contains(Self::VALID)
    }

    /// Check if the property is enumerable.
    #[inline]
    pub const fn is_enumerable(self) -> bool {
        self.contains(Self::ENUMERABLE)
    }

    /// Check if the property is writable.
    #[inline]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Check if the property is configurable.
    #[inline]
    pub const fn is_configurable(self) -> bool {
        self.contains(Self::CONFIGURABLE)
    }

    /// Check if the property is an accessor.
    #[inline]
    pub const fn is_accessor(self) -> bool {
        self.contains(Self::ACCESSOR)
    }
}

// =============================================================================
// Property Descriptor
// =============================================================================

/// Offset of a property value in the owning object's property storage.
pub type SlotIndex = u32;

/// Describes one named property: where its value lives and its attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedPropertyDescriptor {
    /// Slot index in the object's property storage.
    pub slot: SlotIndex,
    /// Property attribute flags.
    pub flags: PropertyFlags,
}

impl NamedPropertyDescriptor {
    /// Create a descriptor.
    #[inline]
    pub fn new(slot: SlotIndex, flags: PropertyFlags) -> Self {
        debug_assert!(flags.is_valid(), "descriptor flags must be valid");
        Self { slot, flags }
    }
}

impl Default for NamedPropertyDescriptor {
    fn default() -> Self {
        Self {
            slot: 0,
            flags: PropertyFlags::invalid(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
