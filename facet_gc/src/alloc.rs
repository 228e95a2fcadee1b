//! Heap, references, and allocation accounting.
//!
//! [`GcHeap::alloc`] places a value behind a shared [`GcRef`] and charges the
//! heap for it. The charge is released when the last strong reference drops.
//! [`GcWeak`] references do not keep a cell alive and do not hold a charge.

use crate::config::GcConfig;
use crate::stats::GcStats;

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

// =============================================================================
// Errors
// =============================================================================

/// Allocation failed because the heap limit would be exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("out of memory: heap limit exceeded")]
pub struct OutOfMemory;

/// Result of an operation that may allocate.
pub type GcResult<T> = Result<T, OutOfMemory>;

// =============================================================================
// Cell Trait
// =============================================================================

/// A type that can live on the managed heap.
pub trait GcCell {
    /// Bytes of out-of-line memory owned by this cell (tables, caches).
    ///
    /// Queried once, at allocation time, and charged against the heap
    /// together with the cell's own size. Cells whose footprint grows later
    /// keep the original charge; the number feeds accounting, not layout.
    fn malloc_size(&self) -> usize {
        0
    }
}

// =============================================================================
// Heap Cell Box
// =============================================================================

/// Heap cell: the value plus its accounting record.
struct GcBox<T: GcCell> {
    value: T,
    /// Heap the cell was charged against. Weak so a leaked cell cannot keep
    /// the heap itself alive.
    heap: Weak<HeapInner>,
    /// Bytes charged at allocation time, released on drop.
    charged: usize,
}

impl<T: GcCell> Drop for GcBox<T> {
    fn drop(&mut self) {
        if let Some(heap) = self.heap.upgrade() {
            heap.release(self.charged);
        }
    }
}

// =============================================================================
// References
// =============================================================================

/// A strong reference to a heap cell. Keeps the cell alive; equality and
/// hashing are by cell identity.
pub struct GcRef<T: GcCell> {
    inner: Arc<GcBox<T>>,
}

impl<T: GcCell> GcRef<T> {
    /// Whether two references point at the same cell.
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Create a weak reference to the same cell.
    #[inline]
    pub fn downgrade(this: &Self) -> GcWeak<T> {
        GcWeak {
            inner: Arc::downgrade(&this.inner),
        }
    }

    /// Cell address, for identity-keyed tables.
    #[inline]
    pub fn as_ptr(this: &Self) -> *const T {
        &this.inner.value as *const T
    }
}

impl<T: GcCell> Clone for GcRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: GcCell> Deref for GcRef<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner.value
    }
}

impl<T: GcCell + fmt::Debug> fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({:?})", self.inner.value)
    }
}

impl<T: GcCell> PartialEq for GcRef<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T: GcCell> Eq for GcRef<T> {}

impl<T: GcCell> std::hash::Hash for GcRef<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

/// A weak reference to a heap cell. Does not keep the cell alive.
pub struct GcWeak<T: GcCell> {
    inner: Weak<GcBox<T>>,
}

impl<T: GcCell> GcWeak<T> {
    /// Attempt to obtain a strong reference. `None` once the cell has died.
    #[inline]
    pub fn upgrade(&self) -> Option<GcRef<T>> {
        self.inner.upgrade().map(|inner| GcRef { inner })
    }

    /// Whether the cell is still alive.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<T: GcCell> Clone for GcWeak<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: GcCell> fmt::Debug for GcWeak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_live() {
            write!(f, "GcWeak(live)")
        } else {
            write!(f, "GcWeak(dead)")
        }
    }
}

// =============================================================================
// Heap
// =============================================================================

/// Shared heap state.
struct HeapInner {
    config: GcConfig,
    live_bytes: AtomicUsize,
    stats: GcStats,
}

impl HeapInner {
    fn release(&self, bytes: usize) {
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
        self.stats.record_free(bytes);
    }
}

/// The managed heap: typed allocation with byte accounting.
///
/// Cloning a `GcHeap` clones a handle to the same heap.
#[derive(Clone)]
pub struct GcHeap {
    inner: Arc<HeapInner>,
}

impl GcHeap {
    /// Create a heap with the given configuration.
    pub fn new(config: GcConfig) -> Self {
        Self {
            inner: Arc::new(HeapInner {
                config,
                live_bytes: AtomicUsize::new(0),
                stats: GcStats::new(),
            }),
        }
    }

    /// Allocate a cell, charging the heap for its footprint.
    ///
    /// Fails with [`OutOfMemory`] when the configured limit would be
    /// exceeded. The value is dropped in that case; nothing is charged.
    pub fn alloc<T: GcCell>(&self, value: T) -> GcResult<GcRef<T>> {
        let charged = std::mem::size_of::<GcBox<T>>() + value.malloc_size();
        let limit = self.inner.config.max_heap_bytes;
        if limit != 0 {
            let live = self.inner.live_bytes.load(Ordering::Relaxed);
            if live.saturating_add(charged) > limit {
                tracing::debug!(live, charged, limit, "allocation refused");
                self.inner.stats.record_failure();
                return Err(OutOfMemory);
            }
        }
        self.inner.live_bytes.fetch_add(charged, Ordering::Relaxed);
        self.inner.stats.record_allocation(charged);
        Ok(GcRef {
            inner: Arc::new(GcBox {
                value,
                heap: Arc::downgrade(&self.inner),
                charged,
            }),
        })
    }

    /// Bytes currently charged against the heap.
    pub fn live_bytes(&self) -> usize {
        self.inner.live_bytes.load(Ordering::Relaxed)
    }

    /// Allocation statistics.
    pub fn stats(&self) -> &GcStats {
        &self.inner.stats
    }
}

impl Default for GcHeap {
    fn default() -> Self {
        Self::new(GcConfig::default())
    }
}

// =============================================================================
// Tests
// =============================================================================
