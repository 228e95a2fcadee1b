//! Facet allocation facility.
//!
//! The engine's managed heap is reference-counted. That choice shapes the
//! whole interface:
//!
//! - **Strong references are roots.** A [`GcRef`] keeps its cell alive for as
//!   long as the reference exists, so the handle discipline other collectors
//!   need ("pass values through root handles across allocation points") is
//!   carried by the reference type itself.
//!
//! - **Weak slots clear themselves.** A [`GcWeak`] observes death through
//!   `upgrade()` returning `None`; holders purge dead entries when they
//!   observe them instead of registering clearance hooks.
//!
//! - **Accounting replaces collection pressure.** Every cell is charged
//!   against the heap at allocation time: its own size plus whatever
//!   [`GcCell::malloc_size`] reports for out-of-line storage. Allocation
//!   fails with [`OutOfMemory`] once the configured limit would be exceeded,
//!   which is the only error this crate produces.
//!
//! Write barriers are a tracing-collector concern; the hook points are kept
//! (see [`barrier`]) so pointer-update sites stay marked, but they compile
//! to nothing here.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod alloc;
pub mod barrier;
pub mod config;
pub mod stats;

pub use alloc::{GcCell, GcHeap, GcRef, GcResult, GcWeak, OutOfMemory};
pub use config::GcConfig;
pub use stats::GcStats;
