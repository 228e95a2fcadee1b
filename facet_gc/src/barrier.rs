//! Write-barrier hook points.
//!
//! A tracing collector needs to observe every pointer store into a heap
//! cell. The reference-counted heap does not, but the call sites stay
//! marked so the protocol survives a collector swap: call
//! [`record_pointer_write`] after storing a cell reference into another
//! cell, and [`record_pointer_clear`] after clearing one.

/// Note a cell-reference store into `owner`. No-op under refcounting.
#[inline(always)]
pub fn record_pointer_write(_owner: *const (), _new_value: *const ()) {}

/// Note a cleared cell-reference field in `owner`. No-op under refcounting.
#[inline(always)]
pub fn record_pointer_clear(_owner: *const ()) {}
