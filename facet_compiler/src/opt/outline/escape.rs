//! Instruction escape analysis.
//!
//! Analyzes one or more overlaid instruction ranges and reports the longest
//! common prefix out of which at most one value escapes: an instruction
//! defined in the prefix with a user beyond it (later in the range or
//! outside the range entirely). When ranges disagree on which instruction
//! escapes, the prefix is shortened until they agree, since one outlined
//! function can return only one value.
//!
//! `add_range`/`remove_last_range` follow stack discipline so a caller can
//! test a range and roll it back.

use rustc_hash::FxHashMap;

use crate::ir::{InstId, Module};

/// The longest valid prefix: its length and the offset of the single
/// escaping instruction, if there is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    pub length: usize,
    pub offset: Option<usize>,
}

/// Per-range use information, precomputed on `add_range`.
struct RangeInfo {
    /// Whether the instruction at each offset has a user outside the range.
    outside_use: Vec<bool>,
    /// Largest in-range user offset per instruction, if any.
    max_in_range_user: Vec<Option<usize>>,
}

impl RangeInfo {
    /// The escaping offset within a prefix of `length`, or an error-free
    /// `None` for zero escapes. `Err(())` means more than one escape.
    fn escape_at(&self, length: usize) -> Result<Option<usize>, ()> {
        let mut escape = None;
        for offset in 0..length {
            let escapes = self.outside_use[offset]
                || self.max_in_range_user[offset].is_some_and(|user| user >= length);
            if escapes {
                if escape.is_some() {
                    return Err(());
                }
                escape = Some(offset);
            }
        }
        Ok(escape)
    }
}

/// Escape analysis over a stack of ranges.
pub struct InstructionEscapeAnalysis<'m> {
    module: &'m Module,
    ranges: Vec<RangeInfo>,
}

impl<'m> InstructionEscapeAnalysis<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            ranges: Vec::new(),
        }
    }

    /// Add a range to the analysis. Must not be empty.
    pub fn add_range(&mut self, range: &[InstId]) {
        assert!(!range.is_empty(), "empty range");
        let index_of: FxHashMap<InstId, usize> = range
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index))
            .collect();

        let mut outside_use = vec![false; range.len()];
        let mut max_in_range_user = vec![None; range.len()];
        for (offset, &inst) in range.iter().enumerate() {
            for &user in self.module.users(inst) {
                match index_of.get(&user) {
                    Some(&user_offset) => {
                        let slot = &mut max_in_range_user[offset];
                        *slot = Some(slot.map_or(user_offset, |m: usize| m.max(user_offset)));
                    }
                    None => outside_use[offset] = true,
                }
            }
        }
        self.ranges.push(RangeInfo {
            outside_use,
            max_in_range_user,
        });
    }

    /// Undo the most recent `add_range`.
    pub fn remove_last_range(&mut self) {
        debug_assert!(!self.ranges.is_empty());
        self.ranges.pop();
    }

    /// The longest prefix valid for every added range: each range has at
    /// most one escape within it, and all ranges agree on the escaping
    /// offset (or its absence).
    pub fn longest_prefix(&self) -> Prefix {
        debug_assert!(!self.ranges.is_empty(), "no ranges added");
        let max_length = self
            .ranges
            .iter()
            .map(|r| r.outside_use.len())
            .min()
            .unwrap_or(0);

        for length in (1..=max_length).rev() {
            if let Some(offset) = self.common_escape_at(length) {
                return Prefix { length, offset };
            }
        }
        Prefix {
            length: 0,
            offset: None,
        }
    }

    /// `Some(offset)` when every range has at most one escape within
    /// `length` and all agree; `None` otherwise. The inner option is the
    /// agreed escape offset.
    #[allow(clippy::option_option)]
    fn common_escape_at(&self, length: usize) -> Option<Option<usize>> {
        let mut common: Option<Option<usize>> = None;
        for range in &self.ranges {
            let escape = range.escape_at(length).ok()?;
            match common {
                None => common = Some(escape),
                Some(previous) if previous != escape => return None,
                _ => {}
            }
        }
        common
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, IrBuilder, Value};

    /// `load 1; load 2; add; load 3; add; ret`, returning the 5 legal insts.
    fn build_sequence(module: &mut Module, name: &str) -> Vec<InstId> {
        let mut builder = IrBuilder::new(module);
        let f = builder.create_function(name.into(), false, None);
        let entry = builder.create_basic_block(f);
        builder.set_insertion_block(entry);
        let a = builder.create_load_number(1.0);
        let b = builder.create_load_number(2.0);
        let sum = builder.create_binary(BinaryOp::Add, Value::Inst(a), Value::Inst(b));
        let c = builder.create_load_number(3.0);
        let sum2 = builder.create_binary(BinaryOp::Add, Value::Inst(sum), Value::Inst(c));
        builder.create_ret(Value::Inst(sum2));
        vec![a, b, sum, c, sum2]
    }

    #[test]
    fn test_single_escape_at_end() {
        let mut module = Module::new();
        let range = build_sequence(&mut module, "f");

        let mut analysis = InstructionEscapeAnalysis::new(&module);
        analysis.add_range(&range);
        // Only the final add escapes (used by the return).
        assert_eq!(
            analysis.longest_prefix(),
            Prefix {
                length: 5,
                offset: Some(4),
            }
        );
    }

    #[test]
    fn test_two_escapes_shorten_prefix() {
        let mut module = Module::new();
        let mut builder = IrBuilder::new(&mut module);
        let f = builder.create_function("f".into(), false, None);
        let entry = builder.create_basic_block(f);
        builder.set_insertion_block(entry);
        let a = builder.create_load_number(1.0);
        let b = builder.create_load_number(2.0);
        // Both loads escape into the return's add, outside the range below.
        let sum = builder.create_binary(BinaryOp::Add, Value::Inst(a), Value::Inst(b));
        builder.create_ret(Value::Inst(sum));
        let range = vec![a, b];

        let mut analysis = InstructionEscapeAnalysis::new(&module);
        analysis.add_range(&range);
        // Both instructions escape, so only the one-instruction prefix is
        // valid (a single escape: `a`).
        assert_eq!(
            analysis.longest_prefix(),
            Prefix {
                length: 1,
                offset: Some(0),
            }
        );
    }

    #[test]
    fn test_in_range_use_beyond_prefix_counts() {
        let mut module = Module::new();
        let range = build_sequence(&mut module, "f");

        let mut analysis = InstructionEscapeAnalysis::new(&module);
        // Restrict to the first three instructions: load, load, add.
        analysis.add_range(&range[..3]);
        // The add escapes (used by the later add outside this range).
        assert_eq!(
            analysis.longest_prefix(),
            Prefix {
                length: 3,
                offset: Some(2),
            }
        );
    }

    #[test]
    fn test_ranges_must_agree_on_offset() {
        let mut module = Module::new();
        let range_f = build_sequence(&mut module, "f");

        // A second range where a different offset escapes: reuse the same
        // shape but take a sub-range so the escape lands elsewhere.
        let range_g = build_sequence(&mut module, "g");

        let mut analysis = InstructionEscapeAnalysis::new(&module);
        analysis.add_range(&range_f);
        analysis.add_range(&range_g[..3]);
        // range_f escapes at 4 (beyond the common length); at length 3 both
        // escape at offset 2, so the prefix settles there.
        assert_eq!(
            analysis.longest_prefix(),
            Prefix {
                length: 3,
                offset: Some(2),
            }
        );
    }

    #[test]
    fn test_remove_last_range_rolls_back() {
        let mut module = Module::new();
        let range_f = build_sequence(&mut module, "f");
        let range_g = build_sequence(&mut module, "g");

        let mut analysis = InstructionEscapeAnalysis::new(&module);
        analysis.add_range(&range_f);
        let before = analysis.longest_prefix();

        analysis.add_range(&range_g[..2]);
        assert_ne!(analysis.longest_prefix(), before);

        analysis.remove_last_range();
        assert_eq!(analysis.longest_prefix(), before);
    }

    #[test]
    fn test_no_escape_returns_none_offset() {
        let mut module = Module::new();
        let mut builder = IrBuilder::new(&mut module);
        let f = builder.create_function("f".into(), false, None);
        let entry = builder.create_basic_block(f);
        builder.set_insertion_block(entry);
        let a = builder.create_load_number(1.0);
        let b = builder.create_load_number(2.0);
        let sum = builder.create_binary(BinaryOp::Add, Value::Inst(a), Value::Inst(b));
        let undef = builder.literal_undefined();
        builder.create_ret(undef);
        let range = vec![a, b, sum];

        let mut analysis = InstructionEscapeAnalysis::new(&module);
        analysis.add_range(&range);
        assert_eq!(
            analysis.longest_prefix(),
            Prefix {
                length: 3,
                offset: None,
            }
        );
    }
}
