//! Candidate grouping.
//!
//! The suffix-tree engine hands over sets of equal-length stream matches
//! that agree instruction-by-instruction on variety and literals. This
//! target refines them: ranges must also be structurally identical under
//! instruction numbering and leak at most one value, per escape analysis.
//! A greedy scan over offsets carves each match set into zero or more
//! outlined functions.

use crate::ir::{InstId, Module};
use crate::opt::outline::escape::InstructionEscapeAnalysis;
use crate::opt::outline::numbering::{
    Expression, InstructionNumbering, Operand, NUMBERING_FLAGS,
};
use crate::opt::OutliningSettings;
use crate::outliner::{Candidate, OutlinedFunction, OutlinerTarget};

/// The outliner target for this IR: candidate selection and cost model.
pub(crate) struct IrOutlinerTarget<'m> {
    settings: OutliningSettings,
    module: &'m Module,
    /// Instructions behind the suffix-tree input, index-aligned with it.
    instructions: &'m [InstId],
}

impl<'m> IrOutlinerTarget<'m> {
    pub fn new(
        settings: OutliningSettings,
        module: &'m Module,
        instructions: &'m [InstId],
    ) -> Self {
        Self {
            settings,
            module,
            instructions,
        }
    }

    /// The instruction range behind `len` stream entries at `start_idx`.
    fn range(&self, start_idx: usize, len: usize) -> &'m [InstId] {
        debug_assert!(len > 0, "empty range");
        &self.instructions[start_idx..start_idx + len]
    }

    /// The longest prefix of two ranges that can be outlined together:
    /// equal numbering, then shortened until at most one value escapes.
    /// Leaves both prefix ranges in `escape_analysis`.
    fn outlinable_common_prefix(
        &self,
        escape_analysis: &mut InstructionEscapeAnalysis<'m>,
        start_idx0: usize,
        start_idx1: usize,
        length: usize,
    ) -> Vec<Expression> {
        let numbering0 =
            InstructionNumbering::new(self.module, self.range(start_idx0, length), NUMBERING_FLAGS);
        let numbering1 =
            InstructionNumbering::new(self.module, self.range(start_idx1, length), NUMBERING_FLAGS);

        let mut expressions = Vec::new();
        for (expr0, expr1) in numbering0
            .expressions()
            .iter()
            .zip(numbering1.expressions())
        {
            if expr0 != expr1 {
                break;
            }
            expressions.push(expr0.clone());
        }

        let common_length = expressions.len();
        if common_length > 0 {
            escape_analysis.add_range(self.range(start_idx0, common_length));
            escape_analysis.add_range(self.range(start_idx1, common_length));
            expressions.truncate(escape_analysis.longest_prefix().length);
        }
        expressions
    }

    /// Whether the range at `start_idx` matches the common prefix and can
    /// join the same outlined function. On success its range stays in
    /// `escape_analysis`; on failure the analysis is rolled back.
    fn matches_common_prefix(
        &self,
        expressions: &[Expression],
        escape_analysis: &mut InstructionEscapeAnalysis<'m>,
        start_idx: usize,
    ) -> bool {
        let length = expressions.len();
        let range = self.range(start_idx, length);
        let numbering = InstructionNumbering::new(self.module, range, NUMBERING_FLAGS);
        if numbering.expressions() == expressions {
            escape_analysis.add_range(range);
            if escape_analysis.longest_prefix().length == length {
                return true;
            }
            escape_analysis.remove_last_range();
        }
        false
    }

    /// Number of distinct External operands. Externals are indexed densely
    /// from zero, so the count is the highest index plus one.
    fn distinct_external_operand_count(expressions: &[Expression]) -> u32 {
        let mut count = 0;
        for expression in expressions {
            for operand in &expression.operands {
                if let Operand::External(index) = operand {
                    count = count.max(index + 1);
                }
            }
        }
        count
    }
}

impl OutlinerTarget for IrOutlinerTarget<'_> {
    fn min_candidate_length(&self) -> usize {
        self.settings.min_length as usize
    }

    fn create_outlined_functions(
        &mut self,
        functions: &mut Vec<OutlinedFunction>,
        start_indices: &[usize],
        candidate_length: usize,
    ) {
        debug_assert!(start_indices.len() >= 2, "too few candidates");
        let min_length = self.settings.min_length as usize;
        debug_assert!(candidate_length >= min_length, "candidates too small");
        let max_offset = candidate_length - min_length;

        let mut offset = 0usize;
        while offset <= max_offset {
            let remaining_length = candidate_length - offset;
            let index0 = start_indices[0] + offset;
            let index1 = start_indices[1] + offset;

            let mut escape_analysis = InstructionEscapeAnalysis::new(self.module);
            let expressions = self.outlinable_common_prefix(
                &mut escape_analysis,
                index0,
                index1,
                remaining_length,
            );
            let common_length = expressions.len();
            // Always skip one past the prefix: the instruction there is the
            // one that failed to match.
            let advance = common_length + 1;

            if common_length < min_length {
                offset += advance;
                continue;
            }

            // Each external operand becomes a parameter.
            let num_parameters = Self::distinct_external_operand_count(&expressions);
            if num_parameters < self.settings.min_parameters
                || num_parameters > self.settings.max_parameters
            {
                offset += advance;
                continue;
            }

            // Rough cost model: call and frame overheads are linear in the
            // parameter count.
            let call_overhead = 2 + num_parameters;
            let frame_overhead = 5 + num_parameters;
            let mut candidates = vec![
                Candidate::new(index0, common_length, call_overhead),
                Candidate::new(index1, common_length, call_overhead),
            ];

            // Try to include the remaining matches.
            for &start in &start_indices[2..] {
                let start_idx = start + offset;
                if self.matches_common_prefix(&expressions, &mut escape_analysis, start_idx) {
                    candidates.push(Candidate::new(start_idx, common_length, call_overhead));
                }
            }

            functions.push(OutlinedFunction {
                candidates,
                sequence_size: common_length,
                frame_overhead,
            });
            offset += advance;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
