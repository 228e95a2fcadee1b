//! Instruction numbering.
//!
//! Turns a contiguous instruction range into a sequence of structural
//! [`Expression`]s: the variety plus, per operand, where the value comes
//! from. Two ranges number equally exactly when they are structurally
//! identical modulo renaming of in-range definitions and external inputs,
//! which makes "do these ranges match" an elementwise comparison.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::ir::{InstId, Module, Opcode, Value};

bitflags::bitflags! {
    /// Which operand kinds may become [`Operand::External`]. Anything not
    /// covered numbers as a bare [`Operand::Value`] and must then match by
    /// identity.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExternalFlags: u8 {
        /// Instructions defined outside the range become externals.
        const INSTRUCTIONS = 1 << 0;
        /// Parameters of the containing function become externals.
        const PARAMETERS = 1 << 1;
    }
}

/// The flag set the outliner numbers with: externals for out-of-range
/// instructions and for parameters, so both can be passed as arguments.
pub const NUMBERING_FLAGS: ExternalFlags =
    ExternalFlags::INSTRUCTIONS.union(ExternalFlags::PARAMETERS);

/// One numbered operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// The result of the instruction at this index within the range.
    Internal(u32),
    /// An input from outside the range. Indices are assigned in first-use
    /// order: distinct inputs get distinct indices, repeated ones reuse.
    External(u32),
    /// A value matched by identity (literals, and anything the flag set
    /// leaves un-abstracted).
    Value(Value),
}

/// One numbered instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub opcode: Opcode,
    pub operands: SmallVec<[Operand; 4]>,
}

/// The numbering of one instruction range, in program order.
pub struct InstructionNumbering {
    expressions: Vec<Expression>,
    instructions: Vec<InstId>,
}

impl InstructionNumbering {
    /// Number `range`, which must be contiguous instructions of one block.
    pub fn new(module: &Module, range: &[InstId], flags: ExternalFlags) -> Self {
        let index_of: FxHashMap<InstId, u32> = range
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index as u32))
            .collect();
        let mut external_indices: FxHashMap<Value, u32> = FxHashMap::default();

        let mut expressions = Vec::with_capacity(range.len());
        for (expr_index, &inst_id) in range.iter().enumerate() {
            let instruction = module.inst(inst_id);
            let mut operands: SmallVec<[Operand; 4]> =
                SmallVec::with_capacity(instruction.operands.len());
            for &operand in &instruction.operands {
                let numbered = match operand {
                    Value::Inst(def) => match index_of.get(&def) {
                        Some(&internal) => {
                            debug_assert!(
                                (internal as usize) < expr_index,
                                "use before definition in range"
                            );
                            Operand::Internal(internal)
                        }
                        None if flags.contains(ExternalFlags::INSTRUCTIONS) => {
                            Operand::External(external_index(&mut external_indices, operand))
                        }
                        None => Operand::Value(operand),
                    },
                    Value::Param(_) if flags.contains(ExternalFlags::PARAMETERS) => {
                        Operand::External(external_index(&mut external_indices, operand))
                    }
                    other => Operand::Value(other),
                };
                operands.push(numbered);
            }
            expressions.push(Expression {
                opcode: instruction.opcode,
                operands,
            });
        }

        Self {
            expressions,
            instructions: range.to_vec(),
        }
    }

    /// The expressions, in program order.
    #[inline]
    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    /// The instructions behind the expressions, parallel to them.
    #[inline]
    pub fn instructions(&self) -> &[InstId] {
        &self.instructions
    }
}

/// Index for an external value, assigned sequentially on first encounter.
fn external_index(map: &mut FxHashMap<Value, u32>, value: Value) -> u32 {
    let next = map.len() as u32;
    *map.entry(value).or_insert(next)
}

// =============================================================================
// Tests
// =============================================================================
