//! Module linearization.
//!
//! Converts a module into a string of integers suitable for the suffix
//! tree, plus a parallel list of the instructions behind each entry.
//!
//! Instructions that are legal to outline are numbered through an
//! equivalence map, counting up from zero, so equivalent instructions share
//! a number. Illegal instructions get unique numbers counting down from
//! just below the suffix-tree engine's reserved keys; runs of consecutive
//! illegal instructions collapse into a single entry. Blocks smaller than
//! the minimum outlining length are skipped outright.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::ir::{InstId, LitId, Module, Opcode, Value};
use crate::opt::OutliningSettings;
use crate::outliner::{EMPTY_KEY, TOMBSTONE_KEY};

/// First identifier handed to an illegal instruction; later ones count
/// down. Sits just below the engine's reserved keys so no stream value can
/// collide with them.
const FIRST_ILLEGAL_NUMBER: u32 = TOMBSTONE_KEY - 1;

const _: () = assert!(FIRST_ILLEGAL_NUMBER < TOMBSTONE_KEY);
const _: () = assert!(TOMBSTONE_KEY < EMPTY_KEY);

// =============================================================================
// Instruction Equivalence
// =============================================================================

/// Equivalence identity of an instruction: variety, operand count, and the
/// literal operands at their positions. Non-literal operands are ignored,
/// which is what lets an outlined function parameterize them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EquivalenceKey {
    opcode: Opcode,
    num_operands: usize,
    /// `(operand index, literal)` for each literal operand. Literals are
    /// interned per module, so the ID stands in for the value.
    literals: SmallVec<[(u32, LitId); 4]>,
}

fn equivalence_key(module: &Module, inst: InstId) -> EquivalenceKey {
    let instruction = module.inst(inst);
    let mut literals = SmallVec::new();
    for (index, operand) in instruction.operands.iter().enumerate() {
        if let Value::Literal(lit) = operand {
            literals.push((index as u32, *lit));
        }
    }
    EquivalenceKey {
        opcode: instruction.opcode,
        num_operands: instruction.operands.len(),
        literals,
    }
}

/// Whether `inst` is safe to extract into an outlined function.
pub(crate) fn instruction_is_legal_to_outline(module: &Module, inst: InstId) -> bool {
    let instruction = module.inst(inst);
    match instruction.opcode {
        Opcode::Phi
        | Opcode::CreateArguments
        | Opcode::AllocStack
        | Opcode::LoadStack
        | Opcode::StoreStack
        | Opcode::LoadVar
        | Opcode::StoreVar => return false,
        opcode if opcode.is_terminator() => return false,
        _ => {}
    }
    !instruction
        .operands
        .iter()
        .any(|operand| matches!(operand, Value::Var(_)))
}

// =============================================================================
// Linearization
// =============================================================================

/// Convert the module into the integer stream and its parallel instruction
/// list. The vectors are always the same length.
pub(crate) fn convert_module_to_stream(
    module: &Module,
    settings: &OutliningSettings,
) -> (Vec<u32>, Vec<InstId>) {
    let mut stream = Vec::new();
    let mut instructions = Vec::new();

    let mut map: FxHashMap<EquivalenceKey, u32> = FxHashMap::default();
    let mut legal: u32 = 0;
    let mut illegal: u32 = FIRST_ILLEGAL_NUMBER;
    // Start true so leading illegal instructions are not recorded at all.
    let mut last_was_illegal = true;

    for &func in &module.functions {
        for &block in &module.func(func).blocks {
            let insts = &module.block(block).insts;
            // Not worth scanning blocks that can never host a candidate.
            if (insts.len() as u32) < settings.min_length {
                continue;
            }

            for &inst in insts {
                assert!(legal < illegal, "legal and illegal numbers collided");
                if instruction_is_legal_to_outline(module, inst) {
                    let key = equivalence_key(module, inst);
                    let next = legal;
                    let number = *map.entry(key).or_insert(next);
                    if number == next {
                        legal += 1;
                    }
                    stream.push(number);
                    instructions.push(inst);
                    last_was_illegal = false;
                } else if !last_was_illegal {
                    stream.push(illegal);
                    instructions.push(inst);
                    illegal -= 1;
                    last_was_illegal = true;
                }
            }
        }
    }

    debug_assert_eq!(
        stream.len(),
        instructions.len(),
        "stream and instruction list diverged"
    );
    (stream, instructions)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, IrBuilder, Value};
    use smallvec::smallvec;

    fn settings(min_length: u32) -> OutliningSettings {
        OutliningSettings {
            min_length,
            ..Default::default()
        }
    }

    /// Build a function with the five-instruction arithmetic sequence.
    fn build_sequence(builder: &mut IrBuilder<'_>, name: &str) {
        let f = builder.create_function(name.into(), false, None);
        let entry = builder.create_basic_block(f);
        builder.set_insertion_block(entry);
        let a = builder.create_load_number(1.0);
        let b = builder.create_load_number(2.0);
        let sum = builder.create_binary(BinaryOp::Add, Value::Inst(a), Value::Inst(b));
        let c = builder.create_load_number(3.0);
        let sum2 = builder.create_binary(BinaryOp::Add, Value::Inst(sum), Value::Inst(c));
        builder.create_ret(Value::Inst(sum2));
    }

    #[test]
    fn test_equivalent_instructions_share_numbers() {
        let mut module = Module::new();
        let mut builder = IrBuilder::new(&mut module);
        build_sequence(&mut builder, "f");
        build_sequence(&mut builder, "g");

        let (stream, instructions) = convert_module_to_stream(&module, &settings(3));
        assert_eq!(stream.len(), instructions.len());

        // Each function contributes 5 legal entries and 1 terminator entry.
        assert_eq!(stream.len(), 12);
        assert_eq!(&stream[0..5], &stream[6..11]);
        // The two adds are equivalent to each other.
        assert_eq!(stream[2], stream[4]);
        // Loads of different literals are not.
        assert_ne!(stream[0], stream[1]);
    }

    #[test]
    fn test_illegal_numbers_unique_and_descending() {
        let mut module = Module::new();
        let mut builder = IrBuilder::new(&mut module);
        build_sequence(&mut builder, "f");
        build_sequence(&mut builder, "g");

        let (stream, _) = convert_module_to_stream(&module, &settings(3));
        let terminator_f = stream[5];
        let terminator_g = stream[11];
        assert_eq!(terminator_f, FIRST_ILLEGAL_NUMBER);
        assert_eq!(terminator_g, FIRST_ILLEGAL_NUMBER - 1);
        assert_ne!(terminator_f, terminator_g);
    }

    #[test]
    fn test_small_blocks_skipped() {
        let mut module = Module::new();
        let mut builder = IrBuilder::new(&mut module);
        let f = builder.create_function("f".into(), false, None);
        let entry = builder.create_basic_block(f);
        builder.set_insertion_block(entry);
        let a = builder.create_load_number(1.0);
        builder.create_ret(Value::Inst(a));

        let (stream, _) = convert_module_to_stream(&module, &settings(3));
        assert!(stream.is_empty());
    }

    #[test]
    fn test_consecutive_illegals_collapse() {
        let mut module = Module::new();
        let mut builder = IrBuilder::new(&mut module);
        let f = builder.create_function("f".into(), false, None);
        let entry = builder.create_basic_block(f);
        builder.set_insertion_block(entry);
        let a = builder.create_load_number(1.0);
        let b = builder.create_load_number(2.0);
        // Two illegal instructions in a row.
        let slot = builder.emit(Opcode::AllocStack, smallvec![]);
        builder.emit(Opcode::StoreStack, smallvec![Value::Inst(slot), Value::Inst(a)]);
        let c = builder.create_load_number(3.0);
        builder.create_ret(Value::Inst(c));
        let _ = b;

        let (stream, _) = convert_module_to_stream(&module, &settings(2));
        // load, load, one collapsed illegal, load, terminator.
        assert_eq!(stream.len(), 5);
        assert!(stream[2] >= FIRST_ILLEGAL_NUMBER - 2);
        assert!(stream[3] < FIRST_ILLEGAL_NUMBER / 2);
    }

    #[test]
    fn test_variable_operands_are_illegal() {
        let mut module = Module::new();
        let var = module.create_variable("captured".into());
        let mut builder = IrBuilder::new(&mut module);
        let f = builder.create_function("f".into(), false, None);
        let entry = builder.create_basic_block(f);
        builder.set_insertion_block(entry);
        let load = builder.emit(Opcode::LoadVar, smallvec![Value::Var(var)]);

        assert!(!instruction_is_legal_to_outline(builder.module(), load));
    }
}
