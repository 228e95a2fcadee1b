//! Outlined-function construction and call-site rewriting.

use smallvec::SmallVec;

use crate::ir::{FuncId, InstId, IrBuilder, Module, Value};
use crate::opt::outline::escape::InstructionEscapeAnalysis;
use crate::opt::outline::numbering::{InstructionNumbering, Operand, NUMBERING_FLAGS};
use crate::opt::OutliningSettings;
use crate::outliner::{Candidate, OutlinedFunction};

/// Base name for outlined functions; the module's unique-name helper makes
/// each instance distinct.
pub(crate) const FUNCTION_NAME: &str = "OUTLINED_FUNCTION";

/// Name for an outlined function's nth parameter.
fn parameter_name(n: u32) -> String {
    debug_assert!(n <= 999, "too many parameters");
    format!("p{}", n)
}

/// Materialize one numbered operand inside the outlined function.
fn build_outlined_operand(
    builder: &mut IrBuilder<'_>,
    operand: &Operand,
    function: FuncId,
    cloned: &[InstId],
) -> Value {
    match operand {
        // Internal operand: the instruction cloned earlier in the block.
        Operand::Internal(index) => {
            assert!(
                (*index as usize) < cloned.len(),
                "use before definition"
            );
            Value::Inst(cloned[*index as usize])
        }
        // External operand: the matching parameter, created on first use.
        Operand::External(index) => {
            let existing = builder.module().func(function).params.len() as u32;
            if *index >= existing {
                assert_eq!(*index, existing, "external index skipped a number");
                let name = parameter_name(*index);
                builder.create_parameter(function, &name);
            }
            Value::Param(builder.module().func(function).params[*index as usize])
        }
        // Value operand: copied verbatim.
        Operand::Value(value) => *value,
    }
}

/// Build the function for an [`OutlinedFunction`], cloning the first
/// non-pruned candidate as the template.
pub(crate) fn build_outlined_function(
    module: &mut Module,
    function_info: &OutlinedFunction,
    instructions: &[InstId],
    settings: &OutliningSettings,
) -> FuncId {
    let candidate = function_info
        .candidates
        .iter()
        .find(|c| !c.is_deleted())
        .expect("outlined function has no candidate");
    let range: Vec<InstId> =
        instructions[candidate.start_idx()..=candidate.end_idx()].to_vec();

    // Escape analysis decides which instruction becomes the return value.
    let prefix = {
        let mut escape_analysis = InstructionEscapeAnalysis::new(module);
        escape_analysis.add_range(&range);
        escape_analysis.longest_prefix()
    };
    assert_eq!(
        prefix.length,
        candidate.len(),
        "candidate has more than one value escape"
    );

    let caller = module.inst_function(range[0]);
    let strict = module.func(caller).strict;
    let insert_before = settings.place_near_caller.then_some(caller);
    let name = module.derive_unique_internal_name(FUNCTION_NAME);
    let numbering = InstructionNumbering::new(module, &range, NUMBERING_FLAGS);

    let mut builder = IrBuilder::new(module);
    let function = builder.create_function(name, strict, insert_before);
    let block = builder.create_basic_block(function);
    builder.set_insertion_block(block);

    // Clone the template's instructions with rebuilt operands.
    let mut cloned: Vec<InstId> = Vec::with_capacity(prefix.length);
    for (expression, &inst) in numbering
        .expressions()
        .iter()
        .zip(numbering.instructions())
    {
        let mut operands: SmallVec<[Value; 4]> =
            SmallVec::with_capacity(expression.operands.len());
        for operand in &expression.operands {
            operands.push(build_outlined_operand(&mut builder, operand, function, &cloned));
        }
        cloned.push(builder.clone_inst(inst, operands));
    }

    // The call ABI passes the receiver last.
    builder.create_parameter(function, "this");

    let return_value = match prefix.offset {
        Some(offset) => Value::Inst(cloned[offset]),
        None => builder.literal_undefined(),
    };
    builder.create_ret(return_value);

    function
}

/// Replace a candidate's instructions with a call to `function`.
///
/// Returns false when the candidate cannot be outlined (strict-mode
/// mismatch with the function).
pub(crate) fn outline_candidate(
    module: &mut Module,
    candidate: &Candidate,
    function: FuncId,
    instructions: &[InstId],
) -> bool {
    let range: Vec<InstId> =
        instructions[candidate.start_idx()..=candidate.end_idx()].to_vec();

    // The callee inherits one strict-mode setting; mismatched sites keep
    // their original code.
    let caller = module.inst_function(range[0]);
    if module.func(caller).strict != module.func(function).strict {
        return false;
    }

    let prefix = {
        let mut escape_analysis = InstructionEscapeAnalysis::new(module);
        escape_analysis.add_range(&range);
        escape_analysis.longest_prefix()
    };
    assert_eq!(
        prefix.length,
        candidate.len(),
        "candidate has more than one value escape"
    );

    // Collect call arguments: the actual value behind each External, in
    // first-use order. Locate the escaping instruction along the way.
    let numbering = InstructionNumbering::new(module, &range, NUMBERING_FLAGS);
    let mut arguments: Vec<Value> = Vec::new();
    let mut escape_inst: Option<InstId> = None;
    for (expr_index, (expression, &inst)) in numbering
        .expressions()
        .iter()
        .zip(numbering.instructions())
        .enumerate()
    {
        for (operand_index, operand) in expression.operands.iter().enumerate() {
            if let Operand::External(n) = operand {
                if (*n as usize) >= arguments.len() {
                    assert_eq!(
                        *n as usize,
                        arguments.len(),
                        "external index skipped a number"
                    );
                    arguments.push(module.inst(inst).operands[operand_index]);
                }
            }
        }
        if prefix.offset == Some(expr_index) {
            escape_inst = Some(inst);
        }
    }
    debug_assert_eq!(
        escape_inst.is_some(),
        prefix.offset.is_some(),
        "escape instruction inconsistent with prefix offset"
    );

    // Insert the call before the candidate's first instruction.
    let call = {
        let mut builder = IrBuilder::new(module);
        builder.set_insertion_point_before(range[0]);
        let receiver = builder.literal_undefined();
        builder.create_call_direct(function, receiver, &arguments)
    };
    if let Some(escape) = escape_inst {
        module.replace_all_uses(escape, Value::Inst(call));
    }

    // Erase in reverse order so each instruction's uses die before it does.
    let call_block = module.inst(call).block;
    for &inst in range.iter().rev() {
        assert_eq!(
            module.inst(inst).block,
            call_block,
            "candidate instructions must share a block"
        );
        assert!(
            module.users(inst).is_empty(),
            "instruction about to be erased still has users"
        );
        module.erase_inst(inst);
    }

    true
}
