//! IR builder.
//!
//! A thin construction layer over [`Module`]: tracks an insertion point and
//! provides the creation operations passes use, including cloning an
//! instruction with fresh operands and emitting direct calls.

use smallvec::{smallvec, SmallVec};

use super::instruction::{
    BinaryOp, BlockId, FuncId, InstId, Literal, Opcode, ParamId, Value,
};
use super::module::Module;

/// Builder over a module. Instructions are emitted at the insertion point:
/// appended to a block, or placed before a specific instruction.
pub struct IrBuilder<'m> {
    module: &'m mut Module,
    block: Option<BlockId>,
    before: Option<InstId>,
}

impl<'m> IrBuilder<'m> {
    /// Create a builder with no insertion point.
    pub fn new(module: &'m mut Module) -> Self {
        Self {
            module,
            block: None,
            before: None,
        }
    }

    /// The module being built.
    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    /// Append subsequent instructions to the end of `block`.
    pub fn set_insertion_block(&mut self, block: BlockId) {
        self.block = Some(block);
        self.before = None;
    }

    /// Insert subsequent instructions before `inst`, in its block.
    pub fn set_insertion_point_before(&mut self, inst: InstId) {
        self.block = Some(self.module.inst(inst).block);
        self.before = Some(inst);
    }

    // =========================================================================
    // Entity Creation
    // =========================================================================

    /// Create a function; see [`Module::create_function`] for placement.
    pub fn create_function(
        &mut self,
        name: String,
        strict: bool,
        insert_before: Option<FuncId>,
    ) -> FuncId {
        self.module.create_function(name, strict, insert_before)
    }

    /// Create an empty block at the end of `func`.
    pub fn create_basic_block(&mut self, func: FuncId) -> BlockId {
        self.module.create_block(func)
    }

    /// Create the next positional parameter of `func`.
    pub fn create_parameter(&mut self, func: FuncId, name: &str) -> ParamId {
        self.module.create_parameter(func, name.to_string())
    }

    /// The interned `undefined` literal as an operand.
    pub fn literal_undefined(&mut self) -> Value {
        let id = self.module.literal_undefined();
        Value::Literal(id)
    }

    /// Intern a number literal as an operand.
    pub fn literal_number(&mut self, value: f64) -> Value {
        let id = self.module.intern_literal(Literal::Number(value));
        Value::Literal(id)
    }

    // =========================================================================
    // Instruction Creation
    // =========================================================================

    /// Emit an instruction with explicit operands at the insertion point.
    pub fn emit(&mut self, opcode: Opcode, operands: SmallVec<[Value; 4]>) -> InstId {
        let block = self.block.expect("no insertion point set");
        self.module
            .insert_inst(block, self.before, opcode, operands, smallvec![])
    }

    /// Clone `inst` with new operands at the insertion point. The operand
    /// count must match the original's.
    pub fn clone_inst(&mut self, inst: InstId, operands: SmallVec<[Value; 4]>) -> InstId {
        let (opcode, targets, count) = {
            let original = self.module.inst(inst);
            (original.opcode, original.targets.clone(), original.operands.len())
        };
        debug_assert_eq!(operands.len(), count, "operand count changed by clone");
        let block = self.block.expect("no insertion point set");
        self.module
            .insert_inst(block, self.before, opcode, operands, targets)
    }

    /// Emit `LoadConst` of a number.
    pub fn create_load_number(&mut self, value: f64) -> InstId {
        let operand = self.literal_number(value);
        self.emit(Opcode::LoadConst, smallvec![operand])
    }

    /// Emit a binary operation.
    pub fn create_binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> InstId {
        self.emit(Opcode::Binary(op), smallvec![lhs, rhs])
    }

    /// Emit a direct call: `callee(this, args...)`.
    pub fn create_call_direct(
        &mut self,
        callee: FuncId,
        this: Value,
        args: &[Value],
    ) -> InstId {
        let mut operands: SmallVec<[Value; 4]> = smallvec![Value::Func(callee), this];
        operands.extend_from_slice(args);
        self.emit(Opcode::CallDirect, operands)
    }

    /// Emit a return terminator.
    pub fn create_ret(&mut self, value: Value) -> InstId {
        self.emit(Opcode::Ret, smallvec![value])
    }
}

// =============================================================================
// Tests
// =============================================================================
