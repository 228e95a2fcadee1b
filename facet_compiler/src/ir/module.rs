//! The module: functions, blocks, instructions, and their bookkeeping.
//!
//! The module owns every IR entity in typed arenas and maintains the
//! derived state passes rely on:
//!
//! - **Use lists** per instruction, so replace-all-uses and the "no users
//!   remain" erase check are cheap.
//! - **Literal interning**, so literal equality is `LitId` equality.
//! - **Unique internal names**, for compiler-synthesized functions.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::arena::Arena;
use super::instruction::{
    BlockId, FuncId, InstId, Instruction, LitId, Literal, Opcode, ParamId, Value, VarId,
};

// =============================================================================
// Entities
// =============================================================================

/// A function: ordered blocks, parameters, and a strict-mode setting.
#[derive(Debug, Default)]
pub struct Function {
    /// Function name; unique within the module for internal names.
    pub name: String,
    /// Blocks in layout order; the first is the entry block.
    pub blocks: Vec<BlockId>,
    /// Parameters in positional order.
    pub params: Vec<ParamId>,
    /// Whether the function body is strict-mode code.
    pub strict: bool,
}

/// A basic block: instructions in program order.
#[derive(Debug, Default)]
pub struct BasicBlock {
    /// The owning function.
    pub func: FuncId,
    /// Instructions in program order.
    pub insts: Vec<InstId>,
}

/// A positional function parameter.
#[derive(Debug, Default)]
pub struct Parameter {
    pub name: String,
    pub func: FuncId,
    pub index: u32,
}

/// A captured variable (closure upvalue).
#[derive(Debug, Default)]
pub struct Variable {
    pub name: String,
}

/// Interning key for literals; numbers key by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LiteralKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    Str(String),
}

impl LiteralKey {
    fn of(literal: &Literal) -> Self {
        match literal {
            Literal::Undefined => LiteralKey::Undefined,
            Literal::Null => LiteralKey::Null,
            Literal::Bool(b) => LiteralKey::Bool(*b),
            Literal::Number(n) => LiteralKey::Number(n.to_bits()),
            Literal::Str(s) => LiteralKey::Str(s.clone()),
        }
    }
}

// =============================================================================
// Module
// =============================================================================

/// A whole compilation unit.
#[derive(Debug, Default)]
pub struct Module {
    /// Functions in layout order.
    pub functions: Vec<FuncId>,

    funcs: Arena<Function>,
    blocks: Arena<BasicBlock>,
    insts: Arena<Instruction>,
    params: Arena<Parameter>,
    vars: Arena<Variable>,
    literals: Arena<Literal>,

    /// Interning index over `literals`.
    literal_index: FxHashMap<LiteralKey, LitId>,

    /// Instructions using each instruction's result. A user appears once
    /// per operand that references the instruction.
    uses: Vec<Vec<InstId>>,

    /// Per-base counters for unique internal names.
    name_counters: FxHashMap<String, u32>,
}

impl Module {
    /// Create an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id]
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    #[inline]
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id]
    }

    #[inline]
    pub fn param(&self, id: ParamId) -> &Parameter {
        &self.params[id]
    }

    #[inline]
    pub fn variable(&self, id: VarId) -> &Variable {
        &self.vars[id]
    }

    #[inline]
    pub fn literal(&self, id: LitId) -> &Literal {
        &self.literals[id]
    }

    /// The function containing an instruction.
    #[inline]
    pub fn inst_function(&self, id: InstId) -> FuncId {
        self.blocks[self.insts[id].block].func
    }

    /// Instructions currently using `id`'s result, one entry per use.
    #[inline]
    pub fn users(&self, id: InstId) -> &[InstId] {
        &self.uses[id.as_usize()]
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a function. With `insert_before`, the new function is placed
    /// immediately before that function in layout order; otherwise at the
    /// module's end.
    pub fn create_function(
        &mut self,
        name: String,
        strict: bool,
        insert_before: Option<FuncId>,
    ) -> FuncId {
        let id = self.funcs.alloc(Function {
            name,
            blocks: Vec::new(),
            params: Vec::new(),
            strict,
        });
        match insert_before.and_then(|before| self.functions.iter().position(|&f| f == before)) {
            Some(pos) => self.functions.insert(pos, id),
            None => self.functions.push(id),
        }
        id
    }

    /// Create an empty basic block at the end of a function.
    pub fn create_block(&mut self, func: FuncId) -> BlockId {
        let id = self.blocks.alloc(BasicBlock {
            func,
            insts: Vec::new(),
        });
        self.funcs[func].blocks.push(id);
        id
    }

    /// Create the next positional parameter of a function.
    pub fn create_parameter(&mut self, func: FuncId, name: String) -> ParamId {
        let index = self.funcs[func].params.len() as u32;
        let id = self.params.alloc(Parameter { name, func, index });
        self.funcs[func].params.push(id);
        id
    }

    /// Create a captured variable.
    pub fn create_variable(&mut self, name: String) -> VarId {
        self.vars.alloc(Variable { name })
    }

    /// Intern a literal, returning the existing ID when already present.
    pub fn intern_literal(&mut self, literal: Literal) -> LitId {
        let key = LiteralKey::of(&literal);
        if let Some(&id) = self.literal_index.get(&key) {
            return id;
        }
        let id = self.literals.alloc(literal);
        self.literal_index.insert(key, id);
        id
    }

    /// The interned `undefined` literal.
    pub fn literal_undefined(&mut self) -> LitId {
        self.intern_literal(Literal::Undefined)
    }

    /// Derive a name that is unique among internal names with this base:
    /// the base itself first, then `"<base> 1#"`, `"<base> 2#"`, ...
    pub fn derive_unique_internal_name(&mut self, base: &str) -> String {
        let count = self.name_counters.entry(base.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base.to_string()
        } else {
            format!("{} {}#", base, *count - 1)
        }
    }

    /// Append an instruction to a block, or insert it before the
    /// instruction at `before` within the same block.
    pub(crate) fn insert_inst(
        &mut self,
        block: BlockId,
        before: Option<InstId>,
        opcode: Opcode,
        operands: SmallVec<[Value; 4]>,
        targets: SmallVec<[BlockId; 2]>,
    ) -> InstId {
        let id = self.insts.alloc(Instruction {
            opcode,
            operands,
            block,
            targets,
        });
        self.uses.push(Vec::new());
        for operand_index in 0..self.insts[id].operands.len() {
            if let Value::Inst(used) = self.insts[id].operands[operand_index] {
                self.uses[used.as_usize()].push(id);
            }
        }
        let insts = &mut self.blocks[block].insts;
        match before.and_then(|b| insts.iter().position(|&i| i == b)) {
            Some(pos) => insts.insert(pos, id),
            None => insts.push(id),
        }
        id
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Replace every use of `old`'s result with `new`.
    pub fn replace_all_uses(&mut self, old: InstId, new: Value) {
        debug_assert!(new != Value::Inst(old), "cannot replace a value with itself");
        let users = std::mem::take(&mut self.uses[old.as_usize()]);
        for &user in &users {
            for operand in self.insts[user].operands.iter_mut() {
                if *operand == Value::Inst(old) {
                    *operand = new;
                }
            }
        }
        if let Value::Inst(new_inst) = new {
            self.uses[new_inst.as_usize()].extend(users);
        }
    }

    /// Detach an instruction from its block and release its operand uses.
    ///
    /// The instruction must have no remaining users.
    pub fn erase_inst(&mut self, id: InstId) {
        assert!(
            self.uses[id.as_usize()].is_empty(),
            "erasing an instruction that still has users"
        );
        let operands = self.insts[id].operands.clone();
        for operand in operands {
            if let Value::Inst(used) = operand {
                let list = &mut self.uses[used.as_usize()];
                if let Some(pos) = list.iter().position(|&u| u == id) {
                    list.swap_remove(pos);
                }
            }
        }
        let block = self.insts[id].block;
        self.blocks[block].insts.retain(|&i| i != id);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::BinaryOp;
    use smallvec::smallvec;

    #[test]
    fn test_literal_interning() {
        let mut module = Module::new();
        let one_a = module.intern_literal(Literal::Number(1.0));
        let one_b = module.intern_literal(Literal::Number(1.0));
        let two = module.intern_literal(Literal::Number(2.0));
        assert_eq!(one_a, one_b);
        assert_ne!(one_a, two);

        let undef_a = module.literal_undefined();
        let undef_b = module.literal_undefined();
        assert_eq!(undef_a, undef_b);
    }

    #[test]
    fn test_unique_internal_names() {
        let mut module = Module::new();
        assert_eq!(module.derive_unique_internal_name("F"), "F");
        assert_eq!(module.derive_unique_internal_name("F"), "F 1#");
        assert_eq!(module.derive_unique_internal_name("F"), "F 2#");
        assert_eq!(module.derive_unique_internal_name("G"), "G");
    }

    #[test]
    fn test_function_placement() {
        let mut module = Module::new();
        let a = module.create_function("a".into(), false, None);
        let b = module.create_function("b".into(), false, None);
        let c = module.create_function("c".into(), false, Some(b));
        assert_eq!(module.functions, vec![a, c, b]);
    }

    #[test]
    fn test_use_lists_and_rauw() {
        let mut module = Module::new();
        let f = module.create_function("f".into(), false, None);
        let entry = module.create_block(f);
        let lit = module.intern_literal(Literal::Number(1.0));

        let load_a = module.insert_inst(
            entry,
            None,
            Opcode::LoadConst,
            smallvec![Value::Literal(lit)],
            smallvec![],
        );
        let load_b = module.insert_inst(
            entry,
            None,
            Opcode::LoadConst,
            smallvec![Value::Literal(lit)],
            smallvec![],
        );
        let add = module.insert_inst(
            entry,
            None,
            Opcode::Binary(BinaryOp::Add),
            smallvec![Value::Inst(load_a), Value::Inst(load_a)],
            smallvec![],
        );

        assert_eq!(module.users(load_a), &[add, add]);
        assert!(module.users(load_b).is_empty());

        module.replace_all_uses(load_a, Value::Inst(load_b));
        assert!(module.users(load_a).is_empty());
        assert_eq!(module.users(load_b).len(), 2);
        assert_eq!(
            module.inst(add).operands.as_slice(),
            &[Value::Inst(load_b), Value::Inst(load_b)]
        );
    }

    #[test]
    fn test_erase_inst() {
        let mut module = Module::new();
        let f = module.create_function("f".into(), false, None);
        let entry = module.create_block(f);
        let lit = module.intern_literal(Literal::Number(1.0));

        let load = module.insert_inst(
            entry,
            None,
            Opcode::LoadConst,
            smallvec![Value::Literal(lit)],
            smallvec![],
        );
        assert_eq!(module.block(entry).insts, vec![load]);

        module.erase_inst(load);
        assert!(module.block(entry).insts.is_empty());
    }

    #[test]
    #[should_panic(expected = "still has users")]
    fn test_erase_with_users_panics() {
        let mut module = Module::new();
        let f = module.create_function("f".into(), false, None);
        let entry = module.create_block(f);
        let lit = module.intern_literal(Literal::Number(1.0));

        let load = module.insert_inst(
            entry,
            None,
            Opcode::LoadConst,
            smallvec![Value::Literal(lit)],
            smallvec![],
        );
        module.insert_inst(
            entry,
            None,
            Opcode::Ret,
            smallvec![Value::Inst(load)],
            smallvec![],
        );
        module.erase_inst(load);
    }
}
