//! Intermediate representation.
//!
//! - **Arena** (`arena.rs`): typed IDs and entity storage
//! - **Instructions** (`instruction.rs`): opcodes, operands, values
//! - **Module** (`module.rs`): functions, blocks, use lists, literal interning
//! - **Builder** (`builder.rs`): construction and cloning

pub mod arena;
pub mod builder;
pub mod instruction;
pub mod module;

pub use arena::{Arena, Id};
pub use builder::IrBuilder;
pub use instruction::{
    BinaryOp, BlockId, FuncId, InstId, Instruction, LitId, Literal, Opcode, ParamId, UnaryOp,
    Value, VarId,
};
pub use module::{BasicBlock, Function, Module, Parameter, Variable};
