/*! Core IR types and builders for device code lowering.
 *
 * Kernels arrive from a host front end as SSA IR that still assumes a managed runtime. This crate
 * models that IR as an arena of instructions with explicit use lists, so passes can rewrite call
 * sites, redirect users and delete instructions without ever holding a dangling reference.
 */

pub mod analysis;
pub mod block;
pub mod builder;
pub mod function;
pub mod instructions;
pub mod metadata;
pub mod module;
pub mod persist;
pub mod types;
pub mod values;
pub mod verify;

pub use analysis::{ControlFlowGraph, DominatorTree, Loop, LoopInfo, Pass, PassManager};
pub use block::{BasicBlock, BlockId};
pub use builder::{InsertPoint, InstBuilder};
pub use function::{FnAttr, Function, FunctionBody, Linkage, ParamAttr};
pub use instructions::{BinOp, CastOp, InstKind, Instruction, IntPredicate};
pub use metadata::{MdNode, MdOperand, MetadataKind};
pub use module::{Global, Module, Use};
pub use types::{AddressSpace, FunctionType, Type};
pub use values::{Constant, FuncId, GlobalId, InstId, Value};
pub use verify::{verify_function, verify_module};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),
    #[error("Builder error: {0}")]
    BuilderError(String),
    #[error("Duplicate symbol: {0}")]
    DuplicateSymbol(String),
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("Verification failed in @{function}: {message}")]
    Verification { function: String, message: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, IrError>;
