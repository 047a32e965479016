/*! Unified interface for device kernel lowering.
 *
 * Single import for the whole toolchain: the IR itself, its text format in both directions, and
 * the device compiler that turns a front-end module into kernel-ready IR.
 */

pub use kernelir_core as core;
pub use kernelir_emit as emit;
pub use kernelir_parser as parser;
pub use kernelir_transform as transform;

pub use kernelir_core::{
    block::{BasicBlock, BlockId},
    function::{Function, Linkage},
    instructions::Instruction,
    module::Module,
    types::Type,
    values::{FuncId, Value},
};

pub use kernelir_emit::{print_function, print_module};

pub use kernelir_parser::{parse_file, parse_module};

pub use kernelir_transform::{CompileError, CompilerJob, DeviceCompiler, SourceType};
