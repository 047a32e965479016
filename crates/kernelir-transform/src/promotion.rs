use crate::error::CompileResult;
use crate::job::{CompilerJob, Dim3};
use crate::wrapper::{wrap_entry, SourceType};
use kernelir_core::{Constant, FuncId, MdNode, MdOperand, Module};
use tracing::info;

/// Named metadata the device backend reads launch bounds from.
pub const KERNEL_ANNOTATIONS: &str = "nvvm.annotations";

fn int_operand(value: u32) -> MdOperand {
    MdOperand::Const(Constant::int(32, i64::from(value)))
}

fn push_dims(node: &mut MdNode, prefix: &str, dims: Dim3) {
    for (axis, value) in dims.axes() {
        node.push(MdOperand::String(format!("{}{}", prefix, axis)));
        node.push(int_operand(value));
    }
}

/// The annotation node marking `wrapper` as a kernel, with one entry per launch bound the job
/// sets.
pub fn kernel_annotation(wrapper: FuncId, job: &CompilerJob) -> MdNode {
    let mut node = MdNode::new(vec![
        MdOperand::Function(wrapper),
        MdOperand::String("kernel".to_string()),
        int_operand(1),
    ]);
    if let Some(dims) = job.min_threads {
        push_dims(&mut node, "reqntid", dims);
    }
    if let Some(dims) = job.max_threads {
        push_dims(&mut node, "maxntid", dims);
    }
    if let Some(blocks) = job.blocks_per_sm {
        node.push(MdOperand::String("minctasm".to_string()));
        node.push(int_operand(blocks));
    }
    if let Some(registers) = job.max_registers {
        node.push(MdOperand::String("maxnreg".to_string()));
        node.push(int_operand(registers));
    }
    node
}

/// Wraps `entry` for the device ABI and registers the wrapper as a kernel.
pub fn promote_kernel(
    module: &mut Module,
    entry: FuncId,
    arg_types: &[SourceType],
    job: &CompilerJob,
) -> CompileResult<FuncId> {
    let wrapper = wrap_entry(module, entry, arg_types)?;
    let node = kernel_annotation(wrapper, job);
    let bounds = node.operands().len() / 2 - 1;
    module.add_named_metadata(KERNEL_ANNOTATIONS, node);
    info!(kernel = %module[wrapper].name, bounds, "promoted to kernel");
    Ok(wrapper)
}

/// Every `(function, tag, value)` triple in the kernel annotations, in module order.
pub fn kernel_annotations(module: &Module) -> Vec<(FuncId, String, i64)> {
    let Some(nodes) = module.named_metadata.get(KERNEL_ANNOTATIONS) else {
        return Vec::new();
    };
    let mut triples = Vec::new();
    for node in nodes {
        let Some((head, pairs)) = node.operands().split_first() else {
            continue;
        };
        let Some(func) = head.as_function() else {
            continue;
        };
        for pair in pairs.chunks_exact(2) {
            let tag = pair[0].as_str();
            let value = pair[1].as_const().and_then(Constant::as_i64);
            if let (Some(tag), Some(value)) = (tag, value) {
                triples.push((func, tag.to_string(), value));
            }
        }
    }
    triples
}
