/*! Generic cleanup passes.
 *
 * These are the module passes the device pipeline interleaves with intrinsic lowering. Each one
 * is small and conservative: it only rewrites what it can prove through the use index and the
 * core analyses, and reports whether the module changed.
 */

pub mod adce;
pub mod const_merge;
pub mod dead_arg_elim;
pub mod dse;
pub mod early_cse;
pub mod global_dce;
pub mod inline;
pub mod instcombine;
pub mod internalize;
pub mod licm;
pub mod loop_unroll;
pub mod simplify_cfg;
pub mod verifier;

pub use adce::Adce;
pub use const_merge::ConstMerge;
pub use dead_arg_elim::DeadArgElim;
pub use dse::Dse;
pub use early_cse::EarlyCse;
pub use global_dce::GlobalDce;
pub use inline::AlwaysInliner;
pub use instcombine::InstCombine;
pub use internalize::Internalize;
pub use licm::Licm;
pub use loop_unroll::{LoopUnroll, UnrollConfig};
pub use simplify_cfg::SimplifyCfg;
pub use verifier::Verifier;

use kernelir_core::{FuncId, InstId, MdNode, MdOperand, Module, Value};

pub(crate) fn defined_functions(module: &Module) -> Vec<FuncId> {
    module
        .functions()
        .filter(|(_, f)| !f.is_declaration())
        .map(|(id, _)| id)
        .collect()
}

/// An unused instruction whose execution cannot be observed.
pub(crate) fn is_trivially_dead(module: &Module, id: InstId) -> bool {
    module.is_live(id)
        && module[id].has_result()
        && !module.has_uses(&Value::Inst(id))
        && !module.may_have_side_effects(id)
}

/// Erases `id` if it is trivially dead, then any operand that became dead as a result.
pub(crate) fn erase_if_dead(module: &mut Module, id: InstId) -> anyhow::Result<usize> {
    let mut erased = 0;
    let mut worklist = vec![id];
    while let Some(id) = worklist.pop() {
        if !is_trivially_dead(module, id) {
            continue;
        }
        let operands: Vec<InstId> = module[id]
            .operands()
            .iter()
            .filter_map(Value::as_inst)
            .collect();
        module.erase_inst(id)?;
        erased += 1;
        worklist.extend(operands);
    }
    Ok(erased)
}

/// Whether any named metadata node mentions `func`.
pub(crate) fn referenced_by_metadata(module: &Module, func: FuncId) -> bool {
    fn mentions(node: &MdNode, func: FuncId) -> bool {
        node.operands().iter().any(|op| match op {
            MdOperand::Function(f) => *f == func,
            MdOperand::Node(inner) => mentions(inner, func),
            _ => false,
        })
    }
    module
        .named_metadata
        .values()
        .flatten()
        .any(|node| mentions(node, func))
}
