use kernelir_core::{CastOp, FuncId, InstId, InstKind, MetadataKind, Module, Value};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Annotations that stop holding once a pointer argument is copied into a local stack slot.
pub const UNSOUND_AFTER_WRAPPING: [MetadataKind; 2] =
    [MetadataKind::InvariantLoad, MetadataKind::Tbaa];

/// Strips invariant-load and alias-class annotations from every instruction reachable from a
/// pointer parameter of `func` through casts and address computations.
///
/// The walk stops at calls: a callee's loads keep their annotations.
/// Returns the number of annotations removed.
pub fn strip_invariant_metadata(module: &mut Module, func: FuncId) -> usize {
    let Some(function) = module.function(func) else {
        return 0;
    };

    let mut queue: VecDeque<Value> = function
        .params()
        .iter()
        .enumerate()
        .filter(|(_, ty)| ty.is_pointer())
        .map(|(i, _)| Value::Param(func, i as u32))
        .collect();
    let mut seen: HashSet<InstId> = HashSet::new();
    let mut stripped = 0;

    while let Some(value) = queue.pop_front() {
        for user in module.users(&value) {
            if !seen.insert(user) {
                continue;
            }
            let inst = &mut module[user];
            for kind in &UNSOUND_AFTER_WRAPPING {
                if inst.remove_metadata(kind).is_some() {
                    stripped += 1;
                }
            }
            if derives_pointer(&inst.kind) {
                queue.push_back(Value::Inst(user));
            }
        }
    }

    debug!(function = %module[func].name, stripped, "stripped pointer metadata");
    stripped
}

fn derives_pointer(kind: &InstKind) -> bool {
    matches!(
        kind,
        InstKind::Cast(CastOp::BitCast)
            | InstKind::Cast(CastOp::AddrSpaceCast)
            | InstKind::GetElementPtr { .. }
    )
}
