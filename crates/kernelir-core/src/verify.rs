use crate::analysis::{ControlFlowGraph, DominatorTree};
use crate::block::BlockId;
use crate::instructions::InstKind;
use crate::module::Module;
use crate::types::Type;
use crate::values::{FuncId, InstId, Value};
use crate::{IrError, Result};
use std::collections::{HashMap, HashSet};

pub fn verify_module(module: &Module) -> Result<()> {
    for id in module.function_ids() {
        verify_function(module, id)?;
    }
    if !module.use_index_matches_arena() {
        return Err(IrError::Verification {
            function: module.name.clone(),
            message: "use index is out of sync with instruction operands".into(),
        });
    }
    Ok(())
}

pub fn verify_function(module: &Module, func: FuncId) -> Result<()> {
    let function = module
        .function(func)
        .ok_or_else(|| IrError::UnknownSymbol(func.to_string()))?;
    let Some(body) = function.body.as_ref() else {
        return Ok(());
    };

    let fail = |message: String| IrError::Verification {
        function: function.name.clone(),
        message,
    };

    let cfg = ControlFlowGraph::build(module, func);
    let dom_tree = DominatorTree::build(&cfg);

    let mut position: HashMap<InstId, (BlockId, usize)> = HashMap::new();
    for (block_id, block) in &body.blocks {
        for (i, &id) in block.instructions.iter().enumerate() {
            position.insert(id, (*block_id, i));
        }
    }

    for (block_id, block) in &body.blocks {
        let Some(&last) = block.instructions.last() else {
            return Err(fail(format!("block {} is empty", block_id)));
        };
        if !module.is_live(last) || !module[last].is_terminator() {
            return Err(fail(format!("block {} does not end in a terminator", block_id)));
        }

        let preds: HashSet<BlockId> = cfg.predecessors(*block_id).iter().copied().collect();
        let mut in_phi_prefix = true;

        for (i, &id) in block.instructions.iter().enumerate() {
            let Some(inst) = module.try_inst(id) else {
                return Err(fail(format!("block {} lists erased {}", block_id, id)));
            };
            if inst.parent() != Some((func, *block_id)) {
                return Err(fail(format!("{} has a stale parent link", id)));
            }
            if inst.is_terminator() && i + 1 != block.instructions.len() {
                return Err(fail(format!("terminator in the middle of block {}", block_id)));
            }
            if inst.is_phi() {
                if !in_phi_prefix {
                    return Err(fail(format!("phi {} is not at the top of {}", id, block_id)));
                }
            } else {
                in_phi_prefix = false;
            }

            for succ in inst.successors() {
                if !body.blocks.contains_key(&succ) {
                    return Err(fail(format!("branch to missing block {}", succ)));
                }
            }

            for (k, op) in inst.operands().iter().enumerate() {
                match op {
                    Value::Inst(def) => {
                        let Some(&(def_block, def_pos)) = position.get(def) else {
                            return Err(fail(format!(
                                "{} uses {} which is not in this function",
                                id, def
                            )));
                        };
                        if !dom_tree.is_reachable(*block_id) {
                            continue;
                        }
                        let use_block = match &inst.kind {
                            InstKind::Phi { blocks } => blocks[k],
                            _ => *block_id,
                        };
                        let dominated = if inst.is_phi() {
                            dom_tree.dominates(def_block, use_block)
                                || !dom_tree.is_reachable(use_block)
                        } else if def_block == use_block {
                            def_pos < i
                        } else {
                            dom_tree.dominates(def_block, use_block)
                        };
                        if !dominated {
                            return Err(fail(format!(
                                "{} does not dominate its use in {}",
                                def, id
                            )));
                        }
                    }
                    Value::Param(owner, index) => {
                        if *owner != func || *index as usize >= function.params().len() {
                            return Err(fail(format!("{} uses a foreign parameter", id)));
                        }
                    }
                    Value::Function(f) if module.function(*f).is_none() => {
                        return Err(fail(format!("{} refers to removed {}", id, f)));
                    }
                    Value::Global(g) if module.global(*g).is_none() => {
                        return Err(fail(format!("{} refers to removed {}", id, g)));
                    }
                    _ => {}
                }
            }

            check_types(module, func, id).map_err(fail)?;

            if let InstKind::Phi { blocks } = &inst.kind {
                if blocks.len() != inst.operands().len() {
                    return Err(fail(format!("phi {} has mismatched incoming lists", id)));
                }
                let incoming: HashSet<BlockId> = blocks.iter().copied().collect();
                if incoming != preds {
                    return Err(fail(format!(
                        "phi {} incoming blocks do not match the predecessors of {}",
                        id, block_id
                    )));
                }
            }
        }
    }

    Ok(())
}

fn check_types(module: &Module, func: FuncId, id: InstId) -> std::result::Result<(), String> {
    let inst = &module[id];
    let ty_of = |v: &Value| module.value_type(v);
    match &inst.kind {
        InstKind::Load => {
            let ptr = ty_of(&inst.operands()[0]);
            if ptr.pointee() != Some(&inst.ty) {
                return Err(format!("{} loads {} through {}", id, inst.ty, ptr));
            }
        }
        InstKind::Store => {
            let value = ty_of(&inst.operands()[0]);
            let ptr = ty_of(&inst.operands()[1]);
            if ptr.pointee() != Some(&value) {
                return Err(format!("{} stores {} through {}", id, value, ptr));
            }
        }
        InstKind::Call => {
            let Some(callee) = inst.callee().and_then(|f| module.function(f)) else {
                return Err(format!("{} has no direct callee", id));
            };
            let args: Vec<Type> = inst.call_args().iter().map(ty_of).collect();
            if args != callee.ty.params || inst.ty != callee.ty.ret {
                return Err(format!(
                    "call {} does not match the signature of @{}",
                    id, callee.name
                ));
            }
        }
        InstKind::Ret => {
            let expected = module[func].return_type();
            let actual = inst.operand(0).map(ty_of).unwrap_or(Type::Void);
            if *expected != actual {
                return Err(format!("{} returns {}, expected {}", id, actual, expected));
            }
        }
        InstKind::CondBr { .. } => {
            if ty_of(&inst.operands()[0]) != Type::i1() {
                return Err(format!("{} branches on a non-i1 condition", id));
            }
        }
        InstKind::Phi { .. } | InstKind::Select => {
            let values = match inst.kind {
                InstKind::Select => &inst.operands()[1..],
                _ => inst.operands(),
            };
            if let Some(bad) = values.iter().map(ty_of).find(|t| *t != inst.ty) {
                return Err(format!("{} merges {} into {}", id, bad, inst.ty));
            }
        }
        InstKind::Binary(_) | InstKind::ICmp(_) => {
            let lhs = ty_of(&inst.operands()[0]);
            let rhs = ty_of(&inst.operands()[1]);
            if lhs != rhs {
                return Err(format!("{} has operands {} and {}", id, lhs, rhs));
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::InstBuilder;
    use crate::function::Function;
    use crate::types::FunctionType;

    #[test]
    fn test_missing_terminator() {
        let mut module = Module::new("m");
        let f = module
            .add_function(Function::definition("f", FunctionType::void(vec![])))
            .unwrap();
        let entry = module[f].entry_block().unwrap();
        InstBuilder::at_end(&mut module, f, entry)
            .alloca(Type::i32())
            .unwrap();
        let err = verify_module(&module).unwrap_err();
        assert!(matches!(err, IrError::Verification { .. }));
    }

    #[test]
    fn test_valid_function() {
        let mut module = Module::new("m");
        let f = module
            .add_function(Function::definition(
                "f",
                FunctionType::new(vec![Type::i32()], Type::i32()),
            ))
            .unwrap();
        let entry = module[f].entry_block().unwrap();
        let mut b = InstBuilder::at_end(&mut module, f, entry);
        let sum = b.add(Value::Param(f, 0), Value::int(32, 2)).unwrap();
        b.ret(Some(sum)).unwrap();
        verify_module(&module).unwrap();
    }

    #[test]
    fn test_wrong_return_type() {
        let mut module = Module::new("m");
        let f = module
            .add_function(Function::definition("f", FunctionType::void(vec![])))
            .unwrap();
        let entry = module[f].entry_block().unwrap();
        InstBuilder::at_end(&mut module, f, entry)
            .ret(Some(Value::int(32, 0)))
            .unwrap();
        assert!(verify_function(&module, f).is_err());
    }
}
