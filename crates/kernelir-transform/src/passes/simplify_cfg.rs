use super::defined_functions;
use anyhow::Result;
use kernelir_core::{
    BlockId, ControlFlowGraph, FuncId, InstKind, Instruction, Module, Pass, Type, Value,
};

/// Control-flow cleanup, iterated to a fixpoint per function:
///
/// 1. conditional branches on a constant, or to the same block twice, become unconditional;
/// 2. unreachable blocks are deleted;
/// 3. a block whose only predecessor jumps straight to it is merged into that predecessor;
/// 4. empty blocks that just jump on are bypassed when the target has no phis.
#[derive(Debug, Default)]
pub struct SimplifyCfg;

impl SimplifyCfg {
    pub fn new() -> Self {
        Self
    }

    fn run_on_function(&self, module: &mut Module, func: FuncId) -> Result<bool> {
        let mut changed = false;
        loop {
            let progress = fold_branches(module, func)?
                || remove_unreachable(module, func)?
                || merge_into_predecessor(module, func)?
                || bypass_empty_blocks(module, func)?;
            if !progress {
                return Ok(changed);
            }
            changed = true;
        }
    }
}

fn blocks(module: &Module, func: FuncId) -> Vec<BlockId> {
    module
        .body(func)
        .map(|b| b.block_ids())
        .unwrap_or_default()
}

fn fold_branches(module: &mut Module, func: FuncId) -> Result<bool> {
    let mut changed = false;
    for block in blocks(module, func) {
        let Some(term) = module.terminator(func, block) else {
            continue;
        };
        let InstKind::CondBr {
            then_dest,
            else_dest,
        } = module[term].kind
        else {
            continue;
        };
        let cond = module[term].operands()[0].as_constant().and_then(|c| c.as_u64());
        let (taken, dropped) = match cond {
            _ if then_dest == else_dest => (then_dest, None),
            Some(0) => (else_dest, Some(then_dest)),
            Some(_) => (then_dest, Some(else_dest)),
            None => continue,
        };

        module.erase_inst(term)?;
        module.append_inst(
            func,
            block,
            Instruction::new(InstKind::Br { dest: taken }, vec![], Type::Void),
        )?;
        if let Some(dropped) = dropped {
            module.remove_phi_incoming(func, dropped, block);
        }
        changed = true;
    }
    Ok(changed)
}

fn remove_unreachable(module: &mut Module, func: FuncId) -> Result<bool> {
    let cfg = ControlFlowGraph::build(module, func);
    let reachable = cfg.reachable_blocks();
    let dead: Vec<BlockId> = cfg
        .blocks
        .iter()
        .copied()
        .filter(|b| !reachable.contains(b))
        .collect();
    for &block in &dead {
        module.remove_block(func, block)?;
    }
    Ok(!dead.is_empty())
}

fn merge_into_predecessor(module: &mut Module, func: FuncId) -> Result<bool> {
    let Some(entry) = module.function(func).and_then(|f| f.entry_block()) else {
        return Ok(false);
    };
    for block in blocks(module, func) {
        if block == entry {
            continue;
        }
        let preds = module.predecessors(func, block);
        let [pred] = preds[..] else {
            continue;
        };
        if pred == block || module.successors(func, pred) != [block] {
            continue;
        }
        let Some(pred_term) = module.terminator(func, pred) else {
            continue;
        };

        // Single-entry phis are just their incoming value.
        for phi in module.phis(func, block) {
            let value = module[phi].operands()[0].clone();
            let replacement = if value == Value::Inst(phi) {
                Value::undef(module[phi].ty.clone())
            } else {
                value
            };
            module.replace_all_uses_with(&Value::Inst(phi), replacement);
            module.erase_inst(phi)?;
        }

        module.erase_inst(pred_term)?;
        for inst in module.block_insts(func, block).to_vec() {
            module.move_inst_to_end(inst, func, pred)?;
        }
        for succ in module.successors(func, pred) {
            module.replace_phi_block(func, succ, block, pred);
        }
        module.remove_block(func, block)?;
        return Ok(true);
    }
    Ok(false)
}

fn bypass_empty_blocks(module: &mut Module, func: FuncId) -> Result<bool> {
    let Some(entry) = module.function(func).and_then(|f| f.entry_block()) else {
        return Ok(false);
    };
    let mut changed = false;
    for block in blocks(module, func) {
        if block == entry {
            continue;
        }
        let [only] = module.block_insts(func, block) else {
            continue;
        };
        let InstKind::Br { dest } = module[*only].kind else {
            continue;
        };
        if dest == block || !module.phis(func, dest).is_empty() {
            continue;
        }
        let preds = module.predecessors(func, block);
        if preds.is_empty() {
            continue;
        }
        for pred in preds {
            if let Some(term) = module.terminator(func, pred) {
                module[term].kind.replace_block(block, dest);
            }
        }
        changed = true;
    }
    Ok(changed)
}

impl Pass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "simplifycfg"
    }

    fn description(&self) -> &'static str {
        "Folds constant branches, removes dead blocks and merges straight-line blocks"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        let mut changed = false;
        for func in defined_functions(module) {
            changed |= self.run_on_function(module, func)?;
        }
        Ok(changed)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernelir_core::verify_module;
    use kernelir_emit::print_module;
    use kernelir_parser::parse_module;
    use pretty_assertions::assert_eq;

    fn simplify(input: &str) -> String {
        let mut module = parse_module(input).unwrap();
        SimplifyCfg::new().run_on_module(&mut module).unwrap();
        verify_module(&module).unwrap();
        print_module(&module).trim().to_string()
    }

    #[test]
    fn test_constant_branch_collapses_to_one_block() {
        let out = simplify(
            r#"
define i32 @f(i32 %0) {
bb0:
  br i1 true, label %bb1, label %bb2
bb1:
  %1 = add i32 %0, 1
  br label %bb3
bb2:
  %2 = add i32 %0, 2
  br label %bb3
bb3:
  %3 = phi i32 [ %1, %bb1 ], [ %2, %bb2 ]
  ret i32 %3
}
"#,
        );
        assert_eq!(
            out,
            r#"define i32 @f(i32 %0) {
bb0:
  %1 = add i32 %0, 1
  ret i32 %1
}"#
        );
    }

    #[test]
    fn test_empty_forwarding_block_is_bypassed() {
        let out = simplify(
            r#"
define void @g(i1 %0, i32* %1) {
bb0:
  br i1 %0, label %bb1, label %bb2
bb1:
  br label %bb3
bb2:
  store i32 0, i32* %1
  br label %bb3
bb3:
  ret void
}
"#,
        );
        assert_eq!(
            out,
            r#"define void @g(i1 %0, i32* %1) {
bb0:
  br i1 %0, label %bb2, label %bb1
bb1:
  store i32 0, i32* %1
  br label %bb2
bb2:
  ret void
}"#
        );
    }
}
