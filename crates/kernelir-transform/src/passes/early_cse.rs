use super::defined_functions;
use anyhow::Result;
use kernelir_core::{
    BlockId, ControlFlowGraph, DominatorTree, FuncId, InstId, InstKind, Module, Pass, Type, Value,
};
use std::collections::HashMap;

/// Common subexpression elimination over the dominator tree.
///
/// Pure instructions are value-numbered by opcode, operands and type; a repeat whose earlier
/// twin dominates it is replaced. Within a block, loads are also forwarded from an earlier load
/// or store of the same pointer until something may write memory.
#[derive(Debug, Default)]
pub struct EarlyCse {
    eliminated: usize,
}

type ExprKey = (InstKind, Vec<Value>, Type);

impl EarlyCse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eliminated(&self) -> usize {
        self.eliminated
    }

    fn run_on_function(&mut self, module: &mut Module, func: FuncId) -> Result<bool> {
        let cfg = ControlFlowGraph::build(module, func);
        let dom_tree = DominatorTree::build(&cfg);
        let mut available: HashMap<ExprKey, (InstId, BlockId)> = HashMap::new();
        let mut changed = false;

        for block in dom_tree.preorder() {
            let mut memory: HashMap<Value, Value> = HashMap::new();

            for id in module.block_insts(func, block).to_vec() {
                let inst = &module[id];
                match inst.kind {
                    InstKind::Load => {
                        let ptr = inst.operands()[0].clone();
                        if let Some(known) = memory.get(&ptr).cloned() {
                            if module.value_type(&known) == inst.ty {
                                self.replace(module, id, known)?;
                                changed = true;
                                continue;
                            }
                        }
                        memory.insert(ptr, Value::Inst(id));
                    }
                    InstKind::Store => {
                        let value = inst.operands()[0].clone();
                        let ptr = inst.operands()[1].clone();
                        memory.clear();
                        memory.insert(ptr, value);
                    }
                    _ if module.may_have_side_effects(id) => memory.clear(),
                    _ if inst.is_pure() => {
                        let key = (inst.kind.clone(), inst.operands().to_vec(), inst.ty.clone());
                        match available.get(&key) {
                            Some(&(earlier, def_block))
                                if module.is_live(earlier) && dom_tree.dominates(def_block, block) =>
                            {
                                self.replace(module, id, Value::Inst(earlier))?;
                                changed = true;
                            }
                            _ => {
                                available.insert(key, (id, block));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(changed)
    }

    fn replace(&mut self, module: &mut Module, id: InstId, with: Value) -> Result<()> {
        module.replace_all_uses_with(&Value::Inst(id), with);
        module.erase_inst(id)?;
        self.eliminated += 1;
        Ok(())
    }
}

impl Pass for EarlyCse {
    fn name(&self) -> &'static str {
        "early-cse"
    }

    fn description(&self) -> &'static str {
        "Eliminates redundant computations and loads"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        self.eliminated = 0;
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
