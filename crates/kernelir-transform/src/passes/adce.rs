use super::defined_functions;
use anyhow::Result;
use kernelir_core::{FuncId, InstId, Module, Pass, Value};
use std::collections::HashSet;

/// Aggressive dead code elimination.
///
/// Everything is presumed dead until reached from an instruction with side effects (stores,
/// calls that may write, terminators). Unlike plain DCE this also removes dead cycles, such as
/// phis that only feed each other.
#[derive(Debug, Default)]
pub struct Adce {
    removed: usize,
}

impl Adce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    fn run_on_function(&mut self, module: &mut Module, func: FuncId) -> Result<bool> {
        let insts = module.function_insts(func);

        let mut live: HashSet<InstId> = HashSet::new();
        let mut worklist: Vec<InstId> = insts
            .iter()
            .copied()
            .filter(|&id| module.may_have_side_effects(id))
            .collect();
        while let Some(id) = worklist.pop() {
            if !live.insert(id) {
                continue;
            }
            worklist.extend(module[id].operands().iter().filter_map(Value::as_inst));
        }

        let dead: Vec<InstId> = insts.into_iter().filter(|id| !live.contains(id)).collect();
        if dead.is_empty() {
            return Ok(false);
        }
        // Dead instructions may use each other; cut those edges before erasing.
        for &id in &dead {
            module.set_operands(id, Vec::new());
        }
        for &id in &dead {
            module.erase_inst(id)?;
        }
        self.removed += dead.len();
        Ok(true)
    }
}

impl Pass for Adce {
    fn name(&self) -> &'static str {
        "adce"
    }

    fn description(&self) -> &'static str {
        "Removes instructions that cannot affect side effects or control flow"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        self.removed = 0;
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
