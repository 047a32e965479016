use super::defined_functions;
use anyhow::Result;
use kernelir_core::{
    ControlFlowGraph, DominatorTree, FuncId, InstId, Loop, LoopInfo, Module, Pass, Value,
};
use tracing::debug;

/// Loop-invariant code motion.
///
/// Hoists speculatable computations whose operands are all defined outside the loop into the
/// loop preheader. Loops without a dedicated preheader are skipped. Inner loops go first, so a
/// value can climb several levels in one run.
#[derive(Debug, Default)]
pub struct Licm {
    hoisted: usize,
}

impl Licm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hoisted(&self) -> usize {
        self.hoisted
    }

    fn run_on_function(&mut self, module: &mut Module, func: FuncId) -> Result<bool> {
        let cfg = ControlFlowGraph::build(module, func);
        let dom_tree = DominatorTree::build(&cfg);
        let loops = LoopInfo::build(&cfg, &dom_tree);

        let mut changed = false;
        for l in loops.loops() {
            let Some(preheader) = l.preheader(&cfg) else {
                continue;
            };
            let Some(anchor) = module.terminator(func, preheader) else {
                continue;
            };
            loop {
                let candidates = hoistable(module, func, l, &cfg);
                if candidates.is_empty() {
                    break;
                }
                for id in candidates {
                    module.move_inst_before(id, anchor)?;
                    debug!(inst = %id, header = %l.header, "hoisted out of loop");
                    self.hoisted += 1;
                }
                changed = true;
            }
        }
        Ok(changed)
    }
}

/// Speculatable instructions of the loop whose operands are all defined outside it.
fn hoistable(module: &Module, func: FuncId, l: &Loop, cfg: &ControlFlowGraph) -> Vec<InstId> {
    let defined_in_loop = |v: &Value| {
        v.as_inst()
            .and_then(|def| module[def].block())
            .map_or(false, |b| l.contains(b))
    };

    cfg.blocks
        .iter()
        .filter(|b| l.contains(**b))
        .flat_map(|&b| module.block_insts(func, b).iter().copied())
        .filter(|&id| {
            let inst = &module[id];
            inst.is_speculatable() && !inst.operands().iter().any(|v| defined_in_loop(v))
        })
        .collect()
}

impl Pass for Licm {
    fn name(&self) -> &'static str {
        "licm"
    }

    fn description(&self) -> &'static str {
        "Hoists loop-invariant computations into loop preheaders"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        self.hoisted = 0;
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
