use super::cfg::ControlFlowGraph;
use super::dominator::DominatorTree;
use crate::block::BlockId;
use std::collections::HashSet;

/// A natural loop: everything that reaches a back edge without passing through the header.
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    pub blocks: HashSet<BlockId>,
    pub latches: Vec<BlockId>,
    /// Blocks outside the loop targeted from inside it.
    pub exits: Vec<BlockId>,
    pub depth: usize,
}

impl Loop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    /// The single out-of-loop predecessor of the header, when it branches only to the header.
    pub fn preheader(&self, cfg: &ControlFlowGraph) -> Option<BlockId> {
        let outside: Vec<BlockId> = cfg
            .predecessors(self.header)
            .iter()
            .copied()
            .filter(|b| !self.contains(*b))
            .collect();
        match outside.as_slice() {
            [pred] if cfg.successors(*pred) == [self.header] => Some(*pred),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    loops: Vec<Loop>,
}

impl LoopInfo {
    pub fn build(cfg: &ControlFlowGraph, dom_tree: &DominatorTree) -> Self {
        let mut loops: Vec<Loop> = Vec::new();

        for block in cfg.reverse_postorder() {
            for &succ in cfg.successors(block) {
                if !dom_tree.dominates(succ, block) {
                    continue;
                }
                let header = succ;
                let body = Self::natural_loop(cfg, dom_tree, header, block);
                match loops.iter_mut().find(|l| l.header == header) {
                    Some(existing) => {
                        existing.blocks.extend(body);
                        existing.latches.push(block);
                    }
                    None => loops.push(Loop {
                        header,
                        blocks: body,
                        latches: vec![block],
                        exits: Vec::new(),
                        depth: 0,
                    }),
                }
            }
        }

        let headers_and_bodies: Vec<(BlockId, HashSet<BlockId>)> = loops
            .iter()
            .map(|l| (l.header, l.blocks.clone()))
            .collect();
        for l in &mut loops {
            l.depth = headers_and_bodies
                .iter()
                .filter(|(_, body)| body.contains(&l.header))
                .count();
            let mut exits = Vec::new();
            for &b in &cfg.blocks {
                if !l.blocks.contains(&b) {
                    continue;
                }
                for &succ in cfg.successors(b) {
                    if !l.blocks.contains(&succ) && !exits.contains(&succ) {
                        exits.push(succ);
                    }
                }
            }
            l.exits = exits;
        }

        // Innermost first.
        loops.sort_by(|a, b| b.depth.cmp(&a.depth));
        Self { loops }
    }

    fn natural_loop(
        cfg: &ControlFlowGraph,
        dom_tree: &DominatorTree,
        header: BlockId,
        latch: BlockId,
    ) -> HashSet<BlockId> {
        let mut body = HashSet::from([header]);
        let mut worklist = vec![latch];
        while let Some(block) = worklist.pop() {
            if !dom_tree.is_reachable(block) || !body.insert(block) {
                continue;
            }
            worklist.extend(cfg.predecessors(block).iter().copied());
        }
        body
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Innermost loop containing `block`.
    pub fn loop_for(&self, block: BlockId) -> Option<&Loop> {
        self.loops.iter().find(|l| l.contains(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::InstBuilder;
    use crate::function::Function;
    use crate::module::Module;
    use crate::types::{FunctionType, Type};
    use crate::values::Value;

    #[test]
    fn test_single_loop() {
        let mut module = Module::new("m");
        let f = module
            .add_function(Function::definition("f", FunctionType::void(vec![Type::i1()])))
            .unwrap();
        let entry = module[f].entry_block().unwrap();
        let header = module.create_block(f).unwrap();
        let body = module.create_block(f).unwrap();
        let exit = module.create_block(f).unwrap();

        let mut b = InstBuilder::at_end(&mut module, f, entry);
        b.br(header).unwrap();
        b.position_at_end(f, header);
        b.cond_br(Value::Param(f, 0), body, exit).unwrap();
        b.position_at_end(f, body);
        b.br(header).unwrap();
        b.position_at_end(f, exit);
        b.ret(None).unwrap();

        let cfg = ControlFlowGraph::build(&module, f);
        let dom_tree = DominatorTree::build(&cfg);
        let info = LoopInfo::build(&cfg, &dom_tree);

        assert_eq!(info.loops().len(), 1);
        let l = &info.loops()[0];
        assert_eq!(l.header, header);
        assert_eq!(l.latches, vec![body]);
        assert_eq!(l.exits, vec![exit]);
        assert_eq!(l.depth, 1);
        assert!(l.contains(body));
        assert!(!l.contains(entry));
        assert_eq!(l.preheader(&cfg), Some(entry));
        assert!(info.loop_for(exit).is_none());
    }
}
