use super::cfg::ControlFlowGraph;
use crate::block::BlockId;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: BlockId,
    idom: HashMap<BlockId, BlockId>,
    children: HashMap<BlockId, Vec<BlockId>>,
    reachable: HashSet<BlockId>,
}

impl DominatorTree {
    pub fn build(cfg: &ControlFlowGraph) -> Self {
        let entry = cfg.entry;
        let mut idom = HashMap::new();
        let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();

        let blocks = cfg.reverse_postorder();
        let reachable: HashSet<BlockId> = blocks.iter().copied().collect();

        if blocks.len() <= 1 {
            return Self {
                entry,
                idom,
                children,
                reachable,
            };
        }

        let mut doms: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();

        doms.insert(entry, HashSet::from([entry]));

        for &block in &blocks[1..] {
            doms.insert(block, reachable.clone());
        }

        let mut changed = true;
        while changed {
            changed = false;

            for &block in &blocks[1..] {
                let mut new_dom: Option<HashSet<BlockId>> = None;
                for pred in cfg.predecessors(block) {
                    if let Some(pred_dom) = doms.get(pred) {
                        new_dom = Some(match new_dom {
                            Some(acc) => acc.intersection(pred_dom).copied().collect(),
                            None => pred_dom.clone(),
                        });
                    }
                }

                if let Some(mut new_dom_set) = new_dom {
                    new_dom_set.insert(block);

                    if doms[&block] != new_dom_set {
                        doms.insert(block, new_dom_set);
                        changed = true;
                    }
                }
            }
        }

        // The immediate dominator is the strict dominator dominated by every other one.
        for &block in &blocks[1..] {
            let dominators = &doms[&block];

            for &candidate in dominators {
                if candidate == block {
                    continue;
                }

                let is_immediate = dominators.iter().all(|&other| {
                    other == block
                        || other == candidate
                        || doms
                            .get(&candidate)
                            .map_or(false, |c_doms| c_doms.contains(&other))
                });

                if is_immediate {
                    idom.insert(block, candidate);
                    children.entry(candidate).or_default().push(block);
                    break;
                }
            }
        }

        Self {
            entry,
            idom,
            children,
            reachable,
        }
    }

    /// Unreachable blocks dominate nothing and are dominated by nothing.
    pub fn dominates(&self, dominator: BlockId, dominated: BlockId) -> bool {
        if !self.reachable.contains(&dominated) {
            return false;
        }
        if dominator == dominated {
            return true;
        }

        let mut current = dominated;
        while let Some(&idom) = self.idom.get(&current) {
            if idom == dominator {
                return true;
            }
            current = idom;
        }

        false
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied()
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children
            .get(&block)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn root(&self) -> BlockId {
        self.entry
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable.contains(&block)
    }

    /// Blocks in dominator-tree preorder, starting at the entry.
    pub fn preorder(&self) -> Vec<BlockId> {
        let mut order = Vec::new();
        if !self.reachable.contains(&self.entry) {
            return order;
        }
        let mut stack = vec![self.entry];
        while let Some(block) = stack.pop() {
            order.push(block);
            stack.extend(self.children(block).iter().rev());
        }
        order
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
    fn test_simple_dominance() {
        let mut module = Module::new("m");
        let f = module
            .add_function(Function::definition("test", FunctionType::void(vec![Type::i1()])))
            .unwrap();
        let entry = module[f].entry_block().unwrap();
        let b1 = module.create_block(f).unwrap();
        let b2 = module.create_block(f).unwrap();
        let end = module.create_block(f).unwrap();

        let mut b = InstBuilder::at_end(&mut module, f, entry);
        b.cond_br(Value::Param(f, 0), b1, b2).unwrap();
        b.position_at_end(f, b1);
        b.br(end).unwrap();
        b.position_at_end(f, b2);
        b.br(end).unwrap();
        b.position_at_end(f, end);
        b.ret(None).unwrap();

        let cfg = ControlFlowGraph::build(&module, f);
        let dom_tree = DominatorTree::build(&cfg);

        assert!(dom_tree.dominates(entry, entry));
        assert!(dom_tree.dominates(entry, b1));
        assert!(dom_tree.dominates(entry, b2));
        assert!(dom_tree.dominates(entry, end));

        assert!(!dom_tree.dominates(b1, b2));
        assert!(!dom_tree.dominates(b2, b1));
        assert!(!dom_tree.dominates(b1, end));
        assert!(!dom_tree.dominates(b2, end));

        assert_eq!(dom_tree.idom(b1), Some(entry));
        assert_eq!(dom_tree.idom(b2), Some(entry));
        assert_eq!(dom_tree.idom(end), Some(entry));
        assert_eq!(dom_tree.preorder().len(), 4);
    }
}
