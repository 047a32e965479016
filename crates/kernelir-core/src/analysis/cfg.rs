use crate::block::BlockId;
use crate::module::Module;
use crate::values::FuncId;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub entry: BlockId,
    /// Blocks in layout order.
    pub blocks: Vec<BlockId>,
    pub edges: HashMap<BlockId, Vec<BlockId>>,
    pub reverse_edges: HashMap<BlockId, Vec<BlockId>>,
}

impl ControlFlowGraph {
    /// Builds the graph of a defined function. Declarations yield an empty graph.
    pub fn build(module: &Module, func: FuncId) -> Self {
        let Some(body) = module.body(func) else {
            return Self {
                entry: BlockId(0),
                blocks: Vec::new(),
                edges: HashMap::new(),
                reverse_edges: HashMap::new(),
            };
        };

        let mut edges = HashMap::new();
        let mut reverse_edges: HashMap<BlockId, Vec<BlockId>> = HashMap::new();

        for &block_id in body.blocks.keys() {
            let mut successors = module.successors(func, block_id);
            successors.dedup();
            for &succ in &successors {
                let preds = reverse_edges.entry(succ).or_default();
                if !preds.contains(&block_id) {
                    preds.push(block_id);
                }
            }
            edges.insert(block_id, successors);
        }

        Self {
            entry: body.entry_block,
            blocks: body.blocks.keys().copied().collect(),
            edges,
            reverse_edges,
        }
    }

    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.reverse_edges
            .get(&block)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.edges.get(&block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable_blocks().contains(&block)
    }

    pub fn reachable_blocks(&self) -> HashSet<BlockId> {
        let mut visited = HashSet::new();
        if self.blocks.is_empty() {
            return visited;
        }
        let mut queue = VecDeque::new();
        queue.push_back(self.entry);

        while let Some(current) = queue.pop_front() {
            if visited.insert(current) {
                for &succ in self.successors(current) {
                    queue.push_back(succ);
                }
            }
        }

        visited
    }

    /// Reachable blocks, each listed before its successors except along back edges.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        if self.blocks.is_empty() {
            return postorder;
        }

        // Iterative DFS: (block, next successor index)
        let mut stack = vec![(self.entry, 0usize)];
        visited.insert(self.entry);
        while let Some((block, next)) = stack.pop() {
            let succs = self.successors(block);
            if next < succs.len() {
                stack.push((block, next + 1));
                let succ = succs[next];
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
            }
        }

        postorder.reverse();
        postorder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::InstBuilder;
    use crate::function::Function;
    use crate::types::FunctionType;
    use crate::values::Value;

    #[test]
    fn test_diamond() {
        let mut module = Module::new("m");
        let f = module
            .add_function(Function::definition(
                "f",
                FunctionType::void(vec![crate::types::Type::i1()]),
            ))
            .unwrap();
        let entry = module[f].entry_block().unwrap();
        let left = module.create_block(f).unwrap();
        let right = module.create_block(f).unwrap();
        let join = module.create_block(f).unwrap();
        let dead = module.create_block(f).unwrap();

        let mut b = InstBuilder::at_end(&mut module, f, entry);
        b.cond_br(Value::Param(f, 0), left, right).unwrap();
        b.position_at_end(f, left);
        b.br(join).unwrap();
        b.position_at_end(f, right);
        b.br(join).unwrap();
        b.position_at_end(f, join);
        b.ret(None).unwrap();
        b.position_at_end(f, dead);
        b.br(join).unwrap();

        let cfg = ControlFlowGraph::build(&module, f);
        assert_eq!(cfg.successors(entry), &[left, right]);
        assert_eq!(cfg.predecessors(join), &[left, right, dead]);
        assert!(!cfg.is_reachable(dead));

        let rpo = cfg.reverse_postorder();
        assert_eq!(rpo.first(), Some(&entry));
        assert_eq!(rpo.last(), Some(&join));
        assert_eq!(rpo.len(), 4);
    }
}
