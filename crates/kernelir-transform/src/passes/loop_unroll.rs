use super::{defined_functions, erase_if_dead};
use anyhow::Result;
use kernelir_core::{
    BinOp, BlockId, ControlFlowGraph, DominatorTree, FuncId, InstId, InstKind, Instruction,
    IntPredicate, LoopInfo, Module, Pass, Type, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnrollConfig {
    pub max_trip_count: u64,
    pub max_unrolled_size: usize,
}

impl Default for UnrollConfig {
    fn default() -> Self {
        Self {
            max_trip_count: 32,
            max_unrolled_size: 256,
        }
    }
}

/// Full unrolling of single-block counted loops.
///
/// A loop qualifies when its header is also its only latch, it has a preheader and one exit,
/// and it is driven by an induction variable starting at a constant, stepped by a constant and
/// compared against a constant bound. The trip count is computed by evaluating the exit test;
/// the body is then replicated once per iteration and the back edge removed.
#[derive(Debug, Default)]
pub struct LoopUnroll {
    config: UnrollConfig,
    unrolled: usize,
}

struct CountedLoop {
    header: BlockId,
    exit: BlockId,
    /// `(phi, preheader value, latch value)`
    phis: Vec<(InstId, Value, Value)>,
    body: Vec<InstId>,
    terminator: InstId,
    trip_count: u64,
}

impl LoopUnroll {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: UnrollConfig) -> Self {
        Self {
            config,
            unrolled: 0,
        }
    }

    pub fn unrolled(&self) -> usize {
        self.unrolled
    }

    fn run_on_function(&mut self, module: &mut Module, func: FuncId) -> Result<bool> {
        let mut changed = false;
        while let Some(counted) = self.find_candidate(module, func) {
            debug!(
                function = %module[func].name,
                header = %counted.header,
                trip_count = counted.trip_count,
                "fully unrolling loop"
            );
            unroll(module, func, counted)?;
            self.unrolled += 1;
            changed = true;
        }
        Ok(changed)
    }

    fn find_candidate(&self, module: &Module, func: FuncId) -> Option<CountedLoop> {
        let cfg = ControlFlowGraph::build(module, func);
        let dom_tree = DominatorTree::build(&cfg);
        let loops = LoopInfo::build(&cfg, &dom_tree);
        loops.loops().iter().find_map(|l| {
            if l.blocks.len() != 1 || l.latches != [l.header] {
                return None;
            }
            let [exit] = l.exits[..] else {
                return None;
            };
            let preheader = l.preheader(&cfg)?;
            self.analyze(module, func, l.header, preheader, exit)
        })
    }

    fn analyze(
        &self,
        module: &Module,
        func: FuncId,
        header: BlockId,
        preheader: BlockId,
        exit: BlockId,
    ) -> Option<CountedLoop> {
        let terminator = module.terminator(func, header)?;
        let InstKind::CondBr {
            then_dest,
            else_dest,
        } = module[terminator].kind
        else {
            return None;
        };
        let continue_when = match (then_dest == header, else_dest == header) {
            (true, false) => true,
            (false, true) => false,
            _ => return None,
        };

        let mut phis = Vec::new();
        for phi in module.phis(func, header) {
            let InstKind::Phi { blocks } = &module[phi].kind else {
                return None;
            };
            let incoming = |pred: BlockId| {
                blocks
                    .iter()
                    .position(|&b| b == pred)
                    .map(|k| module[phi].operands()[k].clone())
            };
            if blocks.len() != 2 {
                return None;
            }
            phis.push((phi, incoming(preheader)?, incoming(header)?));
        }
        let body: Vec<InstId> = module
            .block_insts(func, header)
            .iter()
            .copied()
            .filter(|&id| !module[id].is_phi() && id != terminator)
            .collect();

        let cond = module[terminator].operands()[0].as_inst()?;
        let InstKind::ICmp(pred) = module[cond].kind else {
            return None;
        };
        let tested = module[cond].operands()[0].clone();
        let bound = module[cond].operands()[1].as_const_int()?;

        // The induction variable: a phi whose latch value is `phi + step`.
        let (iv, start, next, step) = phis.iter().find_map(|(phi, start, latch)| {
            let start = start.as_const_int()?;
            let next = latch.as_inst()?;
            if module[next].kind != InstKind::Binary(BinOp::Add) {
                return None;
            }
            let step = match module[next].operands() {
                [Value::Inst(p), step] if p == phi => step.as_const_int()?,
                [step, Value::Inst(p)] if p == phi => step.as_const_int()?,
                _ => return None,
            };
            Some((*phi, start, next, step))
        })?;
        let tests_next = match tested {
            Value::Inst(id) if id == iv => false,
            Value::Inst(id) if id == next => true,
            _ => return None,
        };
        let bits = module[iv].ty.int_width()?;

        let trip_count = trip_count(
            pred,
            bits,
            start,
            step,
            bound,
            tests_next,
            continue_when,
            self.config.max_trip_count,
        )?;
        if body.len().saturating_mul(trip_count as usize) > self.config.max_unrolled_size {
            return None;
        }

        Some(CountedLoop {
            header,
            exit,
            phis,
            body,
            terminator,
            trip_count,
        })
    }
}

fn wrap(value: i64, bits: u32) -> i64 {
    if bits >= 64 {
        value
    } else {
        let shift = 64 - bits;
        (value << shift) >> shift
    }
}

/// Runs the exit test until it fails, or gives up past `limit` iterations.
#[allow(clippy::too_many_arguments)]
fn trip_count(
    pred: IntPredicate,
    bits: u32,
    start: i64,
    step: i64,
    bound: i64,
    tests_next: bool,
    continue_when: bool,
    limit: u64,
) -> Option<u64> {
    let mut iv = wrap(start, bits);
    let bound = wrap(bound, bits);
    for trips in 1..=limit {
        let next = wrap(iv.wrapping_add(step), bits);
        let tested = if tests_next { next } else { iv };
        if pred.evaluate(bits, tested, bound) != continue_when {
            return Some(trips);
        }
        iv = next;
    }
    None
}

fn lookup(env: &HashMap<Value, Value>, value: &Value) -> Value {
    env.get(value).cloned().unwrap_or_else(|| value.clone())
}

fn unroll(module: &mut Module, func: FuncId, counted: CountedLoop) -> Result<()> {
    let CountedLoop {
        header,
        exit,
        phis,
        body,
        terminator,
        trip_count,
    } = counted;

    // Iteration 0 runs the original instructions, fed by the preheader values.
    let mut env: HashMap<Value, Value> = phis
        .iter()
        .map(|(phi, start, _)| (Value::Inst(*phi), start.clone()))
        .collect();
    for &id in &body {
        let operands = module[id].operands().to_vec();
        for (k, op) in operands.iter().enumerate() {
            if env.contains_key(op) {
                module.set_operand(id, k, lookup(&env, op));
            }
        }
    }
    for &id in &body {
        env.insert(Value::Inst(id), Value::Inst(id));
    }

    for _ in 1..trip_count {
        let mut next_env: HashMap<Value, Value> = phis
            .iter()
            .map(|(phi, _, latch)| (Value::Inst(*phi), lookup(&env, latch)))
            .collect();
        for &id in &body {
            let source = &module[id];
            let operands = source
                .operands()
                .iter()
                .map(|op| lookup(&next_env, op))
                .collect();
            let mut clone = Instruction::new(source.kind.clone(), operands, source.ty.clone());
            clone.metadata = source.metadata.clone();
            let copy = module.insert_inst_before(terminator, clone)?;
            next_env.insert(Value::Inst(id), Value::Inst(copy));
        }
        env = next_env;
    }

    // Values observed after the loop are those of the last iteration.
    let originals = phis.iter().map(|(phi, _, _)| *phi).chain(body.iter().copied());
    for id in originals.collect::<Vec<_>>() {
        let last = lookup(&env, &Value::Inst(id));
        for u in module.uses(&Value::Inst(id)).to_vec() {
            if module[u.user].block() != Some(header) {
                module.set_operand(u.user, u.operand as usize, last.clone());
            }
        }
    }

    for (phi, _, _) in &phis {
        module.set_operands(*phi, Vec::new());
    }
    for (phi, _, _) in &phis {
        module.erase_inst(*phi)?;
    }
    module.erase_inst(terminator)?;
    module.append_inst(
        func,
        header,
        Instruction::new(InstKind::Br { dest: exit }, vec![], Type::Void),
    )?;

    for id in module.block_insts(func, header).to_vec() {
        erase_if_dead(module, id)?;
    }
    Ok(())
}

impl Pass for LoopUnroll {
    fn name(&self) -> &'static str {
        "loop-unroll"
    }

    fn description(&self) -> &'static str {
        "Fully unrolls small counted loops"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        self.unrolled = 0;
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

    const FILL: &str = r#"
define void @fill(i32* %0) {
bb0:
  br label %bb1
bb1:
  %1 = phi i64 [ 0, %bb0 ], [ %3, %bb1 ]
  %2 = getelementptr i32, i32* %0, i64 %1
  store i32 7, i32* %2
  %3 = add i64 %1, 1
  %4 = icmp slt i64 %3, 3
  br i1 %4, label %bb1, label %bb2
bb2:
  ret void
}
"#;

    #[test]
    fn test_trip_count_evaluation() {
        assert_eq!(
            trip_count(IntPredicate::Slt, 64, 0, 1, 3, true, true, 32),
            Some(3)
        );
        assert_eq!(
            trip_count(IntPredicate::Ne, 32, 10, -2, 0, false, true, 32),
            Some(6)
        );
        assert_eq!(
            trip_count(IntPredicate::Slt, 64, 0, 1, 100, true, true, 32),
            None
        );
        // Exit when the condition holds.
        assert_eq!(
            trip_count(IntPredicate::Eq, 8, 0, 1, 4, true, false, 32),
            Some(4)
        );
    }

    #[test]
    fn test_counted_loop_is_fully_unrolled() {
        let mut module = parse_module(FILL).unwrap();
        let mut pass = LoopUnroll::new();
        assert!(pass.run_on_module(&mut module).unwrap());
        assert_eq!(pass.unrolled(), 1);
        verify_module(&module).unwrap();
        assert_eq!(
            print_module(&module).trim(),
            r#"define void @fill(i32* %0) {
bb0:
  br label %bb1
bb1:
  %1 = getelementptr i32, i32* %0, i64 0
  store i32 7, i32* %1
  %2 = add i64 0, 1
  %3 = getelementptr i32, i32* %0, i64 %2
  store i32 7, i32* %3
  %4 = add i64 %2, 1
  %5 = getelementptr i32, i32* %0, i64 %4
  store i32 7, i32* %5
  br label %bb2
bb2:
  ret void
}"#
        );
    }

    #[test]
    fn test_live_out_values_come_from_last_iteration() {
        let mut module = parse_module(
            r#"
define i32 @sum() {
bb0:
  br label %bb1
bb1:
  %0 = phi i32 [ 0, %bb0 ], [ %2, %bb1 ]
  %1 = phi i32 [ 5, %bb0 ], [ %3, %bb1 ]
  %2 = add i32 %0, 1
  %3 = add i32 %1, %0
  %4 = icmp ult i32 %0, 1
  br i1 %4, label %bb1, label %bb2
bb2:
  ret i32 %3
}
"#,
        )
        .unwrap();
        let mut pass = LoopUnroll::new();
        assert!(pass.run_on_module(&mut module).unwrap());
        verify_module(&module).unwrap();
        assert_eq!(
            print_module(&module).trim(),
            r#"define i32 @sum() {
bb0:
  br label %bb1
bb1:
  %0 = add i32 0, 1
  %1 = add i32 5, 0
  %2 = add i32 %1, %0
  br label %bb2
bb2:
  ret i32 %2
}"#
        );
    }

    #[test]
    fn test_long_loops_are_left_alone() {
        let mut module = parse_module(FILL).unwrap();
        let before = print_module(&module);
        let mut pass = LoopUnroll::with_config(UnrollConfig {
            max_trip_count: 2,
            ..UnrollConfig::default()
        });
        assert!(!pass.run_on_module(&mut module).unwrap());
        assert_eq!(print_module(&module), before);
    }
}
