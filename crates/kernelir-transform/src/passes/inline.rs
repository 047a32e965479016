use super::defined_functions;
use anyhow::{anyhow, Result};
use kernelir_core::{
    BlockId, FnAttr, FuncId, InstId, InstKind, Instruction, Module, Pass, Type, Value,
};
use std::collections::HashMap;
use tracing::debug;

const MAX_ROUNDS: usize = 16;

/// Inlines every call to a defined function marked `alwaysinline`.
///
/// Inlined code can itself contain `alwaysinline` calls, so the pass repeats for a bounded number
/// of rounds; recursive calls are never inlined into themselves.
#[derive(Debug, Default)]
pub struct AlwaysInliner {
    only_into: Option<FuncId>,
    inlined: usize,
}

impl AlwaysInliner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only_into(caller: FuncId) -> Self {
        Self {
            only_into: Some(caller),
            inlined: 0,
        }
    }

    pub fn inlined(&self) -> usize {
        self.inlined
    }

    fn candidates(&self, module: &Module) -> Vec<InstId> {
        let callers = match self.only_into {
            Some(caller) => vec![caller],
            None => defined_functions(module),
        };
        callers
            .into_iter()
            .flat_map(|caller| {
                module
                    .function_insts(caller)
                    .into_iter()
                    .filter(move |&id| {
                        module.callee(id).map_or(false, |callee| {
                            callee != caller
                                && module[callee].has_attr(FnAttr::AlwaysInline)
                                && !module[callee].is_declaration()
                        })
                    })
            })
            .collect()
    }
}

fn remap_blocks(kind: &InstKind, blocks: &HashMap<BlockId, BlockId>) -> InstKind {
    let map = |b: &BlockId| blocks.get(b).copied().unwrap_or(*b);
    match kind {
        InstKind::Br { dest } => InstKind::Br { dest: map(dest) },
        InstKind::CondBr {
            then_dest,
            else_dest,
        } => InstKind::CondBr {
            then_dest: map(then_dest),
            else_dest: map(else_dest),
        },
        InstKind::Phi { blocks: incoming } => InstKind::Phi {
            blocks: incoming.iter().map(map).collect(),
        },
        other => other.clone(),
    }
}

/// Replaces `call` by a copy of its callee's body.
pub(crate) fn inline_call(module: &mut Module, call: InstId) -> Result<()> {
    let (caller, call_block) = module[call]
        .parent()
        .ok_or_else(|| anyhow!("call {} is not in a block", call))?;
    let callee = module
        .callee(call)
        .ok_or_else(|| anyhow!("{} is not a direct call", call))?;
    let args = module[call].call_args().to_vec();
    let callee_entry = module[callee]
        .entry_block()
        .ok_or_else(|| anyhow!("cannot inline declaration @{}", module[callee].name))?;
    let caller_entry = module[caller]
        .entry_block()
        .ok_or_else(|| anyhow!("@{} has no body", module[caller].name))?;

    let insts = module.block_insts(caller, call_block);
    let position = insts.iter().position(|&i| i == call).unwrap_or(0);
    let next = insts
        .get(position + 1)
        .copied()
        .ok_or_else(|| anyhow!("call {} ends its block", call))?;
    let after = module.split_block_before(next)?;

    // Fresh blocks, laid out between the call and its continuation.
    let callee_blocks = module.body(callee).map(|b| b.block_ids()).unwrap_or_default();
    let mut block_map: HashMap<BlockId, BlockId> = HashMap::new();
    for &old in &callee_blocks {
        let new = module.create_block(caller)?;
        if let Some(body) = module.function_mut(caller).and_then(|f| f.body.as_mut()) {
            if let (Some(from), Some(to)) = (
                body.blocks.get_index_of(&new),
                body.blocks.get_index_of(&after),
            ) {
                body.blocks.move_index(from, to);
            }
        }
        block_map.insert(old, new);
    }

    let mut values: HashMap<Value, Value> = args
        .into_iter()
        .enumerate()
        .map(|(i, arg)| (Value::Param(callee, i as u32), arg))
        .collect();
    let mut cloned: Vec<(InstId, Vec<Value>)> = Vec::new();
    let mut returns: Vec<(BlockId, Option<Value>)> = Vec::new();

    for &old_block in &callee_blocks {
        let new_block = block_map[&old_block];
        for old in module.block_insts(callee, old_block).to_vec() {
            let source = &module[old];
            if matches!(source.kind, InstKind::Ret) {
                returns.push((new_block, source.operands().first().cloned()));
                continue;
            }
            let operands = source.operands().to_vec();
            let mut copy = Instruction::new(
                remap_blocks(&source.kind, &block_map),
                Vec::new(),
                source.ty.clone(),
            );
            copy.metadata = source.metadata.clone();
            let new = module.append_inst(caller, new_block, copy)?;
            values.insert(Value::Inst(old), Value::Inst(new));
            cloned.push((new, operands));
        }
    }

    let remap = |v: &Value| values.get(v).cloned().unwrap_or_else(|| v.clone());
    for (new, operands) in cloned {
        let operands = operands.iter().map(remap).collect();
        module.set_operands(new, operands);
    }

    let result_ty = module[call].ty.clone();
    let mut result: Option<Value> = None;
    let incoming: Vec<(Value, BlockId)> = returns
        .iter()
        .filter_map(|(block, value)| value.as_ref().map(|v| (remap(v), *block)))
        .collect();
    for (block, _) in &returns {
        module.append_inst(
            caller,
            *block,
            Instruction::new(InstKind::Br { dest: after }, vec![], Type::Void),
        )?;
    }
    if !result_ty.is_void() {
        result = match incoming.as_slice() {
            [] => Some(Value::undef(result_ty.clone())),
            [(value, _)] => Some(value.clone()),
            _ => {
                let (values, blocks): (Vec<Value>, Vec<BlockId>) = incoming.into_iter().unzip();
                let phi = module.insert_inst_at(
                    caller,
                    after,
                    0,
                    Instruction::new(InstKind::Phi { blocks }, values, result_ty.clone()),
                )?;
                Some(Value::Inst(phi))
            }
        };
    }

    module.append_inst(
        caller,
        call_block,
        Instruction::new(
            InstKind::Br {
                dest: block_map[&callee_entry],
            },
            vec![],
            Type::Void,
        ),
    )?;
    if let Some(result) = result {
        module.replace_all_uses_with(&Value::Inst(call), result);
    }
    module.erase_inst(call)?;

    // Constant-sized allocas of the callee's entry become static allocas of the caller.
    let first = module
        .block_insts(caller, caller_entry)
        .first()
        .copied()
        .ok_or_else(|| anyhow!("@{} has an empty entry block", module[caller].name))?;
    let static_allocas: Vec<InstId> = module
        .block_insts(caller, block_map[&callee_entry])
        .iter()
        .copied()
        .filter(|&id| {
            matches!(module[id].kind, InstKind::Alloca { .. })
                && module[id]
                    .operands()
                    .iter()
                    .all(|op| matches!(op, Value::Const(_)))
        })
        .collect();
    for alloca in static_allocas {
        module.move_inst_before(alloca, first)?;
    }
    Ok(())
}

impl Pass for AlwaysInliner {
    fn name(&self) -> &'static str {
        "always-inline"
    }

    fn description(&self) -> &'static str {
        "Inlines calls to functions marked alwaysinline"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        self.inlined = 0;
        for _ in 0..MAX_ROUNDS {
            let calls = self.candidates(module);
            if calls.is_empty() {
                break;
            }
            for call in calls {
                if let Some(callee) = module.callee(call) {
                    debug!(callee = %module[callee].name, "inlining call");
                }
                inline_call(module, call)?;
                self.inlined += 1;
            }
        }
        Ok(self.inlined > 0)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
