use crate::block::BlockId;
use crate::function::{FnAttr, Function, FunctionBody, Linkage};
use crate::instructions::{InstKind, Instruction};
use crate::metadata::MdNode;
use crate::types::{AddressSpace, FunctionType, Type};
use crate::values::{Constant, FuncId, GlobalId, InstId, Value};
use crate::{IrError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Index, IndexMut};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    /// Type of the stored value; the global itself is a pointer to it.
    pub ty: Type,
    pub initializer: Option<Constant>,
    pub is_constant: bool,
    pub linkage: Linkage,
    pub addrspace: AddressSpace,
}

impl Global {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            initializer: None,
            is_constant: false,
            linkage: Linkage::External,
            addrspace: AddressSpace::GENERIC,
        }
    }

    pub fn constant(name: impl Into<String>, value: Constant) -> Self {
        let mut global = Self::new(name, value.ty());
        global.initializer = Some(value);
        global.is_constant = true;
        global
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Use {
    pub user: InstId,
    pub operand: u32,
}

/// A translation unit: functions, globals and named metadata over a shared instruction arena.
///
/// Every operand that names an instruction, parameter, function or global is recorded in the use
/// index, so `uses`, `replace_all_uses_with` and `erase_inst` never need a scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    functions: Vec<Option<Function>>,
    globals: Vec<Option<Global>>,
    insts: Vec<Option<Instruction>>,
    function_names: IndexMap<String, FuncId>,
    global_names: IndexMap<String, GlobalId>,
    pub named_metadata: IndexMap<String, Vec<MdNode>>,
    #[serde(skip)]
    uses: HashMap<Value, Vec<Use>>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_function(&mut self, function: Function) -> Result<FuncId> {
        if self.function_names.contains_key(&function.name)
            || self.global_names.contains_key(&function.name)
        {
            return Err(IrError::DuplicateSymbol(function.name));
        }
        let id = FuncId(self.functions.len() as u32);
        self.function_names.insert(function.name.clone(), id);
        self.functions.push(Some(function));
        Ok(id)
    }

    pub fn declare_function(&mut self, name: &str, ty: FunctionType) -> Result<FuncId> {
        self.add_function(Function::declaration(name, ty))
    }

    /// Returns the existing function with this name, declaring it first if needed.
    pub fn get_or_declare_function(&mut self, name: &str, ty: FunctionType) -> Result<FuncId> {
        match self.function_by_name(name) {
            Some(id) if self[id].ty == ty => Ok(id),
            Some(id) => Err(IrError::TypeError(format!(
                "@{} already declared as {}, requested {}",
                name, self[id].ty, ty
            ))),
            None => self.declare_function(name, ty),
        }
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.function_names.get(name).copied()
    }

    pub fn function(&self, id: FuncId) -> Option<&Function> {
        self.functions.get(id.index()).and_then(Option::as_ref)
    }

    pub fn function_mut(&mut self, id: FuncId) -> Option<&mut Function> {
        self.functions.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (FuncId(i as u32), f)))
    }

    pub fn function_ids(&self) -> Vec<FuncId> {
        self.functions().map(|(id, _)| id).collect()
    }

    pub fn rename_function(&mut self, id: FuncId, new_name: &str) -> Result<()> {
        if self.function_names.contains_key(new_name) || self.global_names.contains_key(new_name)
        {
            return Err(IrError::DuplicateSymbol(new_name.to_string()));
        }
        let function = self
            .function_mut(id)
            .ok_or_else(|| IrError::UnknownSymbol(id.to_string()))?;
        let old_name = std::mem::replace(&mut function.name, new_name.to_string());
        self.function_names.shift_remove(&old_name);
        self.function_names.insert(new_name.to_string(), id);
        Ok(())
    }

    /// Deletes a function and its body. Fails while any instruction still refers to it.
    pub fn remove_function(&mut self, id: FuncId) -> Result<()> {
        let name = self
            .function(id)
            .map(|f| f.name.clone())
            .ok_or_else(|| IrError::UnknownSymbol(id.to_string()))?;
        let external_users = self
            .users(&Value::Function(id))
            .into_iter()
            .filter(|&user| self[user].function() != Some(id))
            .count();
        if external_users > 0 {
            return Err(IrError::InvalidInstruction(format!(
                "@{} is still used by {} instruction(s)",
                name, external_users
            )));
        }

        let insts = self.function_insts(id);
        self.drop_insts(&insts);
        let num_params = self[id].params().len() as u32;
        for i in 0..num_params {
            self.uses.remove(&Value::Param(id, i));
        }
        self.uses.remove(&Value::Function(id));
        self.function_names.shift_remove(&name);
        self.functions[id.index()] = None;
        Ok(())
    }

    pub fn add_global(&mut self, global: Global) -> Result<GlobalId> {
        if self.global_names.contains_key(&global.name)
            || self.function_names.contains_key(&global.name)
        {
            return Err(IrError::DuplicateSymbol(global.name));
        }
        let id = GlobalId(self.globals.len() as u32);
        self.global_names.insert(global.name.clone(), id);
        self.globals.push(Some(global));
        Ok(id)
    }

    pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
        self.global_names.get(name).copied()
    }

    pub fn global(&self, id: GlobalId) -> Option<&Global> {
        self.globals.get(id.index()).and_then(Option::as_ref)
    }

    pub fn global_mut(&mut self, id: GlobalId) -> Option<&mut Global> {
        self.globals.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global)> {
        self.globals
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.as_ref().map(|g| (GlobalId(i as u32), g)))
    }

    pub fn remove_global(&mut self, id: GlobalId) -> Result<()> {
        let name = self
            .global(id)
            .map(|g| g.name.clone())
            .ok_or_else(|| IrError::UnknownSymbol(id.to_string()))?;
        if self.has_uses(&Value::Global(id)) {
            return Err(IrError::InvalidInstruction(format!(
                "@{} is still in use",
                name
            )));
        }
        self.uses.remove(&Value::Global(id));
        self.global_names.shift_remove(&name);
        self.globals[id.index()] = None;
        Ok(())
    }

    pub fn try_inst(&self, id: InstId) -> Option<&Instruction> {
        self.insts.get(id.index()).and_then(Option::as_ref)
    }

    pub fn is_live(&self, id: InstId) -> bool {
        self.try_inst(id).is_some()
    }

    pub fn body(&self, func: FuncId) -> Option<&FunctionBody> {
        self.function(func).and_then(|f| f.body.as_ref())
    }

    fn body_mut(&mut self, func: FuncId) -> Result<&mut FunctionBody> {
        self.function_mut(func)
            .and_then(|f| f.body.as_mut())
            .ok_or_else(|| IrError::InvalidInstruction(format!("{} has no body", func)))
    }

    pub fn block_insts(&self, func: FuncId, block: BlockId) -> &[InstId] {
        self.body(func)
            .and_then(|b| b.get_block(block))
            .map(|b| b.instructions.as_slice())
            .unwrap_or(&[])
    }

    pub fn function_insts(&self, func: FuncId) -> Vec<InstId> {
        self.body(func)
            .map(|body| {
                body.blocks
                    .values()
                    .flat_map(|b| b.instructions.iter().copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn terminator(&self, func: FuncId, block: BlockId) -> Option<InstId> {
        self.block_insts(func, block)
            .last()
            .copied()
            .filter(|&i| self[i].is_terminator())
    }

    pub fn successors(&self, func: FuncId, block: BlockId) -> Vec<BlockId> {
        self.terminator(func, block)
            .map(|t| self[t].successors())
            .unwrap_or_default()
    }

    pub fn predecessors(&self, func: FuncId, block: BlockId) -> Vec<BlockId> {
        let Some(body) = self.body(func) else {
            return Vec::new();
        };
        body.blocks
            .keys()
            .copied()
            .filter(|&b| self.successors(func, b).contains(&block))
            .collect()
    }

    pub fn phis(&self, func: FuncId, block: BlockId) -> Vec<InstId> {
        self.block_insts(func, block)
            .iter()
            .copied()
            .take_while(|&i| self[i].is_phi())
            .collect()
    }

    pub fn create_block(&mut self, func: FuncId) -> Result<BlockId> {
        Ok(self.body_mut(func)?.create_block())
    }

    fn alloc_inst(&mut self, mut inst: Instruction, parent: (FuncId, BlockId)) -> InstId {
        let id = InstId(self.insts.len() as u32);
        inst.parent = Some(parent);
        for (i, op) in inst.operands.iter().enumerate() {
            if op.is_tracked() {
                self.uses.entry(op.clone()).or_default().push(Use {
                    user: id,
                    operand: i as u32,
                });
            }
        }
        self.insts.push(Some(inst));
        id
    }

    pub fn append_inst(&mut self, func: FuncId, block: BlockId, inst: Instruction) -> Result<InstId> {
        let len = self.block_insts(func, block).len();
        self.insert_inst_at(func, block, len, inst)
    }

    pub fn insert_inst_at(
        &mut self,
        func: FuncId,
        block: BlockId,
        index: usize,
        inst: Instruction,
    ) -> Result<InstId> {
        let exists = self.body(func).and_then(|b| b.get_block(block)).is_some();
        if !exists {
            return Err(IrError::InvalidInstruction(format!(
                "{} has no block {}",
                func, block
            )));
        }
        let id = self.alloc_inst(inst, (func, block));
        let bb = self
            .body_mut(func)?
            .get_block_mut(block)
            .ok_or_else(|| IrError::InvalidInstruction(format!("missing block {}", block)))?;
        let index = index.min(bb.instructions.len());
        bb.instructions.insert(index, id);
        Ok(id)
    }

    pub fn insert_inst_before(&mut self, before: InstId, inst: Instruction) -> Result<InstId> {
        let (func, block, pos) = self.position(before)?;
        self.insert_inst_at(func, block, pos, inst)
    }

    fn position(&self, id: InstId) -> Result<(FuncId, BlockId, usize)> {
        let (func, block) = self
            .try_inst(id)
            .and_then(|i| i.parent)
            .ok_or_else(|| IrError::InvalidInstruction(format!("{} is not in a block", id)))?;
        let pos = self
            .block_insts(func, block)
            .iter()
            .position(|&i| i == id)
            .ok_or_else(|| IrError::InvalidInstruction(format!("{} missing from {}", id, block)))?;
        Ok((func, block, pos))
    }

    fn unlink(&mut self, id: InstId) -> Result<()> {
        let (func, block, pos) = self.position(id)?;
        if let Some(bb) = self.body_mut(func)?.get_block_mut(block) {
            bb.instructions.remove(pos);
        }
        Ok(())
    }

    pub fn move_inst_before(&mut self, id: InstId, before: InstId) -> Result<()> {
        if id == before {
            return Ok(());
        }
        self.unlink(id)?;
        let (func, block, pos) = self.position(before)?;
        if let Some(bb) = self.body_mut(func)?.get_block_mut(block) {
            bb.instructions.insert(pos, id);
        }
        self[id].parent = Some((func, block));
        Ok(())
    }

    pub fn move_inst_to_end(&mut self, id: InstId, func: FuncId, block: BlockId) -> Result<()> {
        self.unlink(id)?;
        let bb = self
            .body_mut(func)?
            .get_block_mut(block)
            .ok_or_else(|| IrError::InvalidInstruction(format!("missing block {}", block)))?;
        bb.instructions.push(id);
        self[id].parent = Some((func, block));
        Ok(())
    }

    fn remove_use(&mut self, value: &Value, u: Use) {
        if let Some(list) = self.uses.get_mut(value) {
            list.retain(|x| *x != u);
            if list.is_empty() {
                self.uses.remove(value);
            }
        }
    }

    fn add_use(&mut self, value: &Value, u: Use) {
        if value.is_tracked() {
            self.uses.entry(value.clone()).or_default().push(u);
        }
    }

    pub fn set_operand(&mut self, id: InstId, index: usize, value: Value) {
        let u = Use {
            user: id,
            operand: index as u32,
        };
        let old = std::mem::replace(&mut self[id].operands[index], value.clone());
        self.remove_use(&old, u);
        self.add_use(&value, u);
    }

    pub fn set_operands(&mut self, id: InstId, operands: Vec<Value>) {
        let old = std::mem::take(&mut self[id].operands);
        for (i, op) in old.iter().enumerate() {
            self.remove_use(
                op,
                Use {
                    user: id,
                    operand: i as u32,
                },
            );
        }
        for (i, op) in operands.iter().enumerate() {
            self.add_use(
                op,
                Use {
                    user: id,
                    operand: i as u32,
                },
            );
        }
        self[id].operands = operands;
    }

    /// Rewrites every use of `old` to `new`, returning the number of operands changed.
    pub fn replace_all_uses_with(&mut self, old: &Value, new: Value) -> usize {
        if *old == new {
            return 0;
        }
        let uses = self.uses.remove(old).unwrap_or_default();
        for u in &uses {
            if let Some(inst) = self.insts[u.user.index()].as_mut() {
                inst.operands[u.operand as usize] = new.clone();
            }
            self.add_use(&new, *u);
        }
        uses.len()
    }

    pub fn erase_inst(&mut self, id: InstId) -> Result<()> {
        if self.has_uses(&Value::Inst(id)) {
            return Err(IrError::InvalidInstruction(format!(
                "cannot erase {} while it still has {} use(s)",
                id,
                self.uses(&Value::Inst(id)).len()
            )));
        }
        if self[id].parent.is_some() {
            self.unlink(id)?;
        }
        self.drop_insts(&[id]);
        Ok(())
    }

    /// Releases operands and arena slots without checking users; callers guarantee that every
    /// remaining user is in `ids` too.
    fn drop_insts(&mut self, ids: &[InstId]) {
        for &id in ids {
            let operands = self
                .try_inst(id)
                .map(|i| i.operands.clone())
                .unwrap_or_default();
            for (i, op) in operands.iter().enumerate() {
                self.remove_use(
                    op,
                    Use {
                        user: id,
                        operand: i as u32,
                    },
                );
            }
        }
        for &id in ids {
            self.uses.remove(&Value::Inst(id));
            if let Some(slot) = self.insts.get_mut(id.index()) {
                *slot = None;
            }
        }
    }

    pub fn uses(&self, value: &Value) -> &[Use] {
        self.uses.get(value).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Distinct instructions using `value`, in first-use order.
    pub fn users(&self, value: &Value) -> Vec<InstId> {
        let mut users: Vec<InstId> = Vec::new();
        for u in self.uses(value) {
            if !users.contains(&u.user) {
                users.push(u.user);
            }
        }
        users
    }

    pub fn has_uses(&self, value: &Value) -> bool {
        !self.uses(value).is_empty()
    }

    pub fn value_type(&self, value: &Value) -> Type {
        match value {
            Value::Inst(id) => self[*id].ty.clone(),
            Value::Param(func, index) => self
                .function(*func)
                .and_then(|f| f.ty.params.get(*index as usize).cloned())
                .unwrap_or(Type::Void),
            Value::Function(func) => self
                .function(*func)
                .map(|f| Type::ptr(Type::Function(Box::new(f.ty.clone()))))
                .unwrap_or(Type::Void),
            Value::Global(global) => self
                .global(*global)
                .map(|g| Type::ptr_in(g.ty.clone(), g.addrspace))
                .unwrap_or(Type::Void),
            Value::Const(c) => c.ty(),
        }
    }

    pub fn callee(&self, id: InstId) -> Option<FuncId> {
        self.try_inst(id).and_then(Instruction::callee)
    }

    pub fn call_sites(&self, func: FuncId) -> Vec<InstId> {
        self.uses(&Value::Function(func))
            .iter()
            .filter(|u| u.operand == 0 && self[u.user].is_call())
            .map(|u| u.user)
            .collect()
    }

    pub fn may_have_side_effects(&self, id: InstId) -> bool {
        let inst = &self[id];
        match inst.kind {
            InstKind::Store => true,
            InstKind::Call => match inst.callee().and_then(|f| self.function(f)) {
                Some(callee) => !callee.only_reads_memory() || callee.has_attr(FnAttr::NoReturn),
                None => true,
            },
            _ => inst.is_terminator(),
        }
    }

    /// Drops every incoming entry for `pred` from the phis at the top of `block`.
    pub fn remove_phi_incoming(&mut self, func: FuncId, block: BlockId, pred: BlockId) {
        for phi in self.phis(func, block) {
            let InstKind::Phi { blocks } = &self[phi].kind else {
                continue;
            };
            let keep: Vec<usize> = (0..blocks.len()).filter(|&k| blocks[k] != pred).collect();
            if keep.len() == blocks.len() {
                continue;
            }
            let new_blocks: Vec<BlockId> = keep.iter().map(|&k| blocks[k]).collect();
            let new_operands: Vec<Value> = keep
                .iter()
                .map(|&k| self[phi].operands[k].clone())
                .collect();
            self[phi].kind = InstKind::Phi { blocks: new_blocks };
            self.set_operands(phi, new_operands);
        }
    }

    pub fn add_phi_incoming(&mut self, phi: InstId, value: Value, pred: BlockId) {
        let mut operands = self[phi].operands.clone();
        operands.push(value);
        if let InstKind::Phi { blocks } = &mut self[phi].kind {
            blocks.push(pred);
        }
        self.set_operands(phi, operands);
    }

    /// Renames the incoming block `old` to `new` in the phis of `block`.
    pub fn replace_phi_block(&mut self, func: FuncId, block: BlockId, old: BlockId, new: BlockId) {
        for phi in self.phis(func, block) {
            self[phi].kind.replace_block(old, new);
        }
    }

    /// Deletes a non-entry block. Phis in its successors forget it; values it defines are
    /// replaced by `undef` wherever they are still used.
    pub fn remove_block(&mut self, func: FuncId, block: BlockId) -> Result<()> {
        let body = self
            .body(func)
            .ok_or_else(|| IrError::InvalidInstruction(format!("{} has no body", func)))?;
        if body.entry_block == block {
            return Err(IrError::InvalidInstruction(format!(
                "cannot remove entry block {}",
                block
            )));
        }
        let mut succs = self.successors(func, block);
        succs.dedup();
        for succ in succs {
            if succ != block {
                self.remove_phi_incoming(func, succ, block);
            }
        }
        let insts = self.block_insts(func, block).to_vec();
        for &id in &insts {
            if self[id].has_result() {
                let undef = Value::undef(self[id].ty.clone());
                self.replace_all_uses_with(&Value::Inst(id), undef);
            }
        }
        self.drop_insts(&insts);
        self.body_mut(func)?.blocks.shift_remove(&block);
        Ok(())
    }

    /// Moves `at` and everything after it into a fresh block placed right after the original.
    /// The original block is left without a terminator.
    pub fn split_block_before(&mut self, at: InstId) -> Result<BlockId> {
        let (func, block, pos) = self.position(at)?;
        let body = self.body_mut(func)?;
        let new_block = body.create_block();
        let tail = body
            .get_block_mut(block)
            .map(|bb| bb.instructions.split_off(pos))
            .unwrap_or_default();
        if let Some(bb) = body.get_block_mut(new_block) {
            bb.instructions = tail.clone();
        }
        if let Some(from) = body.blocks.get_index_of(&new_block) {
            if let Some(to) = body.blocks.get_index_of(&block) {
                body.blocks.move_index(from, to + 1);
            }
        }
        for &id in &tail {
            self[id].parent = Some((func, new_block));
        }
        for succ in self.successors(func, new_block) {
            self.replace_phi_block(func, succ, block, new_block);
        }
        Ok(new_block)
    }

    pub fn add_named_metadata(&mut self, name: &str, node: MdNode) {
        self.named_metadata
            .entry(name.to_string())
            .or_default()
            .push(node);
    }

    pub fn rebuild_uses(&mut self) {
        self.uses = self.compute_uses();
    }

    fn compute_uses(&self) -> HashMap<Value, Vec<Use>> {
        let mut uses: HashMap<Value, Vec<Use>> = HashMap::new();
        for (i, inst) in self.insts.iter().enumerate() {
            let Some(inst) = inst else { continue };
            for (k, op) in inst.operands.iter().enumerate() {
                if op.is_tracked() {
                    uses.entry(op.clone()).or_default().push(Use {
                        user: InstId(i as u32),
                        operand: k as u32,
                    });
                }
            }
        }
        uses
    }

    pub(crate) fn use_index_matches_arena(&self) -> bool {
        let expected = self.compute_uses();
        if expected.len() != self.uses.len() {
            return false;
        }
        expected.iter().all(|(value, list)| {
            let Some(actual) = self.uses.get(value) else {
                return false;
            };
            let mut a = actual.clone();
            let mut b = list.clone();
            a.sort_by_key(|u| (u.user, u.operand));
            b.sort_by_key(|u| (u.user, u.operand));
            a == b
        })
    }
}

impl Index<InstId> for Module {
    type Output = Instruction;

    fn index(&self, id: InstId) -> &Instruction {
        match self.insts.get(id.index()) {
            Some(Some(inst)) => inst,
            _ => panic!("use of erased instruction {}", id),
        }
    }
}

impl IndexMut<InstId> for Module {
    fn index_mut(&mut self, id: InstId) -> &mut Instruction {
        match self.insts.get_mut(id.index()) {
            Some(Some(inst)) => inst,
            _ => panic!("use of erased instruction {}", id),
        }
    }
}

impl Index<FuncId> for Module {
    type Output = Function;

    fn index(&self, id: FuncId) -> &Function {
        match self.function(id) {
            Some(function) => function,
            None => panic!("use of removed function {}", id),
        }
    }
}

impl IndexMut<FuncId> for Module {
    fn index_mut(&mut self, id: FuncId) -> &mut Function {
        match self.function_mut(id) {
            Some(function) => function,
            None => panic!("use of removed function {}", id),
        }
    }
}
