use crate::block::BlockId;
use crate::instructions::{BinOp, CastOp, InstKind, Instruction, IntPredicate};
use crate::module::Module;
use crate::types::Type;
use crate::values::{FuncId, InstId, Value};
use crate::{IrError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    End(FuncId, BlockId),
    Before(InstId),
}

/// Creates type-checked instructions at an insertion point of a module.
pub struct InstBuilder<'m> {
    module: &'m mut Module,
    point: InsertPoint,
}

impl<'m> InstBuilder<'m> {
    pub fn new(module: &'m mut Module, point: InsertPoint) -> Self {
        Self { module, point }
    }

    pub fn at_end(module: &'m mut Module, func: FuncId, block: BlockId) -> Self {
        Self::new(module, InsertPoint::End(func, block))
    }

    pub fn before(module: &'m mut Module, inst: InstId) -> Self {
        Self::new(module, InsertPoint::Before(inst))
    }

    pub fn position_at_end(&mut self, func: FuncId, block: BlockId) {
        self.point = InsertPoint::End(func, block);
    }

    pub fn position_before(&mut self, inst: InstId) {
        self.point = InsertPoint::Before(inst);
    }

    pub fn module(&self) -> &Module {
        self.module
    }

    pub fn insert(&mut self, inst: Instruction) -> Result<InstId> {
        match self.point {
            InsertPoint::End(func, block) => self.module.append_inst(func, block, inst),
            InsertPoint::Before(before) => self.module.insert_inst_before(before, inst),
        }
    }

    fn emit(&mut self, kind: InstKind, operands: Vec<Value>, ty: Type) -> Result<Value> {
        self.insert(Instruction::new(kind, operands, ty))
            .map(Value::Inst)
    }

    fn pointee_of(&self, ptr: &Value) -> Result<(Type, Type)> {
        let ptr_ty = self.module.value_type(ptr);
        match ptr_ty.pointee() {
            Some(pointee) => Ok((pointee.clone(), ptr_ty.clone())),
            None => Err(IrError::TypeError(format!(
                "expected a pointer operand, found {}",
                ptr_ty
            ))),
        }
    }

    pub fn alloca(&mut self, ty: Type) -> Result<Value> {
        self.emit(
            InstKind::Alloca {
                allocated: ty.clone(),
            },
            vec![],
            Type::ptr(ty),
        )
    }

    pub fn array_alloca(&mut self, ty: Type, count: Value) -> Result<Value> {
        if !self.module.value_type(&count).is_integer() {
            return Err(IrError::TypeError("alloca count must be an integer".into()));
        }
        self.emit(
            InstKind::Alloca {
                allocated: ty.clone(),
            },
            vec![count],
            Type::ptr(ty),
        )
    }

    pub fn load(&mut self, ptr: Value) -> Result<Value> {
        let (pointee, _) = self.pointee_of(&ptr)?;
        self.emit(InstKind::Load, vec![ptr], pointee)
    }

    pub fn store(&mut self, value: Value, ptr: Value) -> Result<InstId> {
        let (pointee, ptr_ty) = self.pointee_of(&ptr)?;
        let value_ty = self.module.value_type(&value);
        if value_ty != pointee {
            return Err(IrError::TypeError(format!(
                "cannot store {} through {}",
                value_ty, ptr_ty
            )));
        }
        self.insert(Instruction::new(InstKind::Store, vec![value, ptr], Type::Void))
    }

    pub fn gep(&mut self, source: Type, base: Value, indices: Vec<Value>) -> Result<Value> {
        let base_ty = self.module.value_type(&base);
        let space = base_ty.address_space().ok_or_else(|| {
            IrError::TypeError(format!("getelementptr base must be a pointer, found {}", base_ty))
        })?;
        let mut current = source.clone();
        for index in indices.iter().skip(1) {
            let constant = index.as_const_int().map(|i| i as u64);
            current = current.element_at(constant).cloned().ok_or_else(|| {
                IrError::TypeError(format!("cannot index into {} with {:?}", current, index))
            })?;
        }
        let mut operands = vec![base];
        operands.extend(indices);
        self.emit(
            InstKind::GetElementPtr { source },
            operands,
            Type::ptr_in(current, space),
        )
    }

    pub fn cast(&mut self, op: CastOp, value: Value, to: Type) -> Result<Value> {
        self.emit(InstKind::Cast(op), vec![value], to)
    }

    pub fn bitcast(&mut self, value: Value, to: Type) -> Result<Value> {
        self.cast(CastOp::BitCast, value, to)
    }

    pub fn addrspacecast(&mut self, value: Value, to: Type) -> Result<Value> {
        self.cast(CastOp::AddrSpaceCast, value, to)
    }

    /// Converts a pointer to `to`, changing address space when needed. Returns the value unchanged
    /// when it already has that type.
    pub fn pointer_cast(&mut self, value: Value, to: Type) -> Result<Value> {
        let from = self.module.value_type(&value);
        if from == to {
            Ok(value)
        } else if from.address_space() != to.address_space() {
            self.addrspacecast(value, to)
        } else {
            self.bitcast(value, to)
        }
    }

    pub fn binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> Result<Value> {
        let lhs_ty = self.module.value_type(&lhs);
        let rhs_ty = self.module.value_type(&rhs);
        if lhs_ty != rhs_ty {
            return Err(IrError::TypeError(format!(
                "{} operands differ: {} and {}",
                op.name(),
                lhs_ty,
                rhs_ty
            )));
        }
        self.emit(InstKind::Binary(op), vec![lhs, rhs], lhs_ty)
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> Result<Value> {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: Value, rhs: Value) -> Result<Value> {
        self.binary(BinOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: Value, rhs: Value) -> Result<Value> {
        self.binary(BinOp::Mul, lhs, rhs)
    }

    pub fn icmp(&mut self, pred: IntPredicate, lhs: Value, rhs: Value) -> Result<Value> {
        self.emit(InstKind::ICmp(pred), vec![lhs, rhs], Type::i1())
    }

    pub fn select(&mut self, cond: Value, then: Value, otherwise: Value) -> Result<Value> {
        let ty = self.module.value_type(&then);
        self.emit(InstKind::Select, vec![cond, then, otherwise], ty)
    }

    pub fn phi(&mut self, ty: Type, incoming: Vec<(Value, BlockId)>) -> Result<Value> {
        let (values, blocks): (Vec<_>, Vec<_>) = incoming.into_iter().unzip();
        self.emit(InstKind::Phi { blocks }, values, ty)
    }

    pub fn call(&mut self, callee: FuncId, args: Vec<Value>) -> Result<Value> {
        let function = self
            .module
            .function(callee)
            .ok_or_else(|| IrError::UnknownSymbol(callee.to_string()))?;
        let ty = function.ty.clone();
        if ty.params.len() != args.len() {
            return Err(IrError::TypeError(format!(
                "@{} expects {} argument(s), got {}",
                function.name,
                ty.params.len(),
                args.len()
            )));
        }
        for (i, (param, arg)) in ty.params.iter().zip(&args).enumerate() {
            let arg_ty = self.module.value_type(arg);
            if *param != arg_ty {
                return Err(IrError::TypeError(format!(
                    "argument {} of @{} has type {}, expected {}",
                    i, function.name, arg_ty, param
                )));
            }
        }
        let mut operands = vec![Value::Function(callee)];
        operands.extend(args);
        self.emit(InstKind::Call, operands, ty.ret)
    }

    pub fn br(&mut self, dest: BlockId) -> Result<InstId> {
        self.insert(Instruction::new(InstKind::Br { dest }, vec![], Type::Void))
    }

    pub fn cond_br(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) -> Result<InstId> {
        self.insert(Instruction::new(
            InstKind::CondBr {
                then_dest,
                else_dest,
            },
            vec![cond],
            Type::Void,
        ))
    }

    pub fn ret(&mut self, value: Option<Value>) -> Result<InstId> {
        self.insert(Instruction::new(
            InstKind::Ret,
            value.into_iter().collect(),
            Type::Void,
        ))
    }

    pub fn unreachable(&mut self) -> Result<InstId> {
        self.insert(Instruction::new(InstKind::Unreachable, vec![], Type::Void))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;
    use crate::types::{AddressSpace, FunctionType};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_gep_result_type() {
        let mut module = Module::new("m");
        let elem = Type::Struct(vec![Type::i32(), Type::Array(Box::new(Type::Double), 4)]);
        let f = module
            .add_function(Function::definition(
                "f",
                FunctionType::void(vec![Type::ptr_in(elem.clone(), AddressSpace(1))]),
            ))
            .unwrap();
        let entry = module[f].entry_block().unwrap();
        let mut b = InstBuilder::at_end(&mut module, f, entry);
        let field = b
            .gep(
                elem,
                Value::Param(f, 0),
                vec![Value::int(64, 0), Value::int(32, 1), Value::int(64, 2)],
            )
            .unwrap();
        assert_eq!(
            b.module().value_type(&field),
            Type::ptr_in(Type::Double, AddressSpace(1))
        );
    }

    #[test]
    fn test_call_arity_mismatch() {
        let mut module = Module::new("m");
        let callee = module
            .declare_function("g", FunctionType::void(vec![Type::i32()]))
            .unwrap();
        let f = module
            .add_function(Function::definition("f", FunctionType::void(vec![])))
            .unwrap();
        let entry = module[f].entry_block().unwrap();
        let mut b = InstBuilder::at_end(&mut module, f, entry);
        assert!(matches!(b.call(callee, vec![]), Err(IrError::TypeError(_))));
        assert!(b.call(callee, vec![Value::int(32, 3)]).is_ok());
    }

    #[test]
    fn test_store_type_mismatch() {
        let mut module = Module::new("m");
        let f = module
            .add_function(Function::definition("f", FunctionType::void(vec![])))
            .unwrap();
        let entry = module[f].entry_block().unwrap();
        let mut b = InstBuilder::at_end(&mut module, f, entry);
        let slot = b.alloca(Type::i64()).unwrap();
        assert!(b.store(Value::int(32, 1), slot.clone()).is_err());
        assert!(b.store(Value::int(64, 1), slot).is_ok());
    }
}
