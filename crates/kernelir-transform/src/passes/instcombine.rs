use super::{defined_functions, erase_if_dead};
use anyhow::Result;
use kernelir_core::{
    BinOp, CastOp, Constant, FuncId, InstId, InstKind, IntPredicate, Module, Pass, Type, Value,
};
use tracing::debug;

/// Peephole simplification to a fixpoint: constant folding, algebraic identities, operand
/// canonicalisation, cast and address folding, and removal of stack slots that are only
/// written.
#[derive(Debug)]
pub struct InstCombine {
    max_iterations: usize,
    combined: usize,
}

impl InstCombine {
    pub fn new() -> Self {
        Self {
            max_iterations: 16,
            combined: 0,
        }
    }

    pub fn combined(&self) -> usize {
        self.combined
    }

    fn run_on_function(&mut self, module: &mut Module, func: FuncId) -> Result<bool> {
        let mut changed = false;
        for _ in 0..self.max_iterations {
            let mut progress = false;

            for id in module.function_insts(func) {
                if !module.is_live(id) {
                    continue;
                }
                if erase_if_dead(module, id)? > 0 {
                    progress = true;
                    continue;
                }
                if let Some(replacement) = simplify(module, id) {
                    module.replace_all_uses_with(&Value::Inst(id), replacement);
                    erase_if_dead(module, id)?;
                    self.combined += 1;
                    progress = true;
                    continue;
                }
                if canonicalize(module, id) {
                    self.combined += 1;
                    progress = true;
                }
            }

            progress |= remove_write_only_allocas(module, func)?;

            if !progress {
                break;
            }
            changed = true;
        }
        Ok(changed)
    }
}

impl Default for InstCombine {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for InstCombine {
    fn name(&self) -> &'static str {
        "instcombine"
    }

    fn description(&self) -> &'static str {
        "Folds constants and simplifies instruction patterns"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        self.combined = 0;
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

/// A value equivalent to the instruction's result, if one exists without creating new code.
fn simplify(module: &Module, id: InstId) -> Option<Value> {
    let inst = &module[id];
    let ops = inst.operands();
    match &inst.kind {
        InstKind::Binary(op) => simplify_binary(*op, &ops[0], &ops[1], &inst.ty),
        InstKind::ICmp(pred) => {
            if let (Some(a), Some(b)) = (ops[0].as_constant(), ops[1].as_constant()) {
                let bits = a.ty().int_width()?;
                let result = pred.evaluate(bits, a.as_i64()?, b.as_i64()?);
                return Some(Value::Const(Constant::bool(result)));
            }
            if ops[0] == ops[1] {
                let reflexive = matches!(
                    pred,
                    IntPredicate::Eq
                        | IntPredicate::Uge
                        | IntPredicate::Ule
                        | IntPredicate::Sge
                        | IntPredicate::Sle
                );
                return Some(Value::Const(Constant::bool(reflexive)));
            }
            None
        }
        InstKind::Select => {
            if let Some(cond) = ops[0].as_constant().and_then(Constant::as_u64) {
                return Some(if cond != 0 { ops[1].clone() } else { ops[2].clone() });
            }
            (ops[1] == ops[2]).then(|| ops[1].clone())
        }
        InstKind::Cast(op) => simplify_cast(module, *op, &ops[0], &inst.ty),
        InstKind::GetElementPtr { .. } => {
            let all_zero = ops[1..]
                .iter()
                .all(|i| i.as_constant().map_or(false, Constant::is_zero));
            (all_zero && module.value_type(&ops[0]) == inst.ty).then(|| ops[0].clone())
        }
        InstKind::Phi { blocks } => {
            let mut incoming = ops.iter().filter(|v| **v != Value::Inst(id));
            let first = incoming.next()?.clone();
            if !incoming.all(|v| *v == first) {
                return None;
            }
            let mut preds = blocks.clone();
            preds.sort();
            preds.dedup();
            (first.as_inst().is_none() || preds.len() == 1).then_some(first)
        }
        _ => None,
    }
}

fn simplify_binary(op: BinOp, lhs: &Value, rhs: &Value, ty: &Type) -> Option<Value> {
    if let (Some(a), Some(b)) = (lhs.as_constant(), rhs.as_constant()) {
        return fold_binary(op, a, b, ty).map(Value::Const);
    }

    if lhs == rhs && ty.is_integer() {
        match op {
            BinOp::Sub | BinOp::Xor => return Some(Value::int(ty.int_width()?, 0)),
            BinOp::And | BinOp::Or => return Some(lhs.clone()),
            _ => {}
        }
    }

    let c = rhs.as_constant()?;
    if !ty.is_integer() {
        return None;
    }
    match op {
        BinOp::Add
        | BinOp::Sub
        | BinOp::Or
        | BinOp::Xor
        | BinOp::Shl
        | BinOp::LShr
        | BinOp::AShr
            if c.is_zero() =>
        {
            Some(lhs.clone())
        }
        BinOp::Mul | BinOp::UDiv | BinOp::SDiv if c.is_one() => Some(lhs.clone()),
        BinOp::Mul | BinOp::And if c.is_zero() => Some(rhs.clone()),
        BinOp::And if c.is_all_ones() => Some(lhs.clone()),
        BinOp::Or if c.is_all_ones() => Some(rhs.clone()),
        _ => None,
    }
}

pub(crate) fn fold_binary(op: BinOp, a: &Constant, b: &Constant, ty: &Type) -> Option<Constant> {
    if ty.is_float() {
        let (x, y) = (a.as_f64()?, b.as_f64()?);
        let result = match op {
            BinOp::FAdd => x + y,
            BinOp::FSub => x - y,
            BinOp::FMul => x * y,
            BinOp::FDiv => x / y,
            _ => return None,
        };
        return Some(Constant::float(ty.clone(), result));
    }

    let bits = ty.int_width()?;
    let (x, y) = (a.as_i64()?, b.as_i64()?);
    let (ux, uy) = (a.as_u64()?, b.as_u64()?);
    let min = if bits >= 64 {
        i64::MIN
    } else {
        -(1i64 << (bits - 1))
    };

    let result = match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::UDiv if uy != 0 => (ux / uy) as i64,
        BinOp::URem if uy != 0 => (ux % uy) as i64,
        BinOp::SDiv if y != 0 && !(x == min && y == -1) => x / y,
        BinOp::SRem if y != 0 && !(x == min && y == -1) => x % y,
        BinOp::And => (ux & uy) as i64,
        BinOp::Or => (ux | uy) as i64,
        BinOp::Xor => (ux ^ uy) as i64,
        BinOp::Shl if uy < bits as u64 => (ux << uy) as i64,
        BinOp::LShr if uy < bits as u64 => (ux >> uy) as i64,
        BinOp::AShr if uy < bits as u64 => x >> uy,
        _ => return None,
    };
    Some(Constant::int(bits, result))
}

fn simplify_cast(module: &Module, op: CastOp, value: &Value, to: &Type) -> Option<Value> {
    if let Some(c) = value.as_constant() {
        let to_bits = to.int_width();
        return match (op, c) {
            (CastOp::Trunc | CastOp::ZExt, Constant::Int { value, .. }) => {
                Some(Value::Const(Constant::int(to_bits?, *value as i64)))
            }
            (CastOp::SExt, Constant::Int { .. }) => {
                Some(Value::Const(Constant::int(to_bits?, c.as_i64()?)))
            }
            (CastOp::BitCast | CastOp::AddrSpaceCast, Constant::Null(_)) => {
                Some(Value::Const(Constant::Null(to.clone())))
            }
            (_, Constant::Undef(_)) => Some(Value::undef(to.clone())),
            _ => None,
        };
    }

    let from = module.value_type(value);
    if op == CastOp::BitCast && from == *to {
        return Some(value.clone());
    }

    // A round trip through pointer casts collapses to the original pointer.
    if matches!(op, CastOp::BitCast | CastOp::AddrSpaceCast) {
        let inner = value.as_inst()?;
        if let InstKind::Cast(CastOp::BitCast | CastOp::AddrSpaceCast) = module[inner].kind {
            let source = &module[inner].operands()[0];
            if module.value_type(source) == *to {
                return Some(source.clone());
            }
        }
    }
    None
}

fn swapped(pred: IntPredicate) -> IntPredicate {
    match pred {
        IntPredicate::Eq => IntPredicate::Eq,
        IntPredicate::Ne => IntPredicate::Ne,
        IntPredicate::Ugt => IntPredicate::Ult,
        IntPredicate::Uge => IntPredicate::Ule,
        IntPredicate::Ult => IntPredicate::Ugt,
        IntPredicate::Ule => IntPredicate::Uge,
        IntPredicate::Sgt => IntPredicate::Slt,
        IntPredicate::Sge => IntPredicate::Sle,
        IntPredicate::Slt => IntPredicate::Sgt,
        IntPredicate::Sle => IntPredicate::Sge,
    }
}

/// Rewrites the instruction in place into a simpler equivalent form.
fn canonicalize(module: &mut Module, id: InstId) -> bool {
    let kind = module[id].kind.clone();
    let ops = module[id].operands().to_vec();

    match kind {
        InstKind::Binary(op) if op.is_commutative() && ops[0].is_constant() && !ops[1].is_constant() => {
            module.set_operands(id, vec![ops[1].clone(), ops[0].clone()]);
            true
        }
        InstKind::ICmp(pred) if ops[0].is_constant() && !ops[1].is_constant() => {
            module[id].kind = InstKind::ICmp(swapped(pred));
            module.set_operands(id, vec![ops[1].clone(), ops[0].clone()]);
            true
        }
        InstKind::Binary(BinOp::Add) => {
            // add (add x, C1), C2 -> add x, C1 + C2
            let (Some(c2), Some(inner)) = (ops[1].as_constant(), ops[0].as_inst()) else {
                return false;
            };
            if module[inner].kind != InstKind::Binary(BinOp::Add) {
                return false;
            }
            let inner_ops = module[inner].operands().to_vec();
            let Some(c1) = inner_ops[1].as_constant() else {
                return false;
            };
            let Some(sum) = fold_binary(BinOp::Add, c1, c2, &module[id].ty) else {
                return false;
            };
            module.set_operands(id, vec![inner_ops[0].clone(), Value::Const(sum)]);
            true
        }
        InstKind::GetElementPtr { source } if ops.len() == 2 => {
            // gep S, (gep S, p, C1), C2 -> gep S, p, C1 + C2
            let (Some(c2), Some(inner)) = (ops[1].as_constant(), ops[0].as_inst()) else {
                return false;
            };
            let InstKind::GetElementPtr { source: inner_source } = &module[inner].kind else {
                return false;
            };
            let inner_ops = module[inner].operands().to_vec();
            if *inner_source != source || inner_ops.len() != 2 {
                return false;
            }
            let Some(c1) = inner_ops[1].as_constant() else {
                return false;
            };
            if c1.ty() != c2.ty() {
                return false;
            }
            let Some(sum) = fold_binary(BinOp::Add, c1, c2, &c1.ty()) else {
                return false;
            };
            module.set_operands(id, vec![inner_ops[0].clone(), Value::Const(sum)]);
            true
        }
        InstKind::Cast(CastOp::BitCast) => {
            // bitcast (bitcast x) -> bitcast x
            let Some(inner) = ops[0].as_inst() else {
                return false;
            };
            if module[inner].kind != InstKind::Cast(CastOp::BitCast) {
                return false;
            }
            let source = module[inner].operands()[0].clone();
            module.set_operand(id, 0, source);
            true
        }
        _ => false,
    }
}

/// Deletes stack slots whose address is only ever written through.
fn remove_write_only_allocas(module: &mut Module, func: FuncId) -> Result<bool> {
    let allocas: Vec<InstId> = module
        .function_insts(func)
        .into_iter()
        .filter(|&id| matches!(module[id].kind, InstKind::Alloca { .. }))
        .collect();

    let mut changed = false;
    for alloca in allocas {
        let uses = module.uses(&Value::Inst(alloca)).to_vec();
        let write_only = !uses.is_empty()
            && uses
                .iter()
                .all(|u| u.operand == 1 && module[u.user].kind == InstKind::Store);
        if !write_only {
            continue;
        }
        debug!(%alloca, stores = uses.len(), "removing write-only stack slot");
        for u in uses {
            if !module.is_live(u.user) {
                continue;
            }
            let stored = module[u.user].operands()[0].as_inst();
            module.erase_inst(u.user)?;
            if let Some(stored) = stored {
                erase_if_dead(module, stored)?;
            }
        }
        erase_if_dead(module, alloca)?;
        changed = true;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernelir_core::verify_module;
    use kernelir_emit::print_function;
    use kernelir_parser::parse_module;
    use pretty_assertions::assert_eq;

    fn combine(input: &str, name: &str) -> String {
        let mut module = parse_module(input).unwrap();
        InstCombine::new().run_on_module(&mut module).unwrap();
        verify_module(&module).unwrap();
        let f = module.function_by_name(name).unwrap();
        print_function(&module, f).trim().to_string()
    }

    #[test]
    fn test_folds_constants_and_identities() {
        let out = combine(
            r#"
define i32 @f(i32 %0) {
bb0:
  %1 = add i32 3, 4
  %2 = mul i32 %0, %1
  %3 = mul i32 %2, 1
  %4 = add i32 %3, 0
  %5 = sub i32 %4, %4
  %6 = or i32 %4, %5
  ret i32 %6
}
"#,
            "f",
        );
        assert_eq!(
            out,
            r#"define i32 @f(i32 %0) {
bb0:
  %1 = mul i32 %0, 7
  ret i32 %1
}"#
        );
    }

    #[test]
    fn test_reassociates_and_canonicalises() {
        let out = combine(
            r#"
define i1 @g(i64 %0) {
bb0:
  %1 = add i64 2, %0
  %2 = add i64 %1, 5
  %3 = icmp sgt i64 10, %2
  ret i1 %3
}
"#,
            "g",
        );
        assert_eq!(
            out,
            r#"define i1 @g(i64 %0) {
bb0:
  %1 = add i64 %0, 7
  %2 = icmp slt i64 %1, 10
  ret i1 %2
}"#
        );
    }

    #[test]
    fn test_folds_casts_and_addresses() {
        let out = combine(
            r#"
define i8 @h(i8 addrspace(1)* %0) {
bb0:
  %1 = addrspacecast i8 addrspace(1)* %0 to i8*
  %2 = addrspacecast i8* %1 to i8 addrspace(1)*
  %3 = getelementptr i8, i8 addrspace(1)* %2, i64 0
  %4 = getelementptr i8, i8 addrspace(1)* %3, i64 8
  %5 = getelementptr i8, i8 addrspace(1)* %4, i64 4
  %6 = load i8, i8 addrspace(1)* %5
  %7 = trunc i32 300 to i8
  %8 = add i8 %6, %7
  ret i8 %8
}
"#,
            "h",
        );
        assert_eq!(
            out,
            r#"define i8 @h(i8 addrspace(1)* %0) {
bb0:
  %1 = getelementptr i8, i8 addrspace(1)* %0, i64 12
  %2 = load i8, i8 addrspace(1)* %1
  %3 = add i8 %2, 44
  ret i8 %3
}"#
        );
    }

    #[test]
    fn test_removes_write_only_slots() {
        let out = combine(
            r#"
define void @k(double %0) {
bb0:
  %1 = alloca double
  %2 = fmul double %0, 2.0
  store double %2, double* %1
  ret void
}
"#,
            "k",
        );
        assert_eq!(
            out,
            r#"define void @k(double %0) {
bb0:
  ret void
}"#
        );
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let module_text = r#"
define i32 @d() {
bb0:
  %0 = sdiv i32 7, 0
  ret i32 %0
}
"#;
        let out = combine(module_text, "d");
        assert_eq!(
            out,
            r#"define i32 @d() {
bb0:
  %0 = sdiv i32 7, 0
  ret i32 %0
}"#
        );
    }
}
