use super::{defined_functions, erase_if_dead, referenced_by_metadata};
use anyhow::Result;
use kernelir_core::{FuncId, InstKind, Module, Pass, Type, Value};
use tracing::debug;

/// Dead argument elimination.
///
/// For internal functions whose address never escapes (every use is the callee slot of a
/// call), parameters nobody reads are dropped from the signature and from every call site, and
/// a return value no caller uses is demoted to `void`.
#[derive(Debug, Default)]
pub struct DeadArgElim {
    removed_params: usize,
    demoted_returns: usize,
}

impl DeadArgElim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed_params(&self) -> usize {
        self.removed_params
    }

    pub fn demoted_returns(&self) -> usize {
        self.demoted_returns
    }

    fn is_candidate(module: &Module, func: FuncId) -> bool {
        module[func].linkage.is_internal()
            && !referenced_by_metadata(module, func)
            && module
                .uses(&Value::Function(func))
                .iter()
                .all(|u| u.operand == 0 && module[u.user].is_call())
    }

    fn drop_dead_params(&mut self, module: &mut Module, func: FuncId) -> bool {
        let arity = module[func].ty.params.len() as u32;
        let live: Vec<u32> = (0..arity)
            .filter(|&i| module.has_uses(&Value::Param(func, i)))
            .collect();
        if live.len() as u32 == arity {
            return false;
        }

        for call in module.call_sites(func) {
            let mut operands = vec![Value::Function(func)];
            operands.extend(
                live.iter()
                    .filter_map(|&i| module[call].call_args().get(i as usize).cloned()),
            );
            module.set_operands(call, operands);
        }

        let function = &mut module[func];
        function.ty.params = live
            .iter()
            .map(|&i| function.ty.params[i as usize].clone())
            .collect();
        function.param_attributes = live
            .iter()
            .map(|&i| {
                function
                    .param_attributes
                    .get(i as usize)
                    .cloned()
                    .unwrap_or_default()
            })
            .collect();

        // New positions never exceed old ones, so ascending order cannot clobber.
        for (new, &old) in live.iter().enumerate() {
            module.replace_all_uses_with(&Value::Param(func, old), Value::Param(func, new as u32));
        }

        let removed = (arity as usize) - live.len();
        debug!(function = %module[func].name, removed, "dropped dead parameters");
        self.removed_params += removed;
        true
    }

    fn demote_return(&mut self, module: &mut Module, func: FuncId) -> Result<bool> {
        if module[func].ty.ret.is_void() {
            return Ok(false);
        }
        let calls = module.call_sites(func);
        if calls.iter().any(|&c| module.has_uses(&Value::Inst(c))) {
            return Ok(false);
        }

        let returns: Vec<_> = module
            .function_insts(func)
            .into_iter()
            .filter(|&id| matches!(module[id].kind, InstKind::Ret))
            .collect();
        for ret in returns {
            let value = module[ret].operands().first().and_then(Value::as_inst);
            module.set_operands(ret, Vec::new());
            if let Some(value) = value {
                erase_if_dead(module, value)?;
            }
        }
        for call in calls {
            module[call].ty = Type::Void;
        }
        module[func].ty.ret = Type::Void;

        debug!(function = %module[func].name, "demoted unused return value");
        self.demoted_returns += 1;
        Ok(true)
    }
}

impl Pass for DeadArgElim {
    fn name(&self) -> &'static str {
        "deadargelim"
    }

    fn description(&self) -> &'static str {
        "Removes unused parameters and return values of internal functions"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        self.removed_params = 0;
        self.demoted_returns = 0;
        let mut changed = false;
        for func in defined_functions(module) {
            if !Self::is_candidate(module, func) {
                continue;
            }
            changed |= self.drop_dead_params(module, func);
            changed |= self.demote_return(module, func)?;
        }
        Ok(changed)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
