use super::{defined_functions, erase_if_dead};
use anyhow::Result;
use kernelir_core::{FuncId, InstId, InstKind, Module, Pass, Value};
use std::collections::HashMap;

/// Block-local dead store elimination.
///
/// Removes a store when a later store in the same block overwrites the same pointer with no
/// read in between, and a store that writes back the value just loaded from its pointer.
#[derive(Debug, Default)]
pub struct Dse {
    removed: usize,
}

impl Dse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    fn run_on_function(&mut self, module: &mut Module, func: FuncId) -> Result<bool> {
        let mut dead: Vec<InstId> = Vec::new();
        let blocks = module
            .body(func)
            .map(|b| b.block_ids())
            .unwrap_or_default();

        for block in blocks {
            // Stores not yet observed by any read, by pointer.
            let mut pending: HashMap<Value, InstId> = HashMap::new();
            // Loads whose pointer has not been written since, by load.
            let mut clean_loads: HashMap<InstId, Value> = HashMap::new();

            for &id in module.block_insts(func, block) {
                let inst = &module[id];
                match inst.kind {
                    InstKind::Store => {
                        let value = &inst.operands()[0];
                        let ptr = inst.operands()[1].clone();
                        let writes_back = value
                            .as_inst()
                            .and_then(|load| clean_loads.get(&load))
                            .map_or(false, |loaded_from| *loaded_from == ptr);
                        if writes_back {
                            dead.push(id);
                            continue;
                        }
                        if let Some(overwritten) = pending.insert(ptr, id) {
                            dead.push(overwritten);
                        }
                        clean_loads.clear();
                    }
                    InstKind::Load => {
                        pending.clear();
                        clean_loads.insert(id, inst.operands()[0].clone());
                    }
                    InstKind::Call => {
                        pending.clear();
                        if module.may_have_side_effects(id) {
                            clean_loads.clear();
                        }
                    }
                    _ => {}
                }
            }
        }

        for &store in &dead {
            let value = module[store].operands()[0].as_inst();
            module.erase_inst(store)?;
            if let Some(value) = value {
                erase_if_dead(module, value)?;
            }
        }
        self.removed += dead.len();
        Ok(!dead.is_empty())
    }
}

impl Pass for Dse {
    fn name(&self) -> &'static str {
        "dse"
    }

    fn description(&self) -> &'static str {
        "Removes stores that are overwritten or write back an unchanged value"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        self.removed = 0;
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

    #[test]
    fn test_overwritten_and_write_back_stores() {
        let mut module = parse_module(
            r#"
define void @f(i32* %0, i32* %1) {
bb0:
  store i32 1, i32* %0
  store i32 2, i32* %0
  %2 = load i32, i32* %1
  store i32 %2, i32* %1
  %3 = load i32, i32* %0
  store i32 %3, i32* %1
  store i32 4, i32* %0
  ret void
}
"#,
        )
        .unwrap();
        let mut pass = Dse::new();
        assert!(pass.run_on_module(&mut module).unwrap());
        assert_eq!(pass.removed(), 2);
        verify_module(&module).unwrap();
        assert_eq!(
            print_module(&module).trim(),
            r#"define void @f(i32* %0, i32* %1) {
bb0:
  store i32 2, i32* %0
  %2 = load i32, i32* %0
  store i32 %2, i32* %1
  store i32 4, i32* %0
  ret void
}"#
        );
    }
}
