use anyhow::Result;
use kernelir_core::{AddressSpace, Constant, GlobalId, Module, Pass, Type, Value};
use std::collections::HashMap;
use tracing::debug;

/// Merges internal constant globals with identical type, address space and initializer into
/// the first such global.
#[derive(Debug, Default)]
pub struct ConstMerge {
    merged: usize,
}

impl ConstMerge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merged(&self) -> usize {
        self.merged
    }
}

impl Pass for ConstMerge {
    fn name(&self) -> &'static str {
        "constmerge"
    }

    fn description(&self) -> &'static str {
        "Merges duplicate constant globals"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        self.merged = 0;
        let mut canonical: HashMap<(Type, AddressSpace, Constant), GlobalId> = HashMap::new();
        let mut duplicates: Vec<(GlobalId, GlobalId)> = Vec::new();

        for (id, global) in module.globals() {
            let Some(init) = &global.initializer else {
                continue;
            };
            if !global.is_constant {
                continue;
            }
            let key = (global.ty.clone(), global.addrspace, init.clone());
            match canonical.get(&key) {
                Some(&keep) if global.linkage.is_internal() => duplicates.push((id, keep)),
                Some(_) => {}
                None => {
                    canonical.insert(key, id);
                }
            }
        }

        for (duplicate, keep) in duplicates {
            module.replace_all_uses_with(&Value::Global(duplicate), Value::Global(keep));
            let name = module
                .global(duplicate)
                .map(|g| g.name.clone())
                .unwrap_or_default();
            module.remove_global(duplicate)?;
            debug!(global = %name, "merged duplicate constant");
            self.merged += 1;
        }

        Ok(self.merged > 0)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
