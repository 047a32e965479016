use super::referenced_by_metadata;
use anyhow::Result;
use kernelir_core::{Module, Pass, Value};
use tracing::debug;

/// Deletes internal functions and globals nothing refers to, and unused declarations.
///
/// A function named by module metadata (kernel annotations, for instance) counts as used.
#[derive(Debug, Default)]
pub struct GlobalDce {
    removed: Vec<String>,
}

impl GlobalDce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed(&self) -> &[String] {
        &self.removed
    }
}

impl Pass for GlobalDce {
    fn name(&self) -> &'static str {
        "globaldce"
    }

    fn description(&self) -> &'static str {
        "Removes unreferenced internal functions, globals and declarations"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        self.removed.clear();

        loop {
            let mut progress = false;

            for id in module.function_ids() {
                let function = &module[id];
                let removable = function.is_declaration() || function.linkage.is_internal();
                if !removable || referenced_by_metadata(module, id) {
                    continue;
                }
                let used_elsewhere = module
                    .users(&Value::Function(id))
                    .into_iter()
                    .any(|user| module[user].function() != Some(id));
                if used_elsewhere {
                    continue;
                }
                let name = function.name.clone();
                module.remove_function(id)?;
                debug!(function = %name, "removed dead function");
                self.removed.push(name);
                progress = true;
            }

            let globals: Vec<_> = module
                .globals()
                .filter(|(_, g)| g.linkage.is_internal())
                .map(|(id, g)| (id, g.name.clone()))
                .collect();
            for (id, name) in globals {
                if module.has_uses(&Value::Global(id)) {
                    continue;
                }
                module.remove_global(id)?;
                debug!(global = %name, "removed dead global");
                self.removed.push(name);
                progress = true;
            }

            if !progress {
                break;
            }
        }

        Ok(!self.removed.is_empty())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
