use anyhow::Result;
use kernelir_core::{Linkage, Module, Pass};
use std::collections::HashSet;

/// Gives internal linkage to every defined symbol except the preserved ones.
#[derive(Debug, Default)]
pub struct Internalize {
    preserve: HashSet<String>,
}

impl Internalize {
    pub fn new<I, S>(preserve: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            preserve: preserve.into_iter().map(Into::into).collect(),
        }
    }
}

impl Pass for Internalize {
    fn name(&self) -> &'static str {
        "internalize"
    }

    fn description(&self) -> &'static str {
        "Marks all definitions but the preserved entry points internal"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        let mut changed = false;

        for id in module.function_ids() {
            let Some(function) = module.function_mut(id) else {
                continue;
            };
            if function.is_declaration()
                || function.linkage.is_internal()
                || self.preserve.contains(&function.name)
            {
                continue;
            }
            function.linkage = Linkage::Internal;
            changed = true;
        }

        let globals: Vec<_> = module.globals().map(|(id, _)| id).collect();
        for id in globals {
            let Some(global) = module.global_mut(id) else {
                continue;
            };
            if global.initializer.is_none()
                || global.linkage.is_internal()
                || self.preserve.contains(&global.name)
            {
                continue;
            }
            global.linkage = Linkage::Internal;
            changed = true;
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
    use kernelir_parser::parse_module;

    #[test]
    fn test_only_preserved_definitions_stay_external() {
        let mut module = parse_module(
            r#"
@counter = global i32 0

@extern_table = global [4 x i8]

declare void @device_sync()

define void @entry() {
bb0:
  ret void
}

define void @helper() {
bb0:
  ret void
}
"#,
        )
        .unwrap();
        assert!(Internalize::new(["entry"]).run_on_module(&mut module).unwrap());

        let linkage = |name: &str| module[module.function_by_name(name).unwrap()].linkage;
        assert_eq!(linkage("entry"), Linkage::External);
        assert_eq!(linkage("helper"), Linkage::Internal);
        assert_eq!(linkage("device_sync"), Linkage::External);

        let counter = module.global_by_name("counter").unwrap();
        assert_eq!(module.global(counter).unwrap().linkage, Linkage::Internal);
        let table = module.global_by_name("extern_table").unwrap();
        assert_eq!(module.global(table).unwrap().linkage, Linkage::External);

        assert!(!Internalize::new(["entry"]).run_on_module(&mut module).unwrap());
    }
}
