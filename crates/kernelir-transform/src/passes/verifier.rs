use anyhow::Result;
use kernelir_core::{verify_function, verify_module, FuncId, Module, Pass};

/// Runs the IR verifier, over the whole module or a fixed set of functions. Never changes
/// anything.
#[derive(Debug, Default)]
pub struct Verifier {
    functions: Option<Vec<FuncId>>,
}

impl Verifier {
    pub fn new() -> Self {
        Self { functions: None }
    }

    pub fn functions(functions: Vec<FuncId>) -> Self {
        Self {
            functions: Some(functions),
        }
    }
}

impl Pass for Verifier {
    fn name(&self) -> &'static str {
        "verify"
    }

    fn description(&self) -> &'static str {
        "Checks structural and type invariants of the IR"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        match &self.functions {
            Some(functions) => {
                for &func in functions {
                    verify_function(module, func)?;
                }
            }
            None => verify_module(module)?,
        }
        Ok(false)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
