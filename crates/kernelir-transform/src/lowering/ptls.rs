use super::parent_name;
use crate::error::CompileError;
use crate::intrinsics::Intrinsic;
use anyhow::Result;
use kernelir_core::{Module, Pass, Value};
use tracing::{debug, warn};

/// Deletes calls to the thread-local-state getter.
///
/// Nothing on the device can stand in for thread-local state, so a call whose result is still
/// used aborts the compilation with [`CompileError::ThreadLocalStorage`]. Every call is checked
/// before any is deleted.
#[derive(Debug, Default)]
pub struct LowerPtls;

impl LowerPtls {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for LowerPtls {
    fn name(&self) -> &'static str {
        "lower-ptls"
    }

    fn description(&self) -> &'static str {
        "Removes dead thread-local-state lookups and rejects live ones"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        let calls = Intrinsic::PtlsStates.call_sites(module)?;

        for &call in &calls {
            if module.has_uses(&Value::Inst(call)) {
                let function = parent_name(module, call);
                warn!(%function, "thread-local state is still in use");
                return Err(CompileError::ThreadLocalStorage { function }.into());
            }
        }

        for &call in &calls {
            debug!(function = %parent_name(module, call), "deleting thread-local-state call");
            module.erase_inst(call)?;
        }

        if let Some(getter) = Intrinsic::PtlsStates.lookup(module) {
            if module.has_uses(&Value::Function(getter)) {
                return Err(CompileError::UnexpectedIntrinsicUse {
                    intrinsic: Intrinsic::PtlsStates.name().to_string(),
                    function: module.name.clone(),
                }
                .into());
            }
        }

        Ok(!calls.is_empty())
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
    fn test_dead_lookup_is_deleted() {
        let mut module = parse_module(
            r#"
declare i8*** @julia.ptls_states()

define void @julia_dead_1() {
bb0:
  %0 = call i8*** @julia.ptls_states()
  ret void
}
"#,
        )
        .unwrap();
        assert!(LowerPtls.run_on_module(&mut module).unwrap());
        verify_module(&module).unwrap();
        let f = module.function_by_name("julia_dead_1").unwrap();
        assert_eq!(module.function_insts(f).len(), 1);
        assert!(!LowerPtls.run_on_module(&mut module).unwrap());
    }

    #[test]
    fn test_live_lookup_is_fatal_and_untouched() {
        let input = r#"
@tls = global i8*** null

declare i8*** @julia.ptls_states()

define void @julia_dead_2() {
bb0:
  %0 = call i8*** @julia.ptls_states()
  ret void
}

define void @julia_live_3() {
bb0:
  %0 = call i8*** @julia.ptls_states()
  store i8*** %0, i8**** @tls
  ret void
}
"#;
        let mut module = parse_module(input).unwrap();
        let before = print_module(&module);

        let err = CompileError::from(LowerPtls.run_on_module(&mut module).unwrap_err());
        match err {
            CompileError::ThreadLocalStorage { function } => assert_eq!(function, "julia_live_3"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(print_module(&module), before);
    }

    #[test]
    fn test_missing_getter_is_not_an_error() {
        let mut module = parse_module(
            r#"
define void @julia_plain_4() {
bb0:
  ret void
}
"#,
        )
        .unwrap();
        assert!(!LowerPtls.run_on_module(&mut module).unwrap());
    }
}
