use crate::error::CompileError;
use kernelir_core::{FuncId, InstId, Module, Value};

/// Runtime intrinsics emitted by the front end that have no device implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    GcAllocBytes,
    NewGcFrame,
    GetGcFrameSlot,
    PushGcFrame,
    PopGcFrame,
    QueueGcRoot,
    WriteBarrier,
    PtlsStates,
}

impl Intrinsic {
    pub const ALL: [Intrinsic; 8] = [
        Intrinsic::GcAllocBytes,
        Intrinsic::NewGcFrame,
        Intrinsic::GetGcFrameSlot,
        Intrinsic::PushGcFrame,
        Intrinsic::PopGcFrame,
        Intrinsic::QueueGcRoot,
        Intrinsic::WriteBarrier,
        Intrinsic::PtlsStates,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::GcAllocBytes => "julia.gc_alloc_bytes",
            Intrinsic::NewGcFrame => "julia.new_gc_frame",
            Intrinsic::GetGcFrameSlot => "julia.get_gc_frame_slot",
            Intrinsic::PushGcFrame => "julia.push_gc_frame",
            Intrinsic::PopGcFrame => "julia.pop_gc_frame",
            Intrinsic::QueueGcRoot => "julia.queue_gc_root",
            Intrinsic::WriteBarrier => "julia.write_barrier",
            Intrinsic::PtlsStates => "julia.ptls_states",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|i| i.name() == name)
    }

    /// Collector bookkeeping that is simply dropped on the device.
    pub fn is_bookkeeping(self) -> bool {
        matches!(
            self,
            Intrinsic::PushGcFrame
                | Intrinsic::PopGcFrame
                | Intrinsic::QueueGcRoot
                | Intrinsic::WriteBarrier
        )
    }

    pub fn lookup(self, module: &Module) -> Option<FuncId> {
        module.function_by_name(self.name())
    }

    /// Call sites of the intrinsic. A missing declaration means there is nothing to lower.
    ///
    /// Any other reference to the intrinsic (taking its address, storing it) cannot be lowered and
    /// is reported as [`CompileError::UnexpectedIntrinsicUse`].
    pub fn call_sites(self, module: &Module) -> Result<Vec<InstId>, CompileError> {
        let Some(func) = self.lookup(module) else {
            return Ok(Vec::new());
        };
        let mut calls = Vec::new();
        for u in module.uses(&Value::Function(func)) {
            let user = &module[u.user];
            if u.operand == 0 && user.is_call() {
                if !calls.contains(&u.user) {
                    calls.push(u.user);
                }
                continue;
            }
            let function = user
                .function()
                .and_then(|f| module.function(f))
                .map(|f| f.name.clone())
                .unwrap_or_default();
            return Err(CompileError::UnexpectedIntrinsicUse {
                intrinsic: self.name().to_string(),
                function,
            });
        }
        Ok(calls)
    }
}

pub fn remaining_intrinsic_calls(module: &Module) -> Vec<(Intrinsic, InstId)> {
    Intrinsic::ALL
        .iter()
        .filter_map(|&i| i.lookup(module).map(|f| (i, f)))
        .flat_map(|(i, f)| {
            module
                .call_sites(f)
                .into_iter()
                .map(move |call| (i, call))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_stable() {
        assert_eq!(Intrinsic::GcAllocBytes.name(), "julia.gc_alloc_bytes");
        assert_eq!(Intrinsic::PtlsStates.name(), "julia.ptls_states");
        for i in Intrinsic::ALL {
            assert_eq!(Intrinsic::from_name(i.name()), Some(i));
        }
        assert_eq!(Intrinsic::from_name("julia.gc_preserve_begin"), None);
    }

    #[test]
    fn test_missing_declaration_has_no_call_sites() {
        let module = Module::new("m");
        assert!(Intrinsic::NewGcFrame.call_sites(&module).unwrap().is_empty());
        assert!(remaining_intrinsic_calls(&module).is_empty());
    }
}
