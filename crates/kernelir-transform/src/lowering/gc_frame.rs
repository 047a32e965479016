use super::parent_name;
use crate::intrinsics::Intrinsic;
use crate::job::DeviceRuntime;
use anyhow::{anyhow, Result};
use kernelir_core::{
    CastOp, Constant, FunctionType, InstBuilder, InstId, IrError, Module, Pass, Type, Value,
};
use tracing::debug;

/// Rewrites GC frame management and object allocation into stack slots and pool allocations.
///
/// | call | replacement |
/// |---|---|
/// | `julia.new_gc_frame(n)` | `alloca S, n` |
/// | `julia.get_gc_frame_slot(frame, i)` | `getelementptr S, frame, i` |
/// | `julia.gc_alloc_bytes(.., size)` | `pool_alloc(size + tag)`, bumped forward by `tag` bytes |
/// | push / pop / queue-root / write-barrier | deleted |
pub struct LowerGcFrame {
    runtime: DeviceRuntime,
    lowered: usize,
}

impl LowerGcFrame {
    pub fn new(runtime: DeviceRuntime) -> Self {
        Self {
            runtime,
            lowered: 0,
        }
    }

    pub fn lowered(&self) -> usize {
        self.lowered
    }

    fn lower_new_frame(&self, module: &mut Module, call: InstId) -> Result<()> {
        let slot = frame_slot_type(module, call)?;
        let count = module[call]
            .call_args()
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("{} takes the slot count", Intrinsic::NewGcFrame.name()))?;

        let frame = InstBuilder::before(module, call).array_alloca(slot, count)?;
        replace_call(module, call, frame)
    }

    fn lower_frame_slot(&self, module: &mut Module, call: InstId) -> Result<()> {
        let slot = frame_slot_type(module, call)?;
        let (frame, offset) = match module[call].call_args() {
            [frame, offset] => (frame.clone(), offset.clone()),
            _ => {
                return Err(anyhow!(
                    "{} takes a frame and an offset",
                    Intrinsic::GetGcFrameSlot.name()
                ))
            }
        };

        let expected = module[call].ty.clone();
        let mut b = InstBuilder::before(module, call);
        let address = b.gep(slot, frame, vec![offset])?;
        let address = b.pointer_cast(address, expected)?;
        replace_call(module, call, address)
    }

    fn lower_alloc(&self, module: &mut Module, call: InstId) -> Result<()> {
        let tag = i64::try_from(self.runtime.tag_size)
            .map_err(|_| anyhow!("tag size {} does not fit in i64", self.runtime.tag_size))?;
        let size = module[call]
            .call_args()
            .last()
            .cloned()
            .ok_or_else(|| anyhow!("{} takes a byte size", Intrinsic::GcAllocBytes.name()))?;
        let result_ty = module[call].ty.clone();
        let allocator = module.get_or_declare_function(
            &self.runtime.pool_alloc,
            FunctionType::new(vec![Type::i64()], Type::ptr(Type::i8())),
        )?;
        let size_ty = module.value_type(&size);
        let constant = size.as_constant().and_then(Constant::as_u64);

        let mut b = InstBuilder::before(module, call);
        let padded = match (size_ty, constant) {
            (Type::Int(bits), Some(bytes)) if bits <= 64 => {
                Value::int(64, (bytes as i64).wrapping_add(tag))
            }
            (Type::Int(64), None) => b.add(size, Value::int(64, tag))?,
            (Type::Int(bits), None) if bits < 64 => {
                let size = b.cast(CastOp::ZExt, size, Type::i64())?;
                b.add(size, Value::int(64, tag))?
            }
            (other, _) => {
                return Err(IrError::TypeError(format!("allocation size of type {}", other)).into())
            }
        };
        let raw = b.call(allocator, vec![padded])?;
        let object = b.gep(Type::i8(), raw, vec![Value::int(64, tag)])?;
        let object = b.pointer_cast(object, result_ty)?;
        replace_call(module, call, object)
    }
}

impl Default for LowerGcFrame {
    fn default() -> Self {
        Self::new(DeviceRuntime::default())
    }
}

/// Element type of a frame, read off the intrinsic's `S*` result.
fn frame_slot_type(module: &Module, call: InstId) -> Result<Type> {
    let ty = &module[call].ty;
    ty.pointee()
        .cloned()
        .ok_or_else(|| IrError::TypeError(format!("GC frame intrinsic returns {}", ty)).into())
}

fn replace_call(module: &mut Module, call: InstId, replacement: Value) -> Result<()> {
    module.replace_all_uses_with(&Value::Inst(call), replacement);
    module.erase_inst(call)?;
    Ok(())
}

fn delete_call(module: &mut Module, call: InstId) -> Result<()> {
    if module[call].has_result() {
        let undef = Value::undef(module[call].ty.clone());
        module.replace_all_uses_with(&Value::Inst(call), undef);
    }
    module.erase_inst(call)?;
    Ok(())
}

impl Pass for LowerGcFrame {
    fn name(&self) -> &'static str {
        "lower-gc-frame"
    }

    fn description(&self) -> &'static str {
        "Replaces GC frame and allocation intrinsics with device-compatible IR"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        self.lowered = 0;

        // Reject unlowerable references before touching anything.
        let mut work = Vec::new();
        for intrinsic in Intrinsic::ALL {
            if intrinsic == Intrinsic::PtlsStates {
                continue;
            }
            work.push((intrinsic, intrinsic.call_sites(module)?));
        }

        for (intrinsic, calls) in work {
            for call in calls {
                debug!(
                    intrinsic = intrinsic.name(),
                    function = %parent_name(module, call),
                    "lowering call"
                );
                match intrinsic {
                    Intrinsic::NewGcFrame => self.lower_new_frame(module, call)?,
                    Intrinsic::GetGcFrameSlot => self.lower_frame_slot(module, call)?,
                    Intrinsic::GcAllocBytes => self.lower_alloc(module, call)?,
                    i if i.is_bookkeeping() => delete_call(module, call)?,
                    _ => continue,
                }
                self.lowered += 1;
            }
        }

        Ok(self.lowered > 0)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intrinsics::remaining_intrinsic_calls;
    use kernelir_core::verify_module;
    use kernelir_emit::print_module;
    use kernelir_parser::parse_module;
    use pretty_assertions::assert_eq;

    const FRAME_MODULE: &str = r#"
declare %jl_value_t addrspace(10)** @julia.new_gc_frame(i32)

declare void @julia.push_gc_frame(%jl_value_t addrspace(10)**, i32)

declare %jl_value_t addrspace(10)** @julia.get_gc_frame_slot(%jl_value_t addrspace(10)**, i32)

declare void @julia.pop_gc_frame(%jl_value_t addrspace(10)**)

define void @julia_frames_1(%jl_value_t addrspace(10)* %0) {
bb0:
  %1 = call %jl_value_t addrspace(10)** @julia.new_gc_frame(i32 2)
  call void @julia.push_gc_frame(%jl_value_t addrspace(10)** %1, i32 2)
  %2 = call %jl_value_t addrspace(10)** @julia.get_gc_frame_slot(%jl_value_t addrspace(10)** %1, i32 1)
  store %jl_value_t addrspace(10)* %0, %jl_value_t addrspace(10)** %2
  call void @julia.pop_gc_frame(%jl_value_t addrspace(10)** %1)
  ret void
}
"#;

    #[test]
    fn test_frame_becomes_stack_slots() {
        let mut module = parse_module(FRAME_MODULE).unwrap();
        let mut pass = LowerGcFrame::default();
        assert!(pass.run_on_module(&mut module).unwrap());
        assert_eq!(pass.lowered(), 4);
        verify_module(&module).unwrap();

        let f = module.function_by_name("julia_frames_1").unwrap();
        assert_eq!(
            kernelir_emit::print_function(&module, f).trim(),
            r#"define void @julia_frames_1(%jl_value_t addrspace(10)* %0) {
bb0:
  %1 = alloca %jl_value_t addrspace(10)*, i32 2
  %2 = getelementptr %jl_value_t addrspace(10)*, %jl_value_t addrspace(10)** %1, i32 1
  store %jl_value_t addrspace(10)* %0, %jl_value_t addrspace(10)** %2
  ret void
}"#
        );
        assert!(remaining_intrinsic_calls(&module).is_empty());
    }

    #[test]
    fn test_alloc_reserves_tag_headroom() {
        let mut module = parse_module(
            r#"
declare %jl_value_t addrspace(10)* @julia.gc_alloc_bytes(i8*, i64)

define void @julia_alloc_2(i8* %0, %jl_value_t addrspace(10)** %1) {
bb0:
  %2 = call %jl_value_t addrspace(10)* @julia.gc_alloc_bytes(i8* %0, i64 16)
  store %jl_value_t addrspace(10)* %2, %jl_value_t addrspace(10)** %1
  ret void
}
"#,
        )
        .unwrap();
        assert!(LowerGcFrame::default().run_on_module(&mut module).unwrap());
        verify_module(&module).unwrap();

        assert_eq!(
            print_module(&module).trim(),
            r#"declare %jl_value_t addrspace(10)* @julia.gc_alloc_bytes(i8*, i64)

define void @julia_alloc_2(i8* %0, %jl_value_t addrspace(10)** %1) {
bb0:
  %2 = call i8* @ptx_gc_pool_alloc(i64 24)
  %3 = getelementptr i8, i8* %2, i64 8
  %4 = addrspacecast i8* %3 to %jl_value_t addrspace(10)*
  store %jl_value_t addrspace(10)* %4, %jl_value_t addrspace(10)** %1
  ret void
}

declare i8* @ptx_gc_pool_alloc(i64)"#
        );
    }

    #[test]
    fn test_dynamic_size_is_padded_at_runtime() {
        let mut module = parse_module(
            r#"
declare i8* @julia.gc_alloc_bytes(i8*, i32)

define i8* @julia_alloc_3(i8* %0, i32 %1) {
bb0:
  %2 = call i8* @julia.gc_alloc_bytes(i8* %0, i32 %1)
  ret i8* %2
}
"#,
        )
        .unwrap();
        let runtime = DeviceRuntime {
            pool_alloc: "device_alloc".into(),
            tag_size: 16,
        };
        assert!(LowerGcFrame::new(runtime).run_on_module(&mut module).unwrap());
        verify_module(&module).unwrap();

        let f = module.function_by_name("julia_alloc_3").unwrap();
        assert_eq!(
            kernelir_emit::print_function(&module, f).trim(),
            r#"define i8* @julia_alloc_3(i8* %0, i32 %1) {
bb0:
  %2 = zext i32 %1 to i64
  %3 = add i64 %2, 16
  %4 = call i8* @device_alloc(i64 %3)
  %5 = getelementptr i8, i8* %4, i64 16
  ret i8* %5
}"#
        );
    }

    #[test]
    fn test_huge_constant_size_wraps_like_the_runtime_add() {
        let mut module = parse_module(
            r#"
declare i8* @julia.gc_alloc_bytes(i8*, i64)

define i8* @julia_alloc_5(i8* %0) {
bb0:
  %1 = call i8* @julia.gc_alloc_bytes(i8* %0, i64 9223372036854775807)
  ret i8* %1
}
"#,
        )
        .unwrap();
        assert!(LowerGcFrame::default().run_on_module(&mut module).unwrap());
        verify_module(&module).unwrap();

        let alloc = module.function_by_name("ptx_gc_pool_alloc").unwrap();
        let sizes: Vec<i64> = module
            .call_sites(alloc)
            .into_iter()
            .filter_map(|call| module[call].call_args()[0].as_const_int())
            .collect();
        assert_eq!(sizes, vec![i64::MAX.wrapping_add(8)]);
    }

    #[test]
    fn test_oversized_tag_is_an_error() {
        let input = r#"
declare i8* @julia.gc_alloc_bytes(i8*, i64)

define i8* @julia_alloc_6(i8* %0) {
bb0:
  %1 = call i8* @julia.gc_alloc_bytes(i8* %0, i64 16)
  ret i8* %1
}
"#;
        let mut module = parse_module(input).unwrap();
        let runtime = DeviceRuntime {
            tag_size: u64::MAX,
            ..DeviceRuntime::default()
        };
        let err = LowerGcFrame::new(runtime).run_on_module(&mut module).unwrap_err();
        assert!(err.to_string().contains("does not fit"));
        assert_eq!(print_module(&module), print_module(&parse_module(input).unwrap()));
    }

    #[test]
    fn test_second_run_reports_no_change() {
        let mut module = parse_module(FRAME_MODULE).unwrap();
        assert!(LowerGcFrame::default().run_on_module(&mut module).unwrap());
        let once = print_module(&module);
        assert!(!LowerGcFrame::default().run_on_module(&mut module).unwrap());
        assert_eq!(print_module(&module), once);
    }

    #[test]
    fn test_address_taken_intrinsic_is_rejected() {
        let mut module = parse_module(
            r#"
declare void @julia.pop_gc_frame(i8**)

define void @julia_leak_4(void (i8**)** %0) {
bb0:
  store void (i8**)* @julia.pop_gc_frame, void (i8**)** %0
  ret void
}
"#,
        )
        .unwrap();
        let err = LowerGcFrame::default().run_on_module(&mut module).unwrap_err();
        let err = crate::CompileError::from(err);
        assert!(matches!(err, crate::CompileError::UnexpectedIntrinsicUse { .. }));
    }
}
