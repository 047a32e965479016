use kernelir_core::{verify_module, Constant, Module, Pass, Value};
use kernelir_emit::print_module;
use kernelir_parser::parse_module;
use kernelir_transform::passes::Adce;
use kernelir_transform::{
    remaining_intrinsic_calls, CompileError, DeviceRuntime, Intrinsic, LowerGcFrame, LowerPtls,
};
use pretty_assertions::assert_eq;

const EVERY_INTRINSIC: &str = r#"
declare i8*** @julia.ptls_states()

declare %jl_value_t addrspace(10)* @julia.gc_alloc_bytes(i8*, i64)

declare %jl_value_t addrspace(10)** @julia.new_gc_frame(i32)

declare void @julia.push_gc_frame(%jl_value_t addrspace(10)**, i32)

declare %jl_value_t addrspace(10)** @julia.get_gc_frame_slot(%jl_value_t addrspace(10)**, i32)

declare void @julia.queue_gc_root(%jl_value_t addrspace(10)*)

declare void @julia.write_barrier(%jl_value_t addrspace(10)*, %jl_value_t addrspace(10)*)

declare void @julia.pop_gc_frame(%jl_value_t addrspace(10)**)

define void @julia_box_1(%jl_value_t addrspace(10)** %0) {
bb0:
  %1 = call i8*** @julia.ptls_states()
  %2 = bitcast i8*** %1 to i8*
  %3 = call %jl_value_t addrspace(10)** @julia.new_gc_frame(i32 2)
  call void @julia.push_gc_frame(%jl_value_t addrspace(10)** %3, i32 2)
  %4 = call %jl_value_t addrspace(10)* @julia.gc_alloc_bytes(i8* %2, i64 32)
  %5 = call %jl_value_t addrspace(10)** @julia.get_gc_frame_slot(%jl_value_t addrspace(10)** %3, i32 0)
  store %jl_value_t addrspace(10)* %4, %jl_value_t addrspace(10)** %5
  call void @julia.queue_gc_root(%jl_value_t addrspace(10)* %4)
  call void @julia.write_barrier(%jl_value_t addrspace(10)* %4, %jl_value_t addrspace(10)* %4)
  store %jl_value_t addrspace(10)* %4, %jl_value_t addrspace(10)** %0
  call void @julia.pop_gc_frame(%jl_value_t addrspace(10)** %3)
  ret void
}
"#;

/// Frame lowering, dead code elimination, then thread-local-state lowering.
fn lower(module: &mut Module) -> Result<[bool; 3], CompileError> {
    let frames = LowerGcFrame::default().run_on_module(module)?;
    let adce = Adce::new().run_on_module(module)?;
    let ptls = LowerPtls::new().run_on_module(module)?;
    Ok([frames, adce, ptls])
}

fn pool_alloc_sizes(module: &Module, runtime: &DeviceRuntime) -> Vec<i64> {
    let Some(alloc) = module.function_by_name(&runtime.pool_alloc) else {
        return Vec::new();
    };
    module
        .call_sites(alloc)
        .into_iter()
        .filter_map(|call| module[call].call_args()[0].as_const_int())
        .collect()
}

#[test]
fn test_no_intrinsic_call_survives_lowering() {
    let mut module = parse_module(EVERY_INTRINSIC).unwrap();
    assert_eq!(remaining_intrinsic_calls(&module).len(), 8);

    let changed = lower(&mut module).unwrap();
    assert_eq!(changed, [true, true, true]);
    verify_module(&module).unwrap();
    assert!(remaining_intrinsic_calls(&module).is_empty());

    for intrinsic in Intrinsic::ALL {
        if let Some(f) = intrinsic.lookup(&module) {
            assert!(module.call_sites(f).is_empty(), "{} still called", intrinsic.name());
        }
    }
}

#[test]
fn test_lowering_twice_is_a_no_op() {
    let mut module = parse_module(EVERY_INTRINSIC).unwrap();
    lower(&mut module).unwrap();
    let once = print_module(&module);

    assert_eq!(lower(&mut module).unwrap(), [false, false, false]);
    assert_eq!(print_module(&module), once);
}

#[test]
fn test_headroom_arithmetic() {
    let cases = [
        ("i64", 0_i64, 8_u64),
        ("i64", 16, 8),
        ("i64", 100, 16),
        ("i32", 16, 8),
        ("i32", -1, 8),
    ];
    for (size_ty, size, tag) in cases {
        let mut module = parse_module(&format!(
            r#"
declare i8* @julia.gc_alloc_bytes(i8*, {ty})

define i8* @julia_alloc_1(i8* %0) {{
bb0:
  %1 = call i8* @julia.gc_alloc_bytes(i8* %0, {ty} {size})
  ret i8* %1
}}
"#,
            ty = size_ty,
            size = size
        ))
        .unwrap();
        let runtime = DeviceRuntime {
            tag_size: tag,
            ..DeviceRuntime::default()
        };
        LowerGcFrame::new(runtime.clone())
            .run_on_module(&mut module)
            .unwrap();

        // Narrow sizes are unsigned byte counts, folded without a zext.
        let bytes = if size_ty == "i32" {
            size as u32 as i64
        } else {
            size
        };
        assert_eq!(pool_alloc_sizes(&module, &runtime), vec![bytes + tag as i64]);

        // The returned object sits exactly one tag past the allocation.
        let f = module.function_by_name("julia_alloc_1").unwrap();
        let entry = module[f].entry_block().unwrap();
        assert_eq!(module.block_insts(f, entry).len(), 3);
        let ret = module.terminator(f, entry).unwrap();
        let object = module[ret].operands()[0].as_inst().unwrap();
        assert_eq!(
            module[object].operands()[1],
            Value::Const(Constant::int(64, tag as i64))
        );
        let raw = module[object].operands()[0].as_inst().unwrap();
        assert!(module[raw].is_call());
    }
}

#[test]
fn test_allocation_only_module() {
    let mut module = parse_module(
        r#"
declare i8* @julia.gc_alloc_bytes(i8*, i64)

define void @julia_alloc_2(i8* %0, i8** %1) {
bb0:
  %2 = call i8* @julia.gc_alloc_bytes(i8* %0, i64 16)
  store i8* %2, i8** %1
  ret void
}
"#,
    )
    .unwrap();

    let mut frames = LowerGcFrame::default();
    assert!(frames.run_on_module(&mut module).unwrap());
    assert_eq!(frames.lowered(), 1);
    assert!(!LowerPtls::new().run_on_module(&mut module).unwrap());
    assert!(!LowerGcFrame::default().run_on_module(&mut module).unwrap());

    let alloc = Intrinsic::GcAllocBytes.lookup(&module).unwrap();
    assert!(module.call_sites(alloc).is_empty());
    assert_eq!(pool_alloc_sizes(&module, &DeviceRuntime::default()), vec![24]);
}

fn assert_fatal_tls(source: &str) {
    let mut module = parse_module(source).unwrap();
    let before = print_module(&module);

    match lower(&mut module) {
        Err(CompileError::ThreadLocalStorage { function }) => assert_eq!(function, "julia_leak_1"),
        other => panic!("expected a thread-local storage error, got {:?}", other),
    }
    let getter = Intrinsic::PtlsStates.lookup(&module).unwrap();
    assert_eq!(module.call_sites(getter).len(), 1);
    assert_eq!(print_module(&module), before);
}

#[test]
fn test_tls_stored_to_global_is_fatal() {
    assert_fatal_tls(
        r#"
@slot = global i8*** null

declare i8*** @julia.ptls_states()

define void @julia_leak_1() {
bb0:
  %0 = call i8*** @julia.ptls_states()
  store i8*** %0, i8**** @slot
  ret void
}
"#,
    );
}

#[test]
fn test_tls_passed_to_live_call_is_fatal() {
    assert_fatal_tls(
        r#"
declare i8*** @julia.ptls_states()

declare void @sink(i8***)

define void @julia_leak_1() {
bb0:
  %0 = call i8*** @julia.ptls_states()
  call void @sink(i8*** %0)
  ret void
}
"#,
    );
}
