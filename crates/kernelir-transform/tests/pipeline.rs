use kernelir_core::{
    verify_module, AddressSpace, FnAttr, InstKind, Linkage, MetadataKind, Module, Type,
};
use kernelir_parser::parse_module;
use kernelir_transform::{
    kernel_annotations, remaining_intrinsic_calls, wrap_entry, CompileError, CompilerJob,
    DeviceCompiler, NoopOptimizer, SourceType,
};
use pretty_assertions::assert_eq;

const VADD: &str = r#"
declare i8*** @julia.ptls_states()

declare %jl_value_t addrspace(10)* @julia.gc_alloc_bytes(i8*, i64)

declare %jl_value_t addrspace(10)** @julia.new_gc_frame(i32)

declare void @julia.push_gc_frame(%jl_value_t addrspace(10)**, i32)

declare %jl_value_t addrspace(10)** @julia.get_gc_frame_slot(%jl_value_t addrspace(10)**, i32)

declare void @julia.pop_gc_frame(%jl_value_t addrspace(10)**)

define void @julia_vadd_1(float addrspace(1)* %0, float* %1, i64 %2) {
bb0:
  %3 = call i8*** @julia.ptls_states()
  %4 = bitcast i8*** %3 to i8*
  %5 = call %jl_value_t addrspace(10)** @julia.new_gc_frame(i32 1)
  call void @julia.push_gc_frame(%jl_value_t addrspace(10)** %5, i32 1)
  %6 = call %jl_value_t addrspace(10)* @julia.gc_alloc_bytes(i8* %4, i64 16)
  %7 = call %jl_value_t addrspace(10)** @julia.get_gc_frame_slot(%jl_value_t addrspace(10)** %5, i32 0)
  store %jl_value_t addrspace(10)* %6, %jl_value_t addrspace(10)** %7
  %8 = load float, float* %1, !invariant.load !{}
  %9 = getelementptr float, float addrspace(1)* %0, i64 %2
  store float %8, float addrspace(1)* %9, !tbaa !{!"jtbaa_arraybuf"}
  call void @julia.pop_gc_frame(%jl_value_t addrspace(10)** %5)
  ret void
}
"#;

fn vadd_arg_types() -> Vec<SourceType> {
    vec![
        SourceType::ghost("typeof(vadd)"),
        SourceType::pointer("CuPtr{Float32}"),
        SourceType::bits("Float32"),
        SourceType::bits("Int64"),
    ]
}

fn parse(source: &str) -> Module {
    parse_module(source).unwrap_or_else(|e| panic!("failed to parse: {}", e))
}

#[test]
fn test_scenario_a_direct_forwarding() {
    let mut module = parse(
        r#"
define void @julia_store_1(i32 %0, i32* %1) {
bb0:
  store i32 %0, i32* %1
  ret void
}
"#,
    );
    let entry = module.function_by_name("julia_store_1").unwrap();
    let wrapper = wrap_entry(
        &mut module,
        entry,
        &[SourceType::bits("Int32"), SourceType::pointer("Ptr{Int32}")],
    )
    .unwrap();

    verify_module(&module).unwrap();
    assert_eq!(module[wrapper].params(), &[Type::i32(), Type::ptr(Type::i32())]);
    let insts = module.function_insts(wrapper);
    assert!(insts
        .iter()
        .all(|&i| !matches!(module[i].kind, InstKind::Alloca { .. })));
}

#[test]
fn test_scenario_b_value_passed_by_reference() {
    let mut module = parse(
        r#"
define void @julia_twice_2(double* %0, double* %1) {
bb0:
  %2 = load double, double* %1
  %3 = fadd double %2, %2
  store double %3, double* %0
  ret void
}
"#,
    );
    let entry = module.function_by_name("julia_twice_2").unwrap();
    let wrapper = wrap_entry(
        &mut module,
        entry,
        &[SourceType::pointer("Ptr{Float64}"), SourceType::bits("Float64")],
    )
    .unwrap();

    verify_module(&module).unwrap();
    assert_eq!(module[wrapper].name, "ptxcall_twice_2");
    assert_eq!(
        module[wrapper].params(),
        &[Type::ptr(Type::Double), Type::Double]
    );

    let insts = module.function_insts(wrapper);
    let slots: Vec<_> = insts
        .iter()
        .copied()
        .filter(|&i| matches!(module[i].kind, InstKind::Alloca { .. }))
        .collect();
    assert_eq!(slots.len(), 1);
    assert_eq!(module[slots[0]].ty, Type::ptr(Type::Double));

    // The by-value argument is spilled into the slot.
    let spill = insts
        .iter()
        .copied()
        .find(|&i| module[i].kind == InstKind::Store)
        .unwrap();
    assert_eq!(module[spill].operands()[0], kernelir_core::Value::Param(wrapper, 1));
    assert_eq!(module[spill].operands()[1], kernelir_core::Value::Inst(slots[0]));

    assert_eq!(module[entry].linkage, Linkage::Internal);
    assert!(module[entry].has_attr(FnAttr::AlwaysInline));
}

#[test]
fn test_wrapper_arity_matches_non_ghost_arguments() {
    for ghosts in 0..3 {
        for k in 0..4 {
            let params: Vec<String> = (0..k).map(|i| format!("i64 %{}", i)).collect();
            let mut module = parse(&format!(
                "define void @julia_arity_{}({}) {{\nbb0:\n  ret void\n}}\n",
                k,
                params.join(", ")
            ));
            let entry = module
                .function_by_name(&format!("julia_arity_{}", k))
                .unwrap();
            let mut types: Vec<SourceType> = (0..k).map(|_| SourceType::bits("Int64")).collect();
            for g in 0..ghosts {
                types.insert(g, SourceType::ghost("Nothing"));
            }
            let wrapper = wrap_entry(&mut module, entry, &types).unwrap();
            assert_eq!(module[wrapper].params().len(), k);
        }
    }
}

#[test]
fn test_kernel_compilation_end_to_end() {
    let mut module = parse(VADD);
    let entry = module.function_by_name("julia_vadd_1").unwrap();
    let job = CompilerJob::kernel()
        .with_max_threads(256)
        .with_max_registers(64);

    let kernel = DeviceCompiler::new(job)
        .optimize(&mut module, entry, &vadd_arg_types())
        .unwrap();

    verify_module(&module).unwrap();
    assert_eq!(module[kernel].name, "ptxcall_vadd_1");
    assert_eq!(
        module[kernel].params(),
        &[
            Type::ptr_in(Type::Float, AddressSpace(1)),
            Type::Float,
            Type::i64()
        ]
    );
    assert_eq!(module[kernel].linkage, Linkage::External);
    assert!(module.function_by_name("julia_vadd_1").is_none());
    assert!(remaining_intrinsic_calls(&module).is_empty());

    let insts = module.function_insts(kernel);
    assert!(insts.iter().all(|&i| {
        module[i].get_metadata(&MetadataKind::InvariantLoad).is_none()
            && module[i].get_metadata(&MetadataKind::Tbaa).is_none()
    }));

    let tags: Vec<(String, i64)> = kernel_annotations(&module)
        .into_iter()
        .map(|(f, tag, value)| {
            assert_eq!(f, kernel);
            (tag, value)
        })
        .collect();
    assert_eq!(
        tags,
        vec![
            ("kernel".to_string(), 1),
            ("maxntidx".to_string(), 256),
            ("maxntidy".to_string(), 1),
            ("maxntidz".to_string(), 1),
            ("maxnreg".to_string(), 64),
        ]
    );
}

#[test]
fn test_non_kernel_compilation_keeps_entry() {
    let mut module = parse(
        r#"
define i32 @julia_helper_2(i32 %0, i32 %1) {
bb0:
  %2 = mul i32 %0, 2
  ret i32 %2
}

define void @julia_main_1(i32 %0, i32* %1) {
bb0:
  %2 = call i32 @julia_helper_2(i32 %0, i32 7)
  store i32 %2, i32* %1
  ret void
}
"#,
    );
    let entry = module.function_by_name("julia_main_1").unwrap();

    let result = DeviceCompiler::new(CompilerJob::default())
        .optimize(&mut module, entry, &[])
        .unwrap();

    verify_module(&module).unwrap();
    assert_eq!(result, entry);
    assert_eq!(module[entry].linkage, Linkage::External);
    assert!(kernel_annotations(&module).is_empty());

    let helper = module.function_by_name("julia_helper_2").unwrap();
    assert_eq!(module[helper].linkage, Linkage::Internal);
    assert_eq!(module[helper].params(), &[Type::i32()]);
}

#[test]
fn test_live_thread_state_aborts_compilation() {
    let mut module = parse(
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
    let entry = module.function_by_name("julia_leak_1").unwrap();

    let err = DeviceCompiler::new(CompilerJob::default())
        .with_host_optimizer(NoopOptimizer)
        .optimize(&mut module, entry, &[])
        .unwrap_err();
    match err {
        CompileError::ThreadLocalStorage { function } => assert_eq!(function, "julia_leak_1"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_kernel_with_wrong_arity_is_rejected() {
    let mut module = parse(VADD);
    let entry = module.function_by_name("julia_vadd_1").unwrap();

    let err = DeviceCompiler::new(CompilerJob::kernel())
        .optimize(&mut module, entry, &[SourceType::bits("Float32")])
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::SignatureMismatch {
            expected: 1,
            actual: 3,
            ..
        }
    ));
}

#[test]
fn test_job_from_json_drives_annotations() {
    let job = CompilerJob::from_json(
        r#"{ "kernel": true, "min_threads": { "x": 32, "y": 4 }, "blocks_per_sm": 2 }"#,
    )
    .unwrap();
    let mut module = parse(VADD);
    let entry = module.function_by_name("julia_vadd_1").unwrap();

    let kernel = DeviceCompiler::new(job)
        .optimize(&mut module, entry, &vadd_arg_types())
        .unwrap();

    let tags: Vec<String> = kernel_annotations(&module)
        .into_iter()
        .filter(|(f, _, _)| *f == kernel)
        .map(|(_, tag, _)| tag)
        .collect();
    assert_eq!(
        tags,
        vec!["kernel", "reqntidx", "reqntidy", "reqntidz", "minctasm"]
    );
}
