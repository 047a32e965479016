use kernelir_core::{verify_module, MetadataKind, Type, Value};
use kernelir_emit::print_module;
use kernelir_parser::{parse_module, ParseError};
use pretty_assertions::assert_eq;

fn assert_round_trip(input: &str) {
    let module = parse_module(input).unwrap_or_else(|e| panic!("failed to parse: {}", e));
    verify_module(&module).unwrap();
    let printed = print_module(&module);
    assert_eq!(printed.trim(), input.trim());

    let reparsed = parse_module(&printed).unwrap();
    assert_eq!(print_module(&reparsed), printed);
}

#[test]
fn test_round_trip_gc_lowering_input() {
    assert_round_trip(
        r#"
declare %jl_value_t addrspace(10)* @julia.gc_alloc_bytes(i8*, i64)

declare %jl_value_t addrspace(10)** @julia.new_gc_frame(i32)

declare void @julia.push_gc_frame(%jl_value_t addrspace(10)**, i32)

declare %jl_value_t addrspace(10)** @julia.get_gc_frame_slot(%jl_value_t addrspace(10)**, i32)

declare void @julia.pop_gc_frame(%jl_value_t addrspace(10)**)

define void @julia_kernel_1(i8* %0, double addrspace(1)* noalias %1) {
bb0:
  %2 = call %jl_value_t addrspace(10)** @julia.new_gc_frame(i32 2)
  call void @julia.push_gc_frame(%jl_value_t addrspace(10)** %2, i32 2)
  %3 = call %jl_value_t addrspace(10)** @julia.get_gc_frame_slot(%jl_value_t addrspace(10)** %2, i32 1)
  %4 = call %jl_value_t addrspace(10)* @julia.gc_alloc_bytes(i8* %0, i64 16)
  store %jl_value_t addrspace(10)* %4, %jl_value_t addrspace(10)** %3, !tbaa !{!"jtbaa_gcframe", i64 0}
  %5 = load double, double addrspace(1)* %1, !invariant.load !{}
  call void @julia.pop_gc_frame(%jl_value_t addrspace(10)** %2)
  ret void
}
"#,
    );
}

#[test]
fn test_round_trip_control_flow() {
    assert_round_trip(
        r#"
@table = internal constant [3 x i32] [i32 1, i32 -2, i32 3]

define internal i32 @select_sum(i1 %0, i32 %1) alwaysinline nounwind {
bb0:
  br i1 %0, label %bb1, label %bb2
bb1:
  %2 = getelementptr [3 x i32], [3 x i32]* @table, i64 0, i64 1
  %3 = load i32, i32* %2
  br label %bb2
bb2:
  %4 = phi i32 [ %3, %bb1 ], [ %1, %bb0 ]
  %5 = icmp sgt i32 %4, 0
  %6 = select i1 %5, i32 %4, i32 0
  %7 = sitofp i32 %6 to double
  %8 = fmul double %7, 0.5
  %9 = fptosi double %8 to i32
  ret i32 %9
}
"#,
    );
}

#[test]
fn test_round_trip_named_metadata() {
    assert_round_trip(
        r#"
declare void @"ptxcall_weird name"(i32 dereferenceable(8) align 4)

!nvvm.annotations = !{!{@"ptxcall_weird name", !"kernel", i32 1}, !{@"ptxcall_weird name", !"maxntidx", i32 256}}
"#,
    );
}

#[test]
fn test_parsed_metadata_attachments() {
    let module = parse_module(
        r#"
define double @f(double addrspace(1)* %0) {
bb0:
  %1 = load double, double addrspace(1)* %0, !tbaa !{!"jtbaa_data"}, !invariant.load !{}
  ret double %1
}
"#,
    )
    .unwrap();
    let f = module.function_by_name("f").unwrap();
    let load = module.function_insts(f)[0];
    assert_eq!(module[load].metadata.len(), 2);
    assert!(module[load]
        .get_metadata(&MetadataKind::InvariantLoad)
        .is_some());
    assert_eq!(module[load].ty, Type::Double);
    assert_eq!(module.users(&Value::Inst(load)).len(), 1);
}

#[test]
fn test_duplicate_local_is_rejected() {
    let err = parse_module(
        r#"
define i32 @f(i32 %0) {
bb0:
  %1 = add i32 %0, 1
  %1 = add i32 %0, 2
  ret i32 %1
}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ParseError::Redefinition { .. }));
}

#[test]
fn test_undefined_label_is_rejected() {
    let err = parse_module(
        r#"
define void @f() {
bb0:
  br label %nowhere
}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ParseError::UndefinedBlock { .. }));
}
