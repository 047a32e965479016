/*! Device lowering and optimization for kernelir modules.
 *
 * A host front end produces IR that assumes a managed runtime: GC frames, heap allocation with
 * object headers, thread-local state and a flexible calling convention. This crate rewrites such a
 * module for a GPU-like device that offers none of these:
 *
 * - [`lowering`] rewrites or deletes the runtime intrinsics;
 * - [`wrapper`] and [`promotion`] adapt the entry point to the kernel ABI and attach launch bounds;
 * - [`fixup`] drops load annotations that stop holding once arguments are spilled;
 * - [`passes`] holds the generic cleanup the pipeline interleaves with lowering;
 * - [`driver`] runs everything in the required order.
 *
 * ```no_run
 * use kernelir_transform::{CompilerJob, DeviceCompiler, SourceType};
 * # fn demo(module: &mut kernelir_core::Module, entry: kernelir_core::FuncId) {
 * let job = CompilerJob::kernel().with_max_threads(256);
 * let kernel = DeviceCompiler::new(job)
 *     .optimize(module, entry, &[SourceType::pointer("Ptr{Float32}")])
 *     .unwrap();
 * # }
 * ```
 */

pub mod driver;
pub mod error;
pub mod fixup;
pub mod intrinsics;
pub mod job;
pub mod lowering;
pub mod optimizer;
pub mod passes;
pub mod promotion;
pub mod wrapper;

pub use driver::DeviceCompiler;
pub use error::{CompileError, CompileResult};
pub use fixup::strip_invariant_metadata;
pub use intrinsics::{remaining_intrinsic_calls, Intrinsic};
pub use job::{CompilerJob, DeviceRuntime, Dim3, TargetDescriptor};
pub use lowering::{LowerGcFrame, LowerPtls};
pub use optimizer::{HostOptimizer, NoopOptimizer, StandardOptimizer};
pub use promotion::{kernel_annotation, kernel_annotations, promote_kernel, KERNEL_ANNOTATIONS};
pub use wrapper::{wrap_entry, wrapper_name, SourceKind, SourceType};
