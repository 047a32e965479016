/*! Device lowering of runtime intrinsics.
 *
 * The front end emits calls into a managed runtime: GC frames, object allocation and
 * thread-local state. The device has none of these, so every call is either rewritten into plain
 * IR or deleted. Frame lowering must run before thread-local-state lowering, which relies on
 * frame bookkeeping having released its uses of the thread state.
 */

pub mod gc_frame;
pub mod ptls;

pub use gc_frame::LowerGcFrame;
pub use ptls::LowerPtls;

use kernelir_core::{InstId, Module};

pub(crate) fn parent_name(module: &Module, inst: InstId) -> String {
    module[inst]
        .function()
        .and_then(|f| module.function(f))
        .map(|f| f.name.clone())
        .unwrap_or_default()
}
