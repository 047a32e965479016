/*! Control flow analyses and the pass pipeline.
 *
 * Transformations that move or delete code need to know which blocks can reach which, which
 * definitions dominate which uses, and where loops are. These analyses are recomputed on demand from
 * the module; nothing caches them across passes.
 */

pub mod cfg;
pub mod dominator;
pub mod loops;
pub mod pass;

pub use cfg::ControlFlowGraph;
pub use dominator::DominatorTree;
pub use loops::{Loop, LoopInfo};
pub use pass::{Pass, PassManager, PassStatistics};
