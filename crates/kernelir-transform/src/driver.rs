/*! The device optimization driver.
 *
 * Turns a front-end module into device-ready IR in three stages:
 *
 * 1. kernel promotion, when the job asks for a kernel, so every later pass sees the wrapper's
 *    device-ABI signature;
 * 2. one pass batch: internalize everything but the entry, the host's generic pipeline, then the
 *    device lowering interleaved with cleanup;
 * 3. a separate batch holding only dead argument elimination.
 *
 * The order inside the second batch matters. Frame lowering must come before dead code
 * elimination so the dead frame arithmetic it leaves gets collected, and thread-local-state
 * lowering must come after both so it can prove the getter results unused. Dead argument
 * elimination stays in its own batch: run inside the main one it would see allocator and
 * annotation values before lowering has settled them.
 */

use crate::error::{CompileError, CompileResult};
use crate::job::CompilerJob;
use crate::lowering::{LowerGcFrame, LowerPtls};
use crate::optimizer::{HostOptimizer, StandardOptimizer};
use crate::passes::{
    Adce, ConstMerge, DeadArgElim, Dse, EarlyCse, InstCombine, Internalize, Licm, LoopUnroll,
    SimplifyCfg,
};
use crate::promotion::promote_kernel;
use crate::wrapper::SourceType;
use kernelir_core::{FuncId, Module, PassManager};
use tracing::{debug, info};

/// Compiles one entry point of a module for the device described by a [`CompilerJob`].
///
/// The compiler holds no state between calls; independent modules can be compiled concurrently
/// with separate instances, or with one shared instance.
pub struct DeviceCompiler {
    job: CompilerJob,
    host: Box<dyn HostOptimizer>,
}

impl DeviceCompiler {
    pub fn new(job: CompilerJob) -> Self {
        Self {
            job,
            host: Box::new(StandardOptimizer),
        }
    }

    pub fn with_host_optimizer(mut self, host: impl HostOptimizer + 'static) -> Self {
        self.host = Box::new(host);
        self
    }

    pub fn job(&self) -> &CompilerJob {
        &self.job
    }

    /// Lowers and optimizes `module` in place and returns the function to hand to code
    /// generation: the kernel wrapper for kernel jobs, `entry` otherwise.
    ///
    /// Any error is fatal for the whole compilation; the module is then in an unspecified state.
    pub fn optimize(
        &self,
        module: &mut Module,
        entry: FuncId,
        arg_types: &[SourceType],
    ) -> CompileResult<FuncId> {
        let entry = if self.job.kernel {
            promote_kernel(module, entry, arg_types, &self.job)?
        } else {
            entry
        };
        let entry_name = module
            .function(entry)
            .map(|f| f.name.clone())
            .ok_or_else(|| CompileError::InvalidEntry {
                function: entry.to_string(),
                reason: "no such function".to_string(),
            })?;

        info!(
            entry = %entry_name,
            kernel = self.job.kernel,
            opt_level = self.job.opt_level,
            "optimizing module"
        );
        let mut pm = self.main_pipeline(&entry_name);
        run_batch(&mut pm, module, "main")?;

        let mut pm = self.final_pipeline();
        run_batch(&mut pm, module, "final")?;

        info!(entry = %entry_name, functions = module.functions().count(), "module optimized");
        Ok(entry)
    }

    pub fn main_pipeline(&self, entry_name: &str) -> PassManager {
        let mut pm = PassManager::new();
        pm.register_pass(Internalize::new([entry_name]));
        self.host
            .add_optimization_passes(&mut pm, &self.job.target, self.job.opt_level);

        pm.register_pass(LowerGcFrame::new(self.job.runtime.clone()));
        pm.register_pass(Adce::new());
        pm.register_pass(LowerPtls::new());
        pm.register_pass(LoopUnroll::new());
        pm.register_pass(InstCombine::new());
        pm.register_pass(Licm::new());
        pm.register_pass(EarlyCse::new());
        pm.register_pass(Dse::new());
        pm.register_pass(ConstMerge::new());
        pm.register_pass(SimplifyCfg::new());
        pm
    }

    pub fn final_pipeline(&self) -> PassManager {
        let mut pm = PassManager::new();
        pm.register_pass(DeadArgElim::new());
        pm
    }
}

fn run_batch(pm: &mut PassManager, module: &mut Module, batch: &str) -> CompileResult<()> {
    pm.enable_statistics();
    let changed = pm.run_all(module).map_err(CompileError::from)?;
    for stat in pm.statistics() {
        debug!(
            batch,
            pass = %stat.name,
            changed = stat.changed,
            elapsed_us = stat.duration.as_micros() as u64,
            "pass finished"
        );
    }
    debug!(batch, changed, "batch finished");
    Ok(())
}
