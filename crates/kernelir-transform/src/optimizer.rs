use crate::job::TargetDescriptor;
use crate::passes::{Adce, AlwaysInliner, EarlyCse, GlobalDce, InstCombine, Licm, SimplifyCfg};
use kernelir_core::PassManager;

/// The host compiler's generic optimization pipeline, seen from the device driver as a black
/// box that fills a pass manager.
///
/// Implementations must leave calls to the runtime intrinsics in place: they are lowered by the
/// passes that run afterwards.
pub trait HostOptimizer: Send + Sync {
    fn add_optimization_passes(
        &self,
        pm: &mut PassManager,
        target: &TargetDescriptor,
        opt_level: u8,
    );
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StandardOptimizer;

impl HostOptimizer for StandardOptimizer {
    fn add_optimization_passes(
        &self,
        pm: &mut PassManager,
        _target: &TargetDescriptor,
        opt_level: u8,
    ) {
        pm.register_pass(AlwaysInliner::new());
        pm.register_pass(GlobalDce::new());
        if opt_level >= 1 {
            pm.register_pass(SimplifyCfg::new());
            pm.register_pass(InstCombine::new());
            pm.register_pass(EarlyCse::new());
            pm.register_pass(Adce::new());
        }
        if opt_level >= 2 {
            pm.register_pass(Licm::new());
            pm.register_pass(InstCombine::new());
            pm.register_pass(SimplifyCfg::new());
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOptimizer;

impl HostOptimizer for NoopOptimizer {
    fn add_optimization_passes(&self, _: &mut PassManager, _: &TargetDescriptor, _: u8) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(level: u8) -> Vec<&'static str> {
        let mut pm = PassManager::new();
        StandardOptimizer.add_optimization_passes(&mut pm, &TargetDescriptor::default(), level);
        pm.pass_names()
    }

    #[test]
    fn test_pipeline_grows_with_level() {
        assert_eq!(names(0), vec!["always-inline", "globaldce"]);
        assert_eq!(names(1).len(), 6);
        assert_eq!(&names(2)[6..], &["licm", "instcombine", "simplifycfg"]);
    }
}
