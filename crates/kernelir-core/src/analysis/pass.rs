use crate::module::Module;
use anyhow::Result;
use std::time::{Duration, Instant};

/// A module transformation. `run_on_module` reports whether it changed anything.
pub trait Pass: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        "No description provided"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool>;

    fn as_any(&self) -> &dyn std::any::Any;
}

#[derive(Debug, Clone)]
pub struct PassStatistics {
    pub name: String,
    pub duration: Duration,
    pub changed: bool,
}

/// Runs registered passes in order, stopping at the first error.
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    statistics: Vec<PassStatistics>,
    collect_stats: bool,
}

impl PassManager {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            statistics: Vec::new(),
            collect_stats: false,
        }
    }

    pub fn enable_statistics(&mut self) {
        self.collect_stats = true;
    }

    pub fn register_pass<P: Pass + 'static>(&mut self, pass: P) {
        self.passes.push(Box::new(pass));
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run_all(&mut self, module: &mut Module) -> Result<bool> {
        let mut changed = false;

        for pass in &mut self.passes {
            let start = self.collect_stats.then(Instant::now);

            let pass_changed = pass.run_on_module(module)?;
            changed |= pass_changed;

            if let Some(start) = start {
                self.statistics.push(PassStatistics {
                    name: pass.name().to_string(),
                    duration: start.elapsed(),
                    changed: pass_changed,
                });
            }
        }

        Ok(changed)
    }

    pub fn statistics(&self) -> &[PassStatistics] {
        &self.statistics
    }

    pub fn get_pass<P: Pass + 'static>(&self) -> Option<&P> {
        self.passes
            .iter()
            .find_map(|p| p.as_any().downcast_ref::<P>())
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}
