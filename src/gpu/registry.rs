// gpu/registry.rs — Compiled program cache.
//
// Tasks ask the registry for a program by name instead of compiling their
// source themselves, so constructing a second task of the same kind costs
// no compilation. The build runs while the map lock is held: two threads
// registering the same name never both compile it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::error::Result;
use super::manager::{ResourceManager, PRIMARY_DEVICE};
use super::program::Program;

pub struct ProgramRegistry {
    manager: Arc<ResourceManager>,
    programs: Mutex<HashMap<String, Arc<Program>>>,
}

impl ProgramRegistry {
    pub fn new(manager: Arc<ResourceManager>) -> Self {
        ProgramRegistry {
            manager,
            programs: Mutex::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    /// The program registered as `name`, building it from `source` on first
    /// use. Failed builds are not cached.
    pub fn register_program(&self, name: &str, source: &str) -> Result<Arc<Program>> {
        let mut programs = self.programs.lock();
        if let Some(program) = programs.get(name) {
            debug!(program = name, "program cache hit");
            return Ok(Arc::clone(program));
        }
        let program = Arc::new(self.manager.build_program(name, source, PRIMARY_DEVICE)?);
        programs.insert(name.to_string(), Arc::clone(&program));
        Ok(program)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Program>> {
        self.programs.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.programs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuError, ManagerConfig};

    #[test]
    fn failed_builds_are_not_cached() {
        let manager = Arc::new(ResourceManager::new(&ManagerConfig {
            backends: wgpu::Backends::empty(),
            ..ManagerConfig::default()
        }));
        let registry = ProgramRegistry::new(manager);
        let result = registry.register_program("noop", "@compute @workgroup_size(1) fn main() {}");
        assert!(matches!(result, Err(GpuError::PlatformUnavailable(_))));
        assert!(registry.is_empty());
        assert!(registry.get("noop").is_none());
    }
}
