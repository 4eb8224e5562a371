//! In-process routine contract and the startup registration table.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::RoutineError;

/// A processing routine invoked directly inside the service process.
///
/// Both methods are synchronous and are called from a blocking thread.
pub trait ProcessingRoutine: Send + Sync {
    /// Load whatever the routine needs before it can run.
    fn prepare(&self) -> Result<(), RoutineError> {
        Ok(())
    }

    /// Process `inputs` and write artifacts into `output_dir`.
    ///
    /// `Ok(0)` is success; any other value is the job's exit code.
    fn run(
        &self,
        inputs: &[PathBuf],
        output_dir: &Path,
        options: &Map<String, Value>,
    ) -> Result<i32, RoutineError>;
}

/// Routines keyed by their `module:function` identifier.
#[derive(Clone, Default)]
pub struct RoutineRegistry {
    routines: HashMap<String, Arc<dyn ProcessingRoutine>>,
}

impl fmt::Debug for RoutineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutineRegistry")
            .field("routines", &self.ids())
            .finish()
    }
}

impl RoutineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a routine, returning the one it replaced.
    pub fn register<R>(&mut self, id: impl Into<String>, routine: R) -> Option<Arc<dyn ProcessingRoutine>>
    where
        R: ProcessingRoutine + 'static,
    {
        self.routines.insert(id.into(), Arc::new(routine))
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ProcessingRoutine>> {
        self.routines.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.routines.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.routines.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(i32);

    impl ProcessingRoutine for Constant {
        fn run(&self, _: &[PathBuf], _: &Path, _: &Map<String, Value>) -> Result<i32, RoutineError> {
            Ok(self.0)
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = RoutineRegistry::new();
        assert!(registry.register("demo:zero", Constant(0)).is_none());
        assert!(registry.register("demo:two", Constant(2)).is_none());
        assert!(registry.register("demo:two", Constant(3)).is_some());

        assert_eq!(registry.ids(), vec!["demo:two", "demo:zero"]);
        let routine = registry.get("demo:two").expect("registered");
        assert_eq!(routine.run(&[], Path::new("."), &Map::new()).unwrap(), 3);
        assert!(registry.get("demo:missing").is_none());
    }
}
