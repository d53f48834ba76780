//! ProcessGroup
//! Mapping from program name to the group it belongs to

use std::collections::BTreeMap;

/// Program → group mapping. A program that appears in no `[group:x]` section
/// belongs to the group named after itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessGroup {
    by_program: BTreeMap<String, String>,
}

impl ProcessGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, group: &str, program: &str) {
        self.by_program
            .insert(program.to_string(), group.to_string());
    }

    pub fn remove(&mut self, program: &str) {
        self.by_program.remove(program);
    }

    /// Group of `program`, or `default` when it is not in any declared group.
    pub fn group_of(&self, program: &str, default: &str) -> String {
        self.by_program
            .get(program)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// All programs declared under `group`.
    pub fn programs_in(&self, group: &str) -> Vec<String> {
        self.by_program
            .iter()
            .filter(|(_, g)| g.as_str() == group)
            .map(|(p, _)| p.clone())
            .collect()
    }
}
