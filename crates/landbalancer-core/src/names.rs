//! Collision-free parameter names.

use std::collections::HashMap;

/// Generates `"<prefix>_<k>"` names with a monotonically increasing counter
/// per prefix. Names are never reused within a generator's lifetime; each
/// activity-processing round owns its own generator, so uniqueness within the
/// round is all that is required.
#[derive(Debug, Default)]
pub struct ParameterNameGenerator {
    counters: HashMap<String, u64>,
}

impl ParameterNameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unique name for `prefix`. Counters start at zero, lazily.
    pub fn next(&mut self, prefix: &str) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        let name = format!("{prefix}_{counter}");
        *counter += 1;
        name
    }
}
