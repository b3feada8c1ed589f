//! Engine configuration

use serde::{Deserialize, Serialize};

/// Tunables for a `Context`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seed for the tie-break RNG; equal seeds replay identical focus sequences
    pub seed: u64,
    /// Number of transition log entries kept
    pub max_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            max_history: 20,
        }
    }
}

impl EngineConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}
