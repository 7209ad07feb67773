use std::collections::HashMap;

use crate::config::EngineConfig;

/// Failure categories with their own retry allowance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryCategory {
    /// HTTP 401/403: token refresh or credential prompt
    PasswordPrompt,
    /// DNS, TLS, connect failures and timeouts
    NetworkError,
}

/// Per-request retry counters.
///
/// A category starts with its seeded allowance the first time it fails, or 1
/// when it was not seeded.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    seeds: HashMap<RetryCategory, u32>,
    remaining: HashMap<RetryCategory, u32>,
}

impl RetryBudget {
    pub fn new() -> Self {
        Self {
            seeds: HashMap::new(),
            remaining: HashMap::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new()
            .seed(RetryCategory::PasswordPrompt, config.password_prompt_budget)
            .seed(RetryCategory::NetworkError, config.network_error_budget)
    }

    pub fn seed(mut self, category: RetryCategory, retries: u32) -> Self {
        self.seeds.insert(category, retries);
        self
    }

    /// Take one retry; `false` when the category is exhausted
    pub fn consume(&mut self, category: RetryCategory) -> bool {
        let seed = self.seeds.get(&category).copied().unwrap_or(1);
        let remaining = self.remaining.entry(category).or_insert(seed);
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }

    pub fn remaining(&self, category: RetryCategory) -> u32 {
        self.remaining
            .get(&category)
            .or_else(|| self.seeds.get(&category))
            .copied()
            .unwrap_or(1)
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new()
    }
}
