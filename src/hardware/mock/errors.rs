//! Error injection for mock devices.
//!
//! An [`ErrorConfig`] is consulted at the start of every mock operation. It
//! can fail an operation after a number of successes, fail it always, fail
//! at random, or make it stall so timeouts can be exercised.

use crate::error::{AppResult, ScanError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration for mock devices
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0), "*" matches every operation
    failure_rates: Arc<HashMap<&'static str, f64>>,
    /// Specific failure scenarios
    scenarios: Arc<Vec<ErrorScenario>>,
    /// RNG for failure decisions
    rng: Arc<Mutex<StdRng>>,
    /// Operation counters for FailAfterN scenarios
    counts: Arc<Mutex<HashMap<&'static str, u32>>>,
}

/// Scripted failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorScenario {
    /// Fail every call after `count` successful calls
    FailAfterN {
        /// Operation name
        operation: &'static str,
        /// Successful calls before failures start
        count: u32,
    },
    /// Fail every call
    FailAlways {
        /// Operation name
        operation: &'static str,
    },
    /// Never complete the operation
    Stall {
        /// Operation name
        operation: &'static str,
    },
}

impl ErrorConfig {
    /// Create error config with no errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Create error config with a single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Create error config with multiple scenarios
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Create error config failing every operation with probability `rate`.
    /// A seed makes the failure sequence reproducible.
    pub fn random_failures(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    fn build(
        failure_rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            failure_rates: Arc::new(failure_rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(Mutex::new(rng)),
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check if an operation should fail.
    ///
    /// `to_error` builds the error variant of the calling device, e.g.
    /// `ScanError::Motion`.
    pub fn check_operation(
        &self,
        operation: &'static str,
        to_error: fn(String) -> ScanError,
    ) -> AppResult<()> {
        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let mut counts = self.counts.lock();
                    let current = counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(to_error(format!(
                            "Injected failure on '{operation}' after {count} operations"
                        )));
                    }
                }
                ErrorScenario::FailAlways { operation: op } if *op == operation => {
                    return Err(to_error(format!("Injected failure on '{operation}'")));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if rate > 0.0 && self.rng.lock().gen_bool(rate.clamp(0.0, 1.0)) {
            return Err(to_error(format!("Random failure on operation '{operation}'")));
        }

        Ok(())
    }

    /// Whether `operation` is scripted to never complete.
    pub fn is_stalled(&self, operation: &'static str) -> bool {
        self.scenarios
            .iter()
            .any(|s| matches!(s, ErrorScenario::Stall { operation: op } if *op == operation))
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
