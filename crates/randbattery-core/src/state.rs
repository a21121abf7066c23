//! Per-configuration running state that survives the whole run.
//!
//! Updated exactly once per completed test, and only from the sequential
//! collection phase of the dispatcher.

/// Running counters for one configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationState {
    pub accumulated_ones: u64,
    pub accumulated_zeros: u64,
    pub tests_run: u64,
    pub tests_passed: u64,
    pub tests_failed: u64,
    /// Kernel failures; not part of `tests_run`.
    pub tests_errored: u64,
    /// In-range p-values in collection order, for the uniformity criterion.
    pub p_values: Vec<f64>,
}

impl ConfigurationState {
    /// Count a test that ran to completion. `p_value` is kept for the
    /// uniformity sample only when it lies in `[0, 1]`.
    pub fn record_pass_fail(&mut self, passed: bool, p_value: Option<f64>) {
        self.tests_run += 1;
        if passed {
            self.tests_passed += 1;
        } else {
            self.tests_failed += 1;
        }
        if let Some(p) = p_value.filter(|p| (0.0..=1.0).contains(p)) {
            self.p_values.push(p);
        }
    }

    pub fn record_bits(&mut self, ones: u64, zeros: u64) {
        self.accumulated_ones += ones;
        self.accumulated_zeros += zeros;
    }

    pub fn record_error(&mut self) {
        self.tests_errored += 1;
    }
}

/// Dense, zero-based table of [`ConfigurationState`], one per configuration.
#[derive(Debug, Clone)]
pub struct Aggregator {
    states: Vec<ConfigurationState>,
}

impl Aggregator {
    pub fn new(configuration_count: usize) -> Self {
        Self {
            states: vec![ConfigurationState::default(); configuration_count],
        }
    }

    pub fn get(&self, id: usize) -> Option<&ConfigurationState> {
        self.states.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut ConfigurationState> {
        self.states.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigurationState> {
        self.states.iter()
    }

    /// Tests that ran to completion across every configuration.
    pub fn total_run(&self) -> u64 {
        self.states.iter().map(|s| s.tests_run).sum()
    }
}
