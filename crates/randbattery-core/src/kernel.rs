//! The plugin contract every test family implements.
//!
//! A kernel is built once from a validated parameter bag, declares the
//! buffer size and configuration count it needs, computes one p-value per
//! (configuration, bitstream) pair, and may add configuration-level metrics
//! at finalize. Kernels never touch the report directly while executing:
//! [`Kernel::execute`] runs on worker threads and returns a [`TestOutcome`]
//! that the dispatcher writes during its sequential collection phase.

use crate::error::{HarnessError, KernelError};
use crate::params::{ParameterSpec, Parameters};
use crate::report::{Calculation, CalculationSet, Configuration, Criterion, Numeric};
use crate::source::BitBuffer;
use crate::state::ConfigurationState;

/// Static metadata about a test family.
#[derive(Debug, Clone, Copy)]
pub struct KernelInfo {
    /// Unique identifier (e.g. `"block_frequency"`).
    pub name: &'static str,
    /// One-line human-readable description.
    pub description: &'static str,
    /// Parameters accepted by the family's builder.
    pub parameters: &'static [ParameterSpec],
}

/// What one kernel invocation produced for one (configuration, bitstream).
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub p_value: f64,
    pub calculations: Vec<Calculation>,
    pub calculation_sets: Vec<CalculationSet>,
    /// Kernel-specific checks, in addition to the p-value criteria the
    /// engine attaches to every test.
    pub criteria: Vec<Criterion>,
}

impl TestOutcome {
    pub fn new(p_value: f64) -> Self {
        Self {
            p_value,
            calculations: Vec::new(),
            calculation_sets: Vec::new(),
            criteria: Vec::new(),
        }
    }

    /// Append a real-valued calculation at `precision` digits.
    pub fn real(mut self, name: &str, value: f64, precision: usize) -> Self {
        self.calculations.push(Calculation {
            name: name.to_string(),
            value: Numeric::real(value, precision),
        });
        self
    }

    /// Append an integer calculation.
    pub fn count(mut self, name: &str, value: u64) -> Self {
        self.calculations.push(Calculation {
            name: name.to_string(),
            value: Numeric::count(value),
        });
        self
    }

    pub fn counts(mut self, name: &str, values: &[u64]) -> Self {
        self.calculation_sets.push(CalculationSet {
            name: name.to_string(),
            values: values.iter().map(|&v| Numeric::count(v)).collect(),
        });
        self
    }

    pub fn criterion(mut self, name: &str, passed: bool, basis: String) -> Self {
        self.criteria.push(Criterion {
            name: name.to_string(),
            passed,
            basis,
        });
        self
    }
}

/// Trait that every test family must implement.
pub trait Kernel: Send + Sync {
    /// Family metadata.
    fn info(&self) -> &KernelInfo;

    /// Bytes per bitstream. Fixed for the lifetime of the kernel.
    fn buffer_size(&self) -> usize;

    /// Number of independent configurations evaluated per bitstream.
    fn configuration_count(&self) -> usize {
        1
    }

    /// Resolved parameters as `(name, formatted value)` for the report.
    fn parameters(&self) -> Vec<(String, String)>;

    /// Attach descriptive attributes before execution starts.
    fn describe_configuration(&self, _id: usize, _configuration: &mut Configuration) {}

    /// Compute the statistic and p-value for one bitstream.
    fn execute(&self, configuration: usize, buffer: &BitBuffer) -> Result<TestOutcome, KernelError>;

    /// Add family-specific configuration metrics at finalize.
    fn finalize_configuration(
        &self,
        _id: usize,
        _state: &ConfigurationState,
        _configuration: &mut Configuration,
    ) {
    }

    /// Convenience: name from info.
    fn name(&self) -> &'static str {
        self.info().name
    }
}

/// Validates a parameter bag and builds a kernel.
pub type KernelBuilder = fn(&Parameters) -> Result<Box<dyn Kernel>, HarnessError>;

/// Registry entry: metadata plus the builder that performs `Init`.
#[derive(Clone, Copy)]
pub struct KernelEntry {
    pub info: KernelInfo,
    pub build: KernelBuilder,
}

impl KernelEntry {
    pub fn build(&self, params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
        (self.build)(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_builder_keeps_order() {
        let outcome = TestOutcome::new(0.5)
            .count("n", 100)
            .real("s_obs", 0.2, 6)
            .counts("blocks", &[1, 2, 3])
            .criterion("pre-test", true, "ok".to_string());
        assert_eq!(outcome.calculations[0].name, "n");
        assert_eq!(outcome.calculations[1].value.value, "0.200000");
        assert_eq!(outcome.calculation_sets[0].values.len(), 3);
        assert!(outcome.criteria[0].passed);
    }
}
