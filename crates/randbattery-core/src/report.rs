//! Hierarchical report: Report → Configurations → Tests.
//!
//! Every numeric value is stored as formatted text together with the
//! precision it was formatted at, and every boolean criterion carries a
//! human-readable basis describing what was compared. Configuration and test
//! ids are dense, zero-based and assigned by the caller.
//!
//! The model does no range validation of its own. Callers that need a value
//! checked (e.g. a p-value in `[0, 1]`) attach an explicit criterion.

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, KernelError};

/// A number rendered at a declared precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Numeric {
    pub value: String,
    pub precision: usize,
}

impl Numeric {
    /// Format a real value with `precision` fractional digits.
    pub fn real(value: f64, precision: usize) -> Self {
        Self {
            value: format!("{value:.precision$}"),
            precision,
        }
    }

    /// Format an integer count (precision 0).
    pub fn count(value: u64) -> Self {
        Self {
            value: value.to_string(),
            precision: 0,
        }
    }

    /// Parse the stored text back into a float.
    pub fn as_f64(&self) -> Option<f64> {
        self.value.parse().ok()
    }
}

/// Pass/fail verdict of a test, configuration or report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Evaluation {
    Pass,
    Fail,
}

impl Evaluation {
    pub fn from_passed(passed: bool) -> Self {
        if passed { Self::Pass } else { Self::Fail }
    }

    pub fn is_pass(self) -> bool {
        self == Self::Pass
    }
}

impl std::fmt::Display for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// Free-form descriptive attribute, e.g. the template a configuration tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// A single named value computed by a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calculation {
    pub name: String,
    pub value: Numeric,
}

/// An ordered, named list of values (e.g. per-block counts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationSet {
    pub name: String,
    pub values: Vec<Numeric>,
}

/// A named boolean check with the comparison it was based on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    pub passed: bool,
    pub basis: String,
}

/// One bitstream evaluated under one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    /// Bitstream sequence index.
    pub id: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calculations: Vec<Calculation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calculation_sets: Vec<CalculationSet>,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    /// Set when the kernel failed to run rather than failing its statistic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<KernelError>,
}

impl Test {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            calculations: Vec::new(),
            calculation_sets: Vec::new(),
            criteria: Vec::new(),
            evaluation: None,
            error: None,
        }
    }

    pub fn add_calculation(&mut self, name: impl Into<String>, value: Numeric) {
        self.calculations.push(Calculation {
            name: name.into(),
            value,
        });
    }

    pub fn add_calculation_set(&mut self, name: impl Into<String>, values: Vec<Numeric>) {
        self.calculation_sets.push(CalculationSet {
            name: name.into(),
            values,
        });
    }

    pub fn add_criterion(
        &mut self,
        name: impl Into<String>,
        passed: bool,
        basis: impl Into<String>,
    ) {
        self.criteria.push(Criterion {
            name: name.into(),
            passed,
            basis: basis.into(),
        });
    }

    /// Evaluate as the AND of every criterion attached so far.
    pub fn add_evaluation(&mut self) -> Evaluation {
        let evaluation = Evaluation::from_passed(self.criteria.iter().all(|c| c.passed));
        self.evaluation = Some(evaluation);
        evaluation
    }

    pub fn calculation(&self, name: &str) -> Option<&Numeric> {
        self.calculations
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.value)
    }
}

/// A configuration-level scalar written at finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: Numeric,
}

/// A configuration-level vector written at finalize (e.g. p-value histogram).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSet {
    pub name: String,
    pub values: Vec<Numeric>,
}

/// One parameterization of a test family, evaluated over every bitstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub id: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub tests: Vec<Test>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Metric>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metric_sets: Vec<MetricSet>,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
}

impl Configuration {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            attributes: Vec::new(),
            tests: Vec::new(),
            metrics: Vec::new(),
            metric_sets: Vec::new(),
            criteria: Vec::new(),
            evaluation: None,
        }
    }

    /// Add an attribute unless one with the same name already exists.
    /// Returns whether the attribute was added.
    pub fn add_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if self.attributes.iter().any(|a| a.name == name) {
            return false;
        }
        self.attributes.push(Attribute {
            name,
            value: value.into(),
        });
        true
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Append a test for bitstream `id` and return it for population.
    pub fn add_test(&mut self, id: usize) -> &mut Test {
        self.tests.push(Test::new(id));
        let last = self.tests.len() - 1;
        &mut self.tests[last]
    }

    pub fn test(&self, id: usize) -> Option<&Test> {
        self.tests.iter().find(|t| t.id == id)
    }

    pub fn add_metric(&mut self, name: impl Into<String>, value: Numeric) {
        self.metrics.push(Metric {
            name: name.into(),
            value,
        });
    }

    pub fn add_metric_set(&mut self, name: impl Into<String>, values: Vec<Numeric>) {
        self.metric_sets.push(MetricSet {
            name: name.into(),
            values,
        });
    }

    pub fn metric(&self, name: &str) -> Option<&Numeric> {
        self.metrics.iter().find(|m| m.name == name).map(|m| &m.value)
    }

    pub fn add_criterion(
        &mut self,
        name: impl Into<String>,
        passed: bool,
        basis: impl Into<String>,
    ) {
        self.criteria.push(Criterion {
            name: name.into(),
            passed,
            basis: basis.into(),
        });
    }

    pub fn criterion(&self, name: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.name == name)
    }

    /// Evaluate as the AND of every configuration-level criterion attached so far.
    pub fn add_evaluation(&mut self) -> Evaluation {
        let evaluation = Evaluation::from_passed(self.criteria.iter().all(|c| c.passed));
        self.evaluation = Some(evaluation);
        evaluation
    }
}

/// Root of a run's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: String,
    pub version: String,
    pub test_name: String,
    /// Where the bitstreams came from.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub parameters: Vec<Attribute>,
    pub significance_level: Numeric,
    pub bitstreams_requested: u64,
    pub bitstreams_tested: u64,
    #[serde(default)]
    pub cancelled: bool,
    pub configurations: Vec<Configuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
}

impl Report {
    /// Create a report with `configuration_count` empty configurations.
    pub fn new(
        test_name: impl Into<String>,
        configuration_count: usize,
        significance_level: Numeric,
        bitstreams_requested: u64,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            version: crate::VERSION.to_string(),
            test_name: test_name.into(),
            source: String::new(),
            parameters: Vec::new(),
            significance_level,
            bitstreams_requested,
            bitstreams_tested: 0,
            cancelled: false,
            configurations: (0..configuration_count).map(Configuration::new).collect(),
            evaluation: None,
        }
    }

    pub fn configuration(&self, id: usize) -> Result<&Configuration, HarnessError> {
        self.configurations
            .get(id)
            .ok_or_else(|| self.out_of_range(id))
    }

    pub fn configuration_mut(&mut self, id: usize) -> Result<&mut Configuration, HarnessError> {
        let count = self.configurations.len();
        self.configurations.get_mut(id).ok_or_else(|| {
            HarnessError::Report(format!(
                "configuration {id} out of range (report holds {count})"
            ))
        })
    }

    /// Existence-checked attribute insert on configuration `id`.
    pub fn add_attribute(
        &mut self,
        id: usize,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<bool, HarnessError> {
        Ok(self.configuration_mut(id)?.add_attribute(name, value))
    }

    /// Record a resolved run parameter, keeping the first value for a name.
    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if self.parameters.iter().any(|p| p.name == name) {
            return;
        }
        self.parameters.push(Attribute {
            name,
            value: value.into(),
        });
    }

    /// Pass iff every configuration evaluated to Pass. A configuration that
    /// was never evaluated counts as Fail.
    pub fn add_evaluation(&mut self) -> Evaluation {
        let passed = !self.configurations.is_empty()
            && self
                .configurations
                .iter()
                .all(|c| c.evaluation == Some(Evaluation::Pass));
        let evaluation = Evaluation::from_passed(passed);
        self.evaluation = Some(evaluation);
        evaluation
    }

    /// Total tests recorded across all configurations.
    pub fn test_count(&self) -> usize {
        self.configurations.iter().map(|c| c.tests.len()).sum()
    }

    fn out_of_range(&self, id: usize) -> HarnessError {
        HarnessError::Report(format!(
            "configuration {id} out of range (report holds {})",
            self.configurations.len()
        ))
    }
}
