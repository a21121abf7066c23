//! Statistical acceptance criteria applied once a configuration has seen
//! every bitstream.
//!
//! All functions here are pure and deterministic. They run only at
//! finalize, after the per-configuration counters have their final values.

use log::debug;
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

use crate::error::HarnessError;
use crate::report::{Configuration, Numeric};
use crate::state::ConfigurationState;

/// Number of equal sub-intervals of `[0, 1]` used to bin p-values.
pub const UNIFORMITY_BINS: usize = 10;
/// P-valueT below which the p-value distribution is declared non-uniform.
pub const UNIFORMITY_THRESHOLD: f64 = 0.0001;
/// Half-width of the proportion band, in standard deviations.
pub const PROPORTION_SIGMAS: f64 = 3.0;
/// Display precision for p-values, proportions and derived rates.
pub const PROBABILITY_PRECISION: usize = 6;

// ═══════════════════════════════════════════════════════════════════════════════
// Significance parameters
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum useful sample count and expected pass/fail counts under H0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinimumTestCount {
    pub minimum_required: u64,
    pub predicted_passed: u64,
    pub predicted_failed: u64,
}

/// Largest display precision accepted for the significance level.
pub const MAX_SIGNIFICANCE_PRECISION: usize = 12;

/// Significance level and bitstream count for a run. Immutable once built.
///
/// The display precision is raised until the formatted level reads back as
/// the level itself, so report text always shows the α actually compared.
#[derive(Debug, Clone, PartialEq)]
pub struct SignificanceParameters {
    level: f64,
    precision: usize,
    bitstream_count: u64,
    minimum: MinimumTestCount,
}

impl SignificanceParameters {
    pub fn new(level: f64, precision: usize, bitstream_count: u64) -> Result<Self, HarnessError> {
        if !(level > 0.0 && level < 1.0) {
            return Err(HarnessError::validation(format!(
                "significance level {level} must lie in (0, 1)"
            )));
        }
        if precision > MAX_SIGNIFICANCE_PRECISION {
            return Err(HarnessError::validation(format!(
                "significance precision {precision} exceeds {MAX_SIGNIFICANCE_PRECISION} digits"
            )));
        }
        if bitstream_count == 0 {
            return Err(HarnessError::validation("bitstream count must be at least 1"));
        }
        let shown = (precision..=MAX_SIGNIFICANCE_PRECISION)
            .find(|&digits| Numeric::real(level, digits).as_f64() == Some(level))
            .ok_or_else(|| {
                HarnessError::validation(format!(
                    "significance level {level} needs more than \
                     {MAX_SIGNIFICANCE_PRECISION} fractional digits"
                ))
            })?;
        if shown != precision {
            debug!("significance level {level}: display precision {precision} raised to {shown}");
        }
        let precision = shown;
        Ok(Self {
            level,
            precision,
            bitstream_count,
            minimum: minimum_test_count(level, bitstream_count),
        })
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    pub fn bitstream_count(&self) -> u64 {
        self.bitstream_count
    }

    pub fn minimum(&self) -> MinimumTestCount {
        self.minimum
    }

    pub fn level_numeric(&self) -> Numeric {
        Numeric::real(self.level, self.precision)
    }
}

/// Smallest run count for which the one-sided lower confidence bound on
/// passes tolerates at least one failure, plus the predicted pass/fail split
/// of `bitstream_count` runs.
///
/// With `z = Φ⁻¹(1 − α)` and `σ = √(α(1 − α))`, `m` is minimal such that
/// `m(1 − α) − z·σ·√m ≤ m − 1`.
pub fn minimum_test_count(significance_level: f64, bitstream_count: u64) -> MinimumTestCount {
    let alpha = significance_level;
    let z = Normal::standard().inverse_cdf(1.0 - alpha);
    let sigma = (alpha * (1.0 - alpha)).sqrt();
    let tolerates_failure = |m: u64| {
        let m = m as f64;
        m * alpha + z * sigma * m.sqrt() >= 1.0
    };

    // Positive root of α·y² + zσ·y − 1 = 0 with y = √m.
    let zs = z * sigma;
    let root = (-zs + (zs * zs + 4.0 * alpha).sqrt()) / (2.0 * alpha);
    let mut m = (root * root).ceil().max(1.0) as u64;
    while m > 1 && tolerates_failure(m - 1) {
        m -= 1;
    }
    while !tolerates_failure(m) {
        m += 1;
    }

    let predicted_failed = (bitstream_count as f64 * alpha).round() as u64;
    MinimumTestCount {
        minimum_required: m,
        predicted_passed: bitstream_count - predicted_failed.min(bitstream_count),
        predicted_failed: predicted_failed.min(bitstream_count),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Proportion of passing sequences
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProportionOutcome {
    pub threshold_min: f64,
    pub threshold_max: f64,
    /// Observed pass fraction; `None` when no tests ran.
    pub proportion: Option<f64>,
    pub passed: bool,
}

/// Two-sided band `p̂ ± 3√(p̂α/m)` around `p̂ = 1 − α`, clamped to `[0, 1]`.
pub fn proportion_criterion(
    tests_run: u64,
    tests_passed: u64,
    significance_level: f64,
) -> ProportionOutcome {
    let p_hat = 1.0 - significance_level;
    if tests_run == 0 {
        return ProportionOutcome {
            threshold_min: p_hat,
            threshold_max: p_hat,
            proportion: None,
            passed: false,
        };
    }
    let margin = PROPORTION_SIGMAS * (p_hat * significance_level / tests_run as f64).sqrt();
    let threshold_min = (p_hat - margin).max(0.0);
    let threshold_max = (p_hat + margin).min(1.0);
    let proportion = tests_passed as f64 / tests_run as f64;
    ProportionOutcome {
        threshold_min,
        threshold_max,
        proportion: Some(proportion),
        passed: proportion >= threshold_min && proportion <= threshold_max,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Uniformity of p-values
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct UniformityOutcome {
    pub histogram: [u64; UNIFORMITY_BINS],
    pub chi_squared: f64,
    /// P-valueT of the chi-squared statistic with 9 degrees of freedom.
    pub p_value: f64,
    pub passed: bool,
}

/// Chi-squared goodness of fit of `p_values` against U(0, 1) over ten bins.
///
/// An empty sample carries no evidence and fails.
pub fn uniformity_criterion(p_values: &[f64]) -> UniformityOutcome {
    let mut histogram = [0u64; UNIFORMITY_BINS];
    for &p in p_values {
        let bin = ((p * UNIFORMITY_BINS as f64) as usize).min(UNIFORMITY_BINS - 1);
        histogram[bin] += 1;
    }
    if p_values.is_empty() {
        return UniformityOutcome {
            histogram,
            chi_squared: 0.0,
            p_value: 0.0,
            passed: false,
        };
    }

    let expected = p_values.len() as f64 / UNIFORMITY_BINS as f64;
    let chi_squared: f64 = histogram
        .iter()
        .map(|&count| {
            let diff = count as f64 - expected;
            diff * diff / expected
        })
        .sum();
    let p_value = ChiSquared::new((UNIFORMITY_BINS - 1) as f64)
        .map(|dist| dist.sf(chi_squared))
        .unwrap_or(0.0);
    UniformityOutcome {
        histogram,
        chi_squared,
        p_value,
        passed: p_value >= UNIFORMITY_THRESHOLD,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Confusion matrix
// ═══════════════════════════════════════════════════════════════════════════════

/// Observed pass/fail counts against the counts predicted under H0.
/// "Positive" means a passing bitstream. Reporting only, no verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfusionMatrix {
    pub true_positive: u64,
    pub false_positive: u64,
    pub true_negative: u64,
    pub false_negative: u64,
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    /// `tests_run / minimum_required`.
    pub evidence_ratio: Option<f64>,
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

pub fn confusion_matrix(
    minimum_required: u64,
    tests_run: u64,
    tests_passed: u64,
    tests_failed: u64,
    predicted_passed: u64,
    predicted_failed: u64,
) -> ConfusionMatrix {
    let true_positive = tests_passed.min(predicted_passed);
    let false_positive = tests_passed - true_positive;
    let true_negative = tests_failed.min(predicted_failed);
    let false_negative = tests_failed - true_negative;

    let precision = ratio(true_positive, true_positive + false_positive);
    let recall = ratio(true_positive, true_positive + false_negative);
    let f1 = match (precision, recall) {
        (Some(p), Some(r)) if p + r > 0.0 => Some(2.0 * p * r / (p + r)),
        _ => None,
    };
    ConfusionMatrix {
        true_positive,
        false_positive,
        true_negative,
        false_negative,
        accuracy: ratio(true_positive + true_negative, tests_run),
        precision,
        recall,
        f1,
        evidence_ratio: ratio(tests_run, minimum_required),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Finalize
// ═══════════════════════════════════════════════════════════════════════════════

fn probability(value: f64) -> Numeric {
    Numeric::real(value, PROBABILITY_PRECISION)
}

fn optional_probability(value: Option<f64>) -> Numeric {
    match value {
        Some(v) => probability(v),
        None => Numeric {
            value: "n/a".to_string(),
            precision: PROBABILITY_PRECISION,
        },
    }
}

/// Write configuration-level metrics, criteria and evaluation for one
/// configuration. `supplied` is the number of bitstreams actually tested.
pub fn finalize_configuration(
    configuration: &mut Configuration,
    state: &ConfigurationState,
    significance: &SignificanceParameters,
    supplied: u64,
) {
    let alpha = significance.level();
    let alpha_text = significance.level_numeric().value;
    let minimum = minimum_test_count(alpha, supplied);
    let proportion = proportion_criterion(state.tests_run, state.tests_passed, alpha);
    let uniformity = uniformity_criterion(&state.p_values);
    let matrix = confusion_matrix(
        minimum.minimum_required,
        state.tests_run,
        state.tests_passed,
        state.tests_failed,
        minimum.predicted_passed,
        minimum.predicted_failed,
    );

    configuration.add_metric("tests_run", Numeric::count(state.tests_run));
    configuration.add_metric("tests_passed", Numeric::count(state.tests_passed));
    configuration.add_metric("tests_failed", Numeric::count(state.tests_failed));
    configuration.add_metric("tests_errored", Numeric::count(state.tests_errored));
    configuration.add_metric("accumulated_ones", Numeric::count(state.accumulated_ones));
    configuration.add_metric("accumulated_zeros", Numeric::count(state.accumulated_zeros));
    configuration.add_metric("minimum_required", Numeric::count(minimum.minimum_required));
    configuration.add_metric("predicted_passed", Numeric::count(minimum.predicted_passed));
    configuration.add_metric("predicted_failed", Numeric::count(minimum.predicted_failed));
    configuration.add_metric("proportion", optional_probability(proportion.proportion));
    configuration.add_metric("proportion_min", probability(proportion.threshold_min));
    configuration.add_metric("proportion_max", probability(proportion.threshold_max));
    configuration.add_metric("uniformity_chi_squared", probability(uniformity.chi_squared));
    configuration.add_metric("uniformity_p_value", probability(uniformity.p_value));
    configuration.add_metric_set(
        "p_value_histogram",
        uniformity.histogram.iter().map(|&c| Numeric::count(c)).collect(),
    );
    configuration.add_metric("true_positive", Numeric::count(matrix.true_positive));
    configuration.add_metric("false_positive", Numeric::count(matrix.false_positive));
    configuration.add_metric("true_negative", Numeric::count(matrix.true_negative));
    configuration.add_metric("false_negative", Numeric::count(matrix.false_negative));
    configuration.add_metric("accuracy", optional_probability(matrix.accuracy));
    configuration.add_metric("precision", optional_probability(matrix.precision));
    configuration.add_metric("recall", optional_probability(matrix.recall));
    configuration.add_metric("f1", optional_probability(matrix.f1));
    configuration.add_metric("evidence_ratio", optional_probability(matrix.evidence_ratio));

    configuration.add_criterion(
        "sufficient tests",
        state.tests_run >= minimum.minimum_required,
        format!(
            "tests run ({}) >= minimum required ({}) at significance level {alpha_text}",
            state.tests_run, minimum.minimum_required
        ),
    );
    configuration.add_criterion(
        "proportion of passing sequences",
        proportion.passed,
        match proportion.proportion {
            Some(p) => format!(
                "{:.6} <= proportion passed ({p:.6}, {}/{}) <= {:.6}",
                proportion.threshold_min,
                state.tests_passed,
                state.tests_run,
                proportion.threshold_max
            ),
            None => "no tests ran; proportion undefined".to_string(),
        },
    );
    configuration.add_criterion(
        "uniformity of p-values",
        uniformity.passed,
        if state.p_values.is_empty() {
            "no p-values collected; uniformity undefined".to_string()
        } else {
            format!(
                "P-valueT ({:.6}, chi-squared {:.6} over {} p-values) >= {UNIFORMITY_THRESHOLD}",
                uniformity.p_value,
                uniformity.chi_squared,
                state.p_values.len()
            )
        },
    );
    configuration.add_evaluation();
}
