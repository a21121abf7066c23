//! Runs families: total number of runs and longest run of ones per block.

use randbattery_core::{
    BitBuffer, HarnessError, Kernel, KernelError, KernelInfo, ParameterSpec, Parameters,
    TestOutcome,
};
use statrs::function::erf::erfc;

use crate::{bitstream_length, chi_squared_sf, chi_squared_statistic, stream_bits, take_bits};

// ═══════════════════════════════════════════════════════════════════════════════
// Runs
// ═══════════════════════════════════════════════════════════════════════════════

const RUNS_PARAMS: &[ParameterSpec] = &[bitstream_length(100)];

pub const RUNS: KernelInfo = KernelInfo {
    name: "runs",
    description: "Total number of uninterrupted runs of identical bits",
    parameters: RUNS_PARAMS,
};

pub struct Runs {
    n: usize,
    params: Vec<(String, String)>,
}

pub fn build_runs(params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
    let resolved = params.resolve(RUNS_PARAMS)?;
    Ok(Box::new(Runs {
        n: stream_bits(&resolved)?,
        params: resolved.formatted(),
    }))
}

impl Kernel for Runs {
    fn info(&self) -> &KernelInfo {
        &RUNS
    }

    fn buffer_size(&self) -> usize {
        self.n / 8
    }

    fn parameters(&self) -> Vec<(String, String)> {
        self.params.clone()
    }

    fn execute(
        &self,
        _configuration: usize,
        buffer: &BitBuffer,
    ) -> Result<TestOutcome, KernelError> {
        let bits = take_bits(buffer, self.n)?;
        let n = self.n as f64;
        let ones = bits.iter().filter(|&&b| b == 1).count();
        let pi = ones as f64 / n;
        let tau = 2.0 / n.sqrt();

        // Frequency pre-test: the runs statistic is meaningless on a biased stream.
        let pre_test = (pi - 0.5).abs() < tau;
        if !pre_test {
            return Ok(TestOutcome::new(0.0).real("pi", pi, 6).criterion(
                "frequency pre-test",
                false,
                format!("|pi - 1/2| = {:.6} >= tau = {tau:.6}", (pi - 0.5).abs()),
            ));
        }

        let runs = 1 + bits.windows(2).filter(|w| w[0] != w[1]).count() as u64;
        let spread = pi * (1.0 - pi);
        let numerator = (runs as f64 - 2.0 * n * spread).abs();
        let denominator = 2.0 * (2.0 * n).sqrt() * spread;
        let p = erfc(numerator / denominator);
        Ok(TestOutcome::new(p)
            .real("pi", pi, 6)
            .count("v_obs", runs)
            .criterion(
                "frequency pre-test",
                true,
                format!("|pi - 1/2| = {:.6} < tau = {tau:.6}", (pi - 0.5).abs()),
            ))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Longest run of ones
// ═══════════════════════════════════════════════════════════════════════════════

const LONGEST_RUN_PARAMS: &[ParameterSpec] = &[bitstream_length(128)];

pub const LONGEST_RUN: KernelInfo = KernelInfo {
    name: "longest_run",
    description: "Longest run of ones within M-bit blocks",
    parameters: LONGEST_RUN_PARAMS,
};

/// Block length and class probabilities for one stream-length regime.
#[derive(Debug)]
struct RunTable {
    block_length: usize,
    /// Longest runs at or below this value fall into the first class.
    floor: usize,
    probabilities: &'static [f64],
}

const SHORT: RunTable = RunTable {
    block_length: 8,
    floor: 1,
    probabilities: &[0.2148, 0.3672, 0.2305, 0.1875],
};

const MEDIUM: RunTable = RunTable {
    block_length: 128,
    floor: 4,
    probabilities: &[0.1174, 0.2430, 0.2493, 0.1752, 0.1027, 0.1124],
};

const LONG: RunTable = RunTable {
    block_length: 10_000,
    floor: 10,
    probabilities: &[0.0882, 0.2092, 0.2483, 0.1933, 0.1208, 0.0675, 0.0727],
};

impl RunTable {
    fn for_length(n: usize) -> &'static RunTable {
        if n < 6_272 {
            &SHORT
        } else if n < 750_000 {
            &MEDIUM
        } else {
            &LONG
        }
    }

    fn classes(&self) -> usize {
        self.probabilities.len()
    }

    fn class_of(&self, longest: usize) -> usize {
        longest.clamp(self.floor, self.floor + self.classes() - 1) - self.floor
    }
}

pub struct LongestRun {
    n: usize,
    table: &'static RunTable,
    params: Vec<(String, String)>,
}

pub fn build_longest_run(params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
    let resolved = params.resolve(LONGEST_RUN_PARAMS)?;
    let n = stream_bits(&resolved)?;
    Ok(Box::new(LongestRun {
        n,
        table: RunTable::for_length(n),
        params: resolved.formatted(),
    }))
}

fn longest_ones(block: &[u8]) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for &bit in block {
        if bit == 1 {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

impl Kernel for LongestRun {
    fn info(&self) -> &KernelInfo {
        &LONGEST_RUN
    }

    fn buffer_size(&self) -> usize {
        self.n / 8
    }

    fn parameters(&self) -> Vec<(String, String)> {
        let mut params = self.params.clone();
        params.push(("block_length".to_string(), self.table.block_length.to_string()));
        params
    }

    fn execute(
        &self,
        _configuration: usize,
        buffer: &BitBuffer,
    ) -> Result<TestOutcome, KernelError> {
        let bits = take_bits(buffer, self.n)?;
        let table = self.table;
        let mut observed = vec![0u64; table.classes()];
        let mut blocks = 0u64;
        for block in bits.chunks_exact(table.block_length) {
            observed[table.class_of(longest_ones(block))] += 1;
            blocks += 1;
        }
        let chi2 = chi_squared_statistic(&observed, table.probabilities, blocks as f64);
        let p = chi_squared_sf((table.classes() - 1) as f64, chi2)?;
        Ok(TestOutcome::new(p)
            .count("blocks", blocks)
            .real("chi_squared", chi2, 6)
            .counts("frequencies", &observed))
    }
}
