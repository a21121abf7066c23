//! Frequency families: monobit and block frequency.

use randbattery_core::{
    BitBuffer, Configuration, ConfigurationState, HarnessError, Kernel, KernelError, KernelInfo,
    Numeric, ParameterSpec, Parameters, TestOutcome,
};
use statrs::function::erf::erfc;

use crate::{bitstream_length, chi_squared_sf, stream_bits, take_bits};

// ═══════════════════════════════════════════════════════════════════════════════
// Monobit frequency
// ═══════════════════════════════════════════════════════════════════════════════

const FREQUENCY_PARAMS: &[ParameterSpec] = &[bitstream_length(100)];

pub const FREQUENCY: KernelInfo = KernelInfo {
    name: "frequency",
    description: "Proportion of ones across the whole bitstream",
    parameters: FREQUENCY_PARAMS,
};

/// Monobit frequency: the ±1 partial sum should stay near zero.
pub struct Frequency {
    n: usize,
    params: Vec<(String, String)>,
}

pub fn build_frequency(params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
    let resolved = params.resolve(FREQUENCY_PARAMS)?;
    Ok(Box::new(Frequency {
        n: stream_bits(&resolved)?,
        params: resolved.formatted(),
    }))
}

impl Kernel for Frequency {
    fn info(&self) -> &KernelInfo {
        &FREQUENCY
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
        let ones = bits.iter().filter(|&&b| b == 1).count() as i64;
        let s = 2 * ones - self.n as i64;
        let s_obs = (s as f64).abs() / (self.n as f64).sqrt();
        let p = erfc(s_obs / 2.0_f64.sqrt());
        Ok(TestOutcome::new(p)
            .count("n", self.n as u64)
            .real("s_n", s as f64, 0)
            .real("s_obs", s_obs, 6))
    }

    fn finalize_configuration(
        &self,
        _id: usize,
        state: &ConfigurationState,
        configuration: &mut Configuration,
    ) {
        let total = state.accumulated_ones + state.accumulated_zeros;
        if total > 0 {
            let fraction = state.accumulated_ones as f64 / total as f64;
            configuration.add_metric("ones_fraction", Numeric::real(fraction, 6));
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Block frequency
// ═══════════════════════════════════════════════════════════════════════════════

const BLOCK_FREQUENCY_PARAMS: &[ParameterSpec] = &[
    bitstream_length(100),
    ParameterSpec::integer("block_length", "bits per block (M)", 128, 2, 1 << 24),
];

pub const BLOCK_FREQUENCY: KernelInfo = KernelInfo {
    name: "block_frequency",
    description: "Proportion of ones within M-bit blocks",
    parameters: BLOCK_FREQUENCY_PARAMS,
};

/// Chi-squared over the ones proportion of N = n/M non-overlapping blocks.
pub struct BlockFrequency {
    n: usize,
    block_length: usize,
    params: Vec<(String, String)>,
}

pub fn build_block_frequency(params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
    let resolved = params.resolve(BLOCK_FREQUENCY_PARAMS)?;
    let n = stream_bits(&resolved)?;
    let block_length = resolved.usize("block_length")?;
    if block_length > n {
        return Err(HarnessError::validation(format!(
            "block_length = {block_length} exceeds bitstream_length = {n}"
        )));
    }
    Ok(Box::new(BlockFrequency {
        n,
        block_length,
        params: resolved.formatted(),
    }))
}

impl Kernel for BlockFrequency {
    fn info(&self) -> &KernelInfo {
        &BLOCK_FREQUENCY
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
        let m = self.block_length;
        let blocks = self.n / m;
        let sum: f64 = bits
            .chunks_exact(m)
            .map(|block| {
                let pi = block.iter().filter(|&&b| b == 1).count() as f64 / m as f64;
                (pi - 0.5) * (pi - 0.5)
            })
            .sum();
        let chi2 = 4.0 * m as f64 * sum;
        let p = chi_squared_sf(blocks as f64, chi2)?;
        Ok(TestOutcome::new(p)
            .count("blocks", blocks as u64)
            .count("discarded_bits", (self.n - blocks * m) as u64)
            .real("chi_squared", chi2, 6))
    }
}
