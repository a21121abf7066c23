//! Structural families: binary matrix rank, cumulative sums and linear
//! complexity.

use randbattery_core::{
    BitBuffer, Configuration, HarnessError, Kernel, KernelError, KernelInfo, ParameterSpec,
    Parameters, TestOutcome,
};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::{
    bitstream_length, chi_squared_sf, chi_squared_statistic, scratch, stream_bits, take_bits,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Binary matrix rank
// ═══════════════════════════════════════════════════════════════════════════════

/// Rows and columns of each matrix.
const MATRIX_DIM: usize = 32;
const MATRIX_BITS: usize = MATRIX_DIM * MATRIX_DIM;
/// The reference probabilities assume at least this many matrices.
const MIN_MATRICES: u64 = 38;

const RANK_PARAMS: &[ParameterSpec] = &[bitstream_length(MIN_MATRICES * MATRIX_BITS as u64)];

pub const RANK: KernelInfo = KernelInfo {
    name: "rank",
    description: "Rank of disjoint 32x32 binary matrices over GF(2)",
    parameters: RANK_PARAMS,
};

/// Probability that a random M×Q binary matrix has rank `r`.
fn rank_probability(r: usize, m: usize, q: usize) -> f64 {
    let exponent = (r * (q + m - r)) as f64 - (m * q) as f64;
    (0..r).fold(2f64.powf(exponent), |acc, i| {
        let i = i as f64;
        acc * (1.0 - 2f64.powf(i - q as f64)) * (1.0 - 2f64.powf(i - m as f64))
            / (1.0 - 2f64.powf(i - r as f64))
    })
}

/// Gaussian elimination over GF(2) on bit-packed rows.
fn gf2_rank(rows: &mut [u32]) -> usize {
    let mut rank = 0;
    for col in (0..u32::BITS).rev() {
        let bit = 1u32 << col;
        let Some(pivot) = (rank..rows.len()).find(|&r| rows[r] & bit != 0) else {
            continue;
        };
        rows.swap(rank, pivot);
        let pivot_row = rows[rank];
        for (r, row) in rows.iter_mut().enumerate() {
            if r != rank && *row & bit != 0 {
                *row ^= pivot_row;
            }
        }
        rank += 1;
        if rank == rows.len() {
            break;
        }
    }
    rank
}

pub struct Rank {
    n: usize,
    /// P(full rank), P(full rank − 1), P(lower).
    probabilities: [f64; 3],
    params: Vec<(String, String)>,
}

pub fn build_rank(params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
    let resolved = params.resolve(RANK_PARAMS)?;
    let full = rank_probability(MATRIX_DIM, MATRIX_DIM, MATRIX_DIM);
    let minus_one = rank_probability(MATRIX_DIM - 1, MATRIX_DIM, MATRIX_DIM);
    Ok(Box::new(Rank {
        n: stream_bits(&resolved)?,
        probabilities: [full, minus_one, 1.0 - full - minus_one],
        params: resolved.formatted(),
    }))
}

impl Kernel for Rank {
    fn info(&self) -> &KernelInfo {
        &RANK
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
        let mut observed = [0u64; 3];
        let mut rows = [0u32; MATRIX_DIM];
        let mut matrices = 0u64;
        for matrix in bits.chunks_exact(MATRIX_BITS) {
            for (row, chunk) in rows.iter_mut().zip(matrix.chunks_exact(MATRIX_DIM)) {
                *row = chunk.iter().fold(0u32, |acc, &b| (acc << 1) | b as u32);
            }
            let rank = gf2_rank(&mut rows);
            let class = match MATRIX_DIM - rank {
                0 => 0,
                1 => 1,
                _ => 2,
            };
            observed[class] += 1;
            matrices += 1;
        }
        let chi2 = chi_squared_statistic(&observed, &self.probabilities, matrices as f64);
        let p = chi_squared_sf(2.0, chi2)?;
        Ok(TestOutcome::new(p)
            .count("matrices", matrices)
            .count("full_rank", observed[0])
            .count("full_rank_minus_one", observed[1])
            .count("lower_rank", observed[2])
            .real("chi_squared", chi2, 6))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cumulative sums
// ═══════════════════════════════════════════════════════════════════════════════

const CUSUM_PARAMS: &[ParameterSpec] = &[bitstream_length(100)];

pub const CUMULATIVE_SUMS: KernelInfo = KernelInfo {
    name: "cumulative_sums",
    description: "Maximal excursion of the ±1 random walk, forward and reverse",
    parameters: CUSUM_PARAMS,
};

const CUSUM_MODES: [&str; 2] = ["forward", "reverse"];

/// Configuration 0 walks the bitstream forward, configuration 1 in reverse.
pub struct CumulativeSums {
    n: usize,
    params: Vec<(String, String)>,
}

pub fn build_cumulative_sums(params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
    let resolved = params.resolve(CUSUM_PARAMS)?;
    Ok(Box::new(CumulativeSums {
        n: stream_bits(&resolved)?,
        params: resolved.formatted(),
    }))
}

fn max_excursion<'a>(bits: impl Iterator<Item = &'a u8>) -> u64 {
    let mut sum = 0i64;
    let mut z = 0u64;
    for &b in bits {
        sum += if b == 1 { 1 } else { -1 };
        z = z.max(sum.unsigned_abs());
    }
    z
}

/// P-value of maximal excursion `z` for a walk of `n` steps.
fn cusum_p_value(n: usize, z: u64) -> f64 {
    let norm = Normal::standard();
    let n = n as f64;
    let z = z as f64;
    let sqrt_n = n.sqrt();
    let upper = (n / z - 1.0) / 4.0;

    let mut first = 0.0;
    let mut k = ((-n / z + 1.0) / 4.0).trunc();
    while k <= upper {
        first += norm.cdf((4.0 * k + 1.0) * z / sqrt_n) - norm.cdf((4.0 * k - 1.0) * z / sqrt_n);
        k += 1.0;
    }
    let mut second = 0.0;
    let mut k = ((-n / z - 3.0) / 4.0).trunc();
    while k <= upper {
        second += norm.cdf((4.0 * k + 3.0) * z / sqrt_n) - norm.cdf((4.0 * k + 1.0) * z / sqrt_n);
        k += 1.0;
    }
    (1.0 - first + second).clamp(0.0, 1.0)
}

impl Kernel for CumulativeSums {
    fn info(&self) -> &KernelInfo {
        &CUMULATIVE_SUMS
    }

    fn buffer_size(&self) -> usize {
        self.n / 8
    }

    fn configuration_count(&self) -> usize {
        CUSUM_MODES.len()
    }

    fn parameters(&self) -> Vec<(String, String)> {
        self.params.clone()
    }

    fn describe_configuration(&self, id: usize, configuration: &mut Configuration) {
        configuration.add_attribute("mode", CUSUM_MODES[id]);
    }

    fn execute(
        &self,
        configuration: usize,
        buffer: &BitBuffer,
    ) -> Result<TestOutcome, KernelError> {
        let bits = take_bits(buffer, self.n)?;
        let z = match configuration {
            0 => max_excursion(bits.iter()),
            _ => max_excursion(bits.iter().rev()),
        };
        Ok(TestOutcome::new(cusum_p_value(self.n, z)).count("z", z))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Linear complexity
// ═══════════════════════════════════════════════════════════════════════════════

const LINEAR_COMPLEXITY_PARAMS: &[ParameterSpec] = &[
    bitstream_length(500),
    ParameterSpec::integer("block_length", "bits per block (M)", 500, 500, 5_000),
];

pub const LINEAR_COMPLEXITY: KernelInfo = KernelInfo {
    name: "linear_complexity",
    description: "Length of the shortest LFSR generating each M-bit block",
    parameters: LINEAR_COMPLEXITY_PARAMS,
};

/// Class probabilities for T ≤ −2.5, (−2.5, −1.5], …, T > 2.5.
const COMPLEXITY_PROBABILITIES: [f64; 7] =
    [0.010417, 0.031250, 0.125000, 0.500000, 0.250000, 0.062500, 0.020833];

pub struct LinearComplexity {
    n: usize,
    block_length: usize,
    params: Vec<(String, String)>,
}

pub fn build_linear_complexity(params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
    let resolved = params.resolve(LINEAR_COMPLEXITY_PARAMS)?;
    let n = stream_bits(&resolved)?;
    let block_length = resolved.usize("block_length")?;
    if block_length > n {
        return Err(HarnessError::validation(format!(
            "linear_complexity: block_length = {block_length} exceeds bitstream_length = {n}"
        )));
    }
    Ok(Box::new(LinearComplexity {
        n,
        block_length,
        params: resolved.formatted(),
    }))
}

/// Berlekamp-Massey scratch, reused across the blocks of one bitstream.
struct Lfsr {
    c: Vec<u8>,
    b: Vec<u8>,
    t: Vec<u8>,
}

impl Lfsr {
    fn new(len: usize) -> Result<Self, KernelError> {
        Ok(Self {
            c: scratch(len, 0u8)?,
            b: scratch(len, 0u8)?,
            t: scratch(len, 0u8)?,
        })
    }

    /// Linear complexity of `seq` (length at most the scratch length).
    fn complexity(&mut self, seq: &[u8]) -> usize {
        let n = seq.len();
        self.c[..n].fill(0);
        self.b[..n].fill(0);
        self.c[0] = 1;
        self.b[0] = 1;
        let mut l = 0usize;
        let mut m: isize = -1;
        for i in 0..n {
            let mut d = seq[i];
            for j in 1..=l {
                d ^= self.c[j] & seq[i - j];
            }
            if d == 1 {
                self.t[..n].copy_from_slice(&self.c[..n]);
                let shift = (i as isize - m) as usize;
                for j in shift..n {
                    self.c[j] ^= self.b[j - shift];
                }
                if l <= i / 2 {
                    l = i + 1 - l;
                    m = i as isize;
                    std::mem::swap(&mut self.b, &mut self.t);
                }
            }
        }
        l
    }
}

fn complexity_class(t: f64) -> usize {
    match t {
        t if t <= -2.5 => 0,
        t if t <= -1.5 => 1,
        t if t <= -0.5 => 2,
        t if t <= 0.5 => 3,
        t if t <= 1.5 => 4,
        t if t <= 2.5 => 5,
        _ => 6,
    }
}

impl LinearComplexity {
    /// Expected complexity μ of a random M-bit block.
    fn mean(&self) -> f64 {
        let m = self.block_length as f64;
        let parity = if self.block_length % 2 == 0 { -1.0 } else { 1.0 };
        m / 2.0 + (9.0 + parity) / 36.0 - (m / 3.0 + 2.0 / 9.0) / 2f64.powf(m)
    }
}

impl Kernel for LinearComplexity {
    fn info(&self) -> &KernelInfo {
        &LINEAR_COMPLEXITY
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
        let mu = self.mean();
        // (−1)^M
        let sign = if self.block_length % 2 == 0 { 1.0 } else { -1.0 };
        let mut lfsr = Lfsr::new(self.block_length)?;
        let mut observed = [0u64; 7];
        let mut blocks = 0u64;
        for block in bits.chunks_exact(self.block_length) {
            let l = lfsr.complexity(block) as f64;
            observed[complexity_class(sign * (l - mu) + 2.0 / 9.0)] += 1;
            blocks += 1;
        }
        let chi2 = chi_squared_statistic(&observed, &COMPLEXITY_PROBABILITIES, blocks as f64);
        let p = chi_squared_sf(6.0, chi2)?;
        Ok(TestOutcome::new(p)
            .count("blocks", blocks)
            .real("mu", mu, 6)
            .real("chi_squared", chi2, 6)
            .counts("frequencies", &observed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::random_buffer;

    fn params(pairs: &[(&str, u64)]) -> Parameters {
        let mut p = Parameters::new();
        for (k, v) in pairs {
            p.set(*k, v);
        }
        p
    }

    #[test]
    fn rank_probabilities_match_reference() {
        let full = rank_probability(32, 32, 32);
        let minus_one = rank_probability(31, 32, 32);
        assert!((full - 0.288788).abs() < 1e-6);
        assert!((minus_one - 0.577576).abs() < 1e-6);
        assert!((1.0 - full - minus_one - 0.133636).abs() < 1e-6);
    }

    #[test]
    fn gf2_rank_basics() {
        let mut identity: Vec<u32> = (0..32).map(|i| 1u32 << i).collect();
        assert_eq!(gf2_rank(&mut identity), 32);
        let mut zero = vec![0u32; 32];
        assert_eq!(gf2_rank(&mut zero), 0);
        let mut duplicate: Vec<u32> = (0..32).map(|i| 1u32 << i).collect();
        duplicate[5] = duplicate[6];
        assert_eq!(gf2_rank(&mut duplicate), 31);
        let mut dependent = vec![0b011, 0b101, 0b110];
        assert_eq!(gf2_rank(&mut dependent), 2);
    }

    #[test]
    fn rank_random_passes() {
        let kernel = build_rank(&params(&[("bitstream_length", 80_000 * 8)])).unwrap();
        let outcome = kernel.execute(0, &random_buffer(80_000)).unwrap();
        assert_eq!(outcome.calculations[0].value.value, "625");
        assert!(outcome.p_value >= 0.001, "p = {}", outcome.p_value);
    }

    #[test]
    fn rank_constant_fails() {
        let kernel = build_rank(&params(&[("bitstream_length", 40_960)])).unwrap();
        let outcome = kernel.execute(0, &BitBuffer::new(0, vec![0xFF; 5_120])).unwrap();
        assert_eq!(outcome.calculations[3].value.value, "40");
        assert!(outcome.p_value < 1e-10);
    }

    #[test]
    fn cusum_reference_values() {
        // SP 800-22 §2.13.4 and §2.13.8
        assert!((cusum_p_value(10, 4) - 0.4116588).abs() < 1e-6);
        assert!((cusum_p_value(100, 16) - 0.219194).abs() < 1e-6);
        assert!((cusum_p_value(100, 19) - 0.114866).abs() < 1e-6);
    }

    #[test]
    fn cusum_direction_matters() {
        // Forward walk climbs to 4 and returns; reverse sees the same.
        let bits: Vec<u8> = vec![1, 1, 1, 1, 0, 0, 0, 0, 0, 0];
        assert_eq!(max_excursion(bits.iter()), 4);
        assert_eq!(max_excursion(bits.iter().rev()), 6);
    }

    #[test]
    fn cusum_configurations() {
        let kernel = build_cumulative_sums(&params(&[("bitstream_length", 80_000)])).unwrap();
        assert_eq!(kernel.configuration_count(), 2);
        let mut cfg = Configuration::new(1);
        kernel.describe_configuration(1, &mut cfg);
        assert_eq!(cfg.attribute("mode"), Some("reverse"));
        let buffer = random_buffer(10_000);
        for id in 0..2 {
            let outcome = kernel.execute(id, &buffer).unwrap();
            assert!(outcome.p_value >= 0.001, "cfg {id}: p = {}", outcome.p_value);
        }
        let ones = BitBuffer::new(0, vec![0xFF; 10_000]);
        assert!(kernel.execute(0, &ones).unwrap().p_value < 1e-10);
    }

    #[test]
    fn berlekamp_massey_reference() {
        // SP 800-22 §2.10.4: ε = 1101011110001 has L = 4
        let seq: Vec<u8> = "1101011110001".bytes().map(|c| c - b'0').collect();
        let mut lfsr = Lfsr::new(seq.len()).unwrap();
        assert_eq!(lfsr.complexity(&seq), 4);
        // Scratch reuse does not leak state between blocks.
        assert_eq!(lfsr.complexity(&[0, 0, 0, 0, 0, 0, 0, 1]), 8);
        assert_eq!(lfsr.complexity(&seq), 4);
    }

    #[test]
    fn complexity_classes() {
        assert_eq!(complexity_class(-3.0), 0);
        assert_eq!(complexity_class(-2.5), 0);
        assert_eq!(complexity_class(0.0), 3);
        assert_eq!(complexity_class(2.5), 5);
        assert_eq!(complexity_class(2.6), 6);
    }

    #[test]
    fn linear_complexity_random_passes() {
        let kernel = build_linear_complexity(&params(&[("bitstream_length", 100_000)])).unwrap();
        let outcome = kernel.execute(0, &random_buffer(12_500)).unwrap();
        assert_eq!(outcome.calculations[0].value.value, "200");
        assert!(outcome.p_value >= 0.001, "p = {}", outcome.p_value);
    }

    #[test]
    fn linear_complexity_periodic_fails() {
        let kernel = build_linear_complexity(&params(&[("bitstream_length", 80_000)])).unwrap();
        let outcome = kernel.execute(0, &BitBuffer::new(0, vec![0x0F; 10_000])).unwrap();
        assert!(outcome.p_value < 1e-10);
    }
}
