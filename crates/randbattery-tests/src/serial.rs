//! Overlapping-pattern families: serial and approximate entropy.
//!
//! Both count every overlapping m-bit pattern with the stream treated as
//! circular (the first m−1 bits are appended to the end).

use randbattery_core::{
    BitBuffer, Configuration, HarnessError, Kernel, KernelError, KernelInfo, ParameterSpec,
    Parameters, TestOutcome,
};

use crate::{bitstream_length, chi_squared_sf, scratch, stream_bits, take_bits};

/// Occurrences of each m-bit pattern, indexed by its MSB-first value.
fn pattern_counts(bits: &[u8], m: usize) -> Result<Vec<u64>, KernelError> {
    let mut counts = scratch(1usize << m, 0u64)?;
    if m == 0 {
        counts[0] = bits.len() as u64;
        return Ok(counts);
    }
    let mask = (1usize << m) - 1;
    let mut value = 0usize;
    for (i, &bit) in bits.iter().chain(&bits[..m - 1]).enumerate() {
        value = ((value << 1) | bit as usize) & mask;
        if i + 1 >= m {
            counts[value] += 1;
        }
    }
    Ok(counts)
}

/// ψ²ₘ = (2ᵐ/n) Σ νᵢ² − n; zero for m = 0.
fn psi_squared(bits: &[u8], m: usize) -> Result<f64, KernelError> {
    if m == 0 {
        return Ok(0.0);
    }
    let n = bits.len() as f64;
    let sum_sq: f64 = pattern_counts(bits, m)?
        .iter()
        .map(|&c| (c as f64) * (c as f64))
        .sum();
    Ok(sum_sq * (1u64 << m) as f64 / n - n)
}

/// φ⁽ᵐ⁾ = Σ πᵢ ln πᵢ over observed patterns.
fn phi(bits: &[u8], m: usize) -> Result<f64, KernelError> {
    let n = bits.len() as f64;
    Ok(pattern_counts(bits, m)?
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let pi = c as f64 / n;
            pi * pi.ln()
        })
        .sum())
}

fn floor_log2(n: usize) -> usize {
    (usize::BITS - 1 - n.leading_zeros()) as usize
}

// ═══════════════════════════════════════════════════════════════════════════════
// Serial
// ═══════════════════════════════════════════════════════════════════════════════

const SERIAL_PARAMS: &[ParameterSpec] = &[
    bitstream_length(100),
    ParameterSpec::integer("block_length", "pattern length (m)", 16, 2, 24),
];

pub const SERIAL: KernelInfo = KernelInfo {
    name: "serial",
    description: "Uniformity of overlapping m-bit pattern frequencies",
    parameters: SERIAL_PARAMS,
};

const SERIAL_STATISTICS: [&str; 2] = ["del_psi_squared", "del2_psi_squared"];

/// Configuration 0 tests ∇ψ²ₘ, configuration 1 tests ∇²ψ²ₘ.
pub struct Serial {
    n: usize,
    m: usize,
    params: Vec<(String, String)>,
}

pub fn build_serial(params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
    let resolved = params.resolve(SERIAL_PARAMS)?;
    let n = stream_bits(&resolved)?;
    let m = resolved.usize("block_length")?;
    let limit = floor_log2(n).saturating_sub(2);
    if m >= limit {
        return Err(HarnessError::validation(format!(
            "serial: block_length = {m} must be below floor(log2 {n}) - 2 = {limit}"
        )));
    }
    Ok(Box::new(Serial {
        n,
        m,
        params: resolved.formatted(),
    }))
}

impl Serial {
    fn degrees_of_freedom(&self, configuration: usize) -> f64 {
        (1u64 << (self.m - 1 - configuration)) as f64
    }
}

impl Kernel for Serial {
    fn info(&self) -> &KernelInfo {
        &SERIAL
    }

    fn buffer_size(&self) -> usize {
        self.n / 8
    }

    fn configuration_count(&self) -> usize {
        SERIAL_STATISTICS.len()
    }

    fn parameters(&self) -> Vec<(String, String)> {
        self.params.clone()
    }

    fn describe_configuration(&self, id: usize, configuration: &mut Configuration) {
        configuration.add_attribute("statistic", SERIAL_STATISTICS[id]);
        configuration.add_attribute(
            "degrees_of_freedom",
            format!("{}", self.degrees_of_freedom(id)),
        );
    }

    fn execute(
        &self,
        configuration: usize,
        buffer: &BitBuffer,
    ) -> Result<TestOutcome, KernelError> {
        let bits = take_bits(buffer, self.n)?;
        let psi_m = psi_squared(bits, self.m)?;
        let psi_m1 = psi_squared(bits, self.m - 1)?;
        let psi_m2 = psi_squared(bits, self.m - 2)?;
        let statistic = match configuration {
            0 => psi_m - psi_m1,
            _ => psi_m - 2.0 * psi_m1 + psi_m2,
        };
        let p = chi_squared_sf(self.degrees_of_freedom(configuration), statistic)?;
        Ok(TestOutcome::new(p)
            .real("psi_squared_m", psi_m, 6)
            .real("psi_squared_m1", psi_m1, 6)
            .real("psi_squared_m2", psi_m2, 6)
            .real(SERIAL_STATISTICS[configuration.min(1)], statistic, 6))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Approximate entropy
// ═══════════════════════════════════════════════════════════════════════════════

const APEN_PARAMS: &[ParameterSpec] = &[
    bitstream_length(100),
    ParameterSpec::integer("block_length", "pattern length (m)", 10, 1, 24),
];

pub const APPROXIMATE_ENTROPY: KernelInfo = KernelInfo {
    name: "approximate_entropy",
    description: "Frequency of overlapping m- and (m+1)-bit patterns",
    parameters: APEN_PARAMS,
};

pub struct ApproximateEntropy {
    n: usize,
    m: usize,
    params: Vec<(String, String)>,
}

pub fn build_approximate_entropy(params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
    let resolved = params.resolve(APEN_PARAMS)?;
    let n = stream_bits(&resolved)?;
    let m = resolved.usize("block_length")?;
    let limit = floor_log2(n).saturating_sub(5);
    if m >= limit {
        return Err(HarnessError::validation(format!(
            "approximate_entropy: block_length = {m} must be below floor(log2 {n}) - 5 = {limit}"
        )));
    }
    Ok(Box::new(ApproximateEntropy {
        n,
        m,
        params: resolved.formatted(),
    }))
}

fn approximate_entropy(bits: &[u8], m: usize) -> Result<(f64, f64), KernelError> {
    let apen = phi(bits, m)? - phi(bits, m + 1)?;
    let chi2 = 2.0 * bits.len() as f64 * (std::f64::consts::LN_2 - apen);
    Ok((apen, chi2))
}

impl Kernel for ApproximateEntropy {
    fn info(&self) -> &KernelInfo {
        &APPROXIMATE_ENTROPY
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
        let (apen, chi2) = approximate_entropy(bits, self.m)?;
        let p = chi_squared_sf((1u64 << self.m) as f64, chi2)?;
        Ok(TestOutcome::new(p)
            .real("apen", apen, 6)
            .real("chi_squared", chi2, 6))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::random_buffer;

    fn bits(s: &str) -> Vec<u8> {
        s.bytes().map(|c| c - b'0').collect()
    }

    fn params(pairs: &[(&str, u64)]) -> Parameters {
        let mut p = Parameters::new();
        for (k, v) in pairs {
            p.set(*k, v);
        }
        p
    }

    #[test]
    fn circular_pattern_counts() {
        // 0011 → circular 2-bit windows: 00, 01, 11, 10
        let counts = pattern_counts(&bits("0011"), 2).unwrap();
        assert_eq!(counts, vec![1, 1, 1, 1]);
        assert_eq!(pattern_counts(&bits("0011"), 0).unwrap(), vec![4]);
    }

    #[test]
    fn serial_reference_psi_squares() {
        // SP 800-22 §2.11.4: ε = 0011011101, ψ²₃ = 2.8, ψ²₂ = 1.2, ψ²₁ = 0.4
        let e = bits("0011011101");
        assert!((psi_squared(&e, 3).unwrap() - 2.8).abs() < 1e-9);
        assert!((psi_squared(&e, 2).unwrap() - 1.2).abs() < 1e-9);
        assert!((psi_squared(&e, 1).unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(psi_squared(&e, 0).unwrap(), 0.0);
        // ∇ψ² = 1.6 → P = 0.808792; ∇²ψ² = 0.8 → P = 0.670320
        assert!((chi_squared_sf(4.0, 1.6).unwrap() - 0.808792).abs() < 1e-5);
        assert!((chi_squared_sf(2.0, 0.8).unwrap() - 0.670320).abs() < 1e-5);
    }

    #[test]
    fn apen_reference_example() {
        // SP 800-22 §2.12.4: ε = 0100110101, m = 3, χ² = 10.043859, P = 0.261961
        let (apen, chi2) = approximate_entropy(&bits("0100110101"), 3).unwrap();
        assert!((apen - 0.190954).abs() < 1e-5);
        assert!((chi2 - 10.043859).abs() < 1e-5);
        assert!((chi_squared_sf(8.0, chi2).unwrap() - 0.261961).abs() < 1e-5);
    }

    #[test]
    fn serial_block_length_bounded_by_stream() {
        assert!(build_serial(&params(&[("bitstream_length", 1024), ("block_length", 8)])).is_err());
        assert!(build_serial(&params(&[("bitstream_length", 1024), ("block_length", 7)])).is_ok());
    }

    #[test]
    fn serial_has_two_configurations() {
        let kernel = build_serial(&params(&[("bitstream_length", 80_000), ("block_length", 4)]))
            .unwrap();
        assert_eq!(kernel.configuration_count(), 2);
        let mut cfg = Configuration::new(1);
        kernel.describe_configuration(1, &mut cfg);
        assert_eq!(cfg.attribute("statistic"), Some("del2_psi_squared"));
        assert_eq!(cfg.attribute("degrees_of_freedom"), Some("4"));
    }

    #[test]
    fn serial_random_passes_both() {
        let kernel = build_serial(&params(&[("bitstream_length", 80_000), ("block_length", 4)]))
            .unwrap();
        let buffer = random_buffer(10_000);
        for cfg in 0..2 {
            let outcome = kernel.execute(cfg, &buffer).unwrap();
            assert!(outcome.p_value >= 0.001, "cfg {cfg}: p = {}", outcome.p_value);
        }
    }

    #[test]
    fn serial_periodic_stream_fails() {
        let kernel = build_serial(&params(&[("bitstream_length", 8_000), ("block_length", 4)]))
            .unwrap();
        let outcome = kernel.execute(0, &BitBuffer::new(0, vec![0x0F; 1_000])).unwrap();
        assert!(outcome.p_value < 1e-10);
    }

    #[test]
    fn apen_random_passes_and_constant_fails() {
        let kernel = build_approximate_entropy(&params(&[
            ("bitstream_length", 80_000),
            ("block_length", 3),
        ]))
        .unwrap();
        let outcome = kernel.execute(0, &random_buffer(10_000)).unwrap();
        assert!(outcome.p_value >= 0.001, "p = {}", outcome.p_value);
        let outcome = kernel.execute(0, &BitBuffer::new(0, vec![0; 10_000])).unwrap();
        assert!(outcome.p_value < 1e-10);
    }
}
