//! NIST SP 800-22 test families as randbattery kernels.
//!
//! Every family implements [`Kernel`] and is registered in [`registry`]
//! with its declared parameters. Each one accepts a `bitstream_length`
//! parameter (bits per bitstream, a multiple of 8) that fixes the buffer
//! size the harness supplies.
//!
//! | Family                     | Configurations              |
//! |----------------------------|-----------------------------|
//! | `frequency`                | 1                           |
//! | `block_frequency`          | 1                           |
//! | `runs`                     | 1                           |
//! | `longest_run`              | 1                           |
//! | `rank`                     | 1                           |
//! | `dft`                      | 1                           |
//! | `non_overlapping_template` | one per aperiodic template  |
//! | `serial`                   | 2 (∇ψ², ∇²ψ²)               |
//! | `approximate_entropy`      | 1                           |
//! | `cumulative_sums`          | 2 (forward, reverse)        |
//! | `linear_complexity`        | 1                           |

use randbattery_core::{
    BitBuffer, HarnessError, Kernel, KernelEntry, KernelError, ParameterSpec, Parameters,
    ResolvedParameters,
};
use statrs::distribution::{ChiSquared, ContinuousCDF};

pub mod advanced;
pub mod frequency;
pub mod runs;
pub mod serial;
pub mod spectral;
pub mod template;

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

static REGISTRY: &[KernelEntry] = &[
    KernelEntry {
        info: frequency::FREQUENCY,
        build: frequency::build_frequency,
    },
    KernelEntry {
        info: frequency::BLOCK_FREQUENCY,
        build: frequency::build_block_frequency,
    },
    KernelEntry {
        info: runs::RUNS,
        build: runs::build_runs,
    },
    KernelEntry {
        info: runs::LONGEST_RUN,
        build: runs::build_longest_run,
    },
    KernelEntry {
        info: advanced::RANK,
        build: advanced::build_rank,
    },
    KernelEntry {
        info: spectral::DFT,
        build: spectral::build_dft,
    },
    KernelEntry {
        info: template::NON_OVERLAPPING_TEMPLATE,
        build: template::build_non_overlapping_template,
    },
    KernelEntry {
        info: serial::SERIAL,
        build: serial::build_serial,
    },
    KernelEntry {
        info: serial::APPROXIMATE_ENTROPY,
        build: serial::build_approximate_entropy,
    },
    KernelEntry {
        info: advanced::CUMULATIVE_SUMS,
        build: advanced::build_cumulative_sums,
    },
    KernelEntry {
        info: advanced::LINEAR_COMPLEXITY,
        build: advanced::build_linear_complexity,
    },
];

/// Every registered test family, in battery order.
pub fn registry() -> &'static [KernelEntry] {
    REGISTRY
}

/// Look up a family by name.
pub fn find(name: &str) -> Option<&'static KernelEntry> {
    REGISTRY.iter().find(|entry| entry.info.name == name)
}

/// Validate `params` against the named family and build its kernel.
pub fn build_kernel(name: &str, params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
    let entry = find(name).ok_or_else(|| {
        let known: Vec<&str> = REGISTRY.iter().map(|e| e.info.name).collect();
        HarnessError::validation(format!(
            "unknown test '{name}' (available: {})",
            known.join(", ")
        ))
    })?;
    entry.build(params)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Default bits per bitstream, shared by every family.
pub const DEFAULT_BITSTREAM_LENGTH: u64 = 1_000_000;

/// The `bitstream_length` declaration with a family-specific minimum.
pub(crate) const fn bitstream_length(min: u64) -> ParameterSpec {
    ParameterSpec::integer(
        "bitstream_length",
        "bits per bitstream (multiple of 8)",
        DEFAULT_BITSTREAM_LENGTH,
        min,
        1 << 32,
    )
}

/// Resolved `bitstream_length` in bits, checked to be whole bytes.
pub(crate) fn stream_bits(resolved: &ResolvedParameters) -> Result<usize, HarnessError> {
    let n = resolved.usize("bitstream_length")?;
    if n % 8 != 0 {
        return Err(HarnessError::validation(format!(
            "bitstream_length = {n} is not a multiple of 8"
        )));
    }
    Ok(n)
}

/// The first `n` bits of `buffer`.
pub(crate) fn take_bits(buffer: &BitBuffer, n: usize) -> Result<&[u8], KernelError> {
    let bits = buffer.bits();
    if bits.len() < n {
        return Err(KernelError::InsufficientData {
            needed: n,
            got: bits.len(),
        });
    }
    Ok(&bits[..n])
}

/// Zero-initialized scratch; allocation failure becomes a typed kernel error.
pub(crate) fn scratch<T: Clone>(len: usize, value: T) -> Result<Vec<T>, KernelError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| KernelError::Allocation {
            bytes: len.saturating_mul(size_of::<T>()),
        })?;
    buf.resize(len, value);
    Ok(buf)
}

/// Upper tail of the chi-squared distribution (`igamc(df/2, x/2)`).
pub(crate) fn chi_squared_sf(df: f64, statistic: f64) -> Result<f64, KernelError> {
    let dist = ChiSquared::new(df).map_err(KernelError::numeric)?;
    let p = dist.sf(statistic);
    if p.is_nan() {
        return Err(KernelError::numeric(format!(
            "chi-squared tail undefined for df={df}, statistic={statistic}"
        )));
    }
    Ok(p)
}

/// Σ (observed − n·π)² / (n·π) over matching classes.
pub(crate) fn chi_squared_statistic(observed: &[u64], probabilities: &[f64], n: f64) -> f64 {
    observed
        .iter()
        .zip(probabilities)
        .map(|(&o, &p)| {
            let expected = n * p;
            let diff = o as f64 - expected;
            diff * diff / expected
        })
        .sum()
}

#[cfg(test)]
pub(crate) mod testutil {
    use randbattery_core::BitBuffer;

    /// Generate pseudo-random data for testing (simple LCG).
    pub fn pseudo_random(n: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(n);
        let mut state: u64 = 0xDEAD_BEEF_CAFE_BABE;
        for _ in 0..n {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            data.push((state >> 33) as u8);
        }
        data
    }

    pub fn random_buffer(bytes: usize) -> BitBuffer {
        BitBuffer::new(0, pseudo_random(bytes))
    }

    /// Pack a '0'/'1' string MSB-first, zero-padding the last byte.
    pub fn buffer_from_str(bits: &str) -> BitBuffer {
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];
        for (i, c) in bits.bytes().enumerate() {
            if c == b'1' {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        BitBuffer::new(0, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_names_are_unique() {
        let mut names: Vec<&str> = registry().iter().map(|e| e.info.name).collect();
        assert_eq!(names.len(), 11);
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 11);
    }

    #[test]
    fn every_family_declares_bitstream_length() {
        for entry in registry() {
            assert!(
                entry
                    .info
                    .parameters
                    .iter()
                    .any(|p| p.name == "bitstream_length"),
                "{} lacks bitstream_length",
                entry.info.name
            );
        }
    }

    #[test]
    fn every_family_builds_with_defaults() {
        for entry in registry() {
            let kernel = entry.build(&Parameters::new()).unwrap();
            assert_eq!(kernel.buffer_size(), 125_000, "{}", entry.info.name);
            assert!(kernel.configuration_count() >= 1);
        }
    }

    #[test]
    fn unknown_test_is_rejected() {
        let err = build_kernel("nope", &Parameters::new()).err().unwrap();
        assert!(err.to_string().contains("frequency"));
    }

    #[test]
    fn unaligned_length_is_rejected() {
        let mut params = Parameters::new();
        params.set("bitstream_length", 1001);
        assert!(build_kernel("frequency", &params).is_err());
    }

    #[test]
    fn chi_squared_tail_matches_known_value() {
        // P(χ²₂ > x) = exp(-x/2)
        let p = chi_squared_sf(2.0, 3.0).unwrap();
        assert!((p - (-1.5f64).exp()).abs() < 1e-12);
        assert!(chi_squared_sf(0.0, 1.0).is_err());
    }

    #[test]
    fn short_buffer_is_a_typed_error() {
        let buffer = BitBuffer::new(0, vec![0u8; 2]);
        assert_eq!(
            take_bits(&buffer, 100),
            Err(KernelError::InsufficientData { needed: 100, got: 16 })
        );
    }
}
