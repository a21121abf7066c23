//! Discrete Fourier transform (spectral) family.

use std::sync::Arc;

use randbattery_core::{
    BitBuffer, HarnessError, Kernel, KernelError, KernelInfo, ParameterSpec, Parameters,
    TestOutcome,
};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use statrs::function::erf::erfc;

use crate::{bitstream_length, scratch, stream_bits, take_bits};

const DFT_PARAMS: &[ParameterSpec] = &[bitstream_length(1_000)];

pub const DFT: KernelInfo = KernelInfo {
    name: "dft",
    description: "Periodic features detected through peak heights of the DFT",
    parameters: DFT_PARAMS,
};

/// Fraction of moduli expected below the 95% peak threshold.
const BELOW_THRESHOLD: f64 = 0.95;

/// Detects periodic features: for random data 95% of the first n/2
/// moduli of the ±1 transform fall below √(ln(1/0.05)·n).
pub struct Dft {
    n: usize,
    /// Planned once at build; shared read-only by every worker.
    fft: Arc<dyn Fft<f64>>,
    params: Vec<(String, String)>,
}

pub fn build_dft(params: &Parameters) -> Result<Box<dyn Kernel>, HarnessError> {
    let resolved = params.resolve(DFT_PARAMS)?;
    let n = stream_bits(&resolved)?;
    let fft = FftPlanner::new().plan_fft_forward(n);
    Ok(Box::new(Dft {
        n,
        fft,
        params: resolved.formatted(),
    }))
}

impl Kernel for Dft {
    fn info(&self) -> &KernelInfo {
        &DFT
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
        let mut signal = scratch(self.n, Complex::new(0.0, 0.0))?;
        for (x, &b) in signal.iter_mut().zip(bits) {
            x.re = if b == 1 { 1.0 } else { -1.0 };
        }
        let mut work = scratch(self.fft.get_inplace_scratch_len(), Complex::new(0.0, 0.0))?;
        self.fft.process_with_scratch(&mut signal, &mut work);

        let n = self.n as f64;
        let half = self.n / 2;
        let threshold = ((1.0_f64 / 0.05).ln() * n).sqrt();
        let expected = BELOW_THRESHOLD * half as f64;
        let below = signal[..half]
            .iter()
            .filter(|c| c.norm() < threshold)
            .count();
        let spread = (n * BELOW_THRESHOLD * (1.0 - BELOW_THRESHOLD) / 4.0).sqrt();
        let d = (below as f64 - expected) / spread;
        let p = erfc(d.abs() / 2.0_f64.sqrt());
        Ok(TestOutcome::new(p)
            .real("threshold", threshold, 6)
            .real("n0", expected, 6)
            .count("n1", below as u64)
            .real("d", d, 6))
    }
}
