//! Non-overlapping template matching: one configuration per aperiodic
//! m-bit template.

use log::debug;
use randbattery_core::{
    BitBuffer, Configuration, HarnessError, Kernel, KernelError, KernelInfo, ParameterSpec,
    Parameters, TestOutcome,
};

use crate::{bitstream_length, chi_squared_sf, scratch, stream_bits, take_bits};

const PARAMS: &[ParameterSpec] = &[
    bitstream_length(100),
    ParameterSpec::integer("template_length", "template length in bits (m)", 9, 2, 16),
    ParameterSpec::integer("blocks", "number of independent blocks (N)", 8, 1, 100),
];

pub const NON_OVERLAPPING_TEMPLATE: KernelInfo = KernelInfo {
    name: "non_overlapping_template",
    description: "Occurrences of aperiodic templates, skipping past each match",
    parameters: PARAMS,
};

/// Every m-bit pattern that cannot overlap a shifted copy of itself, in
/// ascending numeric order.
pub fn aperiodic_templates(m: usize) -> Vec<u32> {
    (0u32..1 << m)
        .filter(|&t| {
            (1..m).all(|shift| {
                let prefix = t >> shift;
                let suffix = t & ((1 << (m - shift)) - 1);
                prefix != suffix
            })
        })
        .collect()
}

/// Matches of `template` in `block`; the scan restarts m bits past each hit.
fn count_occurrences(block: &[u8], template: u32, m: usize) -> u64 {
    let mask = (1u32 << m) - 1;
    let mut window = 0u32;
    let mut filled = 0;
    let mut count = 0;
    for &bit in block {
        window = ((window << 1) | bit as u32) & mask;
        filled += 1;
        if filled >= m && window == template {
            count += 1;
            filled = 0;
        }
    }
    count
}

/// Shares the template list read-only across every worker.
pub struct NonOverlappingTemplate {
    n: usize,
    m: usize,
    blocks: usize,
    block_length: usize,
    templates: Vec<u32>,
    params: Vec<(String, String)>,
}

pub fn build_non_overlapping_template(
    params: &Parameters,
) -> Result<Box<dyn Kernel>, HarnessError> {
    let resolved = params.resolve(PARAMS)?;
    let n = stream_bits(&resolved)?;
    let m = resolved.usize("template_length")?;
    let blocks = resolved.usize("blocks")?;
    let block_length = n / blocks;
    if block_length < m {
        return Err(HarnessError::validation(format!(
            "non_overlapping_template: block length {block_length} < template_length {m}"
        )));
    }
    let templates = aperiodic_templates(m);
    debug!("{} aperiodic templates of length {m}", templates.len());
    Ok(Box::new(NonOverlappingTemplate {
        n,
        m,
        blocks,
        block_length,
        templates,
        params: resolved.formatted(),
    }))
}

impl NonOverlappingTemplate {
    fn template_bits(&self, id: usize) -> String {
        format!("{:0width$b}", self.templates[id], width = self.m)
    }

    /// Theoretical mean and variance of W under randomness.
    fn moments(&self) -> (f64, f64) {
        let big_m = self.block_length as f64;
        let m = self.m as f64;
        let two_m = (1u64 << self.m) as f64;
        let mean = (big_m - m + 1.0) / two_m;
        let variance = big_m * (1.0 / two_m - (2.0 * m - 1.0) / (two_m * two_m));
        (mean, variance)
    }
}

impl Kernel for NonOverlappingTemplate {
    fn info(&self) -> &KernelInfo {
        &NON_OVERLAPPING_TEMPLATE
    }

    fn buffer_size(&self) -> usize {
        self.n / 8
    }

    fn configuration_count(&self) -> usize {
        self.templates.len()
    }

    fn parameters(&self) -> Vec<(String, String)> {
        let mut params = self.params.clone();
        params.push(("block_length".to_string(), self.block_length.to_string()));
        params
    }

    fn describe_configuration(&self, id: usize, configuration: &mut Configuration) {
        configuration.add_attribute("template", self.template_bits(id));
    }

    fn execute(
        &self,
        configuration: usize,
        buffer: &BitBuffer,
    ) -> Result<TestOutcome, KernelError> {
        let bits = take_bits(buffer, self.n)?;
        let template = self.templates[configuration];
        let mut occurrences = scratch(self.blocks, 0u64)?;
        for (w, block) in occurrences
            .iter_mut()
            .zip(bits.chunks_exact(self.block_length))
        {
            *w = count_occurrences(block, template, self.m);
        }
        let (mean, variance) = self.moments();
        let chi2: f64 = occurrences
            .iter()
            .map(|&w| (w as f64 - mean).powi(2) / variance)
            .sum();
        let p = chi_squared_sf(self.blocks as f64, chi2)?;
        Ok(TestOutcome::new(p)
            .real("mean", mean, 6)
            .real("variance", variance, 6)
            .real("chi_squared", chi2, 6)
            .counts("occurrences", &occurrences))
    }
}
