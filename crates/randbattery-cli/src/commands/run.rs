use log::{info, warn};
use randbattery_core::HarnessError;

use crate::config::RunConfig;

/// Run one test family and print its summary; the JSON report is written
/// even when the run aborts part way.
pub fn run(test: &str, config: &RunConfig, assignments: &[String]) -> Result<(), HarnessError> {
    let params = config.parameters(assignments)?;
    let kernel = randbattery_tests::build_kernel(test, &params)?;
    let (report, error) = super::execute(kernel.as_ref(), config, super::cancel_flag())?;

    super::print_configurations(&report);
    if report.cancelled {
        warn!("run cancelled after {} bitstream(s)", report.bitstreams_tested);
    }
    if let Some(path) = config.output.as_deref() {
        super::write_json(path, &report)?;
        info!("report written to {path}");
    }
    match error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
