use std::sync::atomic::Ordering;

use log::{info, warn};
use randbattery_core::{HarnessError, Report};

use crate::config::RunConfig;

/// Every registered family in registry order against the same source.
///
/// All kernels are built before any data is read so a bad parameter fails
/// fast. Shared assignments go to every family that declares them.
pub fn run(config: &RunConfig, assignments: &[String]) -> Result<(), HarnessError> {
    if config.reads_stdin() {
        return Err(HarnessError::validation(
            "battery reopens its input for every family; stdin cannot be replayed",
        ));
    }
    let params = config.parameters(assignments)?;
    let registry = randbattery_tests::registry();
    if let Some(unknown) = params.names().find(|name| {
        !registry
            .iter()
            .any(|e| e.info.parameters.iter().any(|p| p.name == *name))
    }) {
        return Err(HarnessError::validation(format!(
            "no test family declares parameter '{unknown}'"
        )));
    }
    let kernels = registry
        .iter()
        .map(|entry| entry.build(&params.declared(entry.info.parameters)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut config = config.clone();
    if config.input.is_none() {
        let seed = config.pin_seed()?;
        info!("generator seed {seed}");
    }

    let cancel = super::cancel_flag();
    let mut reports: Vec<Report> = Vec::with_capacity(kernels.len());
    let mut failure = None;
    for kernel in &kernels {
        let (report, error) = super::execute(kernel.as_ref(), &config, cancel.clone())?;
        reports.push(report);
        if let Some(err) = error {
            failure = Some(err);
            break;
        }
        if cancel.load(Ordering::SeqCst) {
            warn!("battery cancelled after {}", kernel.name());
            break;
        }
    }

    for report in &reports {
        super::print_configurations(report);
    }
    print_overview(&reports, kernels.len());

    if let Some(path) = config.output.as_deref() {
        super::write_json(path, &reports)?;
        info!("battery report written to {path}");
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn print_overview(reports: &[Report], families: usize) {
    println!("\n{}", "=".repeat(60));
    println!("{:<30} {:>10} {:>8}", "Family", "Configs", "Result");
    println!("{}", "-".repeat(60));
    for report in reports {
        let passed = report
            .configurations
            .iter()
            .filter(|c| c.evaluation.is_some_and(|e| e.is_pass()))
            .count();
        let result = match report.evaluation {
            Some(e) => e.to_string(),
            None => "-".to_string(),
        };
        println!(
            "{:<30} {:>10} {:>8}",
            report.test_name,
            format!("{passed}/{}", report.configurations.len()),
            result
        );
    }
    println!("{}", "=".repeat(60));
    let passed = reports
        .iter()
        .filter(|r| r.evaluation.is_some_and(|e| e.is_pass()))
        .count();
    println!("{passed}/{families} families passed");
}
