pub mod battery;
pub mod list;
pub mod run;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use log::warn;
use randbattery_core::{
    Configuration, Evaluation, Harness, HarnessError, Kernel, Report, RunAborted,
};
use serde::Serialize;

use crate::config::RunConfig;

static CANCEL: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Process-wide cancel flag, set by Ctrl+C. The handler is installed once.
pub fn cancel_flag() -> Arc<AtomicBool> {
    CANCEL
        .get_or_init(|| {
            let flag = Arc::new(AtomicBool::new(false));
            let f = Arc::clone(&flag);
            if let Err(e) = ctrlc::set_handler(move || f.store(true, Ordering::SeqCst)) {
                warn!("Ctrl+C handler not installed: {e}");
            }
            flag
        })
        .clone()
}

/// Run one kernel against a freshly opened source.
///
/// The report comes back even when the run aborted, together with the
/// error that stopped it.
pub fn execute(
    kernel: &dyn Kernel,
    config: &RunConfig,
    cancel: Arc<AtomicBool>,
) -> Result<(Report, Option<HarnessError>), HarnessError> {
    let harness = Harness::new(kernel, config.run_options(cancel)?)?;
    let mut source = config.open_source()?;
    Ok(match harness.run(source.as_mut()) {
        Ok(outcome) => (outcome.report, None),
        Err(RunAborted { error, report }) => (*report, Some(error)),
    })
}

/// Pretty JSON followed by a newline.
pub fn write_json<T: Serialize>(path: &str, value: &T) -> Result<(), HarnessError> {
    let file = File::create(path)
        .map_err(|e| HarnessError::Io(io::Error::new(e.kind(), format!("{path}: {e}"))))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(io::Error::other)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

fn metric(cfg: &Configuration, name: &str) -> String {
    cfg.metric(name).map_or_else(|| "-".to_string(), |m| m.value.clone())
}

fn verdict(evaluation: Option<Evaluation>) -> &'static str {
    match evaluation {
        Some(e) if e.is_pass() => "PASS",
        Some(_) => "FAIL",
        None => "-",
    }
}

/// Per-configuration summary table.
pub fn print_configurations(report: &Report) {
    println!("\n{}", "=".repeat(78));
    println!(
        "{}: {} bitstream(s) from {}{}",
        report.test_name,
        report.bitstreams_tested,
        report.source,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    println!("{}", "-".repeat(78));
    println!(
        "{:<5} {:<20} {:>6} {:>7} {:>11} {:>11} {:>7}",
        "Cfg", "Attributes", "Run", "Passed", "Proportion", "Uniformity", "Result"
    );
    println!("{}", "-".repeat(78));
    for cfg in &report.configurations {
        let attributes: Vec<String> = cfg
            .attributes
            .iter()
            .map(|a| format!("{}={}", a.name, a.value))
            .collect();
        println!(
            "{:<5} {:<20} {:>6} {:>7} {:>11} {:>11} {:>7}",
            cfg.id,
            truncate(&attributes.join(","), 20),
            metric(cfg, "tests_run"),
            metric(cfg, "tests_passed"),
            metric(cfg, "proportion"),
            metric(cfg, "uniformity_p_value"),
            verdict(cfg.evaluation),
        );
    }
    println!("{}", "=".repeat(78));
    println!("Overall: {}", verdict(report.evaluation));
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width - 1).collect();
        cut.push('…');
        cut
    }
}
