//! Integration tests for randbattery-core.
//!
//! These tests drive the full pipeline with a small deterministic kernel:
//! source → execution loop → worker pool → collection → finalize.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use randbattery_core::{
    BitBuffer, BitSource, Evaluation, GeneratorSource, Harness, HarnessError, Kernel,
    KernelError, KernelInfo, ReaderSource, RunOptions, SignificanceParameters, TestOutcome,
};

static INFO: KernelInfo = KernelInfo {
    name: "byte_position",
    description: "p-value derived from the first byte",
    parameters: &[],
};

/// Uses the first byte of each bitstream as its p-value (scaled to [0, 1]),
/// once per configuration.
struct FirstByte {
    configurations: usize,
    buffer_size: usize,
    executions: AtomicUsize,
}

impl FirstByte {
    fn new(configurations: usize) -> Self {
        Self {
            configurations,
            buffer_size: 16,
            executions: AtomicUsize::new(0),
        }
    }
}

impl Kernel for FirstByte {
    fn info(&self) -> &KernelInfo {
        &INFO
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn configuration_count(&self) -> usize {
        self.configurations
    }

    fn parameters(&self) -> Vec<(String, String)> {
        vec![("buffer_size".to_string(), self.buffer_size.to_string())]
    }

    fn describe_configuration(
        &self,
        id: usize,
        configuration: &mut randbattery_core::Configuration,
    ) {
        configuration.add_attribute("offset", id.to_string());
    }

    fn execute(
        &self,
        configuration: usize,
        buffer: &BitBuffer,
    ) -> Result<TestOutcome, KernelError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let byte = buffer.bytes()[configuration % buffer.bytes().len()];
        Ok(TestOutcome::new(byte as f64 / 255.0).count("byte", byte as u64))
    }
}

fn options(level: f64, bitstreams: u64, pool_size: usize) -> RunOptions {
    RunOptions::new(
        SignificanceParameters::new(level, 2, bitstreams).unwrap(),
        pool_size,
    )
}

/// Fails with an I/O error after `good` successful fills.
struct FailingSource {
    good: usize,
}

impl BitSource for FailingSource {
    fn name(&self) -> String {
        "failing".to_string()
    }

    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.good == 0 {
            return Err(io::Error::other("device unplugged"));
        }
        self.good -= 1;
        buf.fill(0x80);
        Ok(buf.len())
    }
}

#[test]
fn four_bitstreams_pool_of_two() {
    let kernel = FirstByte::new(1);
    let harness = Harness::new(&kernel, options(0.01, 4, 2)).unwrap();
    let mut source = GeneratorSource::new(Some(1)).unwrap();
    let outcome = harness.run(&mut source).unwrap();

    assert_eq!(outcome.report.bitstreams_tested, 4);
    assert_eq!(outcome.report.test_count(), 4);
    assert_eq!(outcome.stats.flushes, 2);
    assert_eq!(kernel.executions.load(Ordering::SeqCst), 4);
    assert!(outcome.report.evaluation.is_some());
}

#[test]
fn multi_configuration_shares_each_buffer() {
    let kernel = FirstByte::new(3);
    let harness = Harness::new(&kernel, options(0.01, 5, 4)).unwrap();
    let mut source = GeneratorSource::new(Some(2)).unwrap();
    let outcome = harness.run(&mut source).unwrap();

    assert_eq!(outcome.stats.units_collected, 15);
    for (id, cfg) in outcome.report.configurations.iter().enumerate() {
        assert_eq!(cfg.tests.len(), 5);
        assert_eq!(cfg.attribute("offset"), Some(id.to_string().as_str()));
    }
    assert_eq!(outcome.report.parameters[0].name, "buffer_size");
}

#[test]
fn pool_size_one_and_many_agree() {
    let run = |pool_size| {
        let kernel = FirstByte::new(4);
        let harness = Harness::new(&kernel, options(0.05, 9, pool_size)).unwrap();
        let mut source = GeneratorSource::new(Some(99)).unwrap();
        harness.run(&mut source).unwrap().report
    };
    let serial = run(1);
    let parallel = run(7);
    assert_eq!(serial.configurations, parallel.configurations);
    assert_eq!(serial.evaluation, parallel.evaluation);
}

#[test]
fn empty_source_still_finalizes() {
    let kernel = FirstByte::new(2);
    let harness = Harness::new(&kernel, options(0.01, 10, 3)).unwrap();
    let mut source = ReaderSource::new("empty", io::empty());
    let outcome = harness.run(&mut source).unwrap();

    assert_eq!(outcome.report.bitstreams_tested, 0);
    assert_eq!(outcome.stats.flushes, 0);
    assert_eq!(outcome.report.evaluation, Some(Evaluation::Fail));
    for cfg in &outcome.report.configurations {
        assert_eq!(cfg.evaluation, Some(Evaluation::Fail));
        assert_eq!(cfg.metric("tests_run").unwrap().value, "0");
    }
}

#[test]
fn short_read_ends_the_run() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0xAA; 16 * 3 + 5]).unwrap();
    file.flush().unwrap();

    let kernel = FirstByte::new(1);
    let harness = Harness::new(&kernel, options(0.01, 100, 2)).unwrap();
    let reader = std::fs::File::open(file.path()).unwrap();
    let mut source = ReaderSource::new("file", reader);
    let outcome = harness.run(&mut source).unwrap();

    assert_eq!(outcome.report.bitstreams_tested, 3);
    assert_eq!(outcome.report.source, "file");
    let ids: Vec<usize> = outcome.report.configurations[0].tests.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[test]
fn stops_at_requested_bitstream_count() {
    let kernel = FirstByte::new(1);
    let harness = Harness::new(&kernel, options(0.01, 6, 4)).unwrap();
    let mut source = GeneratorSource::new(Some(3)).unwrap();
    let outcome = harness.run(&mut source).unwrap();
    assert_eq!(outcome.report.bitstreams_tested, 6);
    assert_eq!(outcome.report.bitstreams_requested, 6);
}

#[test]
fn cancellation_drains_and_finalizes() {
    let cancel = Arc::new(AtomicBool::new(true));
    let kernel = FirstByte::new(1);
    let harness = Harness::new(&kernel, options(0.01, 50, 2).with_cancel(cancel)).unwrap();
    let mut source = GeneratorSource::new(Some(4)).unwrap();
    let outcome = harness.run(&mut source).unwrap();
    assert!(outcome.report.cancelled);
    assert_eq!(outcome.report.bitstreams_tested, 0);
    assert_eq!(outcome.report.evaluation, Some(Evaluation::Fail));
}

#[test]
fn io_failure_keeps_collected_results() {
    let kernel = FirstByte::new(2);
    let harness = Harness::new(&kernel, options(0.01, 10, 3)).unwrap();
    let mut source = FailingSource { good: 3 };
    let aborted = harness.run(&mut source).unwrap_err();

    assert!(matches!(aborted.error, HarnessError::Io(_)));
    assert_eq!(aborted.report.bitstreams_tested, 3);
    assert_eq!(aborted.report.test_count(), 6);
    assert!(aborted.report.configurations[0].evaluation.is_some());
    assert!(aborted.to_string().contains("device unplugged"));
}

#[test]
fn rejects_invalid_pool_size() {
    let kernel = FirstByte::new(1);
    assert!(Harness::new(&kernel, options(0.01, 1, 0)).is_err());
    assert!(Harness::new(&kernel, options(0.01, 1, 129)).is_err());
}

#[test]
fn constant_data_fails_proportion() {
    // Every p-value is 0: every test fails, the proportion falls outside the band.
    let kernel = FirstByte::new(1);
    let harness = Harness::new(&kernel, options(0.01, 30, 4)).unwrap();
    let mut source = ReaderSource::new("zeros", io::repeat(0));
    let outcome = harness.run(&mut source).unwrap();
    let cfg = &outcome.report.configurations[0];
    assert_eq!(cfg.metric("tests_failed").unwrap().value, "30");
    assert!(!cfg.criterion("proportion of passing sequences").unwrap().passed);
    assert_eq!(outcome.report.evaluation, Some(Evaluation::Fail));
}

#[test]
fn report_round_trips_through_json() {
    let kernel = FirstByte::new(2);
    let harness = Harness::new(&kernel, options(0.01, 3, 2)).unwrap();
    let mut source = GeneratorSource::new(Some(5)).unwrap();
    let report = harness.run(&mut source).unwrap().report;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    std::fs::write(&path, serde_json::to_string_pretty(&report).unwrap()).unwrap();
    let loaded: randbattery_core::Report =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(loaded, report);
}

#[test]
fn report_shows_significance_level_actually_compared() {
    let kernel = FirstByte::new(1);
    let harness = Harness::new(&kernel, options(0.004, 3, 2)).unwrap();
    let mut source = GeneratorSource::new(Some(11)).unwrap();
    let report = harness.run(&mut source).unwrap().report;

    assert_eq!(report.significance_level.value, "0.004");
    let basis = &report.configurations[0].tests[0]
        .criteria
        .iter()
        .find(|c| c.name == "p-value >= significance level")
        .unwrap()
        .basis;
    assert!(basis.ends_with(">= 0.004"), "{basis}");
}
