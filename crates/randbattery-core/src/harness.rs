//! Execution loop: pulls fixed-size buffers from a source, fans each one out
//! across every configuration through the worker pool, and finalizes the
//! report exactly once.
//!
//! Architecture:
//! 1. Validate pool size, buffer size and configuration count
//! 2. Pre-execution: echo parameters, attach configuration attributes
//! 3. Loop: fill a buffer, wrap it in an `Arc`, dispatch one unit per
//!    configuration; stop on short read, cancellation, or once the requested
//!    bitstream count has been dispatched
//! 4. Drain the pool
//! 5. Finalize every configuration, even when nothing was tested

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::{error, info, warn};

use crate::acceptance::{SignificanceParameters, finalize_configuration};
use crate::dispatch::{DispatchStats, Dispatcher, WorkItem, check_pool_size};
use crate::error::{HarnessError, RunAborted};
use crate::kernel::Kernel;
use crate::report::Report;
use crate::source::{BitBuffer, BitSource};
use crate::state::Aggregator;

/// Run-wide settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub significance: SignificanceParameters,
    /// Concurrent kernel invocations, 1..=128.
    pub pool_size: usize,
    /// When set to `true`, no further buffers are requested.
    pub cancel: Option<Arc<AtomicBool>>,
    #[cfg(test)]
    start_limit: Option<u64>,
}

impl RunOptions {
    pub fn new(significance: SignificanceParameters, pool_size: usize) -> Self {
        Self {
            significance,
            pool_size,
            cancel: None,
            #[cfg(test)]
            start_limit: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// A completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: Report,
    pub stats: DispatchStats,
}

/// Generic engine instantiated per test family.
pub struct Harness<'k, K: Kernel + ?Sized> {
    kernel: &'k K,
    options: RunOptions,
}

impl<'k, K: Kernel + ?Sized> Harness<'k, K> {
    /// Validate the kernel's declared shape against the run options.
    pub fn new(kernel: &'k K, options: RunOptions) -> Result<Self, HarnessError> {
        check_pool_size(options.pool_size)?;
        if kernel.buffer_size() == 0 {
            return Err(HarnessError::validation(format!(
                "{}: buffer size must be at least one byte",
                kernel.name()
            )));
        }
        if kernel.configuration_count() == 0 {
            return Err(HarnessError::validation(format!(
                "{}: at least one configuration is required",
                kernel.name()
            )));
        }
        Ok(Self { kernel, options })
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Consume bitstreams from `source` and return the finalized report.
    ///
    /// A fatal error (source I/O, thread start) still drains the pool and
    /// finalizes whatever was collected; that report travels in
    /// [`RunAborted`].
    pub fn run(&self, source: &mut dyn BitSource) -> Result<RunOutcome, RunAborted> {
        let kernel = self.kernel;
        let significance = &self.options.significance;
        let configurations = kernel.configuration_count();

        let mut report = Report::new(
            kernel.name(),
            configurations,
            significance.level_numeric(),
            significance.bitstream_count(),
        );
        report.source = source.name();
        for (name, value) in kernel.parameters() {
            report.add_parameter(name, value);
        }
        for (id, configuration) in report.configurations.iter_mut().enumerate() {
            kernel.describe_configuration(id, configuration);
        }
        let mut states = Aggregator::new(configurations);

        info!(
            "{}: {} configuration(s), up to {} bitstream(s) of {} bytes from {}, pool size {}",
            kernel.name(),
            configurations,
            significance.bitstream_count(),
            kernel.buffer_size(),
            report.source,
            self.options.pool_size
        );

        let (stats, result) = thread::scope(|scope| {
            let pool = Dispatcher::new(scope, kernel, significance, self.options.pool_size);
            let mut pool = match pool {
                Ok(pool) => pool,
                Err(err) => return (DispatchStats::default(), Err(err)),
            };
            #[cfg(test)]
            if let Some(limit) = self.options.start_limit {
                pool.limit_starts(limit);
            }
            let fed = self.feed(&mut pool, source, &mut report, &mut states);
            let drained = pool.flush(&mut report, &mut states);
            (pool.stats(), fed.and(drained))
        });

        self.finalize(&mut report, &states);

        match result {
            Ok(()) => {
                info!(
                    "{}: {} bitstream(s), {} unit(s) in {} flush(es), {} kernel error(s)",
                    kernel.name(),
                    report.bitstreams_tested,
                    stats.units_collected,
                    stats.flushes,
                    stats.kernel_errors
                );
                Ok(RunOutcome { report, stats })
            }
            Err(err) => {
                error!("{}: run aborted: {err}", kernel.name());
                Err(RunAborted {
                    error: err,
                    report: Box::new(report),
                })
            }
        }
    }

    fn feed<'scope, 'env>(
        &self,
        pool: &mut Dispatcher<'scope, 'env, K>,
        source: &mut dyn BitSource,
        report: &mut Report,
        states: &mut Aggregator,
    ) -> Result<(), HarnessError> {
        let buffer_size = self.kernel.buffer_size();
        let wanted = self.options.significance.bitstream_count();

        while report.bitstreams_tested < wanted {
            if self.options.cancelled() {
                info!(
                    "cancelled after {} bitstream(s); draining",
                    report.bitstreams_tested
                );
                report.cancelled = true;
                break;
            }

            let mut bytes = vec![0u8; buffer_size];
            let filled = source.fill(&mut bytes)?;
            if filled < buffer_size {
                if filled > 0 {
                    warn!(
                        "short read: {filled} of {buffer_size} bytes; ending after {} bitstream(s)",
                        report.bitstreams_tested
                    );
                } else {
                    info!(
                        "source exhausted after {} bitstream(s)",
                        report.bitstreams_tested
                    );
                }
                break;
            }

            let buffer = Arc::new(BitBuffer::new(report.bitstreams_tested as usize, bytes));
            let mut queued = 0;
            let mut failure = None;
            for configuration in 0..self.kernel.configuration_count() {
                let item = WorkItem::new(configuration, Arc::clone(&buffer));
                if let Err(err) = pool.dispatch(item, report, states) {
                    failure = Some(err);
                    break;
                }
                queued += 1;
            }
            // A bitstream with any recorded test counts as supplied.
            if queued > 0 {
                report.bitstreams_tested += 1;
            }
            if let Some(err) = failure {
                return Err(err);
            }
        }
        Ok(())
    }

    fn finalize(&self, report: &mut Report, states: &Aggregator) {
        let supplied = report.bitstreams_tested;
        for (configuration, state) in report.configurations.iter_mut().zip(states.iter()) {
            self.kernel
                .finalize_configuration(configuration.id, state, configuration);
            finalize_configuration(configuration, state, &self.options.significance, supplied);
        }
        let evaluation = report.add_evaluation();
        let passed = report
            .configurations
            .iter()
            .filter(|c| c.evaluation.is_some_and(|e| e.is_pass()))
            .count();
        info!(
            "{}: {evaluation} ({passed}/{} configuration(s) passed)",
            self.kernel.name(),
            report.configurations.len()
        );
    }
}
