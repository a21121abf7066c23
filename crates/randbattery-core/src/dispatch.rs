//! Bounded worker pool that runs kernel invocations on OS threads.
//!
//! The pool owns `T` slots, allocated once and reused for the whole run.
//! Queuing a unit scans for a free slot and starts a scoped thread for it.
//! When every slot is busy the pool is flushed:
//!
//! 1. start any queued-but-unstarted units,
//! 2. join every started unit (the join-all is the only barrier),
//! 3. collect results sequentially into the [`Report`] and [`Aggregator`],
//!    ordered by (bitstream id, configuration id),
//! 4. mark every slot free.
//!
//! Collection is the only place the report and the running state are
//! mutated, and it runs on the caller's thread, so neither needs a lock.
//! Units within one flush share nothing mutable; they only read the kernel
//! and their own `Arc<BitBuffer>`.

use std::any::Any;
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};

use log::{debug, warn};

use crate::acceptance::{PROBABILITY_PRECISION, SignificanceParameters};
use crate::error::{HarnessError, KernelError};
use crate::kernel::{Kernel, TestOutcome};
use crate::report::{Numeric, Report};
use crate::source::BitBuffer;
use crate::state::Aggregator;

/// Largest accepted pool size.
pub const MAX_POOL_SIZE: usize = 128;

type UnitResult = Result<TestOutcome, KernelError>;

/// One kernel invocation: a configuration applied to a shared bitstream.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub configuration: usize,
    pub buffer: Arc<BitBuffer>,
}

impl WorkItem {
    pub fn new(configuration: usize, buffer: Arc<BitBuffer>) -> Self {
        Self {
            configuration,
            buffer,
        }
    }

    pub fn bitstream(&self) -> usize {
        self.buffer.id()
    }
}

/// A busy slot's unit. `handle` is `None` while the unit is queued but not
/// yet started.
struct Unit<'scope> {
    item: WorkItem,
    handle: Option<ScopedJoinHandle<'scope, UnitResult>>,
}

enum Slot<'scope> {
    Free,
    Busy(Unit<'scope>),
}

impl Slot<'_> {
    fn is_free(&self) -> bool {
        matches!(self, Slot::Free)
    }
}

/// Counters describing pool activity over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub units_started: u64,
    pub units_collected: u64,
    pub kernel_errors: u64,
    /// Units dropped without running because a thread failed to start.
    pub units_abandoned: u64,
    /// Flushes that joined at least one unit, including the final drain.
    pub flushes: u64,
}

/// Validate a requested pool size.
pub fn check_pool_size(pool_size: usize) -> Result<usize, HarnessError> {
    if !(1..=MAX_POOL_SIZE).contains(&pool_size) {
        return Err(HarnessError::validation(format!(
            "pool size {pool_size} outside [1, {MAX_POOL_SIZE}]"
        )));
    }
    Ok(pool_size)
}

/// Worker pool bound to one thread scope and one kernel.
pub struct Dispatcher<'scope, 'env: 'scope, K: Kernel + ?Sized> {
    scope: &'scope Scope<'scope, 'env>,
    kernel: &'env K,
    significance: &'env SignificanceParameters,
    slots: Vec<Slot<'scope>>,
    stats: DispatchStats,
    /// Refuse to start units once this many have started.
    #[cfg(test)]
    start_limit: Option<u64>,
}

impl<'scope, 'env: 'scope, K: Kernel + ?Sized> Dispatcher<'scope, 'env, K> {
    pub fn new(
        scope: &'scope Scope<'scope, 'env>,
        kernel: &'env K,
        significance: &'env SignificanceParameters,
        pool_size: usize,
    ) -> Result<Self, HarnessError> {
        let pool_size = check_pool_size(pool_size)?;
        Ok(Self {
            scope,
            kernel,
            significance,
            slots: (0..pool_size).map(|_| Slot::Free).collect(),
            stats: DispatchStats::default(),
            #[cfg(test)]
            start_limit: None,
        })
    }

    #[cfg(test)]
    pub(crate) fn limit_starts(&mut self, limit: u64) {
        self.start_limit = Some(limit);
    }

    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    /// Units currently occupying a slot.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Queue one unit, flushing first if every slot is busy.
    ///
    /// On a thread start failure the remaining started units are still
    /// joined and collected before the error is returned.
    pub fn dispatch(
        &mut self,
        item: WorkItem,
        report: &mut Report,
        states: &mut Aggregator,
    ) -> Result<(), HarnessError> {
        let index = match self.free_slot() {
            Some(index) => index,
            None => {
                self.flush(report, states)?;
                self.free_slot().ok_or_else(|| {
                    HarnessError::Concurrency("no free slot after flush".to_string())
                })?
            }
        };

        debug!(
            "slot {index}: queue configuration {} bitstream {}",
            item.configuration,
            item.bitstream()
        );
        self.slots[index] = Slot::Busy(Unit { item, handle: None });
        if let Err(err) = self.start(index) {
            self.abandon_unstarted();
            self.join_and_collect(report, states)?;
            return Err(err);
        }
        Ok(())
    }

    /// Start queued units, join every started unit and collect the results.
    /// A no-op when the pool is idle.
    pub fn flush(
        &mut self,
        report: &mut Report,
        states: &mut Aggregator,
    ) -> Result<(), HarnessError> {
        if self.in_flight() == 0 {
            return Ok(());
        }

        let mut start_error = None;
        for index in 0..self.slots.len() {
            let queued = matches!(&self.slots[index], Slot::Busy(unit) if unit.handle.is_none());
            if queued {
                if let Err(err) = self.start(index) {
                    start_error = Some(err);
                    break;
                }
            }
        }
        if start_error.is_some() {
            self.abandon_unstarted();
        }

        self.join_and_collect(report, states)?;
        match start_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Slot::is_free)
    }

    fn start(&mut self, index: usize) -> Result<(), HarnessError> {
        let Slot::Busy(unit) = &mut self.slots[index] else {
            return Ok(());
        };
        if unit.handle.is_some() {
            return Ok(());
        }

        let kernel = self.kernel;
        let configuration = unit.item.configuration;
        let buffer = Arc::clone(&unit.item.buffer);
        #[cfg(test)]
        if self.start_limit.is_some_and(|limit| self.stats.units_started >= limit) {
            return Err(HarnessError::Concurrency(format!(
                "failed to start unit for configuration {configuration}: start limit reached"
            )));
        }
        let handle = thread::Builder::new()
            .name(format!("unit-{configuration}-{}", buffer.id()))
            .spawn_scoped(self.scope, move || kernel.execute(configuration, &buffer))
            .map_err(|e| {
                HarnessError::Concurrency(format!(
                    "failed to start unit for configuration {configuration}: {e}"
                ))
            })?;
        unit.handle = Some(handle);
        self.stats.units_started += 1;
        Ok(())
    }

    /// Free every slot whose unit never started.
    fn abandon_unstarted(&mut self) {
        for slot in &mut self.slots {
            if matches!(slot, Slot::Busy(unit) if unit.handle.is_none()) {
                if let Slot::Busy(unit) = std::mem::replace(slot, Slot::Free) {
                    warn!(
                        "abandoning unstarted unit: configuration {} bitstream {}",
                        unit.item.configuration,
                        unit.item.bitstream()
                    );
                }
                self.stats.units_abandoned += 1;
            }
        }
    }

    fn join_and_collect(
        &mut self,
        report: &mut Report,
        states: &mut Aggregator,
    ) -> Result<(), HarnessError> {
        let mut finished: Vec<(WorkItem, UnitResult)> = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            let Slot::Busy(unit) = std::mem::replace(slot, Slot::Free) else {
                continue;
            };
            let Some(handle) = unit.handle else {
                continue;
            };
            let result = handle.join().unwrap_or_else(|payload| {
                Err(KernelError::Panicked {
                    detail: panic_message(payload.as_ref()),
                })
            });
            finished.push((unit.item, result));
        }
        if finished.is_empty() {
            return Ok(());
        }

        self.stats.flushes += 1;
        finished.sort_by_key(|(item, _)| (item.bitstream(), item.configuration));
        debug!(
            "flush {}: collecting {} unit(s)",
            self.stats.flushes,
            finished.len()
        );
        for (item, result) in finished {
            if result.is_err() {
                self.stats.kernel_errors += 1;
            }
            collect_unit(&item, result, self.significance, report, states)?;
            self.stats.units_collected += 1;
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Write one finished unit into the report and the running state.
fn collect_unit(
    item: &WorkItem,
    result: UnitResult,
    significance: &SignificanceParameters,
    report: &mut Report,
    states: &mut Aggregator,
) -> Result<(), HarnessError> {
    let configuration = report.configuration_mut(item.configuration)?;
    let state = states.get_mut(item.configuration).ok_or_else(|| {
        HarnessError::Report(format!(
            "no running state for configuration {}",
            item.configuration
        ))
    })?;
    let test = configuration.add_test(item.bitstream());

    match result {
        Ok(outcome) => {
            let p = outcome.p_value;
            let alpha = significance.level();
            test.calculations.extend(outcome.calculations);
            test.calculation_sets.extend(outcome.calculation_sets);
            test.add_calculation("p_value", Numeric::real(p, PROBABILITY_PRECISION));
            test.criteria.extend(outcome.criteria);
            test.add_criterion(
                "p-value in range",
                (0.0..=1.0).contains(&p),
                format!("0 <= p-value ({p:.6}) <= 1"),
            );
            test.add_criterion(
                "p-value >= significance level",
                p >= alpha,
                format!("p-value ({p:.6}) >= {}", significance.level_numeric().value),
            );
            let evaluation = test.add_evaluation();
            state.record_pass_fail(evaluation.is_pass(), Some(p));
        }
        Err(err) => {
            warn!(
                "configuration {} bitstream {}: {err}",
                item.configuration,
                item.bitstream()
            );
            test.add_criterion("kernel executed", false, err.to_string());
            test.error = Some(err);
            test.add_evaluation();
            state.record_error();
        }
    }
    state.record_bits(item.buffer.ones(), item.buffer.zeros());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelInfo;
    use crate::report::Evaluation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static INFO: KernelInfo = KernelInfo {
        name: "ones_fraction",
        description: "p-value is the fraction of ones",
        parameters: &[],
    };

    /// Reports the fraction of ones as its p-value. Can be told to fail on
    /// one configuration or to panic on one bitstream.
    struct OnesFraction {
        configurations: usize,
        fail_config: Option<usize>,
        panic_on: Option<usize>,
        concurrent: AtomicUsize,
        peak: AtomicUsize,
    }

    impl OnesFraction {
        fn new(configurations: usize) -> Self {
            Self {
                configurations,
                fail_config: None,
                panic_on: None,
                concurrent: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl Kernel for OnesFraction {
        fn info(&self) -> &KernelInfo {
            &INFO
        }

        fn buffer_size(&self) -> usize {
            2
        }

        fn configuration_count(&self) -> usize {
            self.configurations
        }

        fn parameters(&self) -> Vec<(String, String)> {
            Vec::new()
        }

        fn execute(&self, configuration: usize, buffer: &BitBuffer) -> UnitResult {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(2));
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            if self.fail_config == Some(configuration) {
                return Err(KernelError::Allocation { bytes: 64 });
            }
            if self.panic_on == Some(buffer.id()) {
                panic!("kaboom");
            }
            Ok(TestOutcome::new(buffer.ones() as f64 / buffer.len_bits() as f64)
                .count("ones", buffer.ones()))
        }
    }

    fn buffers(n: usize) -> Vec<Arc<BitBuffer>> {
        (0..n)
            .map(|i| Arc::new(BitBuffer::new(i, vec![(i as u8).wrapping_mul(37), 0xA5])))
            .collect()
    }

    fn run_pool(
        kernel: &OnesFraction,
        pool_size: usize,
        streams: usize,
    ) -> (Report, Aggregator, DispatchStats) {
        let significance = SignificanceParameters::new(0.01, 2, streams as u64).unwrap();
        let configs = kernel.configuration_count();
        let mut report = Report::new("ones_fraction", configs, significance.level_numeric(), 4);
        let mut states = Aggregator::new(configs);
        let stats = thread::scope(|scope| {
            let mut pool = Dispatcher::new(scope, kernel, &significance, pool_size).unwrap();
            for buffer in buffers(streams) {
                for cfg in 0..configs {
                    let item = WorkItem::new(cfg, Arc::clone(&buffer));
                    pool.dispatch(item, &mut report, &mut states).unwrap();
                }
            }
            pool.flush(&mut report, &mut states).unwrap();
            assert_eq!(pool.in_flight(), 0);
            pool.stats()
        });
        (report, states, stats)
    }

    #[test]
    fn four_streams_pool_of_two_flush_twice() {
        let kernel = OnesFraction::new(1);
        let (report, states, stats) = run_pool(&kernel, 2, 4);
        assert_eq!(report.configurations[0].tests.len(), 4);
        assert_eq!(stats.flushes, 2);
        assert_eq!(stats.units_started, 4);
        assert_eq!(stats.units_collected, 4);
        assert_eq!(states.get(0).unwrap().tests_run, 4);
        assert!(kernel.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn pool_size_does_not_change_results() {
        let serial = run_pool(&OnesFraction::new(3), 1, 7).0;
        let parallel = run_pool(&OnesFraction::new(3), 5, 7).0;
        assert_eq!(serial.configurations, parallel.configurations);
        let ids: Vec<usize> = parallel.configurations[2].tests.iter().map(|t| t.id).collect();
        assert_eq!(ids, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn kernel_errors_are_typed_per_test() {
        let mut kernel = OnesFraction::new(2);
        kernel.fail_config = Some(1);
        let (report, states, stats) = run_pool(&kernel, 3, 3);
        let failed = &report.configurations[1].tests[0];
        assert_eq!(failed.error, Some(KernelError::Allocation { bytes: 64 }));
        assert_eq!(failed.evaluation, Some(Evaluation::Fail));
        assert_eq!(states.get(1).unwrap().tests_run, 0);
        assert_eq!(states.get(1).unwrap().tests_errored, 3);
        assert_eq!(states.get(0).unwrap().tests_run, 3);
        assert_eq!(stats.kernel_errors, 3);
    }

    #[test]
    fn tests_carry_p_value_criteria() {
        let (report, _, _) = run_pool(&OnesFraction::new(1), 2, 1);
        let test = &report.configurations[0].tests[0];
        assert_eq!(test.calculation("p_value").unwrap().precision, 6);
        assert!(test.criteria.iter().any(|c| c.name == "p-value in range" && c.passed));
        assert_eq!(test.evaluation, Some(Evaluation::Pass));
    }

    #[test]
    fn flush_of_idle_pool_is_not_counted() {
        let kernel = OnesFraction::new(1);
        let significance = SignificanceParameters::new(0.01, 2, 1).unwrap();
        let mut report = Report::new("x", 1, significance.level_numeric(), 1);
        let mut states = Aggregator::new(1);
        thread::scope(|scope| {
            let mut pool = Dispatcher::new(scope, &kernel, &significance, 4).unwrap();
            pool.flush(&mut report, &mut states).unwrap();
            assert_eq!(pool.stats().flushes, 0);
        });
    }

    #[test]
    fn pool_size_is_bounded() {
        assert!(check_pool_size(0).is_err());
        assert!(check_pool_size(129).is_err());
        assert_eq!(check_pool_size(128).unwrap(), 128);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let message: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(message.as_ref()), "boom");
        let message: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(message.as_ref()), "owned");
    }

    #[test]
    fn panicking_kernel_is_recorded_and_run_continues() {
        let mut kernel = OnesFraction::new(1);
        kernel.panic_on = Some(1);
        let (report, states, stats) = run_pool(&kernel, 2, 3);

        let tests = &report.configurations[0].tests;
        assert_eq!(tests.len(), 3);
        assert!(matches!(
            &tests[1].error,
            Some(KernelError::Panicked { detail }) if detail == "kaboom"
        ));
        assert_eq!(tests[1].evaluation, Some(Evaluation::Fail));
        assert!(tests[0].error.is_none() && tests[2].error.is_none());

        let state = states.get(0).unwrap();
        assert_eq!(state.tests_errored, 1);
        assert_eq!(state.tests_run, 2);
        assert_eq!(stats.units_started, 3);
        assert_eq!(stats.units_collected, 3);
        assert_eq!(stats.kernel_errors, 1);
        assert_eq!(stats.flushes, 2);
    }

    #[test]
    fn start_failure_collects_started_units() {
        let kernel = OnesFraction::new(1);
        let significance = SignificanceParameters::new(0.01, 2, 2).unwrap();
        let mut report = Report::new("ones_fraction", 1, significance.level_numeric(), 2);
        let mut states = Aggregator::new(1);
        let streams = buffers(2);
        let (err, stats, in_flight) = thread::scope(|scope| {
            let mut pool = Dispatcher::new(scope, &kernel, &significance, 2).unwrap();
            pool.limit_starts(1);
            let first = WorkItem::new(0, Arc::clone(&streams[0]));
            pool.dispatch(first, &mut report, &mut states).unwrap();
            let second = WorkItem::new(0, Arc::clone(&streams[1]));
            let err = pool.dispatch(second, &mut report, &mut states).unwrap_err();
            (err, pool.stats(), pool.in_flight())
        });

        assert!(matches!(err, HarnessError::Concurrency(_)));
        assert_eq!(in_flight, 0);
        assert_eq!(stats.units_started, 1);
        assert_eq!(stats.units_collected, 1);
        assert_eq!(stats.units_abandoned, 1);
        assert_eq!(stats.flushes, 1);
        let ids: Vec<usize> = report.configurations[0].tests.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0]);
        assert_eq!(states.get(0).unwrap().tests_run, 1);
    }
}
