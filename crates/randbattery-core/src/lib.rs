//! # randbattery-core
//!
//! **Concurrent execution engine and acceptance model for statistical
//! randomness test batteries.**
//!
//! Each test family is a [`Kernel`] plugin. The [`Harness`] pulls
//! fixed-size bitstreams from a [`BitSource`], fans every bitstream out
//! across the family's configurations on a bounded worker pool, and
//! finalizes a hierarchical [`Report`] with the acceptance criteria that
//! decide pass/fail.
//!
//! ## Quick Start
//!
//! ```no_run
//! use randbattery_core::{GeneratorSource, Harness, Kernel, RunOptions, SignificanceParameters};
//!
//! fn check(kernel: &dyn Kernel) {
//!     let significance = SignificanceParameters::new(0.01, 2, 100).unwrap();
//!     let harness = Harness::new(kernel, RunOptions::new(significance, 8)).unwrap();
//!     let mut source = GeneratorSource::new(Some(42)).unwrap();
//!     let outcome = harness.run(&mut source).unwrap();
//!     println!("{:?}", outcome.report.evaluation);
//! }
//! ```
//!
//! ## Architecture
//!
//! Source → Execution loop → Dispatcher (worker slots) → Collection
//! (Report + running state) → Finalize (acceptance math)
//!
//! Kernels run concurrently but never mutate shared state; the report and
//! the per-configuration counters are written only during the sequential
//! collection phase of a flush.

pub mod acceptance;
pub mod dispatch;
pub mod error;
pub mod harness;
pub mod kernel;
pub mod params;
pub mod report;
pub mod source;
pub mod state;

pub use acceptance::{
    ConfusionMatrix, MinimumTestCount, ProportionOutcome, SignificanceParameters,
    UniformityOutcome, confusion_matrix, minimum_test_count, proportion_criterion,
    uniformity_criterion,
};
pub use dispatch::{DispatchStats, Dispatcher, MAX_POOL_SIZE, WorkItem};
pub use error::{HarnessError, KernelError, RunAborted};
pub use harness::{Harness, RunOptions, RunOutcome};
pub use kernel::{Kernel, KernelBuilder, KernelEntry, KernelInfo, TestOutcome};
pub use params::{ParameterKind, ParameterSpec, Parameters, ResolvedParameters};
pub use report::{Configuration, Criterion, Evaluation, Numeric, Report, Test};
pub use source::{
    AsciiBitSource, BitBuffer, BitSource, GeneratorSource, ReaderSource, Sha256CounterSource,
};
pub use state::{Aggregator, ConfigurationState};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
