//! Run configuration: defaults, an optional JSON file, then command-line
//! flags, each layer overriding the previous one.

use std::fs::File;
use std::io::{self, BufReader};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::ValueEnum;
use randbattery_core::{
    AsciiBitSource, BitSource, GeneratorSource, HarnessError, MAX_POOL_SIZE, Parameters,
    ReaderSource, RunOptions, Sha256CounterSource, SignificanceParameters,
};
use serde::Deserialize;

/// How bytes read from `--input` are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Raw bytes, MSB first.
    #[default]
    Binary,
    /// '0'/'1' characters; everything else is skipped.
    Ascii,
}

/// Generator used when no `--input` is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
pub enum GeneratorKind {
    #[default]
    #[serde(rename = "stdrng")]
    #[value(name = "stdrng")]
    StdRng,
    #[serde(rename = "sha256")]
    #[value(name = "sha256")]
    Sha256,
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .min(MAX_POOL_SIZE)
}

/// Everything a `run` or `battery` invocation needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// File path, or `-` for stdin. `None` selects the generator.
    pub input: Option<String>,
    pub format: InputFormat,
    pub generator: GeneratorKind,
    pub seed: Option<u64>,
    pub bitstreams: u64,
    pub significance: f64,
    pub significance_precision: usize,
    pub threads: usize,
    /// Test parameters as a JSON object (`{"block_length": 128}`).
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Where the JSON report is written.
    pub output: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input: None,
            format: InputFormat::Binary,
            generator: GeneratorKind::StdRng,
            seed: None,
            bitstreams: 100,
            significance: 0.01,
            significance_precision: 2,
            threads: default_threads(),
            params: serde_json::Map::new(),
            output: None,
        }
    }
}

/// Flag values; `None` leaves the configured value untouched.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub input: Option<String>,
    pub format: Option<InputFormat>,
    pub generator: Option<GeneratorKind>,
    pub seed: Option<u64>,
    pub bitstreams: Option<u64>,
    pub significance: Option<f64>,
    pub significance_precision: Option<usize>,
    pub threads: Option<usize>,
    pub output: Option<String>,
}

impl RunConfig {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, HarnessError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Io(io::Error::new(e.kind(), format!("{}: {e}", path.display())))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            HarnessError::validation(format!("config {}: {e}", path.display()))
        })
    }

    pub fn apply(&mut self, overrides: Overrides) {
        let Overrides {
            input,
            format,
            generator,
            seed,
            bitstreams,
            significance,
            significance_precision,
            threads,
            output,
        } = overrides;
        if input.is_some() {
            self.input = input;
        }
        if let Some(format) = format {
            self.format = format;
        }
        if let Some(generator) = generator {
            self.generator = generator;
        }
        if seed.is_some() {
            self.seed = seed;
        }
        if let Some(bitstreams) = bitstreams {
            self.bitstreams = bitstreams;
        }
        if let Some(significance) = significance {
            self.significance = significance;
        }
        if let Some(precision) = significance_precision {
            self.significance_precision = precision;
        }
        if let Some(threads) = threads {
            self.threads = threads;
        }
        if output.is_some() {
            self.output = output;
        }
    }

    /// File parameters overlaid with `name=value` assignments.
    pub fn parameters<S: AsRef<str>>(&self, assignments: &[S]) -> Result<Parameters, HarnessError> {
        let mut params = Parameters::from_json(&self.params)?;
        params.merge(&Parameters::parse_assignments(assignments)?);
        Ok(params)
    }

    pub fn run_options(&self, cancel: Arc<AtomicBool>) -> Result<RunOptions, HarnessError> {
        let significance = SignificanceParameters::new(
            self.significance,
            self.significance_precision,
            self.bitstreams,
        )?;
        Ok(RunOptions::new(significance, self.threads).with_cancel(cancel))
    }

    pub fn reads_stdin(&self) -> bool {
        self.input.as_deref() == Some("-")
    }

    /// Fix the generator seed so every reopened source yields the same bits.
    pub fn pin_seed(&mut self) -> Result<u64, HarnessError> {
        if let Some(seed) = self.seed {
            return Ok(seed);
        }
        let seed = GeneratorSource::new(None)?.seed();
        self.seed = Some(seed);
        Ok(seed)
    }

    pub fn open_source(&self) -> Result<Box<dyn BitSource>, HarnessError> {
        let source: Box<dyn BitSource> = match self.input.as_deref() {
            None => match self.generator {
                GeneratorKind::StdRng => Box::new(GeneratorSource::new(self.seed)?),
                GeneratorKind::Sha256 => Box::new(Sha256CounterSource::new(self.seed)?),
            },
            Some("-") => match self.format {
                InputFormat::Binary => Box::new(ReaderSource::new("stdin", io::stdin())),
                InputFormat::Ascii => {
                    Box::new(AsciiBitSource::new("stdin", BufReader::new(io::stdin())))
                }
            },
            Some(path) => {
                let file = File::open(path).map_err(|e| {
                    HarnessError::Io(io::Error::new(e.kind(), format!("{path}: {e}")))
                })?;
                let reader = BufReader::new(file);
                match self.format {
                    InputFormat::Binary => Box::new(ReaderSource::new(path, reader)),
                    InputFormat::Ascii => Box::new(AsciiBitSource::new(path, reader)),
                }
            }
        };
        Ok(source)
    }
}
