//! CLI for randbattery: NIST SP 800-22 test families over files, stdin or
//! built-in generators.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use randbattery_core::HarnessError;

use config::{GeneratorKind, InputFormat, Overrides, RunConfig};

#[derive(Parser)]
#[command(name = "randbattery")]
#[command(about = "randbattery: statistical test batteries for random bit generators")]
#[command(version = randbattery_core::VERSION)]
struct Cli {
    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the test families and the parameters each accepts
    List,

    /// Run one test family over a sequence of bitstreams
    Run {
        /// Test family name (see `randbattery list`)
        test: String,

        #[command(flatten)]
        args: RunArgs,
    },

    /// Run every test family in turn over the same bits
    Battery {
        #[command(flatten)]
        args: RunArgs,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Input file, or "-" for stdin. Without it a generator supplies the bits.
    #[arg(long)]
    input: Option<String>,

    /// How input bytes are read
    #[arg(long, value_enum)]
    format: Option<InputFormat>,

    /// Generator used when no --input is given
    #[arg(long, value_enum)]
    generator: Option<GeneratorKind>,

    /// Generator seed (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Number of bitstreams to test [default: 100]
    #[arg(long)]
    bitstreams: Option<u64>,

    /// Significance level α [default: 0.01]
    #[arg(long)]
    significance: Option<f64>,

    /// Fractional digits used when reporting α [default: 2]
    #[arg(long)]
    significance_precision: Option<usize>,

    /// Worker threads [default: available parallelism]
    #[arg(long)]
    threads: Option<usize>,

    /// Test parameter as name=value; repeatable
    #[arg(long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the JSON report here
    #[arg(long)]
    output: Option<String>,
}

impl RunArgs {
    fn resolve(self) -> Result<(RunConfig, Vec<String>), HarnessError> {
        let mut config = RunConfig::load(self.config.as_deref())?;
        config.apply(Overrides {
            input: self.input,
            format: self.format,
            generator: self.generator,
            seed: self.seed,
            bitstreams: self.bitstreams,
            significance: self.significance,
            significance_precision: self.significance_precision,
            threads: self.threads,
            output: self.output,
        });
        Ok((config, self.params))
    }
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp_millis().init();
}

fn dispatch(command: Commands) -> Result<(), HarnessError> {
    match command {
        Commands::List => {
            commands::list::run();
            Ok(())
        }
        Commands::Run { test, args } => {
            let (config, params) = args.resolve()?;
            commands::run::run(&test, &config, &params)
        }
        Commands::Battery { args } => {
            let (config, params) = args.resolve()?;
            commands::battery::run(&config, &params)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = dispatch(cli.command) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
