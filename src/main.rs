use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{debug, LevelFilter};
use std::process::ExitCode;

use ocidiff::{Config, Error, Notifier, Orchestrator, OutputFormat, PathPolicy, Report, RetrievalMode};
use ocidiff::report::RenderText;

#[derive(Parser)]
#[command(author, version, about = "Analyze and compare container images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inventory a single image: [image]
    Analyze(RunArgs),
    /// Compare two images: [image1] [image2]
    Diff(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(help = "Image IDs, image URLs or image archives (.tar, .tar.gz, .tgz)")]
    images: Vec<String>,

    #[arg(short = 'a', long, help = "Run the apt package analyzer")]
    apt: bool,

    #[arg(short = 'n', long, help = "Run the node package analyzer")]
    node: bool,

    #[arg(short = 'p', long, help = "Run the pip package analyzer")]
    pip: bool,

    #[arg(short = 'f', long, help = "Run the file system analyzer")]
    file: bool,

    #[arg(short = 'd', long, help = "Run the build history analyzer")]
    history: bool,

    #[arg(short = 'j', long, help = "JSON output, ordered by analyzer name")]
    json: bool,

    #[arg(short = 's', long, help = "Keep the extracted image file systems after the run")]
    save: bool,

    #[arg(
        short,
        long,
        value_enum,
        default_value = "docker",
        help = "Container engine used to retrieve image IDs and URLs"
    )]
    engine: RetrievalMode,

    #[arg(long, help = "Compare file system paths case-insensitively")]
    case_insensitive_paths: bool,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for info, -vv for debug, -vvv for trace). Also switches to text-based progress"
    )]
    verbose: u8,
}

impl RunArgs {
    fn config(&self) -> Config {
        let analyzers = [
            ("apt", self.apt),
            ("file", self.file),
            ("history", self.history),
            ("node", self.node),
            ("pip", self.pip),
        ]
        .into_iter()
        .filter(|(_, enabled)| *enabled)
        .map(|(name, _)| name.to_string())
        .collect();

        Config {
            analyzers,
            output: if self.json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            persist: self.save,
            retrieval: self.engine,
            paths: PathPolicy {
                case_sensitive: !self.case_insensitive_paths,
            },
        }
    }
}

fn print_report<T: serde::Serialize + RenderText>(report: &Report<T>, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => print!("{}", report.render_text()),
    }
    Ok(())
}

fn run(command: Command) -> Result<()> {
    let (args, is_diff) = match command {
        Command::Analyze(args) => (args, false),
        Command::Diff(args) => (args, true),
    };

    // Setup logging based on verbosity level
    let log_level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(Env::default())
        .filter_level(log_level)
        .init();

    let config = args.config();
    debug!("Configuration: {:?}", config);

    let output = config.output;
    let orchestrator = Orchestrator::new(config, Notifier::new(args.verbose));

    let (saved, failures) = if is_diff {
        let outcome = orchestrator.diff(&args.images)?;
        print_report(&outcome.report, output)?;
        (outcome.saved, outcome.report.check())
    } else {
        let outcome = orchestrator.analyze(&args.images)?;
        print_report(&outcome.report, output)?;
        (outcome.saved, outcome.report.check())
    };

    for path in &saved {
        eprintln!("Image was saved at {}", path.display());
    }
    failures?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let Some(err) = e.downcast_ref::<Error>() else {
                return ExitCode::FAILURE;
            };
            for path in err.saved() {
                eprintln!("Image was saved at {}", path.display());
            }
            if err.is_usage() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
