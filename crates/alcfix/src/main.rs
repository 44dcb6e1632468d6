mod report;
mod scenario;

use std::path::{Path, PathBuf};
use std::process;

use alcfix_core::config::{parse_number, BootArgs};
use alcfix_core::facts::{builtin, FactTable};
use alcfix_core::prelude::{ModelMask, Orchestrator, RecordingClock};
use alcfix_core::resources::Lz4Decompressor;
use alcfix_core::types::{HardwareKey, Platform};
use alcfix_utils::{info, init_logging, init_logging_with_level, LogFormat, LogGuard, LoggingError};
use clap::{Parser, Subcommand, ValueEnum};

use crate::report::{FactsReport, ReplayReport};
use crate::scenario::{load_images, replay, Machine, Scenario};

/// Replay HDA driver load sequences through the alcfix patching engine.
#[derive(Parser, Debug)]
#[command(name = "alcfix")]
#[command(version)]
#[command(about = "Replay HDA driver load sequences through the alcfix patching engine", long_about = None)]
struct Cli
{
    /// JSON fact table to use instead of the built-in one
    #[arg(long, global = true)]
    facts: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Replay a recorded boot scenario
    Replay
    {
        /// Scenario file
        scenario: PathBuf,
        /// Boot-arguments line (defaults to the scenario's)
        #[arg(long, env = "ALCFIX_BOOT_ARGS", allow_hyphen_values = true)]
        boot_args: Option<String>,
        /// Resource files in the fact table are size-prefixed LZ4 blocks
        #[arg(long, default_value_t = false)]
        lz4: bool,
    },
    /// List the fact table
    Facts,
    /// Print the first controller entry matching a hardware identity
    Match
    {
        /// PCI vendor id (decimal or 0x hex)
        #[arg(long, value_parser = parse_id)]
        vendor: u32,
        /// PCI device id
        #[arg(long, value_parser = parse_id)]
        device: u32,
        /// PCI revision id
        #[arg(long, value_parser = parse_id)]
        revision: u32,
        /// Framebuffer platform id
        #[arg(long, value_parser = parse_id)]
        platform: Option<u32>,
        /// Machine model
        #[arg(long, value_enum, default_value_t = Model::Any)]
        model: Model,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Model
{
    Laptop,
    Desktop,
    Any,
}

impl From<Model> for ModelMask
{
    fn from(model: Model) -> Self
    {
        match model {
            Model::Laptop => ModelMask::LAPTOP,
            Model::Desktop => ModelMask::DESKTOP,
            Model::Any => ModelMask::ANY,
        }
    }
}

fn parse_id(value: &str) -> Result<u32, String>
{
    parse_number("id", value).map_err(|err| err.to_string())
}

fn main()
{
    let cli = Cli::parse();

    let _guard = match start_logging(cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn start_logging(verbose: bool) -> Result<LogGuard, LoggingError>
{
    if verbose {
        let format = std::env::var(alcfix_utils::logging::FORMAT_VAR)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(LogFormat::Pretty);
        init_logging_with_level(alcfix_utils::LogLevel::Debug, format)
    } else {
        init_logging()
    }
}

fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    let facts = load_facts(cli.facts.as_deref())?;
    match cli.command {
        Commands::Replay {
            scenario,
            boot_args,
            lz4,
        } => {
            info!("Replaying {}", scenario.display());
            let report = run_replay(&scenario, boot_args.as_deref(), facts, lz4)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{report}");
            }
            Ok(())
        }
        Commands::Facts => {
            let report = FactsReport::collect(&facts);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{report}");
            }
            Ok(())
        }
        Commands::Match {
            vendor,
            device,
            revision,
            platform,
            model,
        } => {
            let mut key = HardwareKey::new(vendor, device, revision);
            if let Some(platform) = platform {
                key = key.with_platform(Platform::Id(platform));
            }
            let entry = facts
                .match_controller(&key, model.into())
                .and_then(|matched| facts.controller(matched).map(|entry| (matched.index(), entry)));
            match (entry, cli.json) {
                (Some((_, entry)), true) => println!("{}", serde_json::to_string_pretty(entry)?),
                (Some((index, entry)), false) => println!(
                    "[{index}] {} ({} patches, revisions {:?}, platform {})",
                    entry.name,
                    entry.patches.len(),
                    entry.revisions.as_slice(),
                    entry.platform
                ),
                (None, true) => println!("null"),
                (None, false) => println!("No controller entry matches {key}"),
            }
            Ok(())
        }
    }
}

fn load_facts(path: Option<&Path>) -> Result<FactTable, Box<dyn std::error::Error>>
{
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            let facts: FactTable = serde_json::from_str(&json)?;
            info!(
                "Loaded {} controller and {} vendor entries from {}",
                facts.controllers.len(),
                facts.vendors.len(),
                path.display()
            );
            Ok(facts)
        }
        None => Ok(builtin::table().clone()),
    }
}

fn run_replay(
    path: &Path,
    boot_args: Option<&str>,
    facts: FactTable,
    lz4: bool,
) -> Result<ReplayReport, Box<dyn std::error::Error>>
{
    let scenario = Scenario::from_path(path)?;
    let args = BootArgs::parse(boot_args.unwrap_or(&scenario.boot_args));

    let mut machine = Machine::build(&scenario)?;
    let mut builder = Orchestrator::builder(scenario.kernel)
        .facts(facts)
        .boot_args(args)
        .clock(RecordingClock::default());
    if lz4 {
        builder = builder.decompressor(Lz4Decompressor);
    }
    let mut orchestrator = builder.build();
    let mut substrate = load_images(&scenario, &mut orchestrator)?;
    let events = replay(&scenario, &mut machine, &mut orchestrator, &mut substrate)?;
    Ok(ReplayReport::collect(&orchestrator, &machine, events))
}
