//! forum-world CLI
//!
//! `run` drives the simulation for a number of ticks; `rebuild-feed` merges
//! existing turn logs into a fresh feed directory.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use forum_world::simulator::{load_or_generate, ConfigError, DEFAULT_CONFIG_FILE_NAME};
use forum_world::{
    rebuild_feed, ActorRuntime, Engine, EngineError, FeedError, LlmActorRuntime,
    LlmRuntimeConfig, PersistError, RunReport, ScriptedRuntime, SimConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "forum-world")]
#[command(about = "Simulate a research community forum of LLM-driven actors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run (or resume) a simulation
    Run(RunArgs),
    /// Merge turn logs into a fresh sharded feed
    RebuildFeed(RebuildArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
struct RunArgs {
    /// Number of ticks to run
    #[arg(short, long, default_value = "20")]
    ticks: u64,

    /// Config file (defaults to ./forum_world.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seed for population and scheduling
    #[arg(short, long)]
    seed: Option<u64>,

    /// Population size used when generating personas
    #[arg(long)]
    population: Option<usize>,

    #[arg(long)]
    actors_per_tick: Option<usize>,

    #[arg(long)]
    turn_limit: Option<u32>,

    #[arg(long)]
    grace_turns: Option<u32>,

    /// Refuse to continue an existing run in the data directory
    #[arg(long)]
    fresh: bool,

    /// Use the scripted runtime instead of an LLM endpoint
    #[arg(long)]
    offline: bool,
}

#[derive(Args, Debug, Clone, PartialEq)]
struct RebuildArgs {
    /// Feed directories or flat JSONL files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output feed directory; must not already hold a feed
    #[arg(short, long)]
    out: PathBuf,

    #[arg(long, default_value = "200")]
    max_events_per_shard: u64,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("failed to create llm runtime: {0}")]
    Runtime(String),
    #[error("failed to install ctrl-c handler: {0}")]
    Signal(String),
    #[error("no personas available")]
    EmptyPopulation,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::RebuildFeed(args) => rebuild(args),
    };
    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn load_config(args: &RunArgs) -> Result<SimConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => SimConfig::from_config_file(path)?,
        None => SimConfig::from_default_sources()?,
    };
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut SimConfig, args: &RunArgs) {
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(population) = args.population {
        config.population = population;
    }
    if let Some(actors_per_tick) = args.actors_per_tick {
        config.actors_per_tick = actors_per_tick;
    }
    if let Some(turn_limit) = args.turn_limit {
        config.turn_limit = turn_limit;
    }
    if let Some(grace_turns) = args.grace_turns {
        config.grace_turns = grace_turns;
    }
    if args.fresh {
        config.resume = false;
    }
}

fn run(args: RunArgs) -> Result<(), CliError> {
    let config = load_config(&args)?;
    if args.offline {
        info!("using scripted runtime");
        return drive(config, ScriptedRuntime::new(), args.ticks);
    }
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE_NAME));
    let llm_config = LlmRuntimeConfig::from_default_sources(&config_path)?;
    let runtime =
        LlmActorRuntime::from_config(llm_config).map_err(|err| CliError::Runtime(err.to_string()))?;
    drive(config, runtime, args.ticks)
}

fn drive<R: ActorRuntime>(config: SimConfig, runtime: R, ticks: u64) -> Result<(), CliError> {
    let personas_path = config.personas_path();
    let population = config.population;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut engine = Engine::open(config, runtime)?;
    let personas = load_or_generate(&personas_path, population, &mut rng)?;
    if personas.is_empty() {
        return Err(CliError::EmptyPopulation);
    }
    for persona in personas {
        engine.add_actor(persona)?;
    }

    let cancel = engine.cancel_token();
    ctrlc::set_handler(move || {
        warn!("interrupt received, stopping after the current tick");
        cancel.cancel();
    })
    .map_err(|err| CliError::Signal(err.to_string()))?;

    let report = engine.run_for(ticks);
    log_report(&report, engine.clock().tick, engine.feed().total());
    engine.close()?;
    Ok(())
}

fn log_report(report: &RunReport, tick: u64, feed_total: u64) {
    info!(
        ticks_run = report.ticks_run,
        turns = report.turns,
        skipped_turns = report.skipped_turns,
        failed_appends = report.failed_appends,
        cancelled = report.cancelled,
        tick,
        feed_total,
        "run finished"
    );
    for (actor_id, turns) in &report.turns_by_actor {
        info!(actor_id = %actor_id, turns, "actor turns");
    }
}

fn rebuild(args: RebuildArgs) -> Result<(), CliError> {
    let report = rebuild_feed(&args.inputs, Path::new(&args.out), args.max_events_per_shard)?;
    println!(
        "inputs: {} records: {} skipped: {} shards: {}",
        report.inputs, report.records, report.skipped, report.shards
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_arguments_parse_with_overrides() {
        let cli = Cli::try_parse_from([
            "forum-world",
            "run",
            "--ticks",
            "5",
            "--data-dir",
            "/tmp/fw",
            "--seed",
            "9",
            "--turn-limit",
            "3",
            "--fresh",
            "--offline",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.ticks, 5);
        assert!(args.fresh);
        assert!(args.offline);

        let mut config = SimConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/fw"));
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.turn_limit, 3);
        assert!(!config.resume);
        assert_eq!(config.grace_turns, SimConfig::default().grace_turns);
    }

    #[test]
    fn rebuild_requires_inputs_and_output() {
        assert!(Cli::try_parse_from(["forum-world", "rebuild-feed", "--out", "x"]).is_err());
        let cli =
            Cli::try_parse_from(["forum-world", "rebuild-feed", "a.jsonl", "feed", "--out", "x"])
                .unwrap();
        let Command::RebuildFeed(args) = cli.command else {
            panic!("expected rebuild-feed");
        };
        assert_eq!(args.inputs.len(), 2);
        assert_eq!(args.max_events_per_shard, 200);
    }
}
