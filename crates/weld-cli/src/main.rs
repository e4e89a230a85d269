//! Runs the kernel-fusion fallback scenarios on the host executor and prints
//! the fallback warnings interleaved with each scenario's verdict.
//!
//! ```bash
//! weld abort-internalization --no-caching
//! WELD_RT_WARNING_LEVEL=0 weld abort-fusion
//! RUST_LOG=weld::fusion=warn weld --log-warnings
//! ```

mod scenarios;

use clap::{Parser, Subcommand};
use scenarios::{ScenarioRunner, Verdict};
use weld::FusionConfig;

#[derive(Parser, Debug)]
#[command(name = "weld")]
#[command(about = "Kernel-fusion fallback scenarios")]
#[command(version)]
struct Args {
    /// Verbosity of fallback warnings; 0 silences them
    #[arg(long, env = FusionConfig::WARNING_LEVEL_VAR, default_value_t = 1)]
    warning_level: u32,

    /// Analyse every session from scratch instead of reusing cached results
    #[arg(long)]
    no_caching: bool,

    /// Route fallback warnings through the logger instead of stdout
    #[arg(long)]
    log_warnings: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Kernels whose launch geometry rules out fusion
    AbortFusion,
    /// Buffers whose promotion requests cannot be honoured
    AbortInternalization,
    /// Both of the above
    All,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = FusionConfig::from_env().with_warning_level(args.warning_level);
    if args.no_caching {
        config = config.with_caching(false);
    }
    FusionConfig::init_global(config)
        .map_err(|c| anyhow::anyhow!("fusion config already initialised with {c:?}"))?;
    log::debug!("running with {:?}", FusionConfig::global());

    let command = args.command.unwrap_or(Command::All);
    let mut runner =
        ScenarioRunner::from_global(std::io::stdout()).with_log_warnings(args.log_warnings);
    let mut verdicts = Vec::new();
    if matches!(command, Command::AbortInternalization | Command::All) {
        verdicts.extend(runner.abort_internalization()?);
    }
    if matches!(command, Command::AbortFusion | Command::All) {
        verdicts.extend(runner.abort_fusion()?);
    }

    let failed = verdicts.iter().filter(|v| **v != Verdict::Ok).count();
    if let Some(stats) = runner.cache_stats() {
        log::info!("fusion cache: {} hits, {} misses", stats.hits, stats.misses);
    }
    anyhow::ensure!(failed == 0, "{failed} of {} scenarios failed", verdicts.len());
    Ok(())
}
