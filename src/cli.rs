//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::action::ActionRegistry;
use crate::domain::config::EvaluationConfig;
use crate::domain::config_validation::validate_data_config;
use crate::domain::error::TradeSimError;
use crate::domain::evaluator::{EvaluationResult, Evaluator};
use crate::domain::setup::Setup;
use crate::domain::summary::{Summary, SummaryStats};
use crate::logging;
use crate::ports::candle_port::CandleSource;
use crate::ports::config_port::ConfigPort;
use crate::ports::override_port::OverrideSource;

#[derive(Parser, Debug)]
#[command(name = "tradesim", about = "Trade lifecycle backtester")]
pub struct Cli {
    /// Log level for the tradesim target; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = logging::DEFAULT_LEVEL)]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay setups against historical candles and print the summary
    Evaluate {
        #[arg(short, long)]
        config: PathBuf,
        /// Per-trade results CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file and its setups
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    if let Err(e) = logging::init_logging(&cli.log_level) {
        eprintln!("warning: {e}");
    }

    match cli.command {
        Command::Evaluate { config, output } => run_evaluate(&config, output.as_deref()),
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    })
}

/// Data paths in the config are relative to the config file.
pub fn config_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn required(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, TradeSimError> {
    config
        .get_string(section, key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| TradeSimError::ConfigMissing {
            section: section.into(),
            key: key.into(),
        })
}

/// Keep setups for the configured symbol, in file order.
pub fn select_setups(setups: Vec<Setup>, symbol: &str) -> Vec<Setup> {
    let total = setups.len();
    let selected: Vec<Setup> = setups.into_iter().filter(|s| s.symbol == symbol).collect();
    if selected.len() < total {
        warn!(
            skipped = total - selected.len(),
            symbol, "ignoring setups for other symbols"
        );
    }
    selected
}

/// Evaluate every setup pair and fold the results into a summary.
pub fn run_pipeline(
    candles: &dyn CandleSource,
    overrides: Option<&dyn OverrideSource>,
    setups: &[Setup],
    config: EvaluationConfig,
) -> Result<(Vec<EvaluationResult>, SummaryStats), TradeSimError> {
    let registry = ActionRegistry::default();
    let evaluator = Evaluator::new(candles, overrides, &registry, config);
    let results = evaluator.evaluate_all(setups)?;

    let mut summary = Summary::new(config.commission_pct);
    summary.extend(&results);
    Ok((results, summary.finalize()))
}

/// Resolve the data sources named by `config` and run the pipeline.
pub fn evaluate_config(
    config: &dyn ConfigPort,
    base_dir: &Path,
) -> Result<(Vec<EvaluationResult>, SummaryStats), TradeSimError> {
    validate_data_config(config)?;
    let eval_config = EvaluationConfig::from_config(config)?;

    let symbol = required(config, "data", "symbol")?;
    let csv = CsvAdapter::new(base_dir.to_path_buf());
    let setups = select_setups(csv.load_setups(&required(config, "data", "setups")?)?, &symbol);

    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::sqlite_adapter::SqliteAdapter;

        if config.get_string("sqlite", "path").is_some() {
            let db = SqliteAdapter::from_config(config)?;
            let candles = db.candles(symbol.as_str());
            return run_pipeline(&candles, Some(&db), &setups, eval_config);
        }
    }

    let candles = csv.load_candles(&required(config, "data", "candles")?, &symbol)?;
    let overrides = config
        .get_string("data", "overrides")
        .filter(|f| !f.trim().is_empty())
        .map(|f| csv.load_overrides(&f))
        .transpose()?;

    run_pipeline(
        &candles,
        overrides.as_ref().map(|o| o as &dyn OverrideSource),
        &setups,
        eval_config,
    )
}

pub fn run_evaluate(config_path: &Path, output_path: Option<&Path>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let (results, stats) = match evaluate_config(&adapter, &config_dir(config_path)) {
        Ok(out) => out,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    if let Some(path) = output_path {
        if let Err(e) = CsvAdapter::new(PathBuf::new()).write_results(path, &results) {
            eprintln!("error: {e}");
            return (&e).into();
        }
        eprintln!("Results written to {}", path.display());
    }

    println!("{stats}");
    ExitCode::SUCCESS
}

pub fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    match validate_setups(&adapter, &config_dir(config_path)) {
        Ok(count) => {
            eprintln!("Configuration is valid ({count} setups)");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Check the config and that every setup's actions resolve to a handler.
pub fn validate_setups(config: &dyn ConfigPort, base_dir: &Path) -> Result<usize, TradeSimError> {
    validate_data_config(config)?;
    EvaluationConfig::from_config(config)?;

    let setups = CsvAdapter::new(base_dir.to_path_buf())
        .load_setups(&required(config, "data", "setups")?)?;
    let registry = ActionRegistry::default();
    for setup in &setups {
        for action in &setup.actions {
            registry.build(action)?;
        }
    }
    Ok(setups.len())
}
