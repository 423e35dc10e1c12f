//! CLI integration tests: argument parsing, config-driven evaluation against
//! CSV fixtures on disk, validation and exit codes.

mod common;

use approx::assert_relative_eq;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tempfile::TempDir;
use tradesim::adapters::file_config_adapter::FileConfigAdapter;
use tradesim::cli::{self, Cli, Command};
use tradesim::domain::error::TradeSimError;
use tradesim::domain::summary::START_BALANCE;

const CANDLES: &str = "timestamp,open,high,low,close,volume\n\
    2024-03-01 00:00:00,99.5,100.5,99.5,100.0,10\n\
    2024-03-01 01:00:00,101.0,104.0,101.0,103.0,10\n\
    2024-03-01 02:00:00,103.0,108.0,103.0,107.0,10\n\
    2024-03-01 03:00:00,106.0,111.0,106.0,110.0,10\n\
    2024-03-01 04:00:00,104.0,106.0,104.0,105.0,10\n\
    2024-03-01 05:00:00,99.5,100.5,99.5,100.0,10\n";

const SETUPS: &str = "id,symbol,side,timestamp,price,target,stop,size,actions\n\
    1,BTCUSDT,buy,2024-03-01 00:00:00,100,110,95,100,break_even:50\n\
    2,BTCUSDT,sell,2024-03-01 04:00:00,105,95,110,100,\n\
    3,ETHUSDT,buy,2024-03-01 02:00:00,100,110,95,100,\n";

const CONFIG: &str = "[evaluation]\n\
    commission_pct = 0.1\n\
    pivot_strength = 1\n\
    lookahead_bars = 50\n\
    [data]\n\
    symbol = BTCUSDT\n\
    candles = candles.csv\n\
    setups = setups.csv\n";

fn fixture(config: &str, setups: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("candles.csv"), CANDLES).unwrap();
    fs::write(dir.path().join("setups.csv"), setups).unwrap();
    let config_path = dir.path().join("config.ini");
    fs::write(&config_path, config).unwrap();
    (dir, config_path)
}

fn code(exit: ExitCode) -> String {
    format!("{exit:?}")
}

fn expect_code(exit: ExitCode, expected: u8) {
    assert_eq!(code(exit), code(ExitCode::from(expected)));
}

fn load(path: &Path) -> FileConfigAdapter {
    FileConfigAdapter::from_file(path).unwrap()
}

mod parsing {
    use super::*;

    #[test]
    fn evaluate_with_output_and_level() {
        let cli = Cli::try_parse_from([
            "tradesim",
            "evaluate",
            "-c",
            "run.ini",
            "-o",
            "out.csv",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Command::Evaluate { config, output } => {
                assert_eq!(config, PathBuf::from("run.ini"));
                assert_eq!(output, Some(PathBuf::from("out.csv")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn log_level_defaults_to_info() {
        let cli = Cli::try_parse_from(["tradesim", "validate", "--config", "run.ini"]).unwrap();
        assert_eq!(cli.log_level, "info");
        assert!(matches!(cli.command, Command::Validate { .. }));
    }

    #[test]
    fn config_is_required() {
        assert!(Cli::try_parse_from(["tradesim", "evaluate"]).is_err());
    }
}

mod evaluate {
    use super::*;

    #[test]
    fn evaluates_csv_fixture() {
        let (_dir, config_path) = fixture(CONFIG, SETUPS);
        let adapter = load(&config_path);

        let (results, stats) =
            cli::evaluate_config(&adapter, &cli::config_dir(&config_path)).unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.symbol, "BTCUSDT");
        assert!(result.closed);
        assert_relative_eq!(result.roi.unwrap(), 10.0, epsilon = 1e-9);
        assert_eq!(stats.profit, 1);
        assert_relative_eq!(stats.balance, START_BALANCE * 0.999 * 1.1, epsilon = 1e-9);
    }

    #[test]
    fn writes_results_csv() {
        let (dir, config_path) = fixture(CONFIG, SETUPS);
        let output = dir.path().join("results.csv");

        expect_code(cli::run_evaluate(&config_path, Some(&output)), 0);

        let mut rdr = csv::Reader::from_path(&output).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert!(headers.iter().any(|h| h == "entry_id"));
        assert!(headers.iter().any(|h| h == "relative_roi"));
        assert_eq!(rdr.records().count(), 1);
    }

    #[test]
    fn overrides_file_is_optional_input() {
        let config = format!("{CONFIG}overrides = overrides.csv\n");
        let (dir, config_path) = fixture(&config, SETUPS);
        fs::write(
            dir.path().join("overrides.csv"),
            "setup_id,field,timestamp,value\n1,target,2024-03-01 01:00:00,107\n",
        )
        .unwrap();

        let (results, _) =
            cli::evaluate_config(&load(&config_path), &cli::config_dir(&config_path)).unwrap();
        assert_eq!(results[0].exit_time, Some(common::ts(2)));
        assert_relative_eq!(results[0].roi.unwrap(), 7.0, epsilon = 1e-9);
    }

    #[test]
    fn missing_config_file_exits_with_config_code() {
        expect_code(
            cli::run_evaluate(Path::new("/nonexistent/tradesim.ini"), None),
            2,
        );
    }

    #[test]
    fn missing_symbol_is_config_error() {
        let config = CONFIG.replace("symbol = BTCUSDT\n", "");
        let (_dir, config_path) = fixture(&config, SETUPS);
        let err = cli::evaluate_config(&load(&config_path), &cli::config_dir(&config_path))
            .unwrap_err();
        assert!(matches!(err, TradeSimError::ConfigMissing { ref key, .. } if key == "symbol"));
        expect_code(cli::run_evaluate(&config_path, None), 2);
    }

    #[test]
    fn missing_candles_file_is_io_error() {
        let (dir, config_path) = fixture(CONFIG, SETUPS);
        fs::remove_file(dir.path().join("candles.csv")).unwrap();
        expect_code(cli::run_evaluate(&config_path, None), 1);
    }

    #[test]
    fn out_of_range_commission_is_rejected() {
        let config = CONFIG.replace("commission_pct = 0.1", "commission_pct = -1");
        let (_dir, config_path) = fixture(&config, SETUPS);
        let err = cli::evaluate_config(&load(&config_path), &cli::config_dir(&config_path))
            .unwrap_err();
        assert!(matches!(err, TradeSimError::ConfigInvalid { .. }));
    }
}

mod validate {
    use super::*;

    #[test]
    fn valid_fixture_passes() {
        let (_dir, config_path) = fixture(CONFIG, SETUPS);
        let count = cli::validate_setups(&load(&config_path), &cli::config_dir(&config_path))
            .unwrap();
        assert_eq!(count, 3);
        expect_code(cli::run_validate(&config_path), 0);
    }

    #[test]
    fn unknown_action_fails() {
        let setups = SETUPS.replace("break_even:50", "moon_shot:5");
        let (_dir, config_path) = fixture(CONFIG, &setups);
        let err = cli::validate_setups(&load(&config_path), &cli::config_dir(&config_path))
            .unwrap_err();
        assert!(matches!(err, TradeSimError::UnknownAction { .. }));
        expect_code(cli::run_validate(&config_path), u8_code(&err));
    }

    #[test]
    fn invalid_action_parameters_fail() {
        let setups = SETUPS.replace("break_even:50", "trailing_stop:1:150");
        let (_dir, config_path) = fixture(CONFIG, &setups);
        let err = cli::validate_setups(&load(&config_path), &cli::config_dir(&config_path))
            .unwrap_err();
        assert!(matches!(err, TradeSimError::ConfigInvalid { .. }));
    }

    fn u8_code(err: &TradeSimError) -> u8 {
        match code(ExitCode::from(err)) {
            c if c == code(ExitCode::from(2)) => 2,
            c if c == code(ExitCode::from(3)) => 3,
            c if c == code(ExitCode::from(4)) => 4,
            other => panic!("unexpected exit code {other}"),
        }
    }
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use tradesim::adapters::sqlite_adapter::SqliteAdapter;
    use tradesim::ports::config_port::ConfigPort;
    use tradesim::ports::override_port::OverrideField;

    #[test]
    fn sqlite_source_replaces_csv_candles() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("candles.db");
        let config = format!(
            "[data]\nsymbol = BTCUSDT\nsetups = setups.csv\n[sqlite]\npath = {}\npool_size = 1\n",
            db_path.display()
        );
        fs::write(dir.path().join("setups.csv"), SETUPS).unwrap();
        let config_path = dir.path().join("config.ini");
        fs::write(&config_path, &config).unwrap();

        let adapter = load(&config_path);
        let db = SqliteAdapter::from_config(&adapter as &dyn ConfigPort).unwrap();
        db.initialize_schema().unwrap();
        db.insert_candles(
            "BTCUSDT",
            &common::bars_around(0, &[100.0, 103.0, 106.0, 110.5, 105.0]),
        )
        .unwrap();
        db.insert_override(1, OverrideField::Stop, common::ts(1), 102.4).unwrap();

        let (results, _) = cli::evaluate_config(&adapter, &cli::config_dir(&config_path)).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].closed);
        assert_relative_eq!(results[0].roi.unwrap(), 10.0, epsilon = 1e-9);
    }
}
