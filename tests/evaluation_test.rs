//! Evaluator and summary end to end over in-memory sources.

mod common;

use approx::assert_relative_eq;
use common::*;
use tradesim::adapters::memory_adapter::{MemoryCandles, MemoryOverrides};
use tradesim::cli::run_pipeline;
use tradesim::domain::action::ActionRegistry;
use tradesim::domain::config::EvaluationConfig;
use tradesim::domain::error::TradeSimError;
use tradesim::domain::evaluator::Evaluator;
use tradesim::domain::setup::Side;
use tradesim::domain::summary::{START_BALANCE, Summary};
use tradesim::ports::override_port::OverrideField;

fn two_trade_bars() -> Vec<tradesim::domain::candle::Candle> {
    vec![
        bar(0, 99.5, 100.5),
        bar(1, 101.0, 104.0),
        bar(2, 103.0, 108.0),
        bar(3, 106.0, 111.0),
        bar(4, 104.0, 106.0),
        bar(5, 103.0, 105.5),
        bar(6, 100.0, 104.0),
        bar(7, 96.0, 101.0),
        bar(8, 99.5, 100.5),
    ]
}

fn two_trade_setups() -> Vec<tradesim::domain::setup::Setup> {
    vec![
        setup(1, Side::Buy, 0, 100.0, 110.0, 95.0),
        setup(2, Side::Sell, 4, 105.0, 95.0, 110.0),
        setup(3, Side::Buy, 8, 100.0, 120.0, 90.0),
    ]
}

#[test]
fn target_then_exit_setup_compound_into_summary() {
    let candles = MemoryCandles::new(SYMBOL, two_trade_bars());
    let config = EvaluationConfig::default();

    let (results, stats) = run_pipeline(&candles, None, &two_trade_setups(), config).unwrap();
    assert_eq!(results.len(), 2);

    let long = &results[0];
    assert_eq!((long.entry_id, long.exit_id), (1, 2));
    assert!(long.closed);
    assert_eq!(long.exit_time, Some(ts(3)));
    assert_relative_eq!(long.roi.unwrap(), 10.0, epsilon = 1e-9);
    assert_relative_eq!(long.high_roi.unwrap(), 11.0, epsilon = 1e-9);
    assert_relative_eq!(long.low_roi.unwrap(), -0.5, epsilon = 1e-9);

    let short = &results[1];
    assert_eq!((short.entry_id, short.exit_id), (2, 3));
    assert!(short.closed);
    assert_eq!(short.exit_time, Some(ts(8)));
    let short_roi = (1.0 - 100.0 / 105.0) * 100.0;
    assert_relative_eq!(short.roi.unwrap(), short_roi, epsilon = 1e-9);
    assert_relative_eq!(short.high_roi.unwrap(), (1.0 - 96.0 / 105.0) * 100.0, epsilon = 1e-9);
    assert_relative_eq!(short.low_roi.unwrap(), -(106.0 / 105.0 - 1.0) * 100.0, epsilon = 1e-9);

    let fee = 1.0 - config.commission_pct / 100.0;
    let balance = START_BALANCE * fee * 1.10 * fee * (1.0 + short_roi / 100.0);
    assert_relative_eq!(stats.balance, balance, epsilon = 1e-9);
    assert_relative_eq!(stats.roi, balance - START_BALANCE, epsilon = 1e-9);
    assert_relative_eq!(stats.avg_roi, (balance - START_BALANCE) / 2.0, epsilon = 1e-9);
    assert_eq!(stats.profit, 2);
    assert_eq!(stats.loss, 0);
    assert_relative_eq!(stats.success_ratio, 100.0);

    let avg_high = (long.high_roi.unwrap() + short.high_roi.unwrap()) / 2.0;
    let avg_low = (long.low_roi.unwrap() + short.low_roi.unwrap()) / 2.0;
    assert_relative_eq!(stats.risk_reward_ratio, (avg_high / avg_low).abs(), epsilon = 1e-9);
}

#[test]
fn break_even_action_turns_trade_flat() {
    let candles = MemoryCandles::new(
        SYMBOL,
        vec![
            bar(0, 99.5, 100.5),
            bar(1, 101.0, 104.0),
            bar(2, 99.0, 102.0),
            bar(3, 100.0, 101.0),
        ],
    );
    let setups = vec![
        with_actions(setup(1, Side::Buy, 0, 100.0, 120.0, 90.0), &["break_even:3"]),
        setup(2, Side::Sell, 3, 101.0, 90.0, 110.0),
    ];

    let (results, stats) =
        run_pipeline(&candles, None, &setups, EvaluationConfig::default()).unwrap();
    let result = &results[0];
    assert!(result.stopped);
    assert_eq!(result.exit_time, Some(ts(2)));
    assert_relative_eq!(result.roi.unwrap(), 0.0, epsilon = 1e-9);
    assert!(result.history.contains("break_even"));

    assert_eq!(stats.flat, 1);
    assert_eq!(stats.count, 0);
    assert_relative_eq!(stats.balance, START_BALANCE);
    assert_relative_eq!(stats.roi, 0.0);
}

#[test]
fn failed_and_ambiguous_results_are_counted_separately() {
    let candles = MemoryCandles::new(
        SYMBOL,
        vec![
            bar(0, 99.5, 100.5),
            bar(1, 94.0, 111.0),
            bar(2, 100.0, 101.0),
            bar(3, 150.0, 151.0),
        ],
    );
    let registry = ActionRegistry::default();
    let evaluator = Evaluator::new(&candles, None, &registry, EvaluationConfig::default());

    let ambiguous = evaluator
        .evaluate(
            &setup(1, Side::Buy, 0, 100.0, 110.0, 95.0),
            &setup(2, Side::Sell, 3, 150.0, 140.0, 160.0),
        )
        .unwrap();
    let failed = evaluator
        .evaluate(
            &setup(3, Side::Buy, 0, 200.0, 210.0, 190.0),
            &setup(4, Side::Sell, 3, 150.0, 140.0, 160.0),
        )
        .unwrap();

    assert!(ambiguous.ambiguous);
    assert!(ambiguous.valid_entry_price);
    assert!(!ambiguous.stopped && !ambiguous.closed);
    assert!(ambiguous.roi.is_none());
    assert!(!failed.valid_entry_price);

    let mut summary = Summary::new(0.1);
    summary.add(&ambiguous);
    summary.add(&failed);
    let stats = summary.finalize();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.ambiguous, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.count, 0);
    assert_relative_eq!(stats.roi, 0.0);
    assert_relative_eq!(stats.avg_roi, 0.0);
    assert_relative_eq!(stats.risk_reward_ratio, 0.0);
}

#[test]
fn entry_override_moves_the_fill() {
    let candles = MemoryCandles::new(
        SYMBOL,
        vec![
            bar(0, 99.0, 101.0),
            bar(1, 97.5, 99.0),
            bar(2, 98.0, 99.5),
            bar(3, 98.5, 99.0),
        ],
    );
    let mut overrides = MemoryOverrides::default();
    overrides.insert(1, OverrideField::Entry, ts(0), 98.0);

    let setups = vec![
        setup(1, Side::Buy, 0, 100.0, 120.0, 90.0),
        setup(2, Side::Sell, 3, 99.0, 90.0, 110.0),
    ];
    let (results, _) =
        run_pipeline(&candles, Some(&overrides), &setups, EvaluationConfig::default()).unwrap();

    let result = &results[0];
    assert_eq!(result.entry_time, Some(ts(1)));
    assert_relative_eq!(result.entry_price, 98.0);
    assert_relative_eq!(result.roi.unwrap(), (99.0 / 98.0 - 1.0) * 100.0, epsilon = 1e-9);
    assert!(result.history.contains("override"));
}

#[test]
fn gap_in_bars_fails_one_pair_and_keeps_the_rest() {
    let candles = MemoryCandles::new(
        SYMBOL,
        vec![
            bar(0, 99.5, 100.5),
            bar(1, 101.0, 104.0),
            bar(2, 103.0, 108.0),
            bar(3, 106.0, 111.0),
            bar(10, 99.0, 101.0),
            bar(11, 100.0, 102.0),
        ],
    );
    let setups = vec![
        setup(1, Side::Buy, 0, 100.0, 110.0, 95.0),
        setup(2, Side::Sell, 5, 105.0, 95.0, 110.0),
        setup(3, Side::Buy, 7, 100.0, 110.0, 95.0),
    ];
    let config = EvaluationConfig::default();

    let (results, stats) = run_pipeline(&candles, None, &setups, config).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].closed);
    assert_relative_eq!(results[0].roi.unwrap(), 10.0, epsilon = 1e-9);

    let skipped = &results[1];
    assert_eq!((skipped.entry_id, skipped.exit_id), (2, 3));
    assert!(!skipped.valid_entry_price);
    assert_relative_eq!(skipped.entry_price, 105.0);
    assert_eq!(skipped.bars_replayed, 0);

    assert_eq!(stats.total, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.profit, 1);
    let fee = 1.0 - config.commission_pct / 100.0;
    assert_relative_eq!(stats.balance, START_BALANCE * fee * 1.10, epsilon = 1e-9);
}

#[test]
fn candle_source_errors_propagate() {
    let candles = MockCandleSource::new(two_trade_bars()).with_error("connection reset");
    let err = run_pipeline(&candles, None, &two_trade_setups(), EvaluationConfig::default())
        .unwrap_err();
    assert!(matches!(err, TradeSimError::Database { .. }));
    assert_eq!(candles.queries.get(), 1);
}

#[test]
fn no_pairs_yield_empty_summary() {
    let candles = MockCandleSource::new(two_trade_bars());
    let setups = vec![setup(1, Side::Buy, 0, 100.0, 110.0, 95.0)];
    let (results, stats) =
        run_pipeline(&candles, None, &setups, EvaluationConfig::default()).unwrap();
    assert!(results.is_empty());
    assert_eq!(stats.total, 0);
    assert_relative_eq!(stats.balance, START_BALANCE);
    assert_eq!(candles.queries.get(), 0);
}
