//! Configuration validation.
//!
//! Validates config fields before an evaluation run starts.

use crate::domain::error::TradeSimError;
use crate::ports::config_port::ConfigPort;

pub fn validate_evaluation_config(config: &dyn ConfigPort) -> Result<(), TradeSimError> {
    validate_commission(config)?;
    validate_pivot_strength(config)?;
    validate_lookahead(config)?;
    Ok(())
}

/// The `[data]` section: a symbol, a setups file and one candle source.
pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), TradeSimError> {
    require_non_empty(config, "data", "symbol")?;
    require_non_empty(config, "data", "setups")?;
    if !config.has_key("data", "candles") && !config.has_key("sqlite", "path") {
        return Err(TradeSimError::ConfigMissing {
            section: "data".to_string(),
            key: "candles".to_string(),
        });
    }
    if config.has_key("sqlite", "path") && config.get_int("sqlite", "pool_size", 4) < 1 {
        return Err(TradeSimError::ConfigInvalid {
            section: "sqlite".to_string(),
            key: "pool_size".to_string(),
            reason: "pool_size must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn require_non_empty(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), TradeSimError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(TradeSimError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

/// A present key must parse as a number; the getters would otherwise fall
/// back to their defaults silently.
fn require_numeric(config: &dyn ConfigPort, key: &str) -> Result<(), TradeSimError> {
    if let Some(raw) = config.get_string("evaluation", key) {
        if raw.trim().parse::<f64>().is_err() {
            return Err(TradeSimError::ConfigInvalid {
                section: "evaluation".to_string(),
                key: key.to_string(),
                reason: format!("'{raw}' is not a number"),
            });
        }
    }
    Ok(())
}

/// Like [`require_numeric`] for keys read with `get_int`, which would
/// otherwise drop a fractional value in favour of the default.
fn require_integer(config: &dyn ConfigPort, key: &str) -> Result<(), TradeSimError> {
    if let Some(raw) = config.get_string("evaluation", key) {
        if raw.trim().parse::<i64>().is_err() {
            return Err(TradeSimError::ConfigInvalid {
                section: "evaluation".to_string(),
                key: key.to_string(),
                reason: format!("'{raw}' is not an integer"),
            });
        }
    }
    Ok(())
}

fn validate_commission(config: &dyn ConfigPort) -> Result<(), TradeSimError> {
    require_numeric(config, "commission_pct")?;
    let pct = config.get_double("evaluation", "commission_pct", 0.0);
    if !(0.0..100.0).contains(&pct) {
        return Err(TradeSimError::ConfigInvalid {
            section: "evaluation".to_string(),
            key: "commission_pct".to_string(),
            reason: "commission_pct must be in [0, 100)".to_string(),
        });
    }
    Ok(())
}

fn validate_pivot_strength(config: &dyn ConfigPort) -> Result<(), TradeSimError> {
    require_integer(config, "pivot_strength")?;
    let value = config.get_int("evaluation", "pivot_strength", 1);
    if value < 1 {
        return Err(TradeSimError::ConfigInvalid {
            section: "evaluation".to_string(),
            key: "pivot_strength".to_string(),
            reason: "pivot_strength must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn validate_lookahead(config: &dyn ConfigPort) -> Result<(), TradeSimError> {
    require_integer(config, "lookahead_bars")?;
    let value = config.get_int("evaluation", "lookahead_bars", 1);
    if value < 1 {
        return Err(TradeSimError::ConfigInvalid {
            section: "evaluation".to_string(),
            key: "lookahead_bars".to_string(),
            reason: "lookahead_bars must be at least 1".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn valid_evaluation_config_passes() {
        let config = make_config(
            r#"
[evaluation]
commission_pct = 0.1
pivot_strength = 2
lookahead_bars = 500
"#,
        );
        assert!(validate_evaluation_config(&config).is_ok());
    }

    #[test]
    fn missing_section_passes() {
        let config = make_config("[data]\nsymbol = BTCUSDT\n");
        assert!(validate_evaluation_config(&config).is_ok());
    }

    #[test]
    fn negative_commission_fails() {
        let config = make_config("[evaluation]\ncommission_pct = -0.1\n");
        let err = validate_evaluation_config(&config).unwrap_err();
        assert!(
            matches!(err, TradeSimError::ConfigInvalid { key, .. } if key == "commission_pct")
        );
    }

    #[test]
    fn non_numeric_commission_fails() {
        let config = make_config("[evaluation]\ncommission_pct = lots\n");
        let err = validate_evaluation_config(&config).unwrap_err();
        assert!(
            matches!(err, TradeSimError::ConfigInvalid { key, .. } if key == "commission_pct")
        );
    }

    #[test]
    fn zero_pivot_strength_fails() {
        let config = make_config("[evaluation]\npivot_strength = 0\n");
        let err = validate_evaluation_config(&config).unwrap_err();
        assert!(
            matches!(err, TradeSimError::ConfigInvalid { key, .. } if key == "pivot_strength")
        );
    }

    #[test]
    fn zero_lookahead_fails() {
        let config = make_config("[evaluation]\nlookahead_bars = 0\n");
        let err = validate_evaluation_config(&config).unwrap_err();
        assert!(
            matches!(err, TradeSimError::ConfigInvalid { key, .. } if key == "lookahead_bars")
        );
    }

    #[test]
    fn fractional_pivot_strength_fails() {
        let config = make_config("[evaluation]\npivot_strength = 2.5\n");
        let err = validate_evaluation_config(&config).unwrap_err();
        assert!(
            matches!(err, TradeSimError::ConfigInvalid { key, .. } if key == "pivot_strength")
        );
    }

    #[test]
    fn fractional_lookahead_fails() {
        let config = make_config("[evaluation]\nlookahead_bars = 10.5\n");
        let err = validate_evaluation_config(&config).unwrap_err();
        assert!(
            matches!(err, TradeSimError::ConfigInvalid { key, .. } if key == "lookahead_bars")
        );
    }

    #[test]
    fn valid_data_config_passes() {
        let config = make_config(
            "[data]\nsymbol = BTCUSDT\ncandles = btc.csv\nsetups = setups.csv\n",
        );
        assert!(validate_data_config(&config).is_ok());
    }

    #[test]
    fn sqlite_path_replaces_candles_file() {
        let config = make_config(
            "[data]\nsymbol = BTCUSDT\nsetups = setups.csv\n\n[sqlite]\npath = data.db\n",
        );
        assert!(validate_data_config(&config).is_ok());
    }

    #[test]
    fn missing_candle_source_fails() {
        let config = make_config("[data]\nsymbol = BTCUSDT\nsetups = setups.csv\n");
        let err = validate_data_config(&config).unwrap_err();
        assert!(matches!(err, TradeSimError::ConfigMissing { key, .. } if key == "candles"));
    }

    #[test]
    fn blank_symbol_fails() {
        let config = make_config("[data]\nsymbol =  \ncandles = a.csv\nsetups = s.csv\n");
        let err = validate_data_config(&config).unwrap_err();
        assert!(matches!(err, TradeSimError::ConfigMissing { key, .. } if key == "symbol"));
    }

    #[test]
    fn zero_pool_size_fails() {
        let config = make_config(
            "[data]\nsymbol = X\nsetups = s.csv\n\n[sqlite]\npath = d.db\npool_size = 0\n",
        );
        let err = validate_data_config(&config).unwrap_err();
        assert!(matches!(err, TradeSimError::ConfigInvalid { key, .. } if key == "pool_size"));
    }
}
