use crate::backtest::DEFAULT_SIGNIFICANCE_LEVEL;
use crate::error::{RiskError, RiskResult};
use crate::portfolio::{DEFAULT_PERIODS_PER_YEAR, WeightVector};
use crate::risk::{ConfidenceLevel, TailPolicy, VarMethod};
use crate::stats::QuantileMethod;
use crate::stress::{StressScenario, default_scenarios};
use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    #[serde(default = "default_portfolio_value")]
    pub portfolio_value: f64,
    #[serde(default = "default_n_simulations")]
    pub n_simulations: usize,
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
    #[serde(default)]
    pub rolling_method: VarMethod,
    /// Per-asset weights in data-file column order; uniform when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,
    /// Monte Carlo seed; entropy-seeded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default)]
    pub quantile_method: QuantileMethod,
    #[serde(default)]
    pub tail_policy: TailPolicy,
    #[serde(default = "default_data_file")]
    pub data_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_file: Option<String>,
    #[serde(default = "default_scenarios")]
    pub stress_scenarios: Vec<StressScenario>,
}

fn default_confidence_level() -> f64 {
    0.95
}

fn default_portfolio_value() -> f64 {
    1_000_000.0
}

fn default_n_simulations() -> usize {
    10_000
}

fn default_rolling_window() -> usize {
    252 // one trading year
}

fn default_periods_per_year() -> f64 {
    DEFAULT_PERIODS_PER_YEAR
}

fn default_significance_level() -> f64 {
    DEFAULT_SIGNIFICANCE_LEVEL
}

fn default_data_file() -> String {
    "market_data.json".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_level: default_confidence_level(),
            portfolio_value: default_portfolio_value(),
            n_simulations: default_n_simulations(),
            rolling_window: default_rolling_window(),
            rolling_method: VarMethod::default(),
            weights: None,
            periods_per_year: default_periods_per_year(),
            significance_level: default_significance_level(),
            seed: None,
            quantile_method: QuantileMethod::default(),
            tail_policy: TailPolicy::default(),
            data_file: default_data_file(),
            report_file: None,
            stress_scenarios: default_scenarios(),
        }
    }
}

impl EngineConfig {
    /// Missing file falls back to the defaults; a malformed file is an error
    pub fn load_from_file(path: &str) -> Result<Self> {
        let config = match fs::read_to_string(path) {
            Ok(content) => {
                info!("Loaded configuration from {}", path);
                serde_json::from_str::<EngineConfig>(&content)?
            }
            Err(e) => {
                warn!("Could not read {} ({}), using default configuration", path, e);
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RiskResult<()> {
        self.confidence()?;

        if !(self.portfolio_value.is_finite() && self.portfolio_value > 0.0) {
            return Err(RiskError::config(format!(
                "portfolio_value must be positive, got {}",
                self.portfolio_value
            )));
        }
        if self.n_simulations == 0 {
            return Err(RiskError::config("n_simulations must be at least 1"));
        }
        if self.rolling_window == 0 {
            return Err(RiskError::config("rolling_window must be at least 1"));
        }
        if !(self.periods_per_year.is_finite() && self.periods_per_year > 0.0) {
            return Err(RiskError::config(format!(
                "periods_per_year must be positive, got {}",
                self.periods_per_year
            )));
        }
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(RiskError::config(format!(
                "significance_level must be in (0, 1), got {}",
                self.significance_level
            )));
        }
        self.weight_vector()?;

        Ok(())
    }

    pub fn confidence(&self) -> RiskResult<ConfidenceLevel> {
        ConfidenceLevel::new(self.confidence_level)
    }

    pub fn weight_vector(&self) -> RiskResult<Option<WeightVector>> {
        self.weights.clone().map(WeightVector::new).transpose()
    }
}
