use crate::error::{RiskError, RiskResult};
use serde::{Deserialize, Serialize};

/// One-day market shock applied to the whole portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    /// Portfolio return under the scenario, e.g. -0.22 for a 22% fall
    pub shock: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressResult {
    pub scenario: String,
    pub shock: f64,
    pub loss: f64,
}

impl StressScenario {
    pub fn new(name: impl Into<String>, shock: f64) -> Self {
        Self {
            name: name.into(),
            shock,
        }
    }

    /// Currency loss: portfolio_value * |shock|
    pub fn apply(&self, portfolio_value: f64) -> RiskResult<StressResult> {
        if !self.shock.is_finite() {
            return Err(RiskError::config(format!(
                "Scenario '{}' has a non-finite shock",
                self.name
            )));
        }
        if !(portfolio_value.is_finite() && portfolio_value > 0.0) {
            return Err(RiskError::config(format!(
                "Portfolio value must be positive, got {}",
                portfolio_value
            )));
        }

        Ok(StressResult {
            scenario: self.name.clone(),
            shock: self.shock,
            loss: portfolio_value * self.shock.abs(),
        })
    }
}

/// Historical single-day crashes used when no scenarios are configured
pub fn default_scenarios() -> Vec<StressScenario> {
    vec![
        StressScenario::new("2008 Financial Crisis", -0.05),
        StressScenario::new("Black Monday 1987", -0.22),
        StressScenario::new("COVID-19 Crash", -0.12),
        StressScenario::new("Moderate Downturn", -0.03),
    ]
}

pub fn run_scenarios(scenarios: &[StressScenario], portfolio_value: f64) -> RiskResult<Vec<StressResult>> {
    scenarios.iter().map(|s| s.apply(portfolio_value)).collect()
}
