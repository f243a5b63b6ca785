//! End-to-end risk run: aggregation, point-in-time metrics, backtests and stress losses
//!
//! This is the boundary handed to the presentation side. Everything in the
//! report is plain serializable data.

use crate::backtest::{Backtester, KupiecResult, RollingBacktest};
use crate::config::EngineConfig;
use crate::error::RiskResult;
use crate::market_data::{MarketDataSource, ReturnMatrix};
use crate::portfolio::{CorrelationMatrix, PortfolioAggregator, PortfolioStatistics};
use crate::risk::{AllMetrics, RiskCalculator};
use crate::stress::{StressResult, run_scenarios};
use chrono::NaiveDate;
use log::{debug, error, info, warn};
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestSummary {
    pub kupiec: KupiecResult,
    pub avg_exceedance: f64,
    pub violation_dates: Vec<NaiveDate>,
}

impl BacktestSummary {
    fn from_backtester(backtester: &Backtester) -> RiskResult<Self> {
        Ok(Self {
            kupiec: backtester.kupiec_test()?,
            avg_exceedance: backtester.calculate_avg_exceedance(),
            violation_dates: backtester.violation_dates(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollingSummary {
    pub series: RollingBacktest,
    pub summary: BacktestSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskReport {
    pub assets: Vec<String>,
    pub weights: Vec<f64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub confidence_level: f64,
    pub statistics: PortfolioStatistics,
    pub correlation: CorrelationMatrix,
    pub metrics: AllMetrics,
    /// Constant historical VaR checked against the same sample it was fitted on
    pub in_sample_backtest: BacktestSummary,
    /// None when the series is not longer than the rolling window
    pub rolling: Option<RollingSummary>,
    pub stress: Vec<StressResult>,
}

pub struct RiskAnalysis;

impl RiskAnalysis {
    /// Load returns from the data collaborator and run; supply failures are not retried
    pub fn run_from_source<S, R>(config: &EngineConfig, source: &S, rng: &mut R) -> anyhow::Result<RiskReport>
    where
        S: MarketDataSource + ?Sized,
        R: Rng + ?Sized,
    {
        let returns = source.load_returns()?;
        info!(
            "Loaded {} days of returns for {} assets",
            returns.n_observations(),
            returns.n_assets()
        );
        Ok(Self::run(config, returns, rng)?)
    }

    pub fn run<R: Rng + ?Sized>(
        config: &EngineConfig,
        returns: ReturnMatrix,
        rng: &mut R,
    ) -> RiskResult<RiskReport> {
        config.validate()?;
        let confidence = config.confidence()?;

        let aggregator = PortfolioAggregator::new(returns, config.weight_vector()?)?
            .with_periods_per_year(config.periods_per_year)?;
        let portfolio_returns = aggregator.portfolio_returns()?;
        debug!(
            "Aggregated {} assets into {} portfolio returns",
            aggregator.returns().n_assets(),
            portfolio_returns.len()
        );

        let statistics = aggregator.get_statistics()?;
        let correlation = aggregator.get_correlation_matrix()?;

        let calculator = RiskCalculator::new(portfolio_returns.values(), confidence)?
            .with_quantile_method(config.quantile_method)
            .with_tail_policy(config.tail_policy);
        let metrics = calculator.get_all_metrics(config.portfolio_value, config.n_simulations, rng)?;

        let seed = config.seed.unwrap_or_else(|| rng.r#gen());
        let backtester = Backtester::with_constant_var(
            portfolio_returns.clone(),
            metrics.fractions.historical_var,
            confidence,
        )?
        .with_significance_level(config.significance_level)?
        .with_quantile_method(config.quantile_method)
        .with_simulation(config.n_simulations, seed)?;
        let in_sample_backtest = BacktestSummary::from_backtester(&backtester)?;

        let rolling = if config.rolling_window < portfolio_returns.len() {
            let series = backtester.rolling_var_backtest(config.rolling_window, config.rolling_method)?;
            let out_of_sample = series
                .backtester(confidence)?
                .with_significance_level(config.significance_level)?;
            let summary = BacktestSummary::from_backtester(&out_of_sample)?;
            Some(RollingSummary { series, summary })
        } else {
            warn!(
                "Skipping rolling backtest: window {} needs more than {} observations",
                config.rolling_window,
                portfolio_returns.len()
            );
            None
        };

        let stress = run_scenarios(&config.stress_scenarios, config.portfolio_value)?;

        let dates = portfolio_returns.dates();
        Ok(RiskReport {
            assets: aggregator.returns().assets().to_vec(),
            weights: aggregator.weights().as_slice().to_vec(),
            start_date: dates[0],
            end_date: dates[dates.len() - 1],
            confidence_level: confidence.value(),
            statistics,
            correlation,
            metrics,
            in_sample_backtest,
            rolling,
            stress,
        })
    }
}

fn log_backtest(label: &str, summary: &BacktestSummary) {
    let kupiec = &summary.kupiec;
    info!(
        "{}: {} violations in {} days ({:.2}% vs {:.2}% expected), LR={:.4}, p={:.4}",
        label,
        kupiec.n_violations,
        kupiec.n_observations,
        kupiec.violation_rate * 100.0,
        kupiec.expected_rate * 100.0,
        kupiec.lr_statistic,
        kupiec.p_value
    );
    if kupiec.reject_null {
        error!(
            "{}: VaR model rejected at {:.0}% significance",
            label,
            kupiec.significance_level * 100.0
        );
    }
    if kupiec.n_violations > 0 {
        info!(
            "{}: average exceedance {:.4}%",
            label,
            summary.avg_exceedance * 100.0
        );
    }
}

impl RiskReport {
    pub fn log_summary(&self) {
        info!("=== Risk Report ===");
        info!(
            "Portfolio: {} assets, {} to {}",
            self.assets.len(),
            self.start_date,
            self.end_date
        );

        let stats = &self.statistics;
        info!(
            "Annualized return {:.2}%, volatility {:.2}%",
            stats.annualized_return * 100.0,
            stats.annualized_volatility * 100.0
        );
        match stats.return_to_volatility {
            Some(ratio) => info!("Return/volatility ratio: {:.3}", ratio),
            None => warn!("Return/volatility ratio undefined: zero volatility"),
        }

        info!(
            "VaR/CVaR at {:.1}% confidence:",
            self.confidence_level * 100.0
        );
        for (fraction, scaled) in self
            .metrics
            .fractions
            .entries()
            .iter()
            .zip(self.metrics.scaled.entries())
        {
            info!(
                "  {} {}: {:.4}% (${:.2})",
                fraction.method,
                fraction.measure,
                fraction.value * 100.0,
                scaled.value
            );
        }

        log_backtest("In-sample backtest", &self.in_sample_backtest);
        if let Some(rolling) = &self.rolling {
            log_backtest(
                &format!("Rolling {} backtest ({}d)", rolling.series.method, rolling.series.window),
                &rolling.summary,
            );
        }

        for result in &self.stress {
            info!(
                "Stress {}: {:.0}% shock -> ${:.2} loss",
                result.scenario,
                result.shock * 100.0,
                result.loss
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn simulated_matrix(n: usize) -> ReturnMatrix {
        let mut rng = StdRng::seed_from_u64(17);
        let normal = Normal::new(0.0003, 0.01).unwrap();
        let values = Array2::from_shape_fn((n, 3), |_| normal.sample(&mut rng));
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let dates = (0..n as u64).map(|i| start + chrono::Days::new(i)).collect();
        let assets = vec!["AAPL".into(), "JPM".into(), "XOM".into()];
        ReturnMatrix::new(dates, assets, values).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig {
            n_simulations: 2_000,
            rolling_window: 100,
            seed: Some(42),
            ..Default::default()
        }
    }

    #[test]
    fn test_full_run() {
        let mut rng = StdRng::seed_from_u64(42);
        let report = RiskAnalysis::run(&config(), simulated_matrix(300), &mut rng).unwrap();

        assert_eq!(report.assets.len(), 3);
        assert_eq!(report.correlation.values.len(), 3);
        assert_eq!(report.in_sample_backtest.kupiec.n_observations, 300);
        let rolling = report.rolling.unwrap();
        assert_eq!(rolling.series.len(), 200);
        assert_eq!(rolling.summary.kupiec.n_observations, 200);
        assert_eq!(report.stress.len(), 4);
        assert_eq!(
            report.metrics.scaled.historical_var,
            report.metrics.fractions.historical_var * 1_000_000.0
        );
    }

    #[test]
    fn test_run_is_reproducible_with_seed() {
        let first = RiskAnalysis::run(&config(), simulated_matrix(200), &mut StdRng::seed_from_u64(1)).unwrap();
        let second = RiskAnalysis::run(&config(), simulated_matrix(200), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_short_series_skips_rolling() {
        let mut rng = StdRng::seed_from_u64(3);
        let report = RiskAnalysis::run(&config(), simulated_matrix(80), &mut rng).unwrap();
        assert!(report.rolling.is_none());
    }

    #[test]
    fn test_weight_mismatch_is_reported() {
        let config = EngineConfig {
            weights: Some(vec![0.5, 0.5]),
            ..config()
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert!(RiskAnalysis::run(&config, simulated_matrix(150), &mut rng).is_err());
    }

    #[test]
    fn test_report_serializes() {
        let mut rng = StdRng::seed_from_u64(9);
        let report = RiskAnalysis::run(&config(), simulated_matrix(150), &mut rng).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["metrics"]["fractions"]["monte_carlo_cvar"].is_number());
        assert!(json["in_sample_backtest"]["kupiec"]["p_value"].is_number());
    }
}
