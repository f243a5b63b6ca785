use crate::error::{RiskError, RiskResult};
use crate::market_data::ReturnSeries;
use crate::risk::{ConfidenceLevel, RiskCalculator, VarMethod};
use crate::stats::{QuantileMethod, ensure_finite};
use chrono::NaiveDate;
use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Kupiec test rejects the model when the p-value falls below this level
pub const DEFAULT_SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Monte Carlo draws per rolling window
pub const DEFAULT_SIMULATIONS: usize = 10_000;

/// Kupiec Proportion-of-Failures test outcome
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KupiecResult {
    pub n_violations: usize,
    pub n_observations: usize,
    pub violation_rate: f64,
    pub expected_rate: f64,
    pub lr_statistic: f64,
    pub p_value: f64,
    pub significance_level: f64,
    pub reject_null: bool,
}

/// Kupiec POF likelihood-ratio test for `n_violations` out of `n_observations`
///
/// LR = -2 [x ln(pi) + (n-x) ln(1-pi) - x ln(p) - (n-x) ln(1-p)] with p = x/n,
/// compared against a chi-square with one degree of freedom. With no
/// violations, or only violations, the statistic is set to 0 and the p-value to 1.
pub fn kupiec_pof(
    n_violations: usize,
    n_observations: usize,
    expected_rate: f64,
    significance_level: f64,
) -> RiskResult<KupiecResult> {
    if n_observations == 0 {
        return Err(RiskError::insufficient("Kupiec test", 1, 0));
    }
    if n_violations > n_observations {
        return Err(RiskError::config(format!(
            "{} violations cannot exceed {} observations",
            n_violations, n_observations
        )));
    }
    if !(expected_rate > 0.0 && expected_rate < 1.0) {
        return Err(RiskError::config(format!(
            "Expected violation rate must be in (0, 1), got {}",
            expected_rate
        )));
    }

    let x = n_violations as f64;
    let n = n_observations as f64;
    let violation_rate = x / n;

    let (lr_statistic, p_value) = if n_violations == 0 || n_violations == n_observations {
        (0.0, 1.0)
    } else {
        let pi = expected_rate;
        let lr = -2.0
            * (x * pi.ln() + (n - x) * (1.0 - pi).ln()
                - x * violation_rate.ln()
                - (n - x) * (1.0 - violation_rate).ln());
        // Clamp rounding noise when the observed rate equals the expected one
        let lr = lr.max(0.0);
        let chi_squared =
            ChiSquared::new(1.0).map_err(|e| RiskError::NumericDegeneracy(e.to_string()))?;
        (lr, 1.0 - chi_squared.cdf(lr))
    };

    Ok(KupiecResult {
        n_violations,
        n_observations,
        violation_rate,
        expected_rate,
        lr_statistic,
        p_value,
        significance_level,
        reject_null: p_value < significance_level,
    })
}

/// Walk-forward VaR estimates paired with the realized return they forecast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollingBacktest {
    pub method: VarMethod,
    pub window: usize,
    pub dates: Vec<NaiveDate>,
    pub var_estimates: Vec<f64>,
    pub actual_returns: Vec<f64>,
}

impl RollingBacktest {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Backtester over the out-of-sample estimates
    pub fn backtester(&self, confidence: ConfidenceLevel) -> RiskResult<Backtester> {
        let actual = ReturnSeries::new(self.dates.clone(), self.actual_returns.clone())?;
        Backtester::new(actual, self.var_estimates.clone(), confidence)
    }
}

/// Validates a VaR estimate series against realized returns
#[derive(Debug, Clone)]
pub struct Backtester {
    returns: ReturnSeries,
    var_estimates: Vec<f64>,
    confidence: ConfidenceLevel,
    significance_level: f64,
    quantile_method: QuantileMethod,
    n_simulations: usize,
    seed: u64,
}

impl Backtester {
    /// `var_estimates` are positive losses aligned with the dates of `returns`
    pub fn new(
        returns: ReturnSeries,
        var_estimates: Vec<f64>,
        confidence: ConfidenceLevel,
    ) -> RiskResult<Self> {
        if var_estimates.len() != returns.len() {
            return Err(RiskError::config(format!(
                "Got {} VaR estimates for {} returns",
                var_estimates.len(),
                returns.len()
            )));
        }
        ensure_finite(&var_estimates, "VaR estimates")?;

        Ok(Self {
            returns,
            var_estimates,
            confidence,
            significance_level: DEFAULT_SIGNIFICANCE_LEVEL,
            quantile_method: QuantileMethod::default(),
            n_simulations: DEFAULT_SIMULATIONS,
            seed: 0,
        })
    }

    /// Same VaR estimate on every date
    pub fn with_constant_var(
        returns: ReturnSeries,
        var_estimate: f64,
        confidence: ConfidenceLevel,
    ) -> RiskResult<Self> {
        let var_estimates = vec![var_estimate; returns.len()];
        Self::new(returns, var_estimates, confidence)
    }

    pub fn with_significance_level(mut self, significance_level: f64) -> RiskResult<Self> {
        if !(significance_level > 0.0 && significance_level < 1.0) {
            return Err(RiskError::config(format!(
                "Significance level must be in (0, 1), got {}",
                significance_level
            )));
        }
        self.significance_level = significance_level;
        Ok(self)
    }

    pub fn with_quantile_method(mut self, method: QuantileMethod) -> Self {
        self.quantile_method = method;
        self
    }

    /// Monte Carlo settings for rolling re-estimation; window i draws from a
    /// generator seeded with `seed + i`
    pub fn with_simulation(mut self, n_simulations: usize, seed: u64) -> RiskResult<Self> {
        if n_simulations == 0 {
            return Err(RiskError::config("Number of simulations must be at least 1"));
        }
        self.n_simulations = n_simulations;
        self.seed = seed;
        Ok(self)
    }

    pub fn returns(&self) -> &ReturnSeries {
        &self.returns
    }

    pub fn var_estimates(&self) -> &[f64] {
        &self.var_estimates
    }

    /// True where the realized loss exceeds that date's VaR estimate
    pub fn get_violations(&self) -> Vec<bool> {
        self.returns
            .values()
            .iter()
            .zip(&self.var_estimates)
            .map(|(r, var)| -r > *var)
            .collect()
    }

    pub fn violation_dates(&self) -> Vec<NaiveDate> {
        self.returns
            .dates()
            .iter()
            .zip(self.get_violations())
            .filter_map(|(date, violated)| violated.then_some(*date))
            .collect()
    }

    pub fn kupiec_test(&self) -> RiskResult<KupiecResult> {
        let n_violations = self.get_violations().iter().filter(|&&v| v).count();
        kupiec_pof(
            n_violations,
            self.returns.len(),
            self.confidence.alpha(),
            self.significance_level,
        )
    }

    /// Mean of (realized loss - VaR) over violation dates, 0 without violations
    pub fn calculate_avg_exceedance(&self) -> f64 {
        let (sum, count) = self
            .returns
            .values()
            .iter()
            .zip(&self.var_estimates)
            .map(|(r, var)| -r - var)
            .filter(|&excess| excess > 0.0)
            .fold((0.0, 0usize), |(sum, count), excess| (sum + excess, count + 1));

        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// Out-of-sample walk-forward backtest
    ///
    /// For every index i in [window, len) the VaR is re-estimated from
    /// returns[i - window..i] only and paired with the realized return at i.
    /// Windows are independent and evaluated in parallel; output stays in date order.
    pub fn rolling_var_backtest(&self, window: usize, method: VarMethod) -> RiskResult<RollingBacktest> {
        let n = self.returns.len();
        if window == 0 {
            return Err(RiskError::config("Rolling window must be at least 1"));
        }
        if window > n {
            return Err(RiskError::insufficient("rolling VaR backtest", window + 1, n));
        }
        if window == n {
            return Err(RiskError::config(format!(
                "Rolling window {} must be smaller than the series length {}",
                window, n
            )));
        }

        let values = self.returns.values();
        let var_estimates = (window..n)
            .into_par_iter()
            .map(|i| {
                let calc = RiskCalculator::new(&values[i - window..i], self.confidence)?
                    .with_quantile_method(self.quantile_method);
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                calc.var(method, self.n_simulations, &mut rng)
            })
            .collect::<RiskResult<Vec<f64>>>()?;

        debug!(
            "Rolling {} VaR backtest: {} estimates from {}-observation windows",
            method,
            var_estimates.len(),
            window
        );

        Ok(RollingBacktest {
            method,
            window,
            dates: self.returns.dates()[window..].to_vec(),
            var_estimates,
            actual_returns: values[window..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        (0..n as u64).map(|i| start + chrono::Days::new(i)).collect()
    }

    fn series(values: Vec<f64>) -> ReturnSeries {
        ReturnSeries::new(dates(values.len()), values).unwrap()
    }

    fn confidence(value: f64) -> ConfidenceLevel {
        ConfidenceLevel::new(value).unwrap()
    }

    /// Deterministic zig-zag returns
    fn zigzag(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| ((i * 37 % 101) as f64 - 50.0) / 2500.0)
            .collect()
    }

    #[test]
    fn test_violations() {
        let returns = series(vec![-0.03, 0.01, -0.02, -0.021, 0.0]);
        let backtester = Backtester::with_constant_var(returns, 0.02, confidence(0.95)).unwrap();

        assert_eq!(backtester.get_violations(), vec![true, false, false, true, false]);
        assert_eq!(backtester.violation_dates(), vec![dates(5)[0], dates(5)[3]]);
    }

    #[test]
    fn test_time_varying_estimates() {
        let returns = series(vec![-0.03, -0.03]);
        let backtester = Backtester::new(returns, vec![0.05, 0.01], confidence(0.95)).unwrap();
        assert_eq!(backtester.get_violations(), vec![false, true]);
    }

    #[test]
    fn test_misaligned_estimates() {
        let returns = series(vec![-0.03, 0.01]);
        assert!(matches!(
            Backtester::new(returns, vec![0.02], confidence(0.95)),
            Err(RiskError::Configuration(_))
        ));
    }

    #[test]
    fn test_avg_exceedance() {
        let returns = series(vec![-0.03, 0.01, -0.025, 0.0]);
        let backtester = Backtester::with_constant_var(returns, 0.02, confidence(0.95)).unwrap();
        assert!((backtester.calculate_avg_exceedance() - 0.0075).abs() < 1e-12);

        let calm = series(vec![0.01, 0.0]);
        let backtester = Backtester::with_constant_var(calm, 0.02, confidence(0.95)).unwrap();
        assert_eq!(backtester.calculate_avg_exceedance(), 0.0);
    }

    #[test]
    fn test_kupiec_no_violations() {
        let result = kupiec_pof(0, 1000, 0.05, DEFAULT_SIGNIFICANCE_LEVEL).unwrap();
        assert_eq!(result.p_value, 1.0);
        assert_eq!(result.lr_statistic, 0.0);
        assert!(!result.reject_null);
    }

    #[test]
    fn test_kupiec_all_violations() {
        let result = kupiec_pof(20, 20, 0.05, DEFAULT_SIGNIFICANCE_LEVEL).unwrap();
        assert_eq!(result.p_value, 1.0);
        assert_eq!(result.violation_rate, 1.0);
    }

    #[test]
    fn test_kupiec_rate_equal_to_alpha() {
        let result = kupiec_pof(50, 1000, 0.05, DEFAULT_SIGNIFICANCE_LEVEL).unwrap();
        assert!(result.lr_statistic < 1e-9);
        assert!((result.p_value - 1.0).abs() < 1e-4);
        assert!(!result.reject_null);
    }

    #[test]
    fn test_kupiec_known_values() {
        // 10 violations in 250 days against a 1% model
        let result = kupiec_pof(10, 250, 0.01, DEFAULT_SIGNIFICANCE_LEVEL).unwrap();
        assert!((result.lr_statistic - 12.955491).abs() < 1e-5);
        assert!((result.p_value - 0.000319).abs() < 1e-5);
        assert!(result.reject_null);

        let result = kupiec_pof(60, 1000, 0.05, DEFAULT_SIGNIFICANCE_LEVEL).unwrap();
        assert!((result.lr_statistic - 1.984221).abs() < 1e-5);
        assert!((result.p_value - 0.158946).abs() < 1e-5);
        assert!(!result.reject_null);
    }

    #[test]
    fn test_kupiec_significance_override() {
        let result = kupiec_pof(60, 1000, 0.05, 0.20).unwrap();
        assert!(result.reject_null);
        assert!(kupiec_pof(1, 0, 0.05, 0.05).is_err());
        assert!(kupiec_pof(5, 4, 0.05, 0.05).is_err());
    }

    #[test]
    fn test_kupiec_from_backtester() {
        let returns = series(vec![-0.03, 0.01, -0.02, -0.021, 0.0]);
        let backtester = Backtester::with_constant_var(returns, 0.02, confidence(0.95))
            .unwrap()
            .with_significance_level(0.01)
            .unwrap();
        let result = backtester.kupiec_test().unwrap();

        assert_eq!(result.n_violations, 2);
        assert_eq!(result.n_observations, 5);
        assert!((result.violation_rate - 0.4).abs() < 1e-12);
        assert!((result.expected_rate - 0.05).abs() < 1e-12);
        assert_eq!(result.significance_level, 0.01);
    }

    #[test]
    fn test_rolling_alignment() {
        let values = zigzag(120);
        let backtester = Backtester::with_constant_var(series(values.clone()), 0.0, confidence(0.95)).unwrap();
        let rolling = backtester.rolling_var_backtest(50, VarMethod::Historical).unwrap();

        assert_eq!(rolling.len(), 70);
        assert_eq!(rolling.var_estimates.len(), 70);
        assert_eq!(rolling.dates[0], dates(120)[50]);
        for (k, actual) in rolling.actual_returns.iter().enumerate() {
            assert_eq!(*actual, values[50 + k]);
        }
    }

    #[test]
    fn test_rolling_excludes_evaluation_day() {
        let values = zigzag(80);
        let backtester = Backtester::with_constant_var(series(values.clone()), 0.0, confidence(0.90)).unwrap();
        let rolling = backtester.rolling_var_backtest(30, VarMethod::Parametric).unwrap();

        for (k, estimate) in rolling.var_estimates.iter().enumerate() {
            let i = 30 + k;
            let expected = RiskCalculator::new(&values[i - 30..i], confidence(0.90))
                .unwrap()
                .parametric_var()
                .unwrap();
            assert_eq!(*estimate, expected);
        }
    }

    #[test]
    fn test_rolling_monte_carlo_reproducible() {
        let values = zigzag(90);
        let backtester = Backtester::with_constant_var(series(values), 0.0, confidence(0.95))
            .unwrap()
            .with_simulation(2_000, 99)
            .unwrap();

        let first = backtester.rolling_var_backtest(40, VarMethod::MonteCarlo).unwrap();
        let second = backtester.rolling_var_backtest(40, VarMethod::MonteCarlo).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rolling_window_validation() {
        let backtester = Backtester::with_constant_var(series(zigzag(10)), 0.0, confidence(0.95)).unwrap();

        assert!(matches!(
            backtester.rolling_var_backtest(0, VarMethod::Historical),
            Err(RiskError::Configuration(_))
        ));
        assert!(matches!(
            backtester.rolling_var_backtest(10, VarMethod::Historical),
            Err(RiskError::Configuration(_))
        ));
        assert!(matches!(
            backtester.rolling_var_backtest(11, VarMethod::Historical),
            Err(RiskError::InsufficientData { .. })
        ));
        assert!(matches!(
            backtester.rolling_var_backtest(1, VarMethod::Parametric),
            Err(RiskError::InsufficientData { required: 2, .. })
        ));
    }

    #[test]
    fn test_rolling_result_feeds_backtester() {
        let values = zigzag(150);
        let backtester = Backtester::with_constant_var(series(values), 0.0, confidence(0.95)).unwrap();
        let rolling = backtester.rolling_var_backtest(100, VarMethod::Historical).unwrap();

        let out_of_sample = rolling.backtester(confidence(0.95)).unwrap();
        let kupiec = out_of_sample.kupiec_test().unwrap();
        assert_eq!(kupiec.n_observations, 50);
        assert_eq!(out_of_sample.var_estimates(), rolling.var_estimates.as_slice());
    }
}
