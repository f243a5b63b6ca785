//! Value-at-Risk and Conditional VaR under historical, parametric and Monte Carlo methods
//!
//! Every measure is a loss fraction: positive for an adverse outcome. VaR answers
//! "the loss L such that P(return < -L) is about alpha"; CVaR is the expected loss
//! beyond that threshold.

use crate::error::{RiskError, RiskResult};
use crate::stats::{QuantileMethod, ensure_finite, mean_and_std, quantile, quantile_sorted, tail_average};
use rand::Rng;
use rand_distr::{Distribution, Normal as SamplingNormal};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::fmt;

/// Confidence level in (0, 1); alpha = 1 - confidence is the left-tail mass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceLevel(f64);

impl ConfidenceLevel {
    pub fn new(value: f64) -> RiskResult<Self> {
        if !(value > 0.0 && value < 1.0) {
            return Err(RiskError::config(format!(
                "Confidence level must be in (0, 1), got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn alpha(&self) -> f64 {
        1.0 - self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarMethod {
    #[default]
    Historical,
    Parametric,
    MonteCarlo,
}

impl VarMethod {
    pub const ALL: [VarMethod; 3] = [VarMethod::Historical, VarMethod::Parametric, VarMethod::MonteCarlo];

    pub fn as_str(&self) -> &'static str {
        match self {
            VarMethod::Historical => "historical",
            VarMethod::Parametric => "parametric",
            VarMethod::MonteCarlo => "monte_carlo",
        }
    }
}

impl fmt::Display for VarMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskMeasure {
    #[serde(rename = "var")]
    VaR,
    #[serde(rename = "cvar")]
    CVaR,
}

impl fmt::Display for RiskMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskMeasure::VaR => f.write_str("VaR"),
            RiskMeasure::CVaR => f.write_str("CVaR"),
        }
    }
}

/// What CVaR does when no observation falls at or below the VaR threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailPolicy {
    /// Report the VaR value itself as CVaR
    #[default]
    FallbackToVar,
    /// Fail with `RiskError::UndefinedTailAverage`
    Strict,
}

/// A single (method, measure) loss value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskMetric {
    pub method: VarMethod,
    pub measure: RiskMeasure,
    pub value: f64,
}

/// All six VaR/CVaR values, either as loss fractions or scaled to currency
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskMetrics {
    pub historical_var: f64,
    pub historical_cvar: f64,
    pub parametric_var: f64,
    pub parametric_cvar: f64,
    pub monte_carlo_var: f64,
    pub monte_carlo_cvar: f64,
}

impl RiskMetrics {
    pub fn get(&self, method: VarMethod, measure: RiskMeasure) -> f64 {
        match (method, measure) {
            (VarMethod::Historical, RiskMeasure::VaR) => self.historical_var,
            (VarMethod::Historical, RiskMeasure::CVaR) => self.historical_cvar,
            (VarMethod::Parametric, RiskMeasure::VaR) => self.parametric_var,
            (VarMethod::Parametric, RiskMeasure::CVaR) => self.parametric_cvar,
            (VarMethod::MonteCarlo, RiskMeasure::VaR) => self.monte_carlo_var,
            (VarMethod::MonteCarlo, RiskMeasure::CVaR) => self.monte_carlo_cvar,
        }
    }

    pub fn entries(&self) -> Vec<RiskMetric> {
        VarMethod::ALL
            .iter()
            .flat_map(|&method| {
                [RiskMeasure::VaR, RiskMeasure::CVaR].map(|measure| RiskMetric {
                    method,
                    measure,
                    value: self.get(method, measure),
                })
            })
            .collect()
    }

    /// Every value multiplied by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            historical_var: self.historical_var * factor,
            historical_cvar: self.historical_cvar * factor,
            parametric_var: self.parametric_var * factor,
            parametric_cvar: self.parametric_cvar * factor,
            monte_carlo_var: self.monte_carlo_var * factor,
            monte_carlo_cvar: self.monte_carlo_cvar * factor,
        }
    }
}

/// Output of `RiskCalculator::get_all_metrics`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AllMetrics {
    pub portfolio_value: f64,
    /// Loss fractions of portfolio value
    pub fractions: RiskMetrics,
    /// Losses in currency units (fractions x portfolio_value)
    pub scaled: RiskMetrics,
}

fn standard_normal() -> RiskResult<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| RiskError::NumericDegeneracy(e.to_string()))
}

fn ensure_simulations(n_simulations: usize) -> RiskResult<()> {
    if n_simulations == 0 {
        return Err(RiskError::config("Number of simulations must be at least 1"));
    }
    Ok(())
}

/// Point-in-time VaR/CVaR for one return sample and confidence level
#[derive(Debug, Clone, Copy)]
pub struct RiskCalculator<'a> {
    returns: &'a [f64],
    confidence: ConfidenceLevel,
    quantile_method: QuantileMethod,
    tail_policy: TailPolicy,
}

impl<'a> RiskCalculator<'a> {
    pub fn new(returns: &'a [f64], confidence: ConfidenceLevel) -> RiskResult<Self> {
        if returns.is_empty() {
            return Err(RiskError::insufficient("risk calculation", 1, 0));
        }
        ensure_finite(returns, "return sample")?;

        Ok(Self {
            returns,
            confidence,
            quantile_method: QuantileMethod::default(),
            tail_policy: TailPolicy::default(),
        })
    }

    pub fn with_quantile_method(mut self, method: QuantileMethod) -> Self {
        self.quantile_method = method;
        self
    }

    pub fn with_tail_policy(mut self, policy: TailPolicy) -> Self {
        self.tail_policy = policy;
        self
    }

    pub fn confidence(&self) -> ConfidenceLevel {
        self.confidence
    }

    pub fn alpha(&self) -> f64 {
        self.confidence.alpha()
    }

    fn conditional_loss(&self, sample: &[f64], threshold: f64, method: &'static str) -> RiskResult<f64> {
        match tail_average(sample, threshold) {
            Some(mean) => Ok(-mean),
            None => match self.tail_policy {
                TailPolicy::FallbackToVar => Ok(-threshold),
                TailPolicy::Strict => Err(RiskError::UndefinedTailAverage { method }),
            },
        }
    }

    /// Negated empirical alpha-quantile of the sample
    pub fn historical_var(&self) -> RiskResult<f64> {
        Ok(-quantile(self.returns, self.alpha(), self.quantile_method)?)
    }

    /// Negated mean of the observations at or below the signed VaR threshold
    pub fn historical_cvar(&self) -> RiskResult<f64> {
        let threshold = -self.historical_var()?;
        self.conditional_loss(self.returns, threshold, "historical")
    }

    fn moments(&self, operation: &'static str) -> RiskResult<(f64, f64)> {
        mean_and_std(self.returns, operation)
    }

    /// Gaussian VaR: -(mu + sigma * z_alpha)
    pub fn parametric_var(&self) -> RiskResult<f64> {
        let (mu, sigma) = self.moments("parametric VaR")?;
        if sigma == 0.0 {
            return Ok(-mu);
        }

        let z = standard_normal()?.inverse_cdf(self.alpha());
        Ok(-(mu + sigma * z))
    }

    /// Gaussian expected shortfall: -(mu - sigma * phi(z_alpha) / alpha)
    pub fn parametric_cvar(&self) -> RiskResult<f64> {
        let (mu, sigma) = self.moments("parametric CVaR")?;
        if sigma == 0.0 {
            return Ok(-mu);
        }

        let alpha = self.alpha();
        let normal = standard_normal()?;
        let z = normal.inverse_cdf(alpha);
        Ok(-(mu - sigma * normal.pdf(z) / alpha))
    }

    /// Ascending sample of `n_simulations` draws from Normal(mu, sigma), sigma > 0
    fn simulate<R: Rng + ?Sized>(
        mu: f64,
        sigma: f64,
        n_simulations: usize,
        rng: &mut R,
    ) -> RiskResult<Vec<f64>> {
        let normal = SamplingNormal::new(mu, sigma)
            .map_err(|e| RiskError::NumericDegeneracy(e.to_string()))?;
        let mut sample: Vec<f64> = (0..n_simulations).map(|_| normal.sample(rng)).collect();
        sample.sort_by(|a, b| a.total_cmp(b));
        Ok(sample)
    }

    /// Negated alpha-quantile of a simulated Normal(mu, sigma) sample
    ///
    /// A zero-variance sample resolves to -mu without touching the generator.
    pub fn monte_carlo_var<R: Rng + ?Sized>(&self, n_simulations: usize, rng: &mut R) -> RiskResult<f64> {
        ensure_simulations(n_simulations)?;
        let (mu, sigma) = self.moments("Monte Carlo VaR")?;
        if sigma == 0.0 {
            return Ok(-mu);
        }

        let sample = Self::simulate(mu, sigma, n_simulations, rng)?;
        Ok(-quantile_sorted(&sample, self.alpha(), self.quantile_method)?)
    }

    pub fn monte_carlo_cvar<R: Rng + ?Sized>(&self, n_simulations: usize, rng: &mut R) -> RiskResult<f64> {
        Ok(self.monte_carlo_var_cvar(n_simulations, rng)?.1)
    }

    /// VaR and CVaR from one shared simulated sample
    pub fn monte_carlo_var_cvar<R: Rng + ?Sized>(
        &self,
        n_simulations: usize,
        rng: &mut R,
    ) -> RiskResult<(f64, f64)> {
        ensure_simulations(n_simulations)?;
        let (mu, sigma) = self.moments("Monte Carlo CVaR")?;
        if sigma == 0.0 {
            return Ok((-mu, -mu));
        }

        let sample = Self::simulate(mu, sigma, n_simulations, rng)?;
        let threshold = quantile_sorted(&sample, self.alpha(), self.quantile_method)?;
        let cvar = self.conditional_loss(&sample, threshold, "Monte Carlo")?;
        Ok((-threshold, cvar))
    }

    /// VaR under the selected method
    pub fn var<R: Rng + ?Sized>(
        &self,
        method: VarMethod,
        n_simulations: usize,
        rng: &mut R,
    ) -> RiskResult<f64> {
        match method {
            VarMethod::Historical => self.historical_var(),
            VarMethod::Parametric => self.parametric_var(),
            VarMethod::MonteCarlo => self.monte_carlo_var(n_simulations, rng),
        }
    }

    /// All six measures as loss fractions and scaled by `portfolio_value`
    pub fn get_all_metrics<R: Rng + ?Sized>(
        &self,
        portfolio_value: f64,
        n_simulations: usize,
        rng: &mut R,
    ) -> RiskResult<AllMetrics> {
        if !(portfolio_value.is_finite() && portfolio_value > 0.0) {
            return Err(RiskError::config(format!(
                "Portfolio value must be positive, got {}",
                portfolio_value
            )));
        }

        let (monte_carlo_var, monte_carlo_cvar) = self.monte_carlo_var_cvar(n_simulations, rng)?;
        let fractions = RiskMetrics {
            historical_var: self.historical_var()?,
            historical_cvar: self.historical_cvar()?,
            parametric_var: self.parametric_var()?,
            parametric_cvar: self.parametric_cvar()?,
            monte_carlo_var,
            monte_carlo_cvar,
        };

        Ok(AllMetrics {
            portfolio_value,
            fractions,
            scaled: fractions.scaled(portfolio_value),
        })
    }
}
