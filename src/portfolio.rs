use crate::error::{RiskError, RiskResult};
use crate::market_data::{ReturnMatrix, ReturnSeries};
use crate::stats::{excess_kurtosis, mean_and_std, pearson_correlation, skewness};
use chrono::NaiveDate;
use ndarray::{Array1, Array2};
use serde::Serialize;

/// Tolerance on the unit-sum constraint of a weight vector
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Trading days per year used to annualize daily statistics
pub const DEFAULT_PERIODS_PER_YEAR: f64 = 252.0;

/// Per-asset portfolio weights summing to one
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightVector {
    weights: Vec<f64>,
}

impl WeightVector {
    pub fn new(weights: Vec<f64>) -> RiskResult<Self> {
        if weights.is_empty() {
            return Err(RiskError::config("Weight vector cannot be empty"));
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(RiskError::config("Weights must be finite"));
        }

        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RiskError::config(format!(
                "Weights must sum to 1, got {}",
                total
            )));
        }

        Ok(Self { weights })
    }

    /// Equal weight 1/n for each of `n_assets`
    pub fn uniform(n_assets: usize) -> RiskResult<Self> {
        if n_assets == 0 {
            return Err(RiskError::config("Weight vector cannot be empty"));
        }
        Ok(Self {
            weights: vec![1.0 / n_assets as f64; n_assets],
        })
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Summary statistics of the portfolio return series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioStatistics {
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    /// Annualized return over annualized volatility, no risk-free adjustment.
    /// None when the series has no variance.
    pub return_to_volatility: Option<f64>,
    pub skewness: Option<f64>,
    pub excess_kurtosis: Option<f64>,
    pub max_daily_return: f64,
    pub min_daily_return: f64,
    pub periods_per_year: f64,
    pub observations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Pairwise Pearson correlations between asset return columns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub assets: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    pub fn get(&self, asset1: &str, asset2: &str) -> Option<f64> {
        let i = self.assets.iter().position(|a| a == asset1)?;
        let j = self.assets.iter().position(|a| a == asset2)?;
        Some(self.values[i][j])
    }
}

/// Combines per-asset returns and weights into a single portfolio return series
#[derive(Debug, Clone)]
pub struct PortfolioAggregator {
    returns: ReturnMatrix,
    weights: WeightVector,
    periods_per_year: f64,
}

impl PortfolioAggregator {
    /// Uniform weights are used when `weights` is None
    pub fn new(returns: ReturnMatrix, weights: Option<WeightVector>) -> RiskResult<Self> {
        let weights = match weights {
            Some(weights) => weights,
            None => WeightVector::uniform(returns.n_assets())?,
        };

        if weights.len() != returns.n_assets() {
            return Err(RiskError::config(format!(
                "Got {} weights for {} assets",
                weights.len(),
                returns.n_assets()
            )));
        }

        Ok(Self {
            returns,
            weights,
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
        })
    }

    pub fn with_periods_per_year(mut self, periods_per_year: f64) -> RiskResult<Self> {
        if !(periods_per_year.is_finite() && periods_per_year > 0.0) {
            return Err(RiskError::config(format!(
                "Periods per year must be positive, got {}",
                periods_per_year
            )));
        }
        self.periods_per_year = periods_per_year;
        Ok(self)
    }

    pub fn weights(&self) -> &WeightVector {
        &self.weights
    }

    pub fn returns(&self) -> &ReturnMatrix {
        &self.returns
    }

    /// Weighted sum of asset returns per date
    pub fn portfolio_returns(&self) -> RiskResult<ReturnSeries> {
        let weights = Array1::from(self.weights.as_slice().to_vec());
        let combined = self.returns.values().dot(&weights);
        ReturnSeries::new(self.returns.dates().to_vec(), combined.to_vec())
    }

    /// Compounded value path: initial_value * prod(1 + r) up to each date
    pub fn portfolio_value(&self, initial_value: f64) -> RiskResult<Vec<ValuePoint>> {
        if !(initial_value.is_finite() && initial_value > 0.0) {
            return Err(RiskError::config(format!(
                "Initial portfolio value must be positive, got {}",
                initial_value
            )));
        }

        let series = self.portfolio_returns()?;
        let mut value = initial_value;
        Ok(series
            .dates()
            .iter()
            .zip(series.values())
            .map(|(&date, r)| {
                value *= 1.0 + r;
                ValuePoint { date, value }
            })
            .collect())
    }

    pub fn get_statistics(&self) -> RiskResult<PortfolioStatistics> {
        let series = self.portfolio_returns()?;
        let returns = series.values();
        let (mean, std_dev) = mean_and_std(returns, "portfolio statistics")?;

        let annualized_return = mean * self.periods_per_year;
        let annualized_volatility = std_dev * self.periods_per_year.sqrt();
        let return_to_volatility = if annualized_volatility > 0.0 {
            Some(annualized_return / annualized_volatility)
        } else {
            None
        };

        let max_daily_return = returns.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min_daily_return = returns.iter().copied().fold(f64::INFINITY, f64::min);

        Ok(PortfolioStatistics {
            annualized_return,
            annualized_volatility,
            return_to_volatility,
            skewness: skewness(returns),
            excess_kurtosis: excess_kurtosis(returns),
            max_daily_return,
            min_daily_return,
            periods_per_year: self.periods_per_year,
            observations: returns.len(),
        })
    }

    pub fn get_correlation_matrix(&self) -> RiskResult<CorrelationMatrix> {
        let n = self.returns.n_assets();
        let columns: Vec<Vec<f64>> = (0..n).map(|j| self.returns.column(j).to_vec()).collect();
        let mut values = Array2::<f64>::eye(n);

        for i in 0..n {
            for j in (i + 1)..n {
                let correlation = pearson_correlation(&columns[i], &columns[j])?;
                values[[i, j]] = correlation;
                values[[j, i]] = correlation;
            }
        }

        Ok(CorrelationMatrix {
            assets: self.returns.assets().to_vec(),
            values: values.outer_iter().map(|row| row.to_vec()).collect(),
        })
    }
}
