//! Return data handed over by the market-data collaborator
//!
//! Retrieval and gap-filling happen upstream; this module only validates what
//! it receives and fails fast on anything malformed.

use crate::error::{RiskError, RiskResult};
use crate::stats::ensure_finite;
use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use log::debug;
use ndarray::{Array2, ArrayView1};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

fn ensure_ascending(dates: &[NaiveDate]) -> RiskResult<()> {
    match dates.windows(2).position(|pair| pair[0] >= pair[1]) {
        Some(idx) => Err(RiskError::config(format!(
            "Dates must be strictly ascending: {} is followed by {}",
            dates[idx],
            dates[idx + 1]
        ))),
        None => Ok(()),
    }
}

/// Date-indexed sequence of per-period log returns
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSeries {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl ReturnSeries {
    pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> RiskResult<Self> {
        if values.is_empty() {
            return Err(RiskError::insufficient("return series", 1, 0));
        }
        if dates.len() != values.len() {
            return Err(RiskError::config(format!(
                "Return series has {} dates but {} values",
                dates.len(),
                values.len()
            )));
        }
        ensure_ascending(&dates)?;
        ensure_finite(&values, "return series")?;

        Ok(Self { dates, values })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Multi-asset returns: one row per date, one column per asset
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMatrix {
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    values: Array2<f64>,
}

impl ReturnMatrix {
    pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, values: Array2<f64>) -> RiskResult<Self> {
        if assets.is_empty() {
            return Err(RiskError::config("Return matrix needs at least one asset"));
        }
        if dates.is_empty() {
            return Err(RiskError::insufficient("return matrix", 1, 0));
        }
        if values.dim() != (dates.len(), assets.len()) {
            return Err(RiskError::config(format!(
                "Return matrix shape {:?} does not match {} dates x {} assets",
                values.dim(),
                dates.len(),
                assets.len()
            )));
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = assets.iter().find(|a| !seen.insert(a.as_str())) {
            return Err(RiskError::config(format!(
                "Duplicate asset identifier: {}",
                duplicate
            )));
        }

        ensure_ascending(&dates)?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(RiskError::NumericDegeneracy(
                "return matrix contains non-finite values".to_string(),
            ));
        }

        Ok(Self {
            dates,
            assets,
            values,
        })
    }

    /// Log returns ln(p_t / p_{t-1}) from a price matrix; the first date is dropped
    pub fn from_prices(
        dates: Vec<NaiveDate>,
        assets: Vec<String>,
        prices: Array2<f64>,
    ) -> RiskResult<Self> {
        let (rows, cols) = prices.dim();
        if rows < 2 {
            return Err(RiskError::insufficient("log returns from prices", 2, rows));
        }
        if dates.len() != rows {
            return Err(RiskError::config(format!(
                "Price matrix has {} rows but {} dates",
                rows,
                dates.len()
            )));
        }
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(RiskError::config("Prices must be finite and positive"));
        }

        let returns = Array2::from_shape_fn((rows - 1, cols), |(t, j)| {
            (prices[[t + 1, j]] / prices[[t, j]]).ln()
        });

        Self::new(dates[1..].to_vec(), assets, returns)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn n_observations(&self) -> usize {
        self.dates.len()
    }

    pub fn column(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.values.column(idx)
    }

    /// Return series of a single asset
    pub fn asset_series(&self, asset: &str) -> Option<ReturnSeries> {
        let idx = self.assets.iter().position(|a| a == asset)?;
        Some(ReturnSeries {
            dates: self.dates.clone(),
            values: self.values.column(idx).to_vec(),
        })
    }
}

/// Supplier of a clean, date-ascending return matrix
pub trait MarketDataSource {
    fn load_returns(&self) -> Result<ReturnMatrix>;
}

#[derive(Debug, Deserialize)]
struct MarketDataFile {
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    #[serde(default)]
    prices: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    returns: Option<Vec<Vec<f64>>>,
}

fn rows_to_array(rows: Vec<Vec<f64>>, n_cols: usize) -> Result<Array2<f64>> {
    let n_rows = rows.len();
    if let Some(idx) = rows.iter().position(|r| r.len() != n_cols) {
        return Err(anyhow!(
            "Row {} has {} values, expected {}",
            idx,
            rows[idx].len(),
            n_cols
        ));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((n_rows, n_cols), flat)?)
}

/// JSON file with `dates`, `assets` and either `prices` or `returns` rows
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(content: &str) -> Result<ReturnMatrix> {
        let file: MarketDataFile = serde_json::from_str(content)?;
        let n_assets = file.assets.len();

        let matrix = match (file.prices, file.returns) {
            (Some(prices), None) => {
                let prices = rows_to_array(prices, n_assets)?;
                ReturnMatrix::from_prices(file.dates, file.assets, prices)?
            }
            (None, Some(returns)) => {
                let returns = rows_to_array(returns, n_assets)?;
                ReturnMatrix::new(file.dates, file.assets, returns)?
            }
            _ => {
                return Err(anyhow!(
                    "Market data file must contain exactly one of `prices` or `returns`"
                ));
            }
        };

        Ok(matrix)
    }
}

impl MarketDataSource for JsonFileSource {
    fn load_returns(&self) -> Result<ReturnMatrix> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read market data from {}", self.path.display()))?;
        let matrix = Self::parse(&content)
            .with_context(|| format!("Invalid market data in {}", self.path.display()))?;

        debug!(
            "Loaded {} observations for {} assets from {}",
            matrix.n_observations(),
            matrix.n_assets(),
            self.path.display()
        );

        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        (0..n as u64).map(|i| start + chrono::Days::new(i)).collect()
    }

    #[test]
    fn test_return_series_validation() {
        assert!(ReturnSeries::new(dates(3), vec![0.01, -0.02, 0.0]).is_ok());
        assert!(ReturnSeries::new(vec![], vec![]).is_err());
        assert!(ReturnSeries::new(dates(2), vec![0.01, -0.02, 0.0]).is_err());

        let mut reversed = dates(2);
        reversed.reverse();
        assert!(ReturnSeries::new(reversed, vec![0.01, 0.02]).is_err());

        assert!(matches!(
            ReturnSeries::new(dates(2), vec![0.01, f64::INFINITY]),
            Err(RiskError::NumericDegeneracy(_))
        ));
    }

    #[test]
    fn test_log_returns_from_prices() {
        let prices = array![[100.0, 50.0], [110.0, 50.0], [99.0, 55.0]];
        let assets = vec!["AAPL".to_string(), "MSFT".to_string()];
        let matrix = ReturnMatrix::from_prices(dates(3), assets, prices).unwrap();

        assert_eq!(matrix.n_observations(), 2);
        assert_eq!(matrix.dates()[0], dates(3)[1]);
        assert!((matrix.values()[[0, 0]] - 1.1_f64.ln()).abs() < 1e-12);
        assert!((matrix.values()[[1, 0]] - 0.9_f64.ln()).abs() < 1e-12);
        assert_eq!(matrix.values()[[0, 1]], 0.0);

        let msft = matrix.asset_series("MSFT").unwrap();
        assert!((msft.values()[1] - 1.1_f64.ln()).abs() < 1e-12);
        assert!(matrix.asset_series("GOOGL").is_none());
    }

    #[test]
    fn test_rejects_non_positive_prices() {
        let prices = array![[100.0], [0.0]];
        let result = ReturnMatrix::from_prices(dates(2), vec!["X".to_string()], prices);
        assert!(matches!(result, Err(RiskError::Configuration(_))));
    }

    #[test]
    fn test_rejects_duplicate_assets() {
        let values = array![[0.01, 0.02]];
        let assets = vec!["X".to_string(), "X".to_string()];
        assert!(ReturnMatrix::new(dates(1), assets, values).is_err());
    }

    #[test]
    fn test_parse_json_returns() {
        let content = r#"{
            "dates": ["2024-01-02", "2024-01-03"],
            "assets": ["AAPL", "MSFT"],
            "returns": [[0.01, -0.02], [0.005, 0.0]]
        }"#;
        let matrix = JsonFileSource::parse(content).unwrap();
        assert_eq!(matrix.n_assets(), 2);
        assert_eq!(matrix.values()[[0, 1]], -0.02);
    }

    #[test]
    fn test_parse_json_rejects_ragged_rows() {
        let content = r#"{
            "dates": ["2024-01-02", "2024-01-03"],
            "assets": ["AAPL", "MSFT"],
            "prices": [[100.0, 50.0], [101.0]]
        }"#;
        assert!(JsonFileSource::parse(content).is_err());
    }

    #[test]
    fn test_parse_json_requires_one_payload() {
        let content = r#"{ "dates": ["2024-01-02"], "assets": ["AAPL"] }"#;
        assert!(JsonFileSource::parse(content).is_err());
    }
}
