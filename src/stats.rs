use crate::error::{RiskError, RiskResult};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Interpolation rule for empirical quantiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantileMethod {
    /// Virtual index h = (n - 1) * p, linear between the two neighbours
    #[default]
    Linear,
    /// Virtual index h = (n + 1/3) * p - 2/3 (Hyndman & Fan type 8)
    MedianUnbiased,
}

/// Reject NaN and infinite values before they reach a calculation
pub fn ensure_finite(values: &[f64], what: &str) -> RiskResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(idx) => Err(RiskError::NumericDegeneracy(format!(
            "{} contains a non-finite value at index {}",
            what, idx
        ))),
        None => Ok(()),
    }
}

/// Sample mean and sample standard deviation (n - 1 denominator)
///
/// # Arguments
/// * `values` - Sample, at least two observations
/// * `operation` - Name used in the error when the sample is too short
pub fn mean_and_std(values: &[f64], operation: &'static str) -> RiskResult<(f64, f64)> {
    if values.len() < 2 {
        return Err(RiskError::insufficient(operation, 2, values.len()));
    }

    // Constant sample: exact moments, no rounding residue in the variance
    if values.iter().all(|&v| v == values[0]) {
        return Ok((values[0], 0.0));
    }

    let mean = values.mean();
    let std_dev = values.std_dev();

    if !mean.is_finite() || !std_dev.is_finite() {
        return Err(RiskError::NumericDegeneracy(format!(
            "{}: sample moments are not finite (mean={}, std={})",
            operation, mean, std_dev
        )));
    }

    Ok((mean, std_dev))
}

/// Empirical quantile of an unsorted sample at probability `p` in [0, 1]
pub fn quantile(values: &[f64], p: f64, method: QuantileMethod) -> RiskResult<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, p, method)
}

/// Empirical quantile of an ascending sample at probability `p` in [0, 1]
pub fn quantile_sorted(sorted: &[f64], p: f64, method: QuantileMethod) -> RiskResult<f64> {
    if sorted.is_empty() {
        return Err(RiskError::insufficient("quantile", 1, 0));
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(RiskError::config(format!(
            "Quantile probability must be in [0, 1], got {}",
            p
        )));
    }

    let n = sorted.len();
    let last = (n - 1) as f64;
    let h = match method {
        QuantileMethod::Linear => last * p,
        QuantileMethod::MedianUnbiased => (n as f64 + 1.0 / 3.0) * p - 2.0 / 3.0,
    }
    .clamp(0.0, last);

    let lower = h.floor() as usize;
    let upper = (lower + 1).min(n - 1);
    let fraction = h - lower as f64;

    Ok(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
}

/// Mean of all values at or below `threshold`, None when that subset is empty
pub fn tail_average(values: &[f64], threshold: f64) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|&&v| v <= threshold)
        .fold((0.0, 0usize), |(sum, count), &v| (sum + v, count + 1));

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Adjusted Fisher-Pearson sample skewness (G1)
///
/// None for fewer than three observations; zero for a constant sample.
pub fn skewness(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 3 {
        return None;
    }

    let (mean, std_dev) = mean_and_std(values, "sample moments").ok()?;
    if std_dev == 0.0 {
        return Some(0.0);
    }

    let n = n as f64;
    let third: f64 = values.iter().map(|v| ((v - mean) / std_dev).powi(3)).sum();
    Some(n / ((n - 1.0) * (n - 2.0)) * third)
}

/// Bias-corrected sample excess kurtosis (G2)
///
/// None for fewer than four observations; zero for a constant sample.
pub fn excess_kurtosis(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 4 {
        return None;
    }

    let (mean, std_dev) = mean_and_std(values, "sample moments").ok()?;
    if std_dev == 0.0 {
        return Some(0.0);
    }

    let n = n as f64;
    let fourth: f64 = values.iter().map(|v| ((v - mean) / std_dev).powi(4)).sum();
    let scale = n * (n + 1.0) / ((n - 1.0) * (n - 2.0) * (n - 3.0));
    let correction = 3.0 * (n - 1.0).powi(2) / ((n - 2.0) * (n - 3.0));
    Some(scale * fourth - correction)
}

/// Pearson correlation between two equally long series
///
/// A series without variance has no defined correlation; 0.0 is returned.
pub fn pearson_correlation(series1: &[f64], series2: &[f64]) -> RiskResult<f64> {
    if series1.len() != series2.len() {
        return Err(RiskError::config(format!(
            "Series must have same length ({} vs {})",
            series1.len(),
            series2.len()
        )));
    }
    if series1.len() < 2 {
        return Err(RiskError::insufficient("correlation", 2, series1.len()));
    }

    let mean1 = series1.mean();
    let mean2 = series2.mean();

    let mut cov = 0.0;
    let mut var1 = 0.0;
    let mut var2 = 0.0;

    for (x, y) in series1.iter().zip(series2) {
        let diff1 = x - mean1;
        let diff2 = y - mean2;
        cov += diff1 * diff2;
        var1 += diff1 * diff1;
        var2 += diff2 * diff2;
    }

    let correlation = if var1 > 0.0 && var2 > 0.0 {
        (cov / (var1.sqrt() * var2.sqrt())).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    Ok(correlation)
}
