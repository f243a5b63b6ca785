pub mod analysis;
pub mod backtest;
pub mod config;
pub mod error;
pub mod market_data;
pub mod portfolio;
pub mod risk;
pub mod stats;
pub mod stress;
