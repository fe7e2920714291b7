use crate::analysis_service::ValuationEngine;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// --- Request Records ---

// Default scenario parameters applied when a field is omitted from the payload.
fn default_years_forward() -> u32 {
    4
}
fn default_rev_mid() -> f64 {
    0.18
}
fn default_rev_low() -> f64 {
    0.165
}
fn default_rev_high() -> f64 {
    0.20
}
fn default_margin_mid() -> f64 {
    0.27
}
fn default_margin_low() -> f64 {
    0.25
}
fn default_margin_high() -> f64 {
    0.28
}
fn default_pe_exit_mid() -> f64 {
    30.0
}
fn default_pe_exit_low() -> f64 {
    25.0
}
fn default_pe_exit_high() -> f64 {
    35.0
}

/// Valuation assumptions for one ticker. Only `ticker` is required; the ten
/// numeric fields fall back to the documented defaults. No ordering between
/// the low/mid/high variants is enforced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assumptions {
    pub ticker: String,
    #[serde(default = "default_years_forward")]
    pub years_forward: u32,
    #[serde(default = "default_rev_mid")]
    pub rev_mid: f64,
    #[serde(default = "default_rev_low")]
    pub rev_low: f64,
    #[serde(default = "default_rev_high")]
    pub rev_high: f64,
    #[serde(default = "default_margin_mid")]
    pub margin_mid: f64,
    #[serde(default = "default_margin_low")]
    pub margin_low: f64,
    #[serde(default = "default_margin_high")]
    pub margin_high: f64,
    #[serde(default = "default_pe_exit_mid")]
    pub pe_exit_mid: f64,
    #[serde(default = "default_pe_exit_low")]
    pub pe_exit_low: f64,
    #[serde(default = "default_pe_exit_high")]
    pub pe_exit_high: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub tickers: Vec<Assumptions>,
}

// --- Response Records ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleResult {
    pub summary: ValuationSummary,
    pub hist_table: Vec<HistRow>,
    pub forecast_table: Vec<ForecastRow>,
}

/// Positionally aligned with the `tickers` array of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<SingleResult>,
}

/// One fiscal year of reported fundamentals, as retrieved upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalYear {
    pub year: i32,
    pub revenue: f64,
    pub net_income: f64,
}

/// Result object produced by the analysis step. Carries the scenario inputs
/// and the reported history alongside the headline figures so the display
/// tables can be rebuilt from the summary alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationSummary {
    pub ticker: String,
    pub name: String,
    pub current_price: f64,
    pub shares_outstanding: f64,
    pub years_forward: u32,
    pub base_revenue: f64,
    pub rev_low: f64,
    pub rev_mid: f64,
    pub rev_high: f64,
    pub margin_low: f64,
    pub margin_mid: f64,
    pub margin_high: f64,
    pub pe_exit_low: f64,
    pub pe_exit_mid: f64,
    pub pe_exit_high: f64,
    pub target_price_low: f64,
    pub target_price_mid: f64,
    pub target_price_high: f64,
    pub total_return_low: f64,
    pub total_return_mid: f64,
    pub total_return_high: f64,
    pub annualized_low: f64,
    pub annualized_mid: f64,
    pub annualized_high: f64,
    pub fiscal_history: Vec<FiscalYear>,
}

/// Row of the historical fundamentals table, oldest fiscal year first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistRow {
    pub year: i32,
    pub revenue: f64,
    pub net_income: f64,
    pub net_margin: f64,
    pub eps: f64,
    /// Year-over-year revenue growth; absent on the first row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue_growth: Option<f64>,
}

/// Row of the forecast table, one per projected year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRow {
    pub year: i32,
    pub revenue_low: f64,
    pub revenue_mid: f64,
    pub revenue_high: f64,
    pub net_income_low: f64,
    pub net_income_mid: f64,
    pub net_income_high: f64,
    pub eps_low: f64,
    pub eps_mid: f64,
    pub eps_high: f64,
    pub price_low: f64,
    pub price_mid: f64,
    pub price_high: f64,
}

/// One point of the daily close series returned alongside the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

// --- Type Aliases for Shared State ---

pub type SharedEngine = Arc<ValuationEngine>;
