use crate::data_structures::{
    Assumptions, ForecastRow, HistRow, PricePoint, ValuationSummary,
};
use crate::utils::cache::TtlCache;
use crate::yahoo::{CompanyFundamentals, MarketData, MarketDataError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

#[derive(Debug)]
pub enum AnalysisError {
    Source(MarketDataError),
    MissingFundamentals { symbol: String, field: &'static str },
    InvalidAssumptions(String),
}

impl From<MarketDataError> for AnalysisError {
    fn from(error: MarketDataError) -> Self {
        AnalysisError::Source(error)
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::Source(e) => write!(f, "market data error: {e}"),
            AnalysisError::MissingFundamentals { symbol, field } => {
                write!(f, "upstream data for {symbol} is missing {field}")
            }
            AnalysisError::InvalidAssumptions(msg) => write!(f, "invalid assumptions: {msg}"),
        }
    }
}

impl std::error::Error for AnalysisError {}

/// Scenario projection over fetched fundamentals. Owns the market-data source
/// and a per-ticker cache so a batch naming the same symbol twice hits the
/// network once.
pub struct ValuationEngine {
    source: Arc<dyn MarketData>,
    fundamentals_cache: TtlCache<CompanyFundamentals>,
    history_cache: TtlCache<Vec<PricePoint>>,
}

impl ValuationEngine {
    pub fn new(source: Arc<dyn MarketData>, cache_ttl: Duration) -> Self {
        Self {
            source,
            fundamentals_cache: TtlCache::new(cache_ttl),
            history_cache: TtlCache::new(cache_ttl),
        }
    }

    async fn fundamentals_for(&self, symbol: &str) -> Result<CompanyFundamentals, AnalysisError> {
        if let Some(cached) = self.fundamentals_cache.get(symbol).await {
            return Ok(cached);
        }
        let fundamentals = self.source.fundamentals(symbol).await?;
        self.fundamentals_cache.insert(symbol, fundamentals.clone()).await;
        Ok(fundamentals)
    }

    async fn history_for(&self, symbol: &str) -> Result<Vec<PricePoint>, AnalysisError> {
        if let Some(cached) = self.history_cache.get(symbol).await {
            return Ok(cached);
        }
        let history = self.source.price_history(symbol).await?;
        self.history_cache.insert(symbol, history.clone()).await;
        Ok(history)
    }

    /// Runs the scenario projection for one ticker. Returns the summary and
    /// the daily close series for the past year.
    #[instrument(skip(self, assumptions), fields(ticker = %assumptions.ticker))]
    pub async fn analyze_ticker(
        &self,
        assumptions: &Assumptions,
    ) -> Result<(ValuationSummary, Vec<PricePoint>), AnalysisError> {
        if assumptions.years_forward == 0 {
            return Err(AnalysisError::InvalidAssumptions(
                "years_forward must be at least 1".to_string(),
            ));
        }
        let symbol = assumptions.ticker.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(AnalysisError::InvalidAssumptions(
                "ticker must not be empty".to_string(),
            ));
        }

        debug!(%symbol, "Fetching fundamentals");
        let fundamentals = self.fundamentals_for(&symbol).await?;

        let current_price = fundamentals
            .current_price
            .filter(|p| *p > 0.0)
            .ok_or_else(|| AnalysisError::MissingFundamentals {
                symbol: symbol.clone(),
                field: "current_price",
            })?;
        let shares_outstanding = fundamentals
            .shares_outstanding
            .filter(|s| *s > 0.0)
            .ok_or_else(|| AnalysisError::MissingFundamentals {
                symbol: symbol.clone(),
                field: "shares_outstanding",
            })?;

        // Fiscal years with no reported revenue carry no margin signal
        let fiscal_history: Vec<_> = fundamentals
            .income_history
            .iter()
            .filter(|fy| fy.revenue > 0.0)
            .cloned()
            .collect();
        let latest = fiscal_history.last().ok_or_else(|| {
            AnalysisError::MissingFundamentals {
                symbol: symbol.clone(),
                field: "income_history",
            }
        })?;

        // Project off trailing-twelve-month revenue when reported, otherwise
        // off the latest fiscal year.
        let base_revenue = fundamentals
            .ttm_revenue
            .filter(|r| *r > 0.0)
            .unwrap_or(latest.revenue);

        let years = assumptions.years_forward;
        let target_price_low = implied_price(
            base_revenue,
            shares_outstanding,
            assumptions.rev_low,
            assumptions.margin_low,
            assumptions.pe_exit_low,
            years,
        );
        let target_price_mid = implied_price(
            base_revenue,
            shares_outstanding,
            assumptions.rev_mid,
            assumptions.margin_mid,
            assumptions.pe_exit_mid,
            years,
        );
        let target_price_high = implied_price(
            base_revenue,
            shares_outstanding,
            assumptions.rev_high,
            assumptions.margin_high,
            assumptions.pe_exit_high,
            years,
        );

        let total_return_low = target_price_low / current_price - 1.0;
        let total_return_mid = target_price_mid / current_price - 1.0;
        let total_return_high = target_price_high / current_price - 1.0;
        let annualized = |total: f64| (1.0 + total).powf(1.0 / years as f64) - 1.0;

        let prices = self.history_for(&symbol).await?;

        let summary = ValuationSummary {
            name: fundamentals.name.clone().unwrap_or_else(|| symbol.clone()),
            ticker: symbol,
            current_price,
            shares_outstanding,
            years_forward: years,
            base_revenue,
            rev_low: assumptions.rev_low,
            rev_mid: assumptions.rev_mid,
            rev_high: assumptions.rev_high,
            margin_low: assumptions.margin_low,
            margin_mid: assumptions.margin_mid,
            margin_high: assumptions.margin_high,
            pe_exit_low: assumptions.pe_exit_low,
            pe_exit_mid: assumptions.pe_exit_mid,
            pe_exit_high: assumptions.pe_exit_high,
            target_price_low,
            target_price_mid,
            target_price_high,
            total_return_low,
            total_return_mid,
            total_return_high,
            annualized_low: annualized(total_return_low),
            annualized_mid: annualized(total_return_mid),
            annualized_high: annualized(total_return_high),
            fiscal_history,
        };

        info!(
            ticker = %summary.ticker,
            current_price,
            target_price_mid,
            "Analysis complete"
        );
        Ok((summary, prices))
    }
}

fn projected_revenue(base_revenue: f64, growth: f64, year: u32) -> f64 {
    base_revenue * (1.0 + growth).powi(year as i32)
}

fn implied_price(
    base_revenue: f64,
    shares_outstanding: f64,
    growth: f64,
    margin: f64,
    pe_exit: f64,
    year: u32,
) -> f64 {
    let revenue = projected_revenue(base_revenue, growth, year);
    let eps = revenue * margin / shares_outstanding;
    eps * pe_exit
}

/// Builds the two display tables from a summary: reported fiscal years with
/// derived margin/EPS/growth columns, and one forecast row per projected year.
pub fn make_tables(summary: &ValuationSummary) -> (Vec<HistRow>, Vec<ForecastRow>) {
    let mut hist_table = Vec::with_capacity(summary.fiscal_history.len());
    let mut prev_revenue: Option<f64> = None;
    for fy in &summary.fiscal_history {
        hist_table.push(HistRow {
            year: fy.year,
            revenue: fy.revenue,
            net_income: fy.net_income,
            net_margin: fy.net_income / fy.revenue,
            eps: fy.net_income / summary.shares_outstanding,
            revenue_growth: prev_revenue.map(|prev| fy.revenue / prev - 1.0),
        });
        prev_revenue = Some(fy.revenue);
    }

    let base_year = summary
        .fiscal_history
        .last()
        .map(|fy| fy.year)
        .unwrap_or_default();

    let mut forecast_table = Vec::with_capacity(summary.years_forward as usize);
    for t in 1..=summary.years_forward {
        let revenue_low = projected_revenue(summary.base_revenue, summary.rev_low, t);
        let revenue_mid = projected_revenue(summary.base_revenue, summary.rev_mid, t);
        let revenue_high = projected_revenue(summary.base_revenue, summary.rev_high, t);
        let net_income_low = revenue_low * summary.margin_low;
        let net_income_mid = revenue_mid * summary.margin_mid;
        let net_income_high = revenue_high * summary.margin_high;
        let eps_low = net_income_low / summary.shares_outstanding;
        let eps_mid = net_income_mid / summary.shares_outstanding;
        let eps_high = net_income_high / summary.shares_outstanding;

        forecast_table.push(ForecastRow {
            year: base_year + t as i32,
            revenue_low,
            revenue_mid,
            revenue_high,
            net_income_low,
            net_income_mid,
            net_income_high,
            eps_low,
            eps_mid,
            eps_high,
            price_low: eps_low * summary.pe_exit_low,
            price_mid: eps_mid * summary.pe_exit_mid,
            price_high: eps_high * summary.pe_exit_high,
        });
    }

    (hist_table, forecast_table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::FiscalYear;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        fundamentals_calls: AtomicUsize,
    }

    impl StubSource {
        fn new() -> Self {
            Self {
                fundamentals_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MarketData for StubSource {
        async fn fundamentals(
            &self,
            symbol: &str,
        ) -> Result<CompanyFundamentals, MarketDataError> {
            self.fundamentals_calls.fetch_add(1, Ordering::SeqCst);
            match symbol {
                "FAIL" => Err(MarketDataError::InvalidResponse("boom".to_string())),
                "MISSING" => Err(MarketDataError::NotFound(symbol.to_string())),
                _ => Ok(CompanyFundamentals {
                    symbol: symbol.to_string(),
                    name: Some("Stub Corp".to_string()),
                    current_price: Some(100.0),
                    shares_outstanding: if symbol == "NOSHARES" {
                        None
                    } else {
                        Some(1_000_000_000.0)
                    },
                    ttm_revenue: if symbol == "NOTTM" {
                        None
                    } else {
                        Some(10_000_000_000.0)
                    },
                    income_history: vec![
                        FiscalYear {
                            year: 2021,
                            revenue: 7_000_000_000.0,
                            net_income: 700_000_000.0,
                        },
                        FiscalYear {
                            year: 2022,
                            revenue: 8_000_000_000.0,
                            net_income: 1_200_000_000.0,
                        },
                        FiscalYear {
                            year: 2023,
                            revenue: 9_000_000_000.0,
                            net_income: 1_800_000_000.0,
                        },
                    ],
                }),
            }
        }

        async fn price_history(&self, _symbol: &str) -> Result<Vec<PricePoint>, MarketDataError> {
            Ok(vec![
                PricePoint {
                    date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                    close: 99.0,
                },
                PricePoint {
                    date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                    close: 101.0,
                },
            ])
        }
    }

    fn engine() -> ValuationEngine {
        ValuationEngine::new(Arc::new(StubSource::new()), Duration::from_secs(60))
    }

    fn assumptions(body: serde_json::Value) -> Assumptions {
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_ticker_mid_scenario_math() {
        let engine = engine();
        let a = assumptions(json!({ "ticker": "now" }));

        let (summary, prices) = engine.analyze_ticker(&a).await.unwrap();

        assert_eq!(summary.ticker, "NOW");
        assert_eq!(summary.name, "Stub Corp");
        assert_eq!(summary.current_price, 100.0);
        assert_eq!(summary.base_revenue, 10_000_000_000.0);
        assert_eq!(prices.len(), 2);

        // base/shares = 10, so target = 10 * 1.18^4 * 0.27 * 30
        let expected_mid = 10.0 * 1.18f64.powi(4) * 0.27 * 30.0;
        assert!((summary.target_price_mid - expected_mid).abs() < 1e-9);

        let expected_return = expected_mid / 100.0 - 1.0;
        assert!((summary.total_return_mid - expected_return).abs() < 1e-9);

        let expected_annualized = (1.0 + expected_return).powf(0.25) - 1.0;
        assert!((summary.annualized_mid - expected_annualized).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_analyze_ticker_falls_back_to_fiscal_revenue() {
        let engine = engine();
        let a = assumptions(json!({ "ticker": "NOTTM" }));

        let (summary, _) = engine.analyze_ticker(&a).await.unwrap();
        assert_eq!(summary.base_revenue, 9_000_000_000.0);
    }

    #[tokio::test]
    async fn test_analyze_ticker_rejects_zero_horizon() {
        let engine = engine();
        let a = assumptions(json!({ "ticker": "NOW", "years_forward": 0 }));

        let result = engine.analyze_ticker(&a).await;
        assert!(matches!(result, Err(AnalysisError::InvalidAssumptions(_))));
    }

    #[tokio::test]
    async fn test_analyze_ticker_rejects_blank_ticker() {
        let engine = engine();
        let a = assumptions(json!({ "ticker": "   " }));

        let result = engine.analyze_ticker(&a).await;
        assert!(matches!(result, Err(AnalysisError::InvalidAssumptions(_))));
    }

    #[tokio::test]
    async fn test_analyze_ticker_requires_shares_outstanding() {
        let engine = engine();
        let a = assumptions(json!({ "ticker": "NOSHARES" }));

        let result = engine.analyze_ticker(&a).await;
        assert!(matches!(
            result,
            Err(AnalysisError::MissingFundamentals {
                field: "shares_outstanding",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_analyze_ticker_propagates_source_errors() {
        let engine = engine();
        let a = assumptions(json!({ "ticker": "FAIL" }));

        let result = engine.analyze_ticker(&a).await;
        assert!(matches!(result, Err(AnalysisError::Source(_))));
    }

    #[tokio::test]
    async fn test_fundamentals_fetched_once_per_ticker() {
        let source = Arc::new(StubSource::new());
        let engine = ValuationEngine::new(source.clone(), Duration::from_secs(60));
        let a = assumptions(json!({ "ticker": "NOW" }));

        engine.analyze_ticker(&a).await.unwrap();
        engine.analyze_ticker(&a).await.unwrap();

        assert_eq!(source.fundamentals_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_make_tables_shapes() {
        let engine = engine();
        let a = assumptions(json!({ "ticker": "NOW" }));
        let (summary, _) = engine.analyze_ticker(&a).await.unwrap();

        let (hist, forecast) = make_tables(&summary);

        assert_eq!(hist.len(), 3);
        assert_eq!(hist[0].year, 2021);
        assert!(hist[0].revenue_growth.is_none());
        let growth_2022 = hist[1].revenue_growth.unwrap();
        assert!((growth_2022 - (8.0 / 7.0 - 1.0)).abs() < 1e-9);
        assert!((hist[2].net_margin - 0.2).abs() < 1e-9);
        assert!((hist[2].eps - 1.8).abs() < 1e-9);

        assert_eq!(forecast.len(), 4);
        assert_eq!(forecast[0].year, 2024);
        assert_eq!(forecast[3].year, 2027);
        // The final forecast row lands exactly on the summary targets
        assert!((forecast[3].price_mid - summary.target_price_mid).abs() < 1e-9);
        assert!((forecast[3].price_low - summary.target_price_low).abs() < 1e-9);
        assert!((forecast[3].price_high - summary.target_price_high).abs() < 1e-9);
    }
}
