use crate::config::AppConfig;
use crate::data_structures::{FiscalYear, PricePoint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use reqwest::{Client, Error as ReqwestError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration as StdDuration, SystemTime};
use tokio::sync::Mutex;
use tokio::time::sleep;

const QUOTE_SUMMARY_MODULES: &str =
    "price,defaultKeyStatistics,financialData,incomeStatementHistory";
const CHART_RANGE: &str = "1y";
const CHART_INTERVAL: &str = "1d";

#[derive(Debug)]
pub enum MarketDataError {
    Http(ReqwestError),
    Serialization(serde_json::Error),
    InvalidInterval(String),
    InvalidRange(String),
    InvalidResponse(String),
    NotFound(String),
    NoData,
}

impl From<ReqwestError> for MarketDataError {
    fn from(error: ReqwestError) -> Self {
        MarketDataError::Http(error)
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(error: serde_json::Error) -> Self {
        MarketDataError::Serialization(error)
    }
}

impl fmt::Display for MarketDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketDataError::Http(e) => write!(f, "http error: {e}"),
            MarketDataError::Serialization(e) => write!(f, "serialization error: {e}"),
            MarketDataError::InvalidInterval(i) => write!(f, "invalid interval: {i}"),
            MarketDataError::InvalidRange(r) => write!(f, "invalid range: {r}"),
            MarketDataError::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
            MarketDataError::NotFound(symbol) => write!(f, "no data found for symbol {symbol}"),
            MarketDataError::NoData => write!(f, "empty response"),
        }
    }
}

impl std::error::Error for MarketDataError {}

/// Company fundamentals as reported by the quoteSummary endpoint. Every field
/// besides the symbol may be missing upstream; the analysis layer decides
/// which absences are fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyFundamentals {
    pub symbol: String,
    pub name: Option<String>,
    pub current_price: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub ttm_revenue: Option<f64>,
    pub income_history: Vec<FiscalYear>,
}

/// Market-data retrieval seam consumed by the valuation engine.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn fundamentals(&self, symbol: &str) -> Result<CompanyFundamentals, MarketDataError>;
    async fn price_history(&self, symbol: &str) -> Result<Vec<PricePoint>, MarketDataError>;
}

pub struct YahooClient {
    client: Client,
    base_url: String,
    rate_limit_per_minute: u32,
    request_timestamps: Mutex<Vec<SystemTime>>,
    user_agents: Vec<String>,
    random_agent: bool,
}

impl YahooClient {
    pub fn new(
        base_url: String,
        random_agent: bool,
        rate_limit_per_minute: u32,
        timeout: StdDuration,
    ) -> Result<Self, MarketDataError> {
        let client = Client::builder().timeout(timeout).build()?;

        let user_agents = vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.3 Safari/605.1.15".to_string(),
        ];

        Ok(YahooClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limit_per_minute,
            request_timestamps: Mutex::new(Vec::new()),
            user_agents,
            random_agent,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, MarketDataError> {
        Self::new(
            config.data_base_url.clone(),
            config.random_agent,
            config.rate_limit_per_minute,
            config.request_timeout,
        )
    }

    fn validate_interval(&self, interval: &str) -> Result<(), MarketDataError> {
        match interval {
            "1d" | "1wk" | "1mo" => Ok(()),
            other => Err(MarketDataError::InvalidInterval(other.to_string())),
        }
    }

    fn validate_range(&self, range: &str) -> Result<(), MarketDataError> {
        match range {
            "1mo" | "3mo" | "6mo" | "1y" | "2y" | "5y" | "10y" | "max" => Ok(()),
            other => Err(MarketDataError::InvalidRange(other.to_string())),
        }
    }

    fn get_user_agent(&self) -> String {
        if self.random_agent {
            self.user_agents
                .choose(&mut rand::rng())
                .unwrap_or(&self.user_agents[0])
                .clone()
        } else {
            self.user_agents[0].clone()
        }
    }

    async fn enforce_rate_limit(&self) {
        let wait_time = {
            let mut timestamps = self.request_timestamps.lock().await;
            let current_time = SystemTime::now();

            // Drop timestamps older than the one-minute window
            timestamps.retain(|&timestamp| {
                current_time
                    .duration_since(timestamp)
                    .unwrap_or(StdDuration::ZERO)
                    < StdDuration::from_secs(60)
            });

            let wait_time = if timestamps.len() >= self.rate_limit_per_minute as usize {
                timestamps.first().map(|&oldest| {
                    StdDuration::from_secs(60).saturating_sub(
                        current_time
                            .duration_since(oldest)
                            .unwrap_or(StdDuration::ZERO),
                    )
                })
            } else {
                None
            };

            timestamps.push(current_time);
            wait_time
        };

        if let Some(wait_time) = wait_time {
            if !wait_time.is_zero() {
                sleep(wait_time + StdDuration::from_millis(100)).await;
            }
        }
    }

    async fn make_request(&self, symbol: &str, url: &str) -> Result<Value, MarketDataError> {
        const MAX_RETRIES: u32 = 5;

        for attempt in 0..MAX_RETRIES {
            self.enforce_rate_limit().await;

            if attempt > 0 {
                let delay =
                    StdDuration::from_secs_f64(2.0_f64.powi(attempt as i32 - 1) + rand::random::<f64>());
                let delay = delay.min(StdDuration::from_secs(60));
                sleep(delay).await;
            }

            let response = self
                .client
                .get(url)
                .header("Accept", "application/json, text/plain, */*")
                .header("Accept-Language", "en-US,en;q=0.9")
                .header("Connection", "keep-alive")
                .header("User-Agent", self.get_user_agent())
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        match resp.json::<Value>().await {
                            Ok(data) => return Ok(data),
                            Err(_) => continue,
                        }
                    } else if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(MarketDataError::NotFound(symbol.to_string()));
                    } else if status == reqwest::StatusCode::FORBIDDEN
                        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                        || status.is_server_error()
                    {
                        continue;
                    } else if status.is_client_error() {
                        break;
                    } else {
                        continue;
                    }
                }
                Err(_) => continue,
            }
        }

        Err(MarketDataError::InvalidResponse(
            "Max retries exceeded".to_string(),
        ))
    }

    pub async fn chart_history(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<Vec<PricePoint>, MarketDataError> {
        self.validate_range(range)?;
        self.validate_interval(interval)?;

        let url = format!(
            "{}/v8/finance/chart/{}?range={}&interval={}",
            self.base_url, symbol, range, interval
        );

        let response_data = self.make_request(symbol, &url).await?;
        parse_chart_response(symbol, &response_data)
    }

    pub async fn quote_summary(&self, symbol: &str) -> Result<CompanyFundamentals, MarketDataError> {
        let url = format!(
            "{}/v10/finance/quoteSummary/{}?modules={}",
            self.base_url, symbol, QUOTE_SUMMARY_MODULES
        );

        let response_data = self.make_request(symbol, &url).await?;
        parse_quote_summary(symbol, &response_data)
    }
}

#[async_trait]
impl MarketData for YahooClient {
    async fn fundamentals(&self, symbol: &str) -> Result<CompanyFundamentals, MarketDataError> {
        self.quote_summary(symbol).await
    }

    async fn price_history(&self, symbol: &str) -> Result<Vec<PricePoint>, MarketDataError> {
        self.chart_history(symbol, CHART_RANGE, CHART_INTERVAL).await
    }
}

fn raw_value(value: &Value) -> Option<f64> {
    value.get("raw").and_then(|v| v.as_f64())
}

/// Checks the endpoint-level error object Yahoo embeds in otherwise-200
/// responses. "Not Found" codes map to `NotFound`, anything else to
/// `InvalidResponse`.
fn check_endpoint_error(symbol: &str, envelope: &Value) -> Result<(), MarketDataError> {
    let Some(error) = envelope.get("error") else {
        return Ok(());
    };
    if error.is_null() {
        return Ok(());
    }

    let code = error.get("code").and_then(|v| v.as_str()).unwrap_or("");
    if code.eq_ignore_ascii_case("not found") {
        return Err(MarketDataError::NotFound(symbol.to_string()));
    }
    let description = error
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown upstream error");
    Err(MarketDataError::InvalidResponse(format!(
        "{code}: {description}"
    )))
}

pub fn parse_chart_response(symbol: &str, data: &Value) -> Result<Vec<PricePoint>, MarketDataError> {
    let chart = data
        .get("chart")
        .ok_or_else(|| MarketDataError::InvalidResponse("missing chart envelope".to_string()))?;
    check_endpoint_error(symbol, chart)?;

    let result = chart
        .get("result")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .ok_or(MarketDataError::NoData)?;

    let timestamps = result
        .get("timestamp")
        .and_then(|v| v.as_array())
        .ok_or_else(|| MarketDataError::InvalidResponse("missing timestamps".to_string()))?;
    let closes = result
        .pointer("/indicators/quote/0/close")
        .and_then(|v| v.as_array())
        .ok_or_else(|| MarketDataError::InvalidResponse("missing close series".to_string()))?;

    if closes.len() != timestamps.len() {
        return Err(MarketDataError::InvalidResponse(
            "inconsistent array lengths".to_string(),
        ));
    }

    let mut points = Vec::new();
    for (i, (ts, close)) in timestamps.iter().zip(closes).enumerate() {
        let timestamp = ts.as_i64().ok_or_else(|| {
            MarketDataError::InvalidResponse(format!("invalid timestamp at index {i}"))
        })?;
        // Halted or partial sessions surface as null closes; skip them.
        let Some(close) = close.as_f64() else {
            continue;
        };
        let time = DateTime::<Utc>::from_timestamp(timestamp, 0).ok_or_else(|| {
            MarketDataError::InvalidResponse(format!(
                "cannot convert timestamp {timestamp} at index {i}"
            ))
        })?;
        points.push(PricePoint {
            date: time.date_naive(),
            close,
        });
    }

    points.sort_by_key(|p| p.date);
    Ok(points)
}

pub fn parse_quote_summary(
    symbol: &str,
    data: &Value,
) -> Result<CompanyFundamentals, MarketDataError> {
    let envelope = data.get("quoteSummary").ok_or_else(|| {
        MarketDataError::InvalidResponse("missing quoteSummary envelope".to_string())
    })?;
    check_endpoint_error(symbol, envelope)?;

    let result = envelope
        .get("result")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .ok_or(MarketDataError::NoData)?;

    let mut fundamentals = CompanyFundamentals {
        symbol: symbol.to_string(),
        name: None,
        current_price: None,
        shares_outstanding: None,
        ttm_revenue: None,
        income_history: Vec::new(),
    };

    if let Some(price) = result.get("price") {
        fundamentals.name = price
            .get("longName")
            .and_then(|v| v.as_str())
            .or_else(|| price.get("shortName").and_then(|v| v.as_str()))
            .map(String::from);
        fundamentals.current_price = price.get("regularMarketPrice").and_then(raw_value);
    }

    if let Some(statistics) = result.get("defaultKeyStatistics") {
        fundamentals.shares_outstanding = statistics.get("sharesOutstanding").and_then(raw_value);
    }

    if let Some(financial_data) = result.get("financialData") {
        fundamentals.ttm_revenue = financial_data.get("totalRevenue").and_then(raw_value);
    }

    if let Some(statements) = result
        .pointer("/incomeStatementHistory/incomeStatementHistory")
        .and_then(|v| v.as_array())
    {
        for statement in statements {
            let end_date = statement.pointer("/endDate/fmt").and_then(|v| v.as_str());
            let revenue = statement.get("totalRevenue").and_then(raw_value);
            let net_income = statement.get("netIncome").and_then(raw_value);

            let (Some(end_date), Some(revenue), Some(net_income)) = (end_date, revenue, net_income)
            else {
                continue;
            };
            // endDate.fmt is "YYYY-MM-DD"; the fiscal year label is the year part.
            let Some(year) = end_date
                .split('-')
                .next()
                .and_then(|y| y.parse::<i32>().ok())
            else {
                continue;
            };

            fundamentals.income_history.push(FiscalYear {
                year,
                revenue,
                net_income,
            });
        }
        fundamentals.income_history.sort_by_key(|fy| fy.year);
    }

    Ok(fundamentals)
}
