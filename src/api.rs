use crate::analysis_service::{self, AnalysisError, ValuationEngine};
use crate::data_structures::{Assumptions, BatchRequest, BatchResponse, SharedEngine, SingleResult};
use crate::yahoo::MarketDataError;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

#[derive(Debug)]
pub enum ApiError {
    UnknownTicker(String),
    InvalidAssumptions(String),
    Upstream(String),
}

impl From<AnalysisError> for ApiError {
    fn from(error: AnalysisError) -> Self {
        match error {
            AnalysisError::Source(MarketDataError::NotFound(symbol)) => {
                ApiError::UnknownTicker(symbol)
            }
            AnalysisError::Source(e) => ApiError::Upstream(e.to_string()),
            AnalysisError::MissingFundamentals { symbol, field } => {
                ApiError::Upstream(format!("upstream data for {symbol} is missing {field}"))
            }
            AnalysisError::InvalidAssumptions(msg) => ApiError::InvalidAssumptions(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error, details) = match self {
            ApiError::UnknownTicker(symbol) => (
                StatusCode::NOT_FOUND,
                format!("no data found for ticker {symbol}"),
                None,
            ),
            ApiError::InvalidAssumptions(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid assumptions".to_string(),
                Some(msg),
            ),
            ApiError::Upstream(msg) => (
                StatusCode::BAD_GATEWAY,
                "market data fetch failed".to_string(),
                Some(msg),
            ),
        };

        (status, Json(ErrorBody { error, details })).into_response()
    }
}

async fn run_single(
    engine: &ValuationEngine,
    assumptions: &Assumptions,
) -> Result<SingleResult, ApiError> {
    let (summary, _prices) = engine.analyze_ticker(assumptions).await.map_err(|e| {
        warn!(ticker = %assumptions.ticker, error = %e, "Analysis failed");
        e
    })?;
    let (hist_table, forecast_table) = analysis_service::make_tables(&summary);
    Ok(SingleResult {
        summary,
        hist_table,
        forecast_table,
    })
}

#[instrument(skip(engine, payload), fields(ticker = %payload.ticker))]
pub async fn analyze_handler(
    State(engine): State<SharedEngine>,
    Json(payload): Json<Assumptions>,
) -> Result<Json<SingleResult>, ApiError> {
    debug!("Received analyze request");
    let result = run_single(&engine, &payload).await?;
    info!(
        target_price_mid = result.summary.target_price_mid,
        "Returning analysis"
    );
    Ok(Json(result))
}

#[instrument(skip(engine, payload), fields(batch_size = payload.tickers.len()))]
pub async fn analyze_batch_handler(
    State(engine): State<SharedEngine>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    debug!("Received batch analyze request");

    // Items run strictly in order; the first failure aborts the whole batch.
    let mut results = Vec::with_capacity(payload.tickers.len());
    for assumptions in &payload.tickers {
        results.push(run_single(&engine, assumptions).await?);
    }

    info!(result_count = results.len(), "Batch analysis complete");
    Ok(Json(BatchResponse { results }))
}

pub async fn healthz_handler() -> &'static str {
    "ok"
}
