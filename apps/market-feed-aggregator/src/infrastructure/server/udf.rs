//! Charting (UDF) routes.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::application::services::udf::resolution_from_udf;
use crate::application::services::{HistoryRange, HistoryResponse, SymbolInfo, UdfConfig};
use crate::domain::normalize::{Provider, parse_key};
use crate::domain::record::{CanonicalRecord, SymbolKey};
use crate::domain::trendline::TRENDLINE_CAPACITY;

/// `/udf/history` query.
#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    symbol: String,
    resolution: String,
    from: Option<i64>,
    to: Option<i64>,
    countback: Option<usize>,
}

/// `/udf/symbols` query.
#[derive(Debug, Deserialize)]
pub(super) struct SymbolQuery {
    symbol: String,
}

fn is_event_symbol(key: &SymbolKey) -> bool {
    Provider::from_exchange(key.exchange()).is_some_and(Provider::is_prediction)
}

fn history_records(state: &AppState, query: &HistoryQuery) -> Result<Vec<CanonicalRecord>, String> {
    let key = parse_key(&query.symbol).ok_or_else(|| format!("invalid symbol: {}", query.symbol))?;

    // Event symbols have no candles; their trendline answers every resolution.
    if is_event_symbol(&key) {
        return Ok(state.orchestrator.trendline(&key, TRENDLINE_CAPACITY));
    }

    let resolution = resolution_from_udf(&query.resolution)
        .ok_or_else(|| format!("unsupported resolution: {}", query.resolution))?;
    Ok(state
        .broadcaster
        .pipeline()
        .historical_data(&key, &resolution, usize::MAX))
}

pub(super) async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let range = HistoryRange {
        from: query.from,
        to: query.to,
        countback: query.countback,
    };
    let response = match history_records(&state, &query) {
        Ok(records) => HistoryResponse::from_records(&records, range),
        Err(reason) => {
            tracing::debug!(symbol = %query.symbol, resolution = %query.resolution, reason = %reason, "History request rejected");
            HistoryResponse::error(reason)
        }
    };
    Json(response)
}

pub(super) async fn time_handler() -> String {
    chrono::Utc::now().timestamp().to_string()
}

pub(super) async fn symbols_handler(Query(query): Query<SymbolQuery>) -> Response {
    parse_key(&query.symbol).map_or_else(
        || {
            (
                StatusCode::NOT_FOUND,
                Json(json!({"s": "error", "errmsg": format!("unknown symbol: {}", query.symbol)})),
            )
                .into_response()
        },
        |key| Json(SymbolInfo::for_key(&key)).into_response(),
    )
}

pub(super) async fn config_handler() -> Json<UdfConfig> {
    Json(UdfConfig::default())
}
