//! HTTP/JSON dashboard (spec.md section 6): an out-of-core collaborator
//! that only reads `SharedState`/`Exchange` snapshots and toggles a small
//! set of flags. Not covered by the core's testable properties (spec.md
//! section 1).

use crate::exchange::state::Exchange;
use crate::exchange::trade::{ExecutionReportRecord, Trade};
use crate::scheduler::Scheduler;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct AppState {
    pub exchange: Arc<Exchange>,
    pub scheduler: Arc<Scheduler>,
    pub selected_symbol: Mutex<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: msg.into() }))
}

fn symbol_param(params: &HashMap<String, String>, state: &AppState) -> String {
    params.get("symbol").cloned().unwrap_or_else(|| state.selected_symbol.lock().clone())
}

#[derive(Debug, Serialize)]
struct StatusView {
    halted: bool,
    symbols: Vec<String>,
    selected_symbol: String,
}

async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let view = StatusView {
        halted: state.exchange.is_halted(),
        symbols: state.exchange.symbols(),
        selected_symbol: state.selected_symbol.lock().clone(),
    };
    Json(view).into_response()
}

async fn get_order_book(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let symbol = symbol_param(&params, &state);
    let depth_n = params.get("depth").and_then(|s| s.parse::<usize>().ok()).unwrap_or(10);
    let snapshot = state.exchange.with_book(&symbol, |book| book.map(|b| b.get_depth_snapshot(depth_n)));
    match snapshot {
        Some(snap) => Json(snap).into_response(),
        None => bad_request(format!("unknown symbol: {symbol}")).into_response(),
    }
}

async fn get_trades(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let symbol = symbol_param(&params, &state);
    let trades: Vec<Trade> = state
        .exchange
        .with_history(&symbol, |h| h.map(|h| h.trades.iter().cloned().collect()).unwrap_or_default());
    Json(trades).into_response()
}

async fn get_order_book_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let symbol = symbol_param(&params, &state);
    let snaps: Vec<crate::exchange::state::BookSnapshotView> = state
        .exchange
        .with_history(&symbol, |h| h.map(|h| h.book_snapshots.iter().cloned().collect()).unwrap_or_default());
    Json(snaps).into_response()
}

async fn get_spread_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let symbol = symbol_param(&params, &state);
    let points: Vec<crate::exchange::state::SpreadPoint> = state
        .exchange
        .with_history(&symbol, |h| h.map(|h| h.spread_history.iter().cloned().collect()).unwrap_or_default());
    Json(points).into_response()
}

async fn get_liquidity_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let symbol = symbol_param(&params, &state);
    let points: Vec<crate::exchange::state::LiquidityPoint> = state
        .exchange
        .with_history(&symbol, |h| h.map(|h| h.liquidity_history.iter().cloned().collect()).unwrap_or_default());
    Json(points).into_response()
}

async fn get_strategy_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let symbol = symbol_param(&params, &state);
    let observables = state.scheduler.strategy_observables(&symbol);
    let views: Vec<StrategyStatusView> = observables
        .into_iter()
        .map(|o| StrategyStatusView {
            source_name: o.source_name,
            inventory: o.inventory,
            avg_entry_price: o.avg_entry_price,
            realised_pnl: o.realised_pnl,
            total_trades: o.total_trades,
            winning_trades: o.winning_trades,
            cooldown_until: o.cooldown_until,
        })
        .collect();
    Json(views).into_response()
}

#[derive(Debug, Serialize)]
struct StrategyStatusView {
    source_name: String,
    inventory: i64,
    avg_entry_price: f64,
    realised_pnl: f64,
    total_trades: u64,
    winning_trades: u64,
    cooldown_until: i64,
}

async fn get_execution_reports(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let symbol = symbol_param(&params, &state);
    let reports: Vec<ExecutionReportRecord> = state
        .exchange
        .with_history(&symbol, |h| h.map(|h| h.execution_reports.iter().cloned().collect()).unwrap_or_default());
    Json(reports).into_response()
}

async fn get_order_latency_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let symbol = symbol_param(&params, &state);
    let points: Vec<crate::exchange::state::LatencyPoint> = state
        .exchange
        .with_history(&symbol, |h| h.map(|h| h.latency_history.iter().cloned().collect()).unwrap_or_default());
    Json(points).into_response()
}

#[derive(Debug, Serialize)]
struct CompetitionLogEntry {
    time: crate::clock::Nanos,
    maker_source: String,
    taker_source: String,
    price: f64,
    qty: u32,
    maker_pnl: f64,
}

async fn get_competition_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let symbol = symbol_param(&params, &state);
    let entries: Vec<CompetitionLogEntry> = state.exchange.with_history(&symbol, |h| {
        h.map(|h| {
            h.trades
                .iter()
                .map(|t| CompetitionLogEntry {
                    time: t.wall_clock_ns,
                    maker_source: t.maker_source.clone(),
                    taker_source: t.taker_source.clone(),
                    price: t.price,
                    qty: t.qty,
                    maker_pnl: t.pnl,
                })
                .collect()
        })
        .unwrap_or_default()
    });
    Json(entries).into_response()
}

async fn post_toggle_exchange(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let new_state = !state.exchange.is_halted();
    state.exchange.set_halted(new_state);
    info!(halted = new_state, "exchange halted flag toggled via dashboard");
    Json(serde_json::json!({ "halted": new_state })).into_response()
}

#[derive(Debug, Deserialize)]
struct ToggleMyStrategyBody {
    symbol: String,
    enabled: bool,
}

async fn post_toggle_my_strategy(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ToggleMyStrategyBody>,
) -> impl IntoResponse {
    state.scheduler.set_my_strategy_enabled(&body.symbol, body.enabled);
    Json(serde_json::json!({ "symbol": body.symbol, "enabled": body.enabled })).into_response()
}

#[derive(Debug, Deserialize)]
struct CancelMyStrategyOrdersBody {
    symbol: String,
}

async fn post_cancel_mystrategy_orders(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CancelMyStrategyOrdersBody>,
) -> impl IntoResponse {
    let orders = state.exchange.with_book(&body.symbol, |book| {
        book.map(|b| {
            let mut all = b.get_orders_by_source(crate::fix::Side::Buy, "my_strategy");
            all.extend(b.get_orders_by_source(crate::fix::Side::Sell, "my_strategy"));
            all
        })
        .unwrap_or_default()
    });
    let mut cancelled = 0usize;
    for order in orders {
        if state.exchange.cancel_order(&body.symbol, order.id).is_some() {
            cancelled += 1;
        }
    }
    Json(serde_json::json!({ "cancelled": cancelled })).into_response()
}

#[derive(Debug, Deserialize)]
struct SelectSymbolBody {
    symbol: String,
}

async fn post_select_symbol(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SelectSymbolBody>,
) -> impl IntoResponse {
    if !state.exchange.symbols().contains(&body.symbol) && !state.exchange.symbols().is_empty() {
        return bad_request(format!("unknown symbol: {}", body.symbol)).into_response();
    }
    *state.selected_symbol.lock() = body.symbol.clone();
    Json(serde_json::json!({ "selected_symbol": body.symbol })).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/order_book", get(get_order_book))
        .route("/trades", get(get_trades))
        .route("/order_book_history", get(get_order_book_history))
        .route("/spread_history", get(get_spread_history))
        .route("/liquidity_history", get(get_liquidity_history))
        .route("/strategy_status", get(get_strategy_status))
        .route("/execution_reports", get(get_execution_reports))
        .route("/order_latency_history", get(get_order_latency_history))
        .route("/competition_logs", get(get_competition_logs))
        .route("/toggle_exchange", post(post_toggle_exchange))
        .route("/toggle_my_strategy", post(post_toggle_my_strategy))
        .route("/cancel_mystrategy_orders", post(post_cancel_mystrategy_orders))
        .route("/select_symbol", post(post_select_symbol))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
