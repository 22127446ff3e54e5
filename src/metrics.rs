//! Prometheus metrics: names/labels as module constants, one record/set
//! function per metric, trimmed to what this domain actually emits (no
//! cache, websocket, or oracle metrics — this crate has none of those
//! subsystems).
#![allow(dead_code)]

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";

    pub const ORDERS_SUBMITTED_TOTAL: &str = "orders_submitted_total";
    pub const ORDERS_MATCHED_TOTAL: &str = "orders_matched_total";
    pub const ORDERS_CANCELLED_TOTAL: &str = "orders_cancelled_total";
    pub const ORDER_MATCH_DURATION_SECONDS: &str = "order_match_duration_seconds";
    pub const TRADES_EXECUTED_TOTAL: &str = "trades_executed_total";
    pub const TRADE_VOLUME_CENTS: &str = "trade_volume_cents";

    pub const MINT_OPERATIONS_TOTAL: &str = "mint_operations_total";
    pub const MERGE_OPERATIONS_TOTAL: &str = "merge_operations_total";

    pub const AMM_TRADES_TOTAL: &str = "amm_trades_total";
    pub const AMM_TRADE_VOLUME_CENTS: &str = "amm_trade_volume_cents";
    pub const BOOKMAKER_REJECTIONS_TOTAL: &str = "bookmaker_rejections_total";

    pub const ACTIVE_MARKETS: &str = "active_markets";
    pub const MARKET_PROBABILITY: &str = "market_probability";
    pub const ORDERBOOK_DEPTH: &str = "orderbook_depth";
    pub const ORDERBOOK_SPREAD: &str = "orderbook_spread";

    pub const DB_QUERY_DURATION_SECONDS: &str = "db_query_duration_seconds";
    pub const DB_CONNECTIONS_ACTIVE: &str = "db_connections_active";
    pub const DB_CONNECTIONS_IDLE: &str = "db_connections_idle";

    pub const SETTLEMENTS_TOTAL: &str = "settlements_total";
    pub const SETTLEMENT_AMOUNT_CENTS: &str = "settlement_amount_cents";

    pub const BACKGROUND_SWEEP_DURATION_SECONDS: &str = "background_sweep_duration_seconds";
}

pub mod labels {
    pub const METHOD: &str = "method";
    pub const ENDPOINT: &str = "endpoint";
    pub const STATUS: &str = "status";
    pub const ORDER_SIDE: &str = "side";
    pub const ORDER_TYPE: &str = "order_type";
    pub const MATCH_TYPE: &str = "match_type";
    pub const MARKET_ID: &str = "market_id";
    pub const CONTRACT_TYPE: &str = "contract_type";
    pub const OPERATION: &str = "operation";
    pub const QUERY_TYPE: &str = "query_type";
}

/// Installs the Prometheus recorder with the histogram buckets used across
/// handlers and engine primitives. Must run once before any `counter!`/
/// `gauge!`/`histogram!` call, per the `metrics` crate's global-recorder
/// model.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::HTTP_REQUEST_DURATION_SECONDS.to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .unwrap()
        .set_buckets_for_metric(
            Matcher::Full(names::ORDER_MATCH_DURATION_SECONDS.to_string()),
            &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5],
        )
        .unwrap()
        .set_buckets_for_metric(
            Matcher::Full(names::DB_QUERY_DURATION_SECONDS.to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0],
        )
        .unwrap()
        .set_buckets_for_metric(
            Matcher::Full(names::BACKGROUND_SWEEP_DURATION_SECONDS.to_string()),
            &[0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0],
        )
        .unwrap();

    builder.install_recorder().expect("failed to install Prometheus recorder")
}

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    counter!(
        names::HTTP_REQUESTS_TOTAL,
        labels::METHOD => method.to_string(),
        labels::ENDPOINT => endpoint.to_string(),
        labels::STATUS => status_str.clone()
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        labels::METHOD => method.to_string(),
        labels::ENDPOINT => endpoint.to_string(),
        labels::STATUS => status_str
    )
    .record(duration_secs);
}

pub fn set_http_requests_in_flight(delta: i64) {
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).set(delta as f64);
}

pub fn record_order_submitted(side: &str, order_type: &str) {
    counter!(
        names::ORDERS_SUBMITTED_TOTAL,
        labels::ORDER_SIDE => side.to_string(),
        labels::ORDER_TYPE => order_type.to_string()
    )
    .increment(1);
}

pub fn record_order_matched(match_type: &str) {
    counter!(names::ORDERS_MATCHED_TOTAL, labels::MATCH_TYPE => match_type.to_string()).increment(1);
}

pub fn record_order_cancelled() {
    counter!(names::ORDERS_CANCELLED_TOTAL).increment(1);
}

pub fn record_order_match_duration(duration_secs: f64) {
    histogram!(names::ORDER_MATCH_DURATION_SECONDS).record(duration_secs);
}

pub fn record_trade_executed(match_type: &str, volume_cents: i64) {
    counter!(names::TRADES_EXECUTED_TOTAL, labels::MATCH_TYPE => match_type.to_string()).increment(1);
    counter!(names::TRADE_VOLUME_CENTS).increment(volume_cents.max(0) as u64);
}

pub fn record_mint_operation() {
    counter!(names::MINT_OPERATIONS_TOTAL).increment(1);
}

pub fn record_merge_operation() {
    counter!(names::MERGE_OPERATIONS_TOTAL).increment(1);
}

pub fn record_amm_trade(engine: &str, volume_cents: i64) {
    counter!(names::AMM_TRADES_TOTAL, labels::OPERATION => engine.to_string()).increment(1);
    counter!(names::AMM_TRADE_VOLUME_CENTS).increment(volume_cents.max(0) as u64);
}

pub fn record_bookmaker_rejection() {
    counter!(names::BOOKMAKER_REJECTIONS_TOTAL).increment(1);
}

pub fn set_active_markets(count: i64) {
    gauge!(names::ACTIVE_MARKETS).set(count as f64);
}

pub fn set_market_probability(market_id: &str, contract_type: &str, probability: f64) {
    gauge!(
        names::MARKET_PROBABILITY,
        labels::MARKET_ID => market_id.to_string(),
        labels::CONTRACT_TYPE => contract_type.to_string()
    )
    .set(probability);
}

pub fn set_orderbook_depth(market_id: &str, contract_type: &str, side: &str, depth: i64) {
    gauge!(
        names::ORDERBOOK_DEPTH,
        labels::MARKET_ID => market_id.to_string(),
        labels::CONTRACT_TYPE => contract_type.to_string(),
        labels::ORDER_SIDE => side.to_string()
    )
    .set(depth as f64);
}

pub fn set_orderbook_spread(market_id: &str, contract_type: &str, spread: f64) {
    gauge!(
        names::ORDERBOOK_SPREAD,
        labels::MARKET_ID => market_id.to_string(),
        labels::CONTRACT_TYPE => contract_type.to_string()
    )
    .set(spread);
}

pub fn record_db_query(query_type: &str, duration_secs: f64) {
    histogram!(names::DB_QUERY_DURATION_SECONDS, labels::QUERY_TYPE => query_type.to_string()).record(duration_secs);
}

pub fn set_db_connections(active: i64, idle: i64) {
    gauge!(names::DB_CONNECTIONS_ACTIVE).set(active as f64);
    gauge!(names::DB_CONNECTIONS_IDLE).set(idle as f64);
}

pub fn record_settlement(kind: &str, amount_cents: i64) {
    counter!(names::SETTLEMENTS_TOTAL, labels::OPERATION => kind.to_string()).increment(1);
    counter!(names::SETTLEMENT_AMOUNT_CENTS).increment(amount_cents.max(0) as u64);
}

pub fn record_background_sweep_duration(duration_secs: f64) {
    histogram!(names::BACKGROUND_SWEEP_DURATION_SECONDS).record(duration_secs);
}

pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_measures_elapsed_time() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_secs() >= 0.01);
    }

    #[test]
    fn metric_names_are_stable() {
        assert_eq!(names::HTTP_REQUESTS_TOTAL, "http_requests_total");
        assert_eq!(names::ORDERS_SUBMITTED_TOTAL, "orders_submitted_total");
        assert_eq!(names::MINT_OPERATIONS_TOTAL, "mint_operations_total");
    }
}
