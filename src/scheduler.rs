//! The periodic background loop (spec.md section 4.5): expire orders,
//! reseed synthetic depth, drive strategies, snapshot, heartbeat.

use crate::clock::{Clock, Nanos};
use crate::error::ExchangeError;
use crate::exchange::state::Exchange;
use crate::market_data::MarketDataClient;
use crate::strategy::framework::MarketView;
use crate::strategy::StrategyRegistry;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const EXPIRY_MAX_AGE_SECS: Nanos = 60 * crate::clock::NANOS_PER_SEC;
const RESEED_STALE_SECS: Nanos = 120 * crate::clock::NANOS_PER_SEC;
const LIQUIDITY_MIN_LEVELS: usize = 3;
const LIQUIDITY_MIN_QTY: u32 = 20;
const SEED_LEVELS: u32 = 3;
const SEED_BASE_QTY: f64 = 100.0;
const TOP_N: usize = 10;
const HALTED_WAIT_SECS: u64 = 1;

/// One background worker driving all symbols (spec.md section 5: "one
/// long-lived background worker").
pub struct Scheduler {
    exchange: Arc<Exchange>,
    clock: Arc<dyn Clock>,
    market_data: Arc<dyn MarketDataClient>,
    registry: Mutex<StrategyRegistry>,
    last_reseed: Mutex<HashMap<String, Nanos>>,
    tick_interval: Duration,
    heartbeat_interval: Nanos,
}

impl Scheduler {
    pub fn new(
        exchange: Arc<Exchange>,
        clock: Arc<dyn Clock>,
        market_data: Arc<dyn MarketDataClient>,
        tick_interval: Duration,
        heartbeat_interval_secs: u64,
    ) -> Self {
        Self {
            exchange,
            clock,
            market_data,
            registry: Mutex::new(StrategyRegistry::new()),
            last_reseed: Mutex::new(HashMap::new()),
            tick_interval,
            heartbeat_interval: heartbeat_interval_secs as Nanos * crate::clock::NANOS_PER_SEC,
        }
    }

    pub fn set_my_strategy_enabled(&self, symbol: &str, enabled: bool) {
        let mut reg = self.registry.lock();
        if enabled {
            reg.set_my_strategy_enabled(true);
            reg.ensure_instantiated(symbol);
        } else {
            reg.remove_my_strategy(symbol);
        }
    }

    pub fn strategy_observables(&self, symbol: &str) -> Vec<crate::strategy::StrategyObservables> {
        self.registry.lock().observables_for_symbol(symbol)
    }

    /// Run ticks forever at `tick_interval`, or every `HALTED_WAIT_SECS`
    /// while the exchange is halted (spec.md section 5).
    pub async fn run(&self, symbols: Vec<String>) {
        loop {
            if self.exchange.is_halted() {
                tokio::time::sleep(Duration::from_secs(HALTED_WAIT_SECS)).await;
                continue;
            }
            self.tick(&symbols);
            tokio::time::sleep(self.tick_interval).await;
        }
    }

    /// One full tick across all symbols (spec.md section 4.5 steps 1-6).
    /// Symbols are independent: the only shared state is the exchange's own
    /// coarse per-call lock and each strategy's per-symbol slot in the
    /// registry, so driving them via rayon costs nothing beyond that lock
    /// contention and keeps a tick's wall-clock flat as symbol count grows.
    pub fn tick(&self, symbols: &[String]) {
        let now = self.clock.now();
        symbols.par_iter().for_each(|symbol| self.tick_symbol(symbol, now));
    }

    fn tick_symbol(&self, symbol: &str, now: Nanos) {
        // Step 1: expire + snapshot, both inside the exchange's coarse lock.
        self.exchange.tick_snapshot(now, symbol, EXPIRY_MAX_AGE_SECS, TOP_N);

        // Step 2: instantiate missing strategies.
        self.registry.lock().ensure_instantiated(symbol);

        // Step 3: liquidity-floor reseed check.
        self.maybe_reseed(symbol, now);

        // Step 5: drive each strategy's generate_orders through match_order.
        self.drive_strategies(symbol, now);

        // Step 6: heartbeats.
        self.dispatch_heartbeats(symbol, now);
    }

    fn maybe_reseed(&self, symbol: &str, now: Nanos) {
        let needs_reseed = self.exchange.with_book(symbol, |book| match book {
            None => true,
            Some(book) => {
                let bid_levels = book.top_n(crate::fix::Side::Buy, LIQUIDITY_MIN_LEVELS).len();
                let ask_levels = book.top_n(crate::fix::Side::Sell, LIQUIDITY_MIN_LEVELS).len();
                let bid_qty: u32 = book.top_n(crate::fix::Side::Buy, LIQUIDITY_MIN_LEVELS).iter().map(|l| l.qty).sum();
                let ask_qty: u32 = book.top_n(crate::fix::Side::Sell, LIQUIDITY_MIN_LEVELS).iter().map(|l| l.qty).sum();
                bid_levels < LIQUIDITY_MIN_LEVELS
                    || ask_levels < LIQUIDITY_MIN_LEVELS
                    || bid_qty < LIQUIDITY_MIN_QTY
                    || ask_qty < LIQUIDITY_MIN_QTY
            }
        });

        let stale = {
            let mut last = self.last_reseed.lock();
            let last_ts = *last.get(symbol).unwrap_or(&Nanos::MIN);
            now - last_ts >= RESEED_STALE_SECS
        };

        if !needs_reseed && !stale {
            return;
        }

        match self.market_data.get_latest_price(symbol) {
            Some(mid) => {
                self.exchange.seed_synthetic_depth(now, symbol, mid, SEED_LEVELS, SEED_BASE_QTY);
                self.last_reseed.lock().insert(symbol.to_string(), now);
                info!(symbol, mid, "reseeded synthetic depth");
            }
            None => {
                warn!(symbol, "market-data collaborator unavailable; reseed skipped for this tick");
            }
        }
    }

    fn build_view(&self, symbol: &str, now: Nanos) -> MarketView {
        self.exchange.with_book(symbol, |book| match book {
            None => MarketView { now, ..Default::default() },
            Some(book) => MarketView {
                now,
                best_bid: book.best_bid(),
                best_ask: book.best_ask(),
                top5_bid: book.top_n(crate::fix::Side::Buy, 5),
                top5_ask: book.top_n(crate::fix::Side::Sell, 5),
                recent_prices_30: book.get_recent_prices(30),
            },
        })
    }

    fn drive_strategies(&self, symbol: &str, now: Nanos) {
        let view = self.build_view(symbol, now);
        let mut reg = self.registry.lock();

        let mut all_candidates = Vec::new();
        for strategy in reg.for_symbol_mut(symbol) {
            let candidates = strategy.generate_orders(symbol, &view);
            all_candidates.extend(candidates);
        }
        drop(reg);

        for candidate in all_candidates {
            let result = self.exchange.submit_order(
                now,
                symbol,
                candidate.side,
                candidate.price,
                candidate.qty,
                &candidate.source,
                &candidate.cl_ord_id,
                view.now,
            );
            match result {
                Ok(trades) => {
                    let mut reg = self.registry.lock();
                    for trade in &trades {
                        reg.dispatch_trade(symbol, trade);
                    }
                }
                Err(ExchangeError::TradingHalted) => {
                    warn!(symbol, "circuit breaker tripped; halting exchange");
                    self.exchange.set_halted(true);
                    return;
                }
                Err(e) => {
                    error!(symbol, source = candidate.source, error = %e, "strategy order rejected; isolated");
                }
            }
        }
    }

    fn dispatch_heartbeats(&self, symbol: &str, now: Nanos) {
        let mut reg = self.registry.lock();
        for strategy in reg.for_symbol_mut(symbol) {
            if let Some(wire) = strategy.maybe_heartbeat(now, self.heartbeat_interval) {
                let human_readable = wire.replace(crate::fix::codec::SOH, "|");
                info!(symbol, source = strategy.source_name(), frame = %human_readable, "heartbeat");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::market_data::MarketDataClient;

    struct FixedPrice(f64);
    impl MarketDataClient for FixedPrice {
        fn get_latest_price(&self, _symbol: &str) -> Option<f64> {
            Some(self.0)
        }
    }

    struct NoPrice;
    impl MarketDataClient for NoPrice {
        fn get_latest_price(&self, _symbol: &str) -> Option<f64> {
            None
        }
    }

    #[test]
    fn tick_reseeds_empty_book_and_drives_strategies() {
        let clock = Arc::new(ManualClock::new(0));
        let exchange = Arc::new(Exchange::new(-10_000.0, 1_000, 0));
        let market_data = Arc::new(FixedPrice(100.0));
        let sched = Scheduler::new(exchange.clone(), clock.clone(), market_data, Duration::from_secs(5), 30);

        sched.tick(&["AAPL".to_string()]);

        let has_depth = exchange.with_book("AAPL", |b| b.map(|b| !b.is_empty()).unwrap_or(false));
        assert!(has_depth);
    }

    #[test]
    fn reseed_skipped_when_collaborator_unavailable() {
        let clock = Arc::new(ManualClock::new(0));
        let exchange = Arc::new(Exchange::new(-10_000.0, 1_000, 0));
        let market_data = Arc::new(NoPrice);
        let sched = Scheduler::new(exchange.clone(), clock.clone(), market_data, Duration::from_secs(5), 30);

        sched.tick(&["AAPL".to_string()]);

        let has_depth = exchange.with_book("AAPL", |b| b.map(|b| !b.is_empty()).unwrap_or(false));
        assert!(!has_depth);
    }
}
