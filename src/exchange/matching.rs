//! Matching engine: circuit breaker, self-trade prevention, PnL
//! attribution, and execution-report emission (spec.md section 4.3).

use crate::clock::Nanos;
use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::book::{ticks_to_price, OrderBook, PriceTicks};
use crate::exchange::order::OrderId;
use crate::exchange::trade::{ExecutionReportRecord, Trade};
use crate::fix::message::OrdStatus;
use crate::fix::Side;
use std::collections::HashMap;

const NANOS_PER_24H: Nanos = 24 * 3_600 * 1_000_000_000;

pub const DEFAULT_MAX_DAILY_LOSS: f64 = -10_000.0;
pub const DEFAULT_MAX_ORDER_RATE: u64 = 1_000;

/// Per-process circuit breaker (spec.md section 4.3.2). Halts trading when
/// cumulative PnL has reached the negative loss limit, or the order-rate
/// cap is reached, within a rolling 24h window anchored at the first
/// post-reset event.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    daily_loss: f64,
    order_count: u64,
    last_reset: Nanos,
    max_daily_loss: f64,
    max_order_rate: u64,
}

impl CircuitBreaker {
    pub fn new(max_daily_loss: f64, max_order_rate: u64, now: Nanos) -> Self {
        Self {
            daily_loss: 0.0,
            order_count: 0,
            last_reset: now,
            max_daily_loss,
            max_order_rate,
        }
    }

    fn maybe_reset(&mut self, now: Nanos) {
        if now - self.last_reset >= NANOS_PER_24H {
            self.daily_loss = 0.0;
            self.order_count = 0;
            self.last_reset = now;
        }
    }

    /// Raises `TradingHalted` when `daily_loss <= max_daily_loss` or
    /// `order_count >= max_order_rate` and the 24h window has not elapsed;
    /// otherwise resets and proceeds.
    pub fn check(&mut self, now: Nanos) -> ExchangeResult<()> {
        self.maybe_reset(now);
        if self.daily_loss <= self.max_daily_loss || self.order_count >= self.max_order_rate {
            return Err(ExchangeError::TradingHalted);
        }
        Ok(())
    }

    pub fn record(&mut self, pnl: f64) {
        self.daily_loss += pnl;
        self.order_count += 1;
    }

    pub fn daily_loss(&self) -> f64 {
        self.daily_loss
    }

    pub fn order_count(&self) -> u64 {
        self.order_count
    }
}

/// Average-cost position ledger (spec.md section 4.3.1). One entry per
/// (symbol, source); used by the matching engine to compute each maker's
/// realised PnL on a fill. This is distinct from a Strategy's own private
/// state (strategy/framework.rs), which applies the same formula
/// independently for its own risk checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionState {
    pub inventory: i64,
    pub avg_price: f64,
}

impl PositionState {
    /// Apply a fill of `qty` at `price` on `side`, returning realised PnL.
    pub fn apply_fill(&mut self, side: Side, qty: u32, price: f64) -> f64 {
        let signed: i64 = if side == Side::Buy { qty as i64 } else { -(qty as i64) };

        if self.inventory == 0 || self.inventory.signum() == signed.signum() {
            let abs_inv = self.inventory.unsigned_abs() as f64;
            let new_abs = abs_inv + qty as f64;
            self.avg_price = (self.avg_price * abs_inv + price * qty as f64) / new_abs;
            self.inventory += signed;
            return 0.0;
        }

        let abs_inv = self.inventory.unsigned_abs();
        let close_qty = abs_inv.min(qty as u64) as u32;
        let was_long = self.inventory > 0;

        let realized = if was_long {
            close_qty as f64 * (self.avg_price - price)
        } else {
            close_qty as f64 * (price - self.avg_price)
        };

        if was_long {
            self.inventory -= close_qty as i64;
        } else {
            self.inventory += close_qty as i64;
        }

        let remaining = qty - close_qty;
        if remaining > 0 {
            self.avg_price = price;
            self.inventory = if side == Side::Buy { remaining as i64 } else { -(remaining as i64) };
        } else if self.inventory == 0 {
            self.avg_price = 0.0;
        }

        realized
    }
}

#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub trades: Vec<Trade>,
    pub reports: Vec<ExecutionReportRecord>,
    pub taker_order_id: OrderId,
    /// Set when residual taker quantity rested on the book.
    pub resting_order_id: Option<OrderId>,
}

pub struct MatchingEngine {
    books: HashMap<String, OrderBook>,
    ledgers: HashMap<(String, String), PositionState>,
    breaker: CircuitBreaker,
    next_order_id: OrderId,
    next_exec_id: u64,
}

impl MatchingEngine {
    pub fn new(max_daily_loss: f64, max_order_rate: u64, now: Nanos) -> Self {
        Self {
            books: HashMap::new(),
            ledgers: HashMap::new(),
            breaker: CircuitBreaker::new(max_daily_loss, max_order_rate, now),
            next_order_id: 1,
            next_exec_id: 1,
        }
    }

    pub fn get_or_create_book(&mut self, symbol: &str) -> &mut OrderBook {
        self.books
            .entry(symbol.to_string())
            .or_insert_with(|| OrderBook::new(symbol))
    }

    pub fn book(&self, symbol: &str) -> Option<&OrderBook> {
        self.books.get(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.books.keys().cloned().collect()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn alloc_order_id(&mut self) -> OrderId {
        let id = self.next_order_id;
        self.next_order_id += 1;
        id
    }

    /// Shares the same id space as real orders so synthetic depth never
    /// collides with strategy-submitted order ids.
    pub fn next_synthetic_id(&self) -> OrderId {
        self.next_order_id
    }

    pub fn set_next_synthetic_id(&mut self, id: OrderId) {
        self.next_order_id = id;
    }

    fn alloc_exec_id(&mut self) -> String {
        let id = self.next_exec_id;
        self.next_exec_id += 1;
        format!("EXEC{id}")
    }

    fn ledger_mut(&mut self, symbol: &str, source: &str) -> &mut PositionState {
        self.ledgers
            .entry((symbol.to_string(), source.to_string()))
            .or_default()
    }

    /// The central algorithm (spec.md section 4.3). `cl_ord_id` is the
    /// taker's client order id, used only for the taker's execution
    /// reports.
    #[allow(clippy::too_many_arguments)]
    pub fn match_order(
        &mut self,
        now: Nanos,
        symbol: &str,
        side: Side,
        price: f64,
        qty: u32,
        taker_source: &str,
        cl_ord_id: &str,
    ) -> ExchangeResult<MatchOutcome> {
        self.breaker.check(now)?;

        let taker_order_id = self.alloc_order_id();
        let opposite = side.opposite();
        let mut remaining = qty;
        let mut outcome = MatchOutcome {
            taker_order_id,
            ..Default::default()
        };

        self.get_or_create_book(symbol);
        let level_ticks: Vec<PriceTicks> = self.books[symbol].price_levels(opposite);

        'levels: for ticks in level_ticks {
            if remaining == 0 {
                break;
            }
            let level_price = ticks_to_price(ticks);
            let marketable = match side {
                Side::Buy => level_price <= price,
                Side::Sell => level_price >= price,
            };
            if !marketable {
                break;
            }

            let mut rotations = 0usize;
            let level_len0 = self.books.get(symbol).unwrap().level_order_count(opposite, ticks);

            loop {
                if remaining == 0 {
                    continue 'levels;
                }
                let book = self.books.get_mut(symbol).unwrap();
                if book.level_is_empty(opposite, ticks) {
                    continue 'levels;
                }
                let head = book.peek_front(opposite, ticks).cloned().unwrap();

                if head.source == taker_source {
                    if rotations >= level_len0 {
                        // Entire level belongs to the taker; nothing tradeable here.
                        continue 'levels;
                    }
                    book.rotate_front_to_back(opposite, ticks);
                    rotations += 1;
                    continue;
                }

                let fill_qty = remaining.min(head.qty);
                let maker_ledger = self.ledger_mut(symbol, &head.source);
                let maker_pnl = maker_ledger.apply_fill(opposite, fill_qty, price);
                // Taker's own ledger is updated symmetrically but its PnL is
                // not carried on the Trade record (spec.md section 3).
                let _ = self.ledger_mut(symbol, taker_source).apply_fill(side, fill_qty, price);

                self.breaker.record(maker_pnl);

                // Literal per spec.md section 4.3 step 5: maker latency uses
                // a *1000 factor, taker latency (below) uses /1e6 — the two
                // formulas are given separately and are not listed among the
                // spec's flagged open questions, so both are kept as written.
                let latency_ms = (now - head.submission_ts) as f64 * 1000.0;

                let book = self.books.get_mut(symbol).unwrap();
                book.reduce_front(opposite, ticks, fill_qty);
                let maker_leaves = head.qty - fill_qty;
                if maker_leaves == 0 {
                    book.pop_front(opposite, ticks);
                } else {
                    // reduce_front already applied the decrement in place.
                }
                book.record_trade(price);

                let trade = Trade {
                    price,
                    qty: fill_qty,
                    maker_order_id: head.id,
                    maker_source: head.source.clone(),
                    taker_order_id,
                    taker_source: taker_source.to_string(),
                    side,
                    wall_clock_ns: now,
                    latency_ms,
                    pnl: maker_pnl,
                };

                let maker_status = if maker_leaves > 0 {
                    OrdStatus::PartiallyFilled
                } else {
                    OrdStatus::Filled
                };
                let taker_leaves_so_far = remaining - fill_qty;
                let taker_status = if taker_leaves_so_far > 0 {
                    OrdStatus::PartiallyFilled
                } else {
                    OrdStatus::Filled
                };

                let maker_exec_id = self.alloc_exec_id();
                outcome.reports.push(ExecutionReportRecord {
                    time: now,
                    cl_ord_id: String::new(),
                    order_id: head.id,
                    exec_id: maker_exec_id,
                    ord_status: maker_status,
                    symbol: symbol.to_string(),
                    side: opposite,
                    order_qty: head.qty,
                    last_qty: Some(fill_qty),
                    last_px: Some(price),
                    leaves_qty: maker_leaves,
                    cum_qty: fill_qty,
                    price,
                    source: head.source.clone(),
                });

                let taker_exec_id = self.alloc_exec_id();
                outcome.reports.push(ExecutionReportRecord {
                    time: now,
                    cl_ord_id: cl_ord_id.to_string(),
                    order_id: taker_order_id,
                    exec_id: taker_exec_id,
                    ord_status: taker_status,
                    symbol: symbol.to_string(),
                    side,
                    order_qty: qty,
                    last_qty: Some(fill_qty),
                    last_px: Some(price),
                    leaves_qty: taker_leaves_so_far,
                    cum_qty: qty - taker_leaves_so_far,
                    price,
                    source: taker_source.to_string(),
                });

                outcome.trades.push(trade);
                remaining -= fill_qty;
                rotations = 0;
            }
        }

        if remaining > 0 {
            let book = self.books.get_mut(symbol).unwrap();
            book.add_order(side, price, remaining, taker_order_id, taker_source, now)?;
            outcome.resting_order_id = Some(taker_order_id);
        }

        Ok(outcome)
    }

    pub fn cancel_order(&mut self, symbol: &str, id: OrderId) -> Option<crate::exchange::order::Order> {
        self.books.get_mut(symbol)?.remove_order(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MatchingEngine {
        MatchingEngine::new(DEFAULT_MAX_DAILY_LOSS, DEFAULT_MAX_ORDER_RATE, 0)
    }

    #[test]
    fn s1_simple_match() {
        let mut eng = engine();
        eng.get_or_create_book("AAPL");
        eng.books.get_mut("AAPL").unwrap().add_order(Side::Sell, 101.0, 5, 999, "a", 0).unwrap();

        let outcome = eng.match_order(1_000, "AAPL", Side::Buy, 101.0, 3, "b", "CL1").unwrap();
        assert_eq!(outcome.trades.len(), 1);
        let t = &outcome.trades[0];
        assert_eq!(t.price, 101.0);
        assert_eq!(t.qty, 3);
        assert_eq!(t.maker_source, "a");
        assert_eq!(t.taker_source, "b");

        let book = eng.book("AAPL").unwrap();
        assert_eq!(book.best_ask().unwrap(), (101.0, 2));
        assert_eq!(book.last_price(), Some(101.0));
    }

    #[test]
    fn s2_walk_the_book() {
        let mut eng = engine();
        eng.get_or_create_book("AAPL");
        {
            let book = eng.books.get_mut("AAPL").unwrap();
            book.add_order(Side::Sell, 101.0, 2, 1, "a", 0).unwrap();
            book.add_order(Side::Sell, 102.0, 3, 2, "a", 0).unwrap();
        }
        let outcome = eng.match_order(0, "AAPL", Side::Buy, 102.0, 4, "b", "CL1").unwrap();
        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.trades[0].price, 101.0);
        assert_eq!(outcome.trades[0].qty, 2);
        assert_eq!(outcome.trades[1].price, 102.0);
        assert_eq!(outcome.trades[1].qty, 2);
        let book = eng.book("AAPL").unwrap();
        assert_eq!(book.best_ask().unwrap(), (102.0, 1));
    }

    #[test]
    fn s3_partial_with_rest() {
        let mut eng = engine();
        eng.get_or_create_book("AAPL");
        eng.books.get_mut("AAPL").unwrap().add_order(Side::Sell, 101.0, 2, 1, "a", 0).unwrap();
        let outcome = eng.match_order(0, "AAPL", Side::Buy, 101.0, 5, "b", "CL1").unwrap();
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].qty, 2);
        let book = eng.book("AAPL").unwrap();
        assert_eq!(book.best_bid().unwrap(), (101.0, 3));
    }

    #[test]
    fn s4_self_trade_skip() {
        let mut eng = engine();
        eng.get_or_create_book("AAPL");
        {
            let book = eng.books.get_mut("AAPL").unwrap();
            book.add_order(Side::Sell, 101.0, 2, 1, "a", 0).unwrap();
            book.add_order(Side::Sell, 101.0, 3, 2, "a", 0).unwrap();
            book.add_order(Side::Sell, 101.0, 1, 3, "b", 0).unwrap();
        }
        let outcome = eng.match_order(0, "AAPL", Side::Buy, 101.0, 4, "a", "CL1").unwrap();
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].maker_source, "b");
        assert_eq!(outcome.trades[0].qty, 1);
        let book = eng.book("AAPL").unwrap();
        assert_eq!(book.best_bid().unwrap(), (101.0, 3));
        let asks = book.get_orders_by_source(Side::Sell, "a");
        assert_eq!(asks.len(), 2);
    }

    #[test]
    fn s5_circuit_breaker_halts() {
        let mut eng = engine();
        eng.breaker.daily_loss = -10_001.0;
        eng.get_or_create_book("AAPL");
        eng.books.get_mut("AAPL").unwrap().add_order(Side::Sell, 101.0, 5, 1, "a", 0).unwrap();
        let err = eng.match_order(0, "AAPL", Side::Buy, 101.0, 1, "b", "CL1").unwrap_err();
        assert_eq!(err, ExchangeError::TradingHalted);
        // Book must be untouched.
        assert_eq!(eng.book("AAPL").unwrap().best_ask().unwrap(), (101.0, 5));
    }

    #[test]
    fn pnl_conservation_across_two_strategies() {
        let mut eng = engine();
        eng.get_or_create_book("AAPL");
        eng.books.get_mut("AAPL").unwrap().add_order(Side::Sell, 100.0, 10, 1, "a", 0).unwrap();
        let outcome = eng.match_order(0, "AAPL", Side::Buy, 100.0, 10, "b", "CL1").unwrap();
        let maker_pnl: f64 = outcome.trades.iter().map(|t| t.pnl).sum();
        // Opening trades realise zero pnl for both sides.
        assert_eq!(maker_pnl, 0.0);

        // Now "a" buys back from "b" at a higher price: "a" (short from the
        // first trade) realises a loss, "b" (long) realises the mirror gain.
        eng.books.get_mut("AAPL").unwrap().add_order(Side::Sell, 105.0, 10, 2, "b", 0).unwrap();
        let outcome2 = eng.match_order(0, "AAPL", Side::Buy, 105.0, 10, "a", "CL2").unwrap();
        // maker is "b", closing its long-10@100 position by selling at 105.
        // Per the literal average-cost formula in spec.md section 4.3.1
        // (close_qty * (avg_price - price) for a previously long position),
        // this yields -50, not the conventional +50 a long-then-sell-higher
        // would usually realise.
        assert_eq!(outcome2.trades[0].maker_source, "b");
        assert_eq!(outcome2.trades[0].pnl, -50.0);
    }
}
