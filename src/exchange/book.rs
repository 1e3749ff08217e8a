//! Per-symbol limit order book (spec.md section 4.2).
//!
//! Prices are stored as fixed-point ticks (8 fractional digits, matching
//! the FIX wire precision in spec.md section 4.1) rather than raw `f64`, so
//! that ordering and equality are exact — floating point price comparisons
//! across many strategies would otherwise accumulate binary-float error
//! (spec.md section 9, "Decimal hygiene").

use crate::clock::Nanos;
use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::order::{Order, OrderId, PriceLevel};
use crate::fix::Side;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};

pub type PriceTicks = i64;
const PRICE_SCALE: f64 = 100_000_000.0;

pub fn price_to_ticks(price: f64) -> PriceTicks {
    (price * PRICE_SCALE).round() as PriceTicks
}

pub fn ticks_to_price(ticks: PriceTicks) -> f64 {
    ticks as f64 / PRICE_SCALE
}

const RECENT_PRICES_CAP: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelView {
    pub price: f64,
    pub qty: u32,
    pub cumulative: u32,
    pub order_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DepthSnapshot {
    pub bids: Vec<LevelView>,
    pub asks: Vec<LevelView>,
    pub last_price: Option<f64>,
}

pub struct OrderBook {
    pub symbol: String,
    bids: BTreeMap<PriceTicks, PriceLevel>,
    asks: BTreeMap<PriceTicks, PriceLevel>,
    index: HashMap<OrderId, (Side, PriceTicks)>,
    last_price: Option<f64>,
    recent_prices: VecDeque<f64>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
            last_price: None,
            recent_prices: VecDeque::new(),
        }
    }

    fn side_map(&self, side: Side) -> &BTreeMap<PriceTicks, PriceLevel> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_map_mut(&mut self, side: Side) -> &mut BTreeMap<PriceTicks, PriceLevel> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Insert at the tail of the FIFO queue for `price`, creating the level
    /// if absent, and record the order in the index.
    pub fn add_order(
        &mut self,
        side: Side,
        price: f64,
        qty: u32,
        id: OrderId,
        source: impl Into<String>,
        ts: Nanos,
    ) -> ExchangeResult<()> {
        if price <= 0.0 {
            return Err(ExchangeError::InvalidField(44, "price must be positive".into()));
        }
        if qty == 0 {
            return Err(ExchangeError::InvalidField(38, "qty must be positive".into()));
        }

        let ticks = price_to_ticks(price);
        let order = Order {
            id,
            side,
            price,
            qty,
            source: source.into(),
            submission_ts: ts,
        };
        crate::state_invariant!(
            !self.index.contains_key(&id),
            "add_order: id {} already indexed at {:?}",
            id,
            self.index.get(&id)
        );
        self.side_map_mut(side)
            .entry(ticks)
            .or_insert_with(PriceLevel::new)
            .orders
            .push_back(order);
        self.index.insert(id, (side, ticks));
        Ok(())
    }

    /// Pops the resting order currently at the front of its level's queue,
    /// deleting the level if it becomes empty. Used by the matching engine
    /// after a fill fully consumes the head order.
    pub(crate) fn pop_front(&mut self, side: Side, ticks: PriceTicks) -> Option<Order> {
        let map = self.side_map_mut(side);
        let level = map.get_mut(&ticks)?;
        let popped = level.orders.pop_front();
        if let Some(ref o) = popped {
            let indexed = self.index.get(&o.id).copied();
            crate::state_invariant!(
                indexed == Some((side, ticks)),
                "pop_front: order {} popped from ({:?}, {:?}) but index recorded {:?}",
                o.id,
                side,
                ticks,
                indexed
            );
            self.index.remove(&o.id);
        }
        if level.is_empty() {
            map.remove(&ticks);
        }
        popped
    }

    /// Rotate the head of the queue to the back. Used by self-trade
    /// prevention (spec.md section 4.3 step 4).
    pub(crate) fn rotate_front_to_back(&mut self, side: Side, ticks: PriceTicks) {
        if let Some(level) = self.side_map_mut(side).get_mut(&ticks) {
            if let Some(front) = level.orders.pop_front() {
                level.orders.push_back(front);
            }
        }
    }

    pub(crate) fn peek_front(&self, side: Side, ticks: PriceTicks) -> Option<&Order> {
        self.side_map(side).get(&ticks).and_then(|l| l.orders.front())
    }

    /// Decrement the qty of the head order in place (partial fill).
    pub(crate) fn reduce_front(&mut self, side: Side, ticks: PriceTicks, by: u32) {
        if let Some(level) = self.side_map_mut(side).get_mut(&ticks) {
            if let Some(front) = level.orders.front_mut() {
                front.qty = front.qty.saturating_sub(by);
            }
        }
    }

    pub(crate) fn price_levels(&self, side: Side) -> Vec<PriceTicks> {
        match side {
            Side::Buy => self.bids.keys().rev().copied().collect(),
            Side::Sell => self.asks.keys().copied().collect(),
        }
    }

    pub(crate) fn level_is_empty(&self, side: Side, ticks: PriceTicks) -> bool {
        self.side_map(side).get(&ticks).map(|l| l.is_empty()).unwrap_or(true)
    }

    pub(crate) fn level_order_count(&self, side: Side, ticks: PriceTicks) -> usize {
        self.side_map(side).get(&ticks).map(|l| l.order_count()).unwrap_or(0)
    }

    pub fn best_bid(&self) -> Option<(f64, u32)> {
        self.bids
            .iter()
            .next_back()
            .map(|(t, l)| (ticks_to_price(*t), l.total_qty()))
    }

    pub fn best_ask(&self) -> Option<(f64, u32)> {
        self.asks.iter().next().map(|(t, l)| (ticks_to_price(*t), l.total_qty()))
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    pub fn record_trade(&mut self, price: f64) {
        self.last_price = Some(price);
        self.recent_prices.push_back(price);
        if self.recent_prices.len() > RECENT_PRICES_CAP {
            self.recent_prices.pop_front();
        }
    }

    pub fn get_recent_prices(&self, window: usize) -> Vec<f64> {
        let len = self.recent_prices.len();
        let take = window.min(len);
        self.recent_prices.iter().skip(len - take).copied().collect()
    }

    pub fn top_n(&self, side: Side, n: usize) -> Vec<LevelView> {
        let mut cumulative = 0u32;
        let iter: Box<dyn Iterator<Item = (&PriceTicks, &PriceLevel)>> = match side {
            Side::Buy => Box::new(self.bids.iter().rev()),
            Side::Sell => Box::new(self.asks.iter()),
        };
        iter.take(n)
            .map(|(t, l)| {
                cumulative += l.total_qty();
                LevelView {
                    price: ticks_to_price(*t),
                    qty: l.total_qty(),
                    cumulative,
                    order_count: l.order_count(),
                }
            })
            .collect()
    }

    pub fn get_depth_snapshot(&self, n: usize) -> DepthSnapshot {
        DepthSnapshot {
            bids: self.top_n(Side::Buy, n),
            asks: self.top_n(Side::Sell, n),
            last_price: self.last_price,
        }
    }

    /// For each side, drop resting orders older than `max_age_ns`, deleting
    /// emptied levels, and pruning the index (spec.md section 4.2, S6).
    pub fn expire_old_orders(&mut self, now: Nanos, max_age_ns: Nanos) {
        for side in [Side::Buy, Side::Sell] {
            let map = self.side_map_mut(side);
            let mut empty_ticks = Vec::new();
            for (ticks, level) in map.iter_mut() {
                while let Some(front) = level.orders.front() {
                    if now - front.submission_ts > max_age_ns {
                        let removed = level.orders.pop_front().unwrap();
                        self.index.remove(&removed.id);
                    } else {
                        break;
                    }
                }
                if level.is_empty() {
                    empty_ticks.push(*ticks);
                }
            }
            for ticks in empty_ticks {
                map.remove(&ticks);
            }
        }
    }

    /// Populate synthetic resting depth around `mid` (spec.md section 4.2).
    /// `i` runs 2..=levels+1; i=1 is intentionally skipped so real
    /// strategies can quote the top of book.
    pub fn seed_synthetic_depth(
        &mut self,
        mid: f64,
        levels: u32,
        base_qty: f64,
        next_id: &mut OrderId,
        now: Nanos,
    ) {
        for i in 2..=(levels + 1) {
            let bid_price = mid * (1.0 - 0.005 * i as f64);
            let ask_price = mid * (1.0 + 0.005 * i as f64);
            let qty = (base_qty * 0.8f64.powi(i as i32)).floor() as u32;
            if qty == 0 {
                continue;
            }
            let bid_id = *next_id;
            *next_id += 1;
            let _ = self.add_order(Side::Buy, bid_price, qty, bid_id, "synthetic", now);
            let ask_id = *next_id;
            *next_id += 1;
            let _ = self.add_order(Side::Sell, ask_price, qty, ask_id, "synthetic", now);
        }
    }

    /// Remove an order by id via the index, re-queuing the rest of the
    /// level. Returns the removed order, or `None` if it was already gone
    /// (idempotent: calling twice returns the record then `None`).
    pub fn remove_order(&mut self, id: OrderId) -> Option<Order> {
        let (side, ticks) = self.index.remove(&id)?;
        let map = self.side_map_mut(side);
        let Some(level) = map.get_mut(&ticks) else {
            crate::state_invariant!(
                false,
                "remove_order: index pointed order {} at price level {:?} on {:?} but no level exists",
                id,
                ticks,
                side
            );
            return None;
        };
        let Some(pos) = level.orders.iter().position(|o| o.id == id) else {
            crate::state_invariant!(
                false,
                "remove_order: index pointed order {} at ({:?}, {:?}) but the level's queue does not hold it",
                id,
                side,
                ticks
            );
            return None;
        };
        let removed = level.orders.remove(pos);
        if level.is_empty() {
            map.remove(&ticks);
        }
        removed
    }

    pub fn get_orders_by_source(&self, side: Side, source: &str) -> Vec<Order> {
        self.side_map(side)
            .values()
            .flat_map(|level| level.orders.iter())
            .filter(|o| o.source == source)
            .cloned()
            .collect()
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bids_descend_asks_ascend() {
        let mut book = OrderBook::new("AAPL");
        book.add_order(Side::Buy, 99.0, 5, 1, "a", 0).unwrap();
        book.add_order(Side::Buy, 101.0, 5, 2, "a", 0).unwrap();
        book.add_order(Side::Sell, 103.0, 5, 3, "a", 0).unwrap();
        book.add_order(Side::Sell, 102.0, 5, 4, "a", 0).unwrap();

        assert_eq!(book.best_bid().unwrap().0, 101.0);
        assert_eq!(book.best_ask().unwrap().0, 102.0);
    }

    #[test]
    fn idempotent_cancellation() {
        let mut book = OrderBook::new("AAPL");
        book.add_order(Side::Buy, 100.0, 5, 1, "a", 0).unwrap();
        assert!(book.remove_order(1).is_some());
        assert!(book.remove_order(1).is_none());
        assert!(book.best_bid().is_none());
    }

    #[test]
    fn seed_synthetic_depth_matches_spec_example() {
        let mut book = OrderBook::new("AAPL");
        let mut next_id = 1u64;
        book.seed_synthetic_depth(100.0, 3, 100.0, &mut next_id, 0);

        let bids = book.top_n(Side::Buy, 10);
        let asks = book.top_n(Side::Sell, 10);
        let bid_prices: Vec<f64> = bids.iter().map(|l| l.price).collect();
        let ask_prices: Vec<f64> = asks.iter().map(|l| l.price).collect();

        assert_eq!(bid_prices, vec![99.0, 98.5, 98.0]);
        assert_eq!(ask_prices, vec![101.0, 101.5, 102.0]);
        let qtys: Vec<u32> = bids.iter().map(|l| l.qty).collect();
        assert_eq!(qtys, vec![64, 51, 41]);
    }

    #[test]
    fn expiry_removes_aged_order_and_level() {
        let mut book = OrderBook::new("AAPL");
        book.add_order(Side::Buy, 100.0, 5, 1, "a", 0).unwrap();
        book.expire_old_orders(61_000_000_000, 60_000_000_000);
        assert!(book.best_bid().is_none());
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn recent_prices_ring_capped_at_1000() {
        let mut book = OrderBook::new("AAPL");
        for i in 0..1500 {
            book.record_trade(i as f64);
        }
        assert_eq!(book.get_recent_prices(2000).len(), 1000);
    }
}
