//! The four concrete strategies (spec.md section 4.4.3), each a small
//! `QuoteLogic` implementation driven by the shared `StrategyRuntime`.

use crate::fix::Side;
use crate::strategy::framework::{MarketView, QuoteLogic, RiskLimits, StrategyState};

/// Quotes the current best bid/ask, capped at a small inventory band.
pub struct PassiveLiquidityProvider {
    max_inventory: i64,
}

impl PassiveLiquidityProvider {
    pub fn new() -> Self {
        Self { max_inventory: 100 }
    }
}

impl Default for PassiveLiquidityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteLogic for PassiveLiquidityProvider {
    fn source_name(&self) -> &str {
        "passive_liquidity_provider"
    }

    fn max_inventory(&self) -> i64 {
        self.max_inventory
    }

    fn quotes(&mut self, view: &MarketView, limits: &RiskLimits, _state: &StrategyState) -> Vec<(Side, f64, u32)> {
        let qty = self.adaptive_size(limits, view, 1, 10);
        let mut out = Vec::new();
        if let Some((bid, _)) = view.best_bid {
            out.push((Side::Buy, bid, qty));
        }
        if let Some((ask, _)) = view.best_ask {
            out.push((Side::Sell, ask, qty));
        }
        out
    }
}

/// Quotes symmetrically around the mid at a fixed spread.
pub struct MarketMaker {
    spread_pct: f64,
    max_inventory: i64,
}

impl MarketMaker {
    pub fn new() -> Self {
        Self { spread_pct: 0.002, max_inventory: 200 }
    }
}

impl Default for MarketMaker {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteLogic for MarketMaker {
    fn source_name(&self) -> &str {
        "market_maker"
    }

    fn max_inventory(&self) -> i64 {
        self.max_inventory
    }

    fn quotes(&mut self, view: &MarketView, limits: &RiskLimits, _state: &StrategyState) -> Vec<(Side, f64, u32)> {
        let Some(mid) = view.mid() else { return Vec::new() };
        let qty = self.adaptive_size(limits, view, 1, 50);
        let half = self.spread_pct / 2.0;
        vec![
            (Side::Buy, mid * (1.0 - half), qty),
            (Side::Sell, mid * (1.0 + half), qty),
        ]
    }
}

/// Skews quotes toward the direction of recent trade-price drift.
pub struct Momentum {
    lookback: usize,
    momentum_skew: f64,
    size_skew: f64,
    max_inventory: i64,
}

impl Momentum {
    pub fn new() -> Self {
        Self { lookback: 10, momentum_skew: 0.001, size_skew: 0.3, max_inventory: 150 }
    }

    /// Simple slope of the last `lookback` trade prices: (last - first) /
    /// (lookback - 1). Zero when too little history exists.
    fn slope(&self, prices: &[f64]) -> f64 {
        let n = prices.len().min(self.lookback);
        if n < 2 {
            return 0.0;
        }
        let window = &prices[prices.len() - n..];
        (window[n - 1] - window[0]) / (n as f64 - 1.0)
    }
}

impl Default for Momentum {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteLogic for Momentum {
    fn source_name(&self) -> &str {
        "momentum"
    }

    fn max_inventory(&self) -> i64 {
        self.max_inventory
    }

    fn quotes(&mut self, view: &MarketView, limits: &RiskLimits, _state: &StrategyState) -> Vec<(Side, f64, u32)> {
        let (Some((bid, _)), Some((ask, _))) = (view.best_bid, view.best_ask) else {
            return Vec::new();
        };
        let slope = self.slope(&view.recent_prices_30);
        let base_qty = self.adaptive_size(limits, view, 1, 30);
        let skew_qty = (base_qty as f64 * self.size_skew).round() as i64;

        let mut bid_price = bid + slope.max(0.0) * self.momentum_skew * bid;
        let mut ask_price = ask + slope.min(0.0) * self.momentum_skew * ask;
        // Never cross the spread: if the skew pushed the two past each
        // other, pull both back to the original touch.
        if bid_price >= ask_price {
            bid_price = bid;
            ask_price = ask;
        }

        let bid_qty = (base_qty as i64 + if slope > 0.0 { skew_qty } else { 0 }).max(1) as u32;
        let ask_qty = (base_qty as i64 + if slope < 0.0 { skew_qty } else { 0 }).max(1) as u32;

        vec![(Side::Buy, bid_price, bid_qty), (Side::Sell, ask_price, ask_qty)]
    }
}

/// User-controlled strategy, toggleable on/off by the dashboard; quotes at
/// a configurable fraction away from the best on each side.
pub struct MyStrategy {
    spread_factor: f64,
    max_inventory: i64,
}

impl MyStrategy {
    pub fn new() -> Self {
        Self { spread_factor: 0.01, max_inventory: 100 }
    }
}

impl Default for MyStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteLogic for MyStrategy {
    fn source_name(&self) -> &str {
        "my_strategy"
    }

    fn max_inventory(&self) -> i64 {
        self.max_inventory
    }

    fn quotes(&mut self, view: &MarketView, limits: &RiskLimits, _state: &StrategyState) -> Vec<(Side, f64, u32)> {
        let qty = self.adaptive_size(limits, view, 1, 20);
        let mut out = Vec::new();
        if let Some((bid, _)) = view.best_bid {
            out.push((Side::Buy, bid * (1.0 - self.spread_factor), qty));
        }
        if let Some((ask, _)) = view.best_ask {
            out.push((Side::Sell, ask * (1.0 + self.spread_factor), qty));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::book::LevelView;
    use crate::strategy::framework::StrategyRuntime;

    fn view() -> MarketView {
        MarketView {
            now: 10_000_000_000,
            best_bid: Some((99.0, 100)),
            best_ask: Some((101.0, 100)),
            top5_bid: vec![LevelView { price: 99.0, qty: 1_000, cumulative: 1_000, order_count: 1 }],
            top5_ask: vec![LevelView { price: 101.0, qty: 1_000, cumulative: 1_000, order_count: 1 }],
            recent_prices_30: (0..30).map(|i| 100.0 + i as f64 * 0.1).collect(),
        }
    }

    #[test]
    fn passive_liquidity_provider_quotes_touch() {
        let mut rt = StrategyRuntime::new(PassiveLiquidityProvider::new());
        let orders = rt.generate_orders("AAPL", &view());
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().any(|o| o.side == Side::Buy && o.price == 99.0));
        assert!(orders.iter().any(|o| o.side == Side::Sell && o.price == 101.0));
    }

    #[test]
    fn market_maker_quotes_around_mid() {
        let mut rt = StrategyRuntime::new(MarketMaker::new());
        let orders = rt.generate_orders("AAPL", &view());
        assert_eq!(orders.len(), 2);
        for o in &orders {
            assert!((o.price - 100.0).abs() < 1.0);
        }
    }

    #[test]
    fn momentum_never_crosses_spread() {
        let mut rt = StrategyRuntime::new(Momentum::new());
        let orders = rt.generate_orders("AAPL", &view());
        let bid = orders.iter().find(|o| o.side == Side::Buy).unwrap().price;
        let ask = orders.iter().find(|o| o.side == Side::Sell).unwrap().price;
        assert!(bid < ask);
    }

    #[test]
    fn my_strategy_quotes_spread_factor_away() {
        let mut rt = StrategyRuntime::new(MyStrategy::new());
        let orders = rt.generate_orders("AAPL", &view());
        let bid = orders.iter().find(|o| o.side == Side::Buy).unwrap().price;
        assert!((bid - 99.0 * 0.99).abs() < 1e-9);
    }
}
