//! Base strategy risk framework, order placement, and lifecycle mechanics
//! (spec.md section 4.4).
//!
//! A concrete strategy only supplies quoting *decisions* (`QuoteLogic`);
//! everything else — rate limiting, the composite risk check, drawdown and
//! cooldown tracking, trailing stop, inventory rebalancing, and adaptive
//! sizing — lives here once and is shared by all four strategies in
//! `strategy::concrete`.

use crate::clock::Nanos;
use crate::exchange::book::LevelView;
use crate::exchange::trade::Trade;
use crate::fix::codec::Codec;
use crate::fix::message::{FixMessage, Heartbeat, NewOrderSingle, Side};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

pub const NANOS_PER_SEC: Nanos = 1_000_000_000;

/// A read-only snapshot of one symbol's book, built by the scheduler before
/// each strategy tick. Strategies never touch the book or the lock
/// directly (spec.md section 9: trade callbacks happen while the engine
/// holds the state lock, so strategies must not call back into the engine).
#[derive(Debug, Clone, Default)]
pub struct MarketView {
    pub now: Nanos,
    pub best_bid: Option<(f64, u32)>,
    pub best_ask: Option<(f64, u32)>,
    pub top5_bid: Vec<LevelView>,
    pub top5_ask: Vec<LevelView>,
    pub recent_prices_30: Vec<f64>,
}

impl MarketView {
    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid, self.best_ask) {
            (Some((b, _)), Some((a, _))) => Some((b + a) / 2.0),
            _ => None,
        }
    }

    pub fn top5_qty(&self, side: Side) -> u32 {
        match side {
            Side::Buy => self.top5_bid.iter().map(|l| l.qty).sum(),
            Side::Sell => self.top5_ask.iter().map(|l| l.qty).sum(),
        }
    }

    /// stddev of the last 30 trade prices, floored at 0.01 (spec.md section
    /// 4.4.1: "with a floor of 0.01 applied to the measurement").
    pub fn volatility(&self) -> f64 {
        if self.recent_prices_30.len() < 2 {
            return 0.01;
        }
        let sd = (&self.recent_prices_30[..]).std_dev();
        sd.max(0.01)
    }
}

/// A candidate order a strategy wants placed, already past the framework's
/// risk checks. The scheduler routes these through `Exchange::submit_order`
/// (spec.md section 4.5 step 5).
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateOrder {
    pub side: Side,
    pub price: f64,
    pub qty: u32,
    pub source: String,
    pub cl_ord_id: String,
}

/// Role a strategy played in a fill, passed to `on_trade`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillRole {
    Maker,
    Taker,
}

/// Composite risk-check limits (spec.md section 4.4.1), one set per
/// strategy instance so concrete strategies can override a subset.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_order_qty: u32,
    pub max_price_deviation: f64,
    pub max_daily_orders: u64,
    pub max_position_duration: Nanos,
    pub daily_loss_limit: f64,
    pub liquidity_floor_pct: f64,
    pub max_volatility: f64,
    pub min_order_interval: Nanos,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_order_qty: 1_000,
            max_price_deviation: 0.02,
            max_daily_orders: 1_000,
            max_position_duration: 60 * NANOS_PER_SEC,
            daily_loss_limit: -10_000.0,
            liquidity_floor_pct: 0.20,
            max_volatility: 0.1,
            min_order_interval: NANOS_PER_SEC,
        }
    }
}

/// Drawdown / cooldown / trailing-stop parameters (spec.md section 4.4.2).
#[derive(Debug, Clone)]
pub struct RiskControlParams {
    pub drawdown_limit: f64,
    pub cooldown_period: Nanos,
    /// No numeric default is given in spec.md for the trailing-stop
    /// fraction (only the mechanism is specified); 1% is chosen here as a
    /// reasonable default and recorded in DESIGN.md.
    pub trailing_stop_pct: f64,
    pub per_trade_stop_loss: f64,
    pub per_trade_take_profit: f64,
}

impl Default for RiskControlParams {
    fn default() -> Self {
        Self {
            drawdown_limit: 500.0,
            cooldown_period: 60 * NANOS_PER_SEC,
            trailing_stop_pct: 0.01,
            per_trade_stop_loss: -100.0,
            per_trade_take_profit: 150.0,
        }
    }
}

/// Reason a candidate order was rejected locally (spec.md section 7:
/// `RiskRejected`, never surfaced past the strategy).
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    TooSoon,
    QtyTooLarge,
    PriceDeviation,
    DailyOrderCapReached,
    PositionDurationExceeded,
    DailyLossLimitReached,
    LiquidityFloor,
    VolatilityCeiling,
}

/// Per-instance mutable state (spec.md section 3, "Strategy State").
#[derive(Debug, Clone)]
pub struct StrategyState {
    pub inventory: i64,
    pub avg_entry_price: f64,
    pub realised_pnl: f64,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub last_order_time: Nanos,
    pub cooldown_until: Nanos,
    pub high_water_mark: f64,
    pub highest_price_since_entry: Option<f64>,
    pub lowest_price_since_entry: Option<f64>,
    pub rebalance_pending: bool,
    pub position_start_time: Option<Nanos>,
    pub order_count: u64,
    pub last_heartbeat: Nanos,
}

impl Default for StrategyState {
    fn default() -> Self {
        Self {
            inventory: 0,
            avg_entry_price: 0.0,
            realised_pnl: 0.0,
            total_trades: 0,
            winning_trades: 0,
            last_order_time: Nanos::MIN,
            cooldown_until: 0,
            high_water_mark: 0.0,
            highest_price_since_entry: None,
            lowest_price_since_entry: None,
            rebalance_pending: false,
            position_start_time: None,
            order_count: 0,
            last_heartbeat: Nanos::MIN,
        }
    }
}

impl StrategyState {
    pub fn unrealised_pnl(&self, mid: f64) -> f64 {
        if self.inventory == 0 {
            return 0.0;
        }
        self.inventory as f64 * (mid - self.avg_entry_price)
    }

    /// Average-cost fill application, mirroring the matching engine's
    /// maker ledger (spec.md section 4.3.1) but kept as the strategy's own
    /// private bookkeeping.
    fn apply_fill(&mut self, side: Side, qty: u32, price: f64) -> f64 {
        let signed: i64 = if side == Side::Buy { qty as i64 } else { -(qty as i64) };

        if self.inventory == 0 {
            self.position_start_time = Some(self.position_start_time.unwrap_or(0));
        }

        if self.inventory == 0 || self.inventory.signum() == signed.signum() {
            let abs_inv = self.inventory.unsigned_abs() as f64;
            let new_abs = abs_inv + qty as f64;
            self.avg_entry_price = (self.avg_entry_price * abs_inv + price * qty as f64) / new_abs;
            self.inventory += signed;
            return 0.0;
        }

        let abs_inv = self.inventory.unsigned_abs();
        let close_qty = abs_inv.min(qty as u64) as u32;
        let was_long = self.inventory > 0;
        let realised = if was_long {
            close_qty as f64 * (self.avg_entry_price - price)
        } else {
            close_qty as f64 * (price - self.avg_entry_price)
        };

        if was_long {
            self.inventory -= close_qty as i64;
        } else {
            self.inventory += close_qty as i64;
        }

        let remaining = qty - close_qty;
        if remaining > 0 {
            self.avg_entry_price = price;
            self.inventory = if side == Side::Buy { remaining as i64 } else { -(remaining as i64) };
        } else if self.inventory == 0 {
            self.avg_entry_price = 0.0;
            self.position_start_time = None;
        }

        realised
    }

    /// Clears position state on a stop/trailing-stop trigger, preserving
    /// cumulative counters (spec.md section 4.4: "clears position state
    /// ... but not cumulative metrics").
    fn reset_position(&mut self) {
        self.inventory = 0;
        self.avg_entry_price = 0.0;
        self.highest_price_since_entry = None;
        self.lowest_price_since_entry = None;
        self.position_start_time = None;
    }
}

/// Pure quoting decision supplied by a concrete strategy. Everything else
/// (risk, cooldown, rebalancing) is handled by `StrategyRuntime`.
pub trait QuoteLogic: Send {
    fn source_name(&self) -> &str;

    /// Maximum absolute inventory before the shared rebalance logic takes
    /// over (spec.md section 4.4.3: "all four share inventory-rebalance
    /// logic").
    fn max_inventory(&self) -> i64;

    /// Compute candidate quotes given the current book and this
    /// strategy's own risk-limits/state (read-only).
    fn quotes(&mut self, view: &MarketView, limits: &RiskLimits, state: &StrategyState) -> Vec<(Side, f64, u32)>;

    fn risk_limits(&self) -> RiskLimits {
        RiskLimits::default()
    }

    fn risk_control_params(&self) -> RiskControlParams {
        RiskControlParams::default()
    }

    /// `get_adaptive_order_size` (spec.md section 4.4.3).
    fn adaptive_size(&self, limits: &RiskLimits, view: &MarketView, min: u32, max: u32) -> u32 {
        let vol = view.volatility();
        let raw = (limits.max_order_qty as f64 / (vol + 0.01)).floor();
        (raw as i64).clamp(min as i64, max as i64) as u32
    }
}

/// Wraps a `QuoteLogic` with the shared risk framework and lifecycle
/// mechanics, and implements the `Strategy` trait used by the registry
/// (spec.md section 9: "a strategy is a capability set ... registry is a
/// mapping from source_name to a trait/interface object").
pub struct StrategyRuntime<L: QuoteLogic> {
    pub logic: L,
    pub codec: Codec,
    pub limits: RiskLimits,
    pub controls: RiskControlParams,
    pub state: StrategyState,
}

impl<L: QuoteLogic> StrategyRuntime<L> {
    pub fn new(logic: L) -> Self {
        let limits = logic.risk_limits();
        let controls = logic.risk_control_params();
        Self {
            codec: Codec::new("MY_COMPANY", "EXCHANGE"),
            logic,
            limits,
            controls,
            state: StrategyState::default(),
        }
    }

    fn reference_price(&self, view: &MarketView, side: Side) -> Option<f64> {
        match side {
            Side::Buy => view.best_ask.map(|(p, _)| p),
            Side::Sell => view.best_bid.map(|(p, _)| p),
        }
    }

    /// The composite risk check of spec.md section 4.4.1. All sub-checks
    /// must pass.
    fn risk_check(&self, view: &MarketView, side: Side, price: f64, qty: u32) -> Result<(), RejectReason> {
        if qty > self.limits.max_order_qty {
            return Err(RejectReason::QtyTooLarge);
        }

        if let Some(ref_price) = self.reference_price(view, side) {
            if ref_price > 0.0 {
                let dev = (price - ref_price).abs() / ref_price;
                // A price computed as `ref * (1 + limit)` lands a few ULPs
                // off the limit after the multiply-then-divide round trip
                // (spec.md section 9, "Decimal hygiene"); treat anything
                // within 1e-9 of the limit as exactly at it.
                if dev - self.limits.max_price_deviation > -1e-9 {
                    return Err(RejectReason::PriceDeviation);
                }
            }
        }

        if self.state.order_count >= self.limits.max_daily_orders {
            return Err(RejectReason::DailyOrderCapReached);
        }

        if let Some(start) = self.state.position_start_time {
            if view.now - start > self.limits.max_position_duration {
                return Err(RejectReason::PositionDurationExceeded);
            }
        }

        let unrealised = view.mid().map(|m| self.state.unrealised_pnl(m)).unwrap_or(0.0);
        if self.state.realised_pnl + unrealised <= self.limits.daily_loss_limit {
            return Err(RejectReason::DailyLossLimitReached);
        }

        let opposite_top5 = view.top5_qty(side.opposite());
        if qty as f64 > self.limits.liquidity_floor_pct * opposite_top5 as f64 {
            return Err(RejectReason::LiquidityFloor);
        }

        if view.volatility() > self.limits.max_volatility {
            return Err(RejectReason::VolatilityCeiling);
        }

        Ok(())
    }

    /// `place_order` (spec.md section 4.4): rate limit, composite risk
    /// check, FIX encode + round-trip decode sanity check, then hand back
    /// the validated candidate for the scheduler to route through
    /// `Exchange::submit_order` (the sole book-mutation path; see
    /// DESIGN.md for why this unifies the spec's two described call
    /// sites).
    pub fn place_order(&mut self, view: &MarketView, symbol: &str, side: Side, price: f64, qty: u32) -> Option<CandidateOrder> {
        if view.now - self.state.last_order_time < self.limits.min_order_interval {
            return None;
        }

        if let Err(reason) = self.risk_check(view, side, price, qty) {
            debug!(source = self.logic.source_name(), ?reason, "order rejected by risk check");
            return None;
        }

        let cl_ord_id = format!("{}-{}-{}", self.logic.source_name(), symbol, self.state.order_count + 1);
        let nos = NewOrderSingle {
            cl_ord_id: cl_ord_id.clone(),
            symbol: symbol.to_string(),
            side,
            price,
            order_qty: qty,
            sending_time: crate::clock::display_nanos(view.now).to_string(),
            source: self.logic.source_name().to_string(),
        };
        let msg = FixMessage::NewOrderSingle(nos);
        let wire = match self.codec.encode(&msg, &crate::clock::display_nanos(view.now).to_string()) {
            Ok(w) => w,
            Err(e) => {
                warn!(source = self.logic.source_name(), error = %e, "FIX encode rejected candidate order");
                return None;
            }
        };
        let mut decoder = Codec::new(self.codec.target.clone(), self.codec.sender.clone());
        let round_tripped = decoder.decode(&wire);
        let parsed = match round_tripped {
            Ok(Some(FixMessage::NewOrderSingle(nos))) => nos,
            _ => {
                warn!(source = self.logic.source_name(), "FIX round-trip sanity check failed");
                return None;
            }
        };

        self.state.last_order_time = view.now;
        self.state.order_count += 1;

        Some(CandidateOrder {
            side: parsed.side,
            price: parsed.price,
            qty: parsed.order_qty,
            source: self.logic.source_name().to_string(),
            cl_ord_id,
        })
    }

    /// `update_unrealised_pnl_and_drawdown` (spec.md section 4.4.2).
    fn update_drawdown(&mut self, view: &MarketView) {
        let Some(mid) = view.mid() else { return };
        let current = self.state.realised_pnl + self.state.unrealised_pnl(mid);
        if current > self.state.high_water_mark {
            self.state.high_water_mark = current;
        }
        if self.state.high_water_mark - current >= self.controls.drawdown_limit {
            self.state.cooldown_until = view.now + self.controls.cooldown_period;
            self.state.high_water_mark = current;
        }
    }

    /// Trailing-stop check (spec.md section 4.4.2): tracks the extremum
    /// since entry and closes the position on retracement.
    fn trailing_stop_triggered(&mut self, price: f64) -> bool {
        if self.state.inventory > 0 {
            let hi = self.state.highest_price_since_entry.get_or_insert(price);
            if price > *hi {
                *hi = price;
            }
            return price < *hi * (1.0 - self.controls.trailing_stop_pct);
        }
        if self.state.inventory < 0 {
            let lo = self.state.lowest_price_since_entry.get_or_insert(price);
            if price < *lo {
                *lo = price;
            }
            return price > *lo * (1.0 + self.controls.trailing_stop_pct);
        }
        false
    }

    fn rebalance_order(&self, view: &MarketView) -> Option<(Side, f64, u32)> {
        if self.state.inventory == 0 {
            return None;
        }
        let (side, price) = if self.state.inventory > 0 {
            (Side::Sell, view.best_bid?.0)
        } else {
            (Side::Buy, view.best_ask?.0)
        };
        Some((side, price, self.state.inventory.unsigned_abs().min(u32::MAX as u64) as u32))
    }

    pub fn generate_orders(&mut self, symbol: &str, view: &MarketView) -> Vec<CandidateOrder> {
        self.update_drawdown(view);

        if view.now < self.state.cooldown_until {
            return Vec::new();
        }

        if self.logic.max_inventory() > 0 && self.state.inventory.unsigned_abs() as i64 >= self.logic.max_inventory() {
            self.state.rebalance_pending = true;
        }

        if self.state.rebalance_pending {
            return match self.rebalance_order(view) {
                Some((side, price, qty)) if qty > 0 => {
                    self.place_order(view, symbol, side, price, qty).into_iter().collect()
                }
                _ => {
                    self.state.rebalance_pending = false;
                    Vec::new()
                }
            };
        }

        let quotes = self.logic.quotes(view, &self.limits, &self.state);
        quotes
            .into_iter()
            .filter_map(|(side, price, qty)| self.place_order(view, symbol, side, price, qty))
            .collect()
    }

    /// Sends a heartbeat (spec.md section 4.1: "when `now − last_heartbeat
    /// ≥ heartbeat_interval`"), returning the encoded wire frame for the
    /// caller to log/transmit. `None` when not yet due.
    pub fn maybe_heartbeat(&mut self, now: Nanos, interval: Nanos) -> Option<String> {
        if now - self.state.last_heartbeat < interval {
            return None;
        }
        self.state.last_heartbeat = now;
        let sending_time = crate::clock::display_nanos(now).to_string();
        let msg = FixMessage::Heartbeat(Heartbeat { sending_time: sending_time.clone() });
        match self.codec.encode(&msg, &sending_time) {
            Ok(wire) => Some(wire),
            Err(e) => {
                warn!(source = self.logic.source_name(), error = %e, "heartbeat encode failed");
                None
            }
        }
    }

    pub fn on_trade(&mut self, trade: &Trade, role: FillRole) {
        let side = match role {
            FillRole::Maker => trade.side.opposite(),
            FillRole::Taker => trade.side,
        };
        let pnl = self.state.apply_fill(side, trade.qty, trade.price);
        self.state.realised_pnl += pnl;
        self.state.total_trades += 1;
        if pnl > 0.0 {
            self.state.winning_trades += 1;
        }

        if pnl <= self.controls.per_trade_stop_loss || pnl >= self.controls.per_trade_take_profit {
            self.state.reset_position();
            return;
        }

        if self.trailing_stop_triggered(trade.price) {
            self.state.reset_position();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLogic;
    impl QuoteLogic for FixedLogic {
        fn source_name(&self) -> &str {
            "fixed"
        }
        fn max_inventory(&self) -> i64 {
            100
        }
        fn quotes(&mut self, view: &MarketView, _limits: &RiskLimits, _state: &StrategyState) -> Vec<(Side, f64, u32)> {
            vec![(Side::Buy, view.best_ask.map(|(p, _)| p).unwrap_or(100.0), 5)]
        }
    }

    fn view_with_depth() -> MarketView {
        MarketView {
            now: 10 * NANOS_PER_SEC,
            best_bid: Some((99.0, 50)),
            best_ask: Some((101.0, 50)),
            top5_bid: vec![LevelView { price: 99.0, qty: 50, cumulative: 50, order_count: 1 }],
            top5_ask: vec![LevelView { price: 101.0, qty: 50, cumulative: 50, order_count: 1 }],
            recent_prices_30: vec![100.0; 30],
        }
    }

    #[test]
    fn rate_limit_blocks_rapid_orders() {
        let mut rt = StrategyRuntime::new(FixedLogic);
        let view = view_with_depth();
        let first = rt.generate_orders("AAPL", &view);
        assert_eq!(first.len(), 1);

        let mut view2 = view.clone();
        view2.now += 1; // well inside min_order_interval
        let second = rt.generate_orders("AAPL", &view2);
        assert!(second.is_empty());
    }

    #[test]
    fn qty_above_max_order_qty_is_rejected() {
        let mut rt = StrategyRuntime::new(FixedLogic);
        let view = view_with_depth();
        let out = rt.place_order(&view, "AAPL", Side::Buy, 101.0, rt.limits.max_order_qty + 1);
        assert!(out.is_none());
    }

    #[test]
    fn qty_at_max_order_qty_is_accepted_when_liquidity_allows() {
        let mut rt = StrategyRuntime::new(FixedLogic);
        let mut view = view_with_depth();
        view.top5_ask = vec![LevelView { price: 101.0, qty: 10_000, cumulative: 10_000, order_count: 1 }];
        let out = rt.place_order(&view, "AAPL", Side::Buy, 101.0, rt.limits.max_order_qty);
        assert!(out.is_some());
    }

    #[test]
    fn price_deviation_boundary() {
        let mut rt = StrategyRuntime::new(FixedLogic);
        let mut view = view_with_depth();
        view.top5_ask = vec![LevelView { price: 101.0, qty: 10_000, cumulative: 10_000, order_count: 1 }];
        // Reference (best_ask) = 101.0; exactly at the 2% deviation boundary is rejected.
        let at_boundary = 101.0 * 1.02;
        let out = rt.place_order(&view, "AAPL", Side::Buy, at_boundary, 1);
        assert!(out.is_none());

        rt.state.last_order_time = Nanos::MIN;
        let inside = 101.0 * 1.019;
        let out2 = rt.place_order(&view, "AAPL", Side::Buy, inside, 1);
        assert!(out2.is_some());
    }

    #[test]
    fn drawdown_triggers_cooldown() {
        let mut rt = StrategyRuntime::new(FixedLogic);
        rt.state.realised_pnl = 0.0;
        rt.state.high_water_mark = 600.0;
        let mut view = view_with_depth();
        view.best_bid = Some((50.0, 50));
        view.best_ask = Some((50.0, 50));
        rt.update_drawdown(&view);
        assert!(rt.state.cooldown_until > 0);
    }

    #[test]
    fn stop_loss_resets_position_not_counters() {
        let mut rt = StrategyRuntime::new(FixedLogic);
        rt.state.inventory = 10;
        rt.state.avg_entry_price = 100.0;
        rt.state.total_trades = 3;
        let trade = Trade {
            price: 90.0,
            qty: 10,
            maker_order_id: 1,
            maker_source: "fixed".into(),
            taker_order_id: 2,
            taker_source: "x".into(),
            side: Side::Sell,
            wall_clock_ns: 0,
            latency_ms: 0.0,
            pnl: 0.0,
        };
        rt.on_trade(&trade, FillRole::Maker);
        assert_eq!(rt.state.inventory, 0);
        assert_eq!(rt.state.total_trades, 4);
    }
}
