//! The plug-in strategy framework (spec.md section 4.4) and its four
//! concrete strategies, registered by `source_name` (spec.md section 9:
//! "registry is a mapping from source_name to a trait/interface object").

pub mod concrete;
pub mod framework;

use crate::exchange::trade::Trade;
use framework::{FillRole, QuoteLogic, StrategyRuntime};
use std::collections::HashMap;

pub use framework::{CandidateOrder, MarketView, RiskLimits, StrategyState};

/// Read-only snapshot of a strategy's observable fields (spec.md section 9:
/// "an interface with an accessor struct for the observables"), used by the
/// dashboard's `/strategy_status` view.
#[derive(Debug, Clone)]
pub struct StrategyObservables {
    pub source_name: String,
    pub inventory: i64,
    pub avg_entry_price: f64,
    pub realised_pnl: f64,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub cooldown_until: i64,
}

/// The capability set every strategy exposes to the scheduler (spec.md
/// section 4.4 and section 9). Implemented once, generically, by
/// `StrategyRuntime<L>` — concrete strategies only ever implement
/// `QuoteLogic`.
pub trait Strategy: Send {
    fn source_name(&self) -> &str;
    fn generate_orders(&mut self, symbol: &str, view: &MarketView) -> Vec<CandidateOrder>;
    fn on_trade(&mut self, trade: &Trade, role: FillRole);
    /// Optional; default is a no-op (spec.md section 4.4).
    fn on_execution_report(&mut self, _trade: &Trade) {}
    fn observables(&self) -> StrategyObservables;
    fn maybe_heartbeat(&mut self, now: crate::clock::Nanos, interval: crate::clock::Nanos) -> Option<String>;
}

impl<L: QuoteLogic> Strategy for StrategyRuntime<L> {
    fn source_name(&self) -> &str {
        self.logic.source_name()
    }

    fn generate_orders(&mut self, symbol: &str, view: &MarketView) -> Vec<CandidateOrder> {
        StrategyRuntime::generate_orders(self, symbol, view)
    }

    fn on_trade(&mut self, trade: &Trade, role: FillRole) {
        StrategyRuntime::on_trade(self, trade, role)
    }

    fn observables(&self) -> StrategyObservables {
        StrategyObservables {
            source_name: self.logic.source_name().to_string(),
            inventory: self.state.inventory,
            avg_entry_price: self.state.avg_entry_price,
            realised_pnl: self.state.realised_pnl,
            total_trades: self.state.total_trades,
            winning_trades: self.state.winning_trades,
            cooldown_until: self.state.cooldown_until,
        }
    }

    fn maybe_heartbeat(&mut self, now: crate::clock::Nanos, interval: crate::clock::Nanos) -> Option<String> {
        StrategyRuntime::maybe_heartbeat(self, now, interval)
    }
}

/// One registry per symbol: `(symbol, source_name) -> strategy instance`,
/// created lazily (spec.md section 3: "Strategy instances are created
/// lazily per (symbol, source) pair").
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<(String, String), Box<dyn Strategy>>,
    my_strategy_enabled: bool,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self { strategies: HashMap::new(), my_strategy_enabled: false }
    }

    pub fn set_my_strategy_enabled(&mut self, enabled: bool) {
        self.my_strategy_enabled = enabled;
        if !enabled {
            self.strategies.retain(|(_, source), _| source != "my_strategy");
        }
    }

    pub fn my_strategy_enabled(&self) -> bool {
        self.my_strategy_enabled
    }

    /// Instantiate any missing always-on strategies for `symbol`, plus
    /// MyStrategy when enabled (spec.md section 4.5 step 2).
    pub fn ensure_instantiated(&mut self, symbol: &str) {
        self.ensure(symbol, "passive_liquidity_provider", || {
            Box::new(StrategyRuntime::new(concrete::PassiveLiquidityProvider::new()))
        });
        self.ensure(symbol, "market_maker", || Box::new(StrategyRuntime::new(concrete::MarketMaker::new())));
        self.ensure(symbol, "momentum", || Box::new(StrategyRuntime::new(concrete::Momentum::new())));
        if self.my_strategy_enabled {
            self.ensure(symbol, "my_strategy", || Box::new(StrategyRuntime::new(concrete::MyStrategy::new())));
        }
    }

    fn ensure(&mut self, symbol: &str, source: &str, make: impl FnOnce() -> Box<dyn Strategy>) {
        let key = (symbol.to_string(), source.to_string());
        self.strategies.entry(key).or_insert_with(make);
    }

    pub fn remove_my_strategy(&mut self, symbol: &str) {
        self.strategies.remove(&(symbol.to_string(), "my_strategy".to_string()));
    }

    pub fn for_symbol_mut(&mut self, symbol: &str) -> impl Iterator<Item = &mut Box<dyn Strategy>> {
        self.strategies.iter_mut().filter(move |((sym, _), _)| sym == symbol).map(|(_, s)| s)
    }

    pub fn get_mut(&mut self, symbol: &str, source: &str) -> Option<&mut Box<dyn Strategy>> {
        self.strategies.get_mut(&(symbol.to_string(), source.to_string()))
    }

    pub fn observables_for_symbol(&self, symbol: &str) -> Vec<StrategyObservables> {
        self.strategies
            .iter()
            .filter(|((sym, _), _)| sym == symbol)
            .map(|(_, s)| s.observables())
            .collect()
    }

    /// Notify every strategy instance present on `symbol` about a trade,
    /// dispatching maker/taker role by matching `source_name`.
    pub fn dispatch_trade(&mut self, symbol: &str, trade: &Trade) {
        if let Some(maker) = self.get_mut(symbol, &trade.maker_source) {
            maker.on_trade(trade, FillRole::Maker);
        }
        if let Some(taker) = self.get_mut(symbol, &trade.taker_source) {
            taker.on_trade(trade, FillRole::Taker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_instantiates_always_on_strategies_lazily() {
        let mut reg = StrategyRegistry::new();
        reg.ensure_instantiated("AAPL");
        assert_eq!(reg.observables_for_symbol("AAPL").len(), 3);
        reg.ensure_instantiated("AAPL");
        assert_eq!(reg.observables_for_symbol("AAPL").len(), 3);
    }

    #[test]
    fn my_strategy_toggle_adds_and_removes_instance() {
        let mut reg = StrategyRegistry::new();
        reg.ensure_instantiated("AAPL");
        reg.set_my_strategy_enabled(true);
        reg.ensure_instantiated("AAPL");
        assert_eq!(reg.observables_for_symbol("AAPL").len(), 4);

        reg.set_my_strategy_enabled(false);
        assert_eq!(reg.observables_for_symbol("AAPL").len(), 3);
    }
}
