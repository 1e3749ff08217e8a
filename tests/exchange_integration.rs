//! Black-box integration tests exercising the crate's public surface:
//! the concrete scenarios and boundary behaviors of spec.md section 8.

use matchbook_exchange::exchange::state::Exchange;
use matchbook_exchange::fix::{Codec, FixMessage, Heartbeat, NewOrderSingle, Side};

fn exchange() -> Exchange {
    Exchange::new(-10_000.0, 1_000, 0)
}

#[test]
fn s1_simple_match_through_public_api() {
    let ex = exchange();
    ex.seed_synthetic_depth(0, "AAPL", 0.0, 0, 0.0); // no-op seed, creates the book
    ex.with_book("AAPL", |b| {
        // manual setup bypassing strategies: submit a resting sell directly.
        let _ = b;
    });

    ex.submit_order(0, "AAPL", Side::Sell, 101.0, 5, "a", "CLA", 0).unwrap();
    let trades = ex.submit_order(1_000, "AAPL", Side::Buy, 101.0, 3, "b", "CLB", 0).unwrap();

    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].price, 101.0);
    assert_eq!(trades[0].qty, 3);
    assert_eq!(trades[0].maker_source, "a");
    assert_eq!(trades[0].taker_source, "b");

    let depth = ex.with_book("AAPL", |b| b.unwrap().get_depth_snapshot(10));
    assert_eq!(depth.asks[0].price, 101.0);
    assert_eq!(depth.asks[0].qty, 2);
    assert_eq!(depth.last_price, Some(101.0));
}

#[test]
fn s5_circuit_breaker_halts_after_large_maker_loss() {
    let ex = exchange();

    // "m" opens a long position at 10.0 ...
    ex.submit_order(0, "X", Side::Buy, 10.0, 500, "m", "CLM1", 0).unwrap();
    ex.submit_order(0, "X", Side::Sell, 10.0, 500, "t", "CLT1", 0).unwrap();

    // ... then closes it by selling at 50,000: per the average-cost formula
    // (spec.md section 4.3.1) this realises a large *negative* pnl for the
    // maker, which trips the breaker.
    ex.submit_order(0, "X", Side::Sell, 50_000.0, 500, "m", "CLM2", 0).unwrap();
    let trades = ex.submit_order(0, "X", Side::Buy, 50_000.0, 500, "t", "CLT2", 0).unwrap();
    assert_eq!(trades.len(), 1);
    assert!(trades[0].pnl < -10_000.0);

    // The breaker itself (internal to the matching engine) now rejects
    // further orders; `Exchange::is_halted` is a separate dashboard-facing
    // flag the scheduler sets only after observing that rejection.
    let before = ex.with_history("X", |h| h.map(|h| h.trades.len()).unwrap_or(0));
    let result = ex.submit_order(0, "X", Side::Buy, 10.0, 1, "t", "CLX", 0);
    assert!(result.is_err());
    let after = ex.with_history("X", |h| h.map(|h| h.trades.len()).unwrap_or(0));
    assert_eq!(before, after);
}

#[test]
fn s6_expiry_removes_aged_resting_order() {
    let ex = exchange();
    ex.submit_order(0, "AAPL", Side::Buy, 99.0, 5, "a", "CLA", 0).unwrap();
    ex.tick_snapshot(61_000_000_000, "AAPL", 60_000_000_000, 10);
    let has_bid = ex.with_book("AAPL", |b| b.unwrap().best_bid().is_some());
    assert!(!has_bid);
}

#[test]
fn fix_round_trip_new_order_single() {
    let mut codec = Codec::new("MY_COMPANY", "EXCHANGE");
    let msg = FixMessage::NewOrderSingle(NewOrderSingle {
        cl_ord_id: "CL1".into(),
        symbol: "AAPL".into(),
        side: Side::Buy,
        price: 101.5,
        order_qty: 10,
        sending_time: "20260101-00:00:00".into(),
        source: "test".into(),
    });
    let wire = codec.encode(&msg, "20260101-00:00:00").unwrap();
    let mut decoder = Codec::new("EXCHANGE", "MY_COMPANY");
    assert_eq!(decoder.decode(&wire).unwrap().unwrap(), msg);
}

#[test]
fn fix_heartbeat_round_trips() {
    let mut codec = Codec::new("A", "B");
    let msg = FixMessage::Heartbeat(Heartbeat { sending_time: "t".into() });
    let wire = codec.encode(&msg, "t").unwrap();
    let mut decoder = Codec::new("B", "A");
    assert_eq!(decoder.decode(&wire).unwrap().unwrap(), msg);
}

#[test]
fn history_rings_are_bounded_at_500() {
    let ex = exchange();
    for i in 0..600u64 {
        ex.tick_snapshot(i as i64, "AAPL", 60_000_000_000, 10);
    }
    let snapshot_count = ex.with_history("AAPL", |h| h.map(|h| h.book_snapshots.len()).unwrap_or(0));
    assert_eq!(snapshot_count, 500);
}

#[test]
fn seed_synthetic_depth_matches_spec_example_through_public_api() {
    let ex = exchange();
    ex.seed_synthetic_depth(0, "AAPL", 100.0, 3, 100.0);
    let depth = ex.with_book("AAPL", |b| b.unwrap().get_depth_snapshot(10));
    let bid_qtys: Vec<u32> = depth.bids.iter().map(|l| l.qty).collect();
    assert_eq!(bid_qtys, vec![64, 51, 41]);
    let bid_prices: Vec<f64> = depth.bids.iter().map(|l| l.price).collect();
    assert_eq!(bid_prices, vec![99.0, 98.5, 98.0]);
}
