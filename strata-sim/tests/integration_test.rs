//! End-to-end scenarios driving the book state machine and the fill
//! simulator together, the same way the backtest replayer does.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use strata_book::{BookManager, BookRegistry};
use strata_core::{BookSnapshot, DeltaEvent, PriceLevel, Side, SimulatedOrder};
use strata_sim::{CalibrationParams, FillSimulator};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn dec(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap()
}

fn snapshot(
    symbol: &str,
    sequence: u64,
    secs: i64,
    bids: &[(f64, f64)],
    asks: &[(f64, f64)],
) -> BookSnapshot {
    BookSnapshot {
        symbol: symbol.to_string(),
        timestamp: ts(secs),
        sequence,
        bids: bids
            .iter()
            .map(|&(price, size)| PriceLevel::new(dec(price), dec(size), sequence))
            .collect(),
        asks: asks
            .iter()
            .map(|&(price, size)| PriceLevel::new(dec(price), dec(size), sequence))
            .collect(),
    }
}

#[test]
fn snapshot_delta_gap_lifecycle() {
    let mut manager = BookManager::new("BTCUSDT");

    let snap = snapshot(
        "BTCUSDT",
        10,
        0,
        &[(100.0, 2.0), (99.0, 1.0)],
        &[(101.0, 2.0), (102.0, 1.0)],
    );
    assert!(snap.validate());
    assert!(manager.apply_snapshot(&snap));
    assert_eq!(manager.mid_price(), Some(dec(100.5)));
    assert_eq!(manager.spread(), Some(Decimal::ONE));

    // Contiguous delta: bid depth at 100 grows, mid unchanged.
    let delta = DeltaEvent {
        sequence: 11,
        bid_updates: vec![(dec(100.0), dec(3.0))],
        ask_updates: vec![],
    };
    assert!(manager.apply_delta(&delta));
    assert_eq!(manager.mid_price(), Some(dec(100.5)));
    assert_eq!(manager.depth_at(dec(100.0), Side::Buy), dec(3.0));

    // Sequence 12 never arrives: the gap flags a resync and leaves the
    // book exactly at its seq-11 state.
    let gapped = DeltaEvent {
        sequence: 13,
        bid_updates: vec![(dec(100.0), dec(9.0))],
        ask_updates: vec![(dec(101.0), dec(9.0))],
    };
    assert!(!manager.apply_delta(&gapped));
    assert!(manager.needs_resync());
    assert_eq!(manager.sequence_gaps(), 1);
    assert_eq!(manager.last_sequence(), 11);
    assert_eq!(manager.depth_at(dec(100.0), Side::Buy), dec(3.0));
    assert_eq!(manager.depth_at(dec(101.0), Side::Sell), dec(2.0));
}

#[test]
fn resting_bid_partially_fills_against_available_volume() {
    let mut registry = BookRegistry::new();
    // Book state seen by the ahead-volume lookup: 0.001 rests on the
    // ask side strictly below 49998.
    registry.apply_snapshot(&snapshot(
        "BTCUSDT",
        1,
        0,
        &[(49_990.0, 1.0)],
        &[(49_997.0, 0.001), (49_999.0, 1.0)],
    ));

    let mut sim = FillSimulator::new(CalibrationParams::default(), 42).unwrap();
    let order = SimulatedOrder::new("BTCUSDT", Side::Buy, dec(50_000.0), dec(0.002), ts(0));
    let order_id = order.order_id.clone();
    sim.add_order(order);

    let update = snapshot("BTCUSDT", 2, 1, &[(49_990.0, 1.0)], &[(49_998.0, 0.5)]);
    let fills = sim.on_book_update(&registry, &update);

    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].order_id, order_id);
    assert_eq!(fills[0].fill_price, dec(49_998.0));
    assert_eq!(fills[0].fill_qty, dec(0.001));

    let summary = sim.get_active_orders_summary("BTCUSDT").unwrap();
    assert_eq!(summary.bids.count, 1);
    assert_eq!(summary.bids.total_qty, dec(0.001));
    assert_eq!(sim.get_queue_position("BTCUSDT", Side::Buy, dec(50_000.0)), 0);
}

#[test]
fn slippage_adjusts_the_scenario_fill_price() {
    let mut registry = BookRegistry::new();
    registry.apply_snapshot(&snapshot(
        "BTCUSDT",
        1,
        0,
        &[(49_990.0, 1.0)],
        &[(49_997.0, 0.001)],
    ));

    let calibration = CalibrationParams {
        extra_slippage_bps: Decimal::ONE,
        ..CalibrationParams::default()
    };
    let mut sim = FillSimulator::new(calibration, 42).unwrap();
    sim.add_order(SimulatedOrder::new(
        "BTCUSDT",
        Side::Buy,
        dec(50_000.0),
        dec(0.002),
        ts(0),
    ));

    let update = snapshot("BTCUSDT", 2, 1, &[(49_990.0, 1.0)], &[(49_998.0, 0.5)]);
    let fills = sim.on_book_update(&registry, &update);

    // 1 bp adverse adjustment on 49998 = 4.9998.
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].fill_price, dec(49_998.0) + Decimal::new(49_998, 4));
    assert_eq!(fills[0].fill_qty, dec(0.001));
}

#[test]
fn replaying_the_same_events_reproduces_books_and_fills() {
    // Sell-off followed by a slow bounce: on the way back up the
    // registry still holds the deeper ask levels from the previous
    // tick, which is what gives the resting bid volume to fill against.
    let path: &[(f64, f64)] = &[
        (100.0, 101.0),
        (98.0, 99.0),
        (96.0, 97.0),
        (94.0, 95.0),
        (92.0, 93.0),
        (92.5, 93.5),
        (93.0, 94.0),
        (93.5, 94.5),
        (94.0, 95.0),
        (94.5, 95.5),
    ];
    let events: Vec<BookSnapshot> = path
        .iter()
        .enumerate()
        .map(|(step, &(best_bid, best_ask))| {
            snapshot(
                "BTCUSDT",
                10 + step as u64,
                step as i64,
                &[(best_bid, 2.0), (best_bid - 1.0, 1.0)],
                &[(best_ask, 2.0), (best_ask + 1.0, 1.0)],
            )
        })
        .collect();

    let run = || {
        let mut registry = BookRegistry::new();
        let calibration = CalibrationParams {
            latency_mean_ms: 50.0,
            latency_std_ms: 10.0,
            toxic_sweep_prob: 0.3,
            ..CalibrationParams::default()
        };
        let mut sim = FillSimulator::new(calibration, 99).unwrap();
        let mut order = SimulatedOrder::new("BTCUSDT", Side::Buy, dec(95.0), dec(4.0), ts(0));
        order.order_id = "replay-bid".to_string();
        sim.add_order(order);

        let mut fills = Vec::new();
        for event in &events {
            // Simulate against the pre-update book, then apply, the way
            // the live loop sequences its callbacks.
            fills.extend(sim.on_book_update(&registry, event));
            registry.apply_snapshot(event);
        }
        let checksum = registry
            .get("BTCUSDT")
            .map(|manager| manager.state().checksum(10))
            .unwrap_or_default();
        (fills, checksum)
    };

    let (fills_a, checksum_a) = run();
    let (fills_b, checksum_b) = run();
    assert_eq!(fills_a, fills_b);
    assert_eq!(checksum_a, checksum_b);

    // The bid fills in two slices on the bounce (2.0 ahead each tick).
    assert_eq!(fills_a.len(), 2);
    assert_eq!(fills_a[0].fill_qty, dec(2.0));
    assert_eq!(fills_a[1].fill_qty, dec(2.0));
    assert!(fills_a.iter().all(|fill| fill.order_id == "replay-bid"));

    let mut registry = BookRegistry::new();
    for event in &events {
        registry.apply_snapshot(event);
    }
    assert!(registry.all_synced());
    let manager = registry.get("BTCUSDT").unwrap();
    assert_eq!(manager.last_sequence(), 19);
    assert_eq!(manager.sequence_gaps(), 0);
}
