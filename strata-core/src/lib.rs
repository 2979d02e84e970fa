//! Fundamental data types shared across the entire workspace.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alias for price precision.
pub type Price = Decimal;
/// Alias for quantity precision.
pub type Quantity = Decimal;
/// Alias used for human-readable market symbols (e.g., `BTCUSDT`).
pub type Symbol = String;
/// Unique identifier assigned to simulated orders.
pub type OrderId = String;

/// The side of an order or book level.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Side {
    /// Buy the instrument (bid side of the book).
    Buy,
    /// Sell the instrument (ask side of the book).
    Sell,
}

impl Side {
    /// Returns the opposite side (buy <-> sell).
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// A single aggregated price level within a book snapshot.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PriceLevel {
    pub price: Price,
    pub size: Quantity,
    pub sequence: u64,
}

impl PriceLevel {
    /// Convenience constructor.
    #[must_use]
    pub fn new(price: Price, size: Quantity, sequence: u64) -> Self {
        Self {
            price,
            size,
            sequence,
        }
    }
}

/// Full replacement of both sides of a book at a given sequence number.
///
/// Bids are expected strictly descending and asks strictly ascending by
/// price; [`BookSnapshot::validate`] probes those invariants without
/// enforcing them on construction, since feed payloads arrive untrusted.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BookSnapshot {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl BookSnapshot {
    /// Returns the best bid if available.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Returns the best ask if available.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Mid price when both sides carry at least one level.
    #[must_use]
    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Check price ordering and size invariants on both sides.
    #[must_use]
    pub fn validate(&self) -> bool {
        let bids_ordered = self
            .bids
            .windows(2)
            .all(|pair| pair[0].price > pair[1].price);
        let asks_ordered = self
            .asks
            .windows(2)
            .all(|pair| pair[0].price < pair[1].price);
        let sizes_ok = self
            .bids
            .iter()
            .chain(self.asks.iter())
            .all(|level| level.size >= Decimal::ZERO);
        bids_ordered && asks_ordered && sizes_ok
    }
}

/// Incremental book update keyed to the next expected sequence number.
///
/// A zero size removes the level; a positive size upserts it.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DeltaEvent {
    pub sequence: u64,
    pub bid_updates: Vec<(Price, Quantity)>,
    pub ask_updates: Vec<(Price, Quantity)>,
}

/// Sorted two-sided price-level store backing one symbol's book.
///
/// Purely structural: sequence tracking and sync status live on the
/// owning manager, which mutates this state exclusively.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BookState {
    bids: BTreeMap<Reverse<Price>, Quantity>,
    asks: BTreeMap<Price, Quantity>,
}

impl BookState {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the book with explicit bid/ask levels, dropping zero sizes.
    pub fn load_snapshot(&mut self, bids: &[(Price, Quantity)], asks: &[(Price, Quantity)]) {
        self.bids.clear();
        self.asks.clear();
        for &(price, size) in bids {
            self.apply_level(Side::Buy, price, size);
        }
        for &(price, size) in asks {
            self.apply_level(Side::Sell, price, size);
        }
    }

    /// Overwrite a price level with the provided absolute size (removing when zero).
    pub fn apply_level(&mut self, side: Side, price: Price, size: Quantity) {
        if size <= Decimal::ZERO {
            self.clear_level(side, price);
            return;
        }
        match side {
            Side::Buy => {
                self.bids.insert(Reverse(price), size);
            }
            Side::Sell => {
                self.asks.insert(price, size);
            }
        }
    }

    /// Remove an entire price level regardless of resting size.
    pub fn clear_level(&mut self, side: Side, price: Price) {
        match side {
            Side::Buy => {
                self.bids.remove(&Reverse(price));
            }
            Side::Sell => {
                self.asks.remove(&price);
            }
        }
    }

    /// Drop all levels from both sides.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Best bid price/size currently stored.
    #[must_use]
    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.bids.iter().next().map(|(price, size)| (price.0, *size))
    }

    /// Best ask price/size currently stored.
    #[must_use]
    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.asks.iter().next().map(|(price, size)| (*price, *size))
    }

    /// Iterate bids in descending price order.
    pub fn bids(&self) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        self.bids.iter().map(|(price, size)| (price.0, *size))
    }

    /// Iterate asks in ascending price order.
    pub fn asks(&self) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        self.asks.iter().map(|(price, size)| (*price, *size))
    }

    /// Resting size at an exact price level, zero when absent.
    #[must_use]
    pub fn depth_at(&self, side: Side, price: Price) -> Quantity {
        match side {
            Side::Buy => self.bids.get(&Reverse(price)).copied(),
            Side::Sell => self.asks.get(&price).copied(),
        }
        .unwrap_or(Decimal::ZERO)
    }

    /// Summed size across the first `levels` levels of a side.
    #[must_use]
    pub fn total_depth(&self, side: Side, levels: usize) -> Quantity {
        match side {
            Side::Buy => self.bids().take(levels).map(|(_, size)| size).sum(),
            Side::Sell => self.asks().take(levels).map(|(_, size)| size).sum(),
        }
    }

    /// Total size resting at prices strictly better than `price`.
    ///
    /// Better means higher for bids and lower for asks; this is the
    /// queue-position proxy used by the fill simulator.
    #[must_use]
    pub fn ahead_volume(&self, side: Side, price: Price) -> Quantity {
        match side {
            Side::Buy => self
                .bids()
                .take_while(|&(level_price, _)| level_price > price)
                .map(|(_, size)| size)
                .sum(),
            Side::Sell => self
                .asks()
                .take_while(|&(level_price, _)| level_price < price)
                .map(|(_, size)| size)
                .sum(),
        }
    }

    /// Summed size across the first `n` levels of both sides.
    #[must_use]
    pub fn top_n_volume(&self, n: usize) -> (Quantity, Quantity) {
        (
            self.total_depth(Side::Buy, n),
            self.total_depth(Side::Sell, n),
        )
    }

    /// True when the best bid meets or exceeds the best ask.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    /// Returns true when neither side currently holds levels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Number of levels per side as `(bids, asks)`.
    #[must_use]
    pub fn level_count(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Check stored sizes; price ordering is structural in the maps.
    #[must_use]
    pub fn validate(&self) -> bool {
        self.bids
            .values()
            .chain(self.asks.values())
            .all(|size| *size >= Decimal::ZERO)
    }

    /// Compute a CRC32 checksum over the top N levels of both sides.
    ///
    /// Used to verify bit-identical book state across replays of the
    /// same event sequence.
    #[must_use]
    pub fn checksum(&self, depth: usize) -> u32 {
        if depth == 0 {
            return 0;
        }
        let mut buffer = String::new();
        let mut first = true;
        for (price, size) in self.bids().take(depth) {
            if !first {
                buffer.push(':');
            }
            first = false;
            write!(buffer, "{}:{}", price.normalize(), size.normalize()).ok();
        }
        for (price, size) in self.asks().take(depth) {
            if !first {
                buffer.push(':');
            }
            first = false;
            write!(buffer, "{}:{}", price.normalize(), size.normalize()).ok();
        }
        let mut hasher = Hasher::new();
        hasher.update(buffer.as_bytes());
        hasher.finalize()
    }
}

/// Resting order tracked by the fill simulator.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SimulatedOrder {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Price,
    pub qty: Quantity,
    pub created_at: DateTime<Utc>,
    pub filled_qty: Quantity,
    /// When the caller handed the order to the simulator.
    pub submit_time: DateTime<Utc>,
    /// Submit time plus sampled placement latency; the order is not
    /// eligible to fill before this instant.
    pub actual_place_time: DateTime<Utc>,
}

impl SimulatedOrder {
    /// Build a fresh order with a random identifier and no fills.
    #[must_use]
    pub fn new(
        symbol: impl Into<Symbol>,
        side: Side,
        price: Price,
        qty: Quantity,
        submit_time: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            price,
            qty,
            created_at: submit_time,
            filled_qty: Decimal::ZERO,
            submit_time,
            actual_place_time: submit_time,
        }
    }

    /// Quantity still waiting to fill.
    #[must_use]
    pub fn remaining_qty(&self) -> Quantity {
        (self.qty - self.filled_qty).max(Decimal::ZERO)
    }

    /// An order is active once placement latency has elapsed and
    /// quantity remains.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.remaining_qty() > Decimal::ZERO && self.actual_place_time <= now
    }
}

/// Execution record emitted whenever a simulated order fills.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SimulatedFill {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub fill_price: Price,
    pub fill_qty: Quantity,
    pub timestamp: DateTime<Utc>,
    pub is_maker: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::prelude::FromPrimitive;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn book_state_tracks_best_levels() {
        let mut book = BookState::new();
        book.apply_level(Side::Buy, Decimal::from(100), Decimal::from(2));
        book.apply_level(Side::Buy, Decimal::from(99), Decimal::from(1));
        book.apply_level(Side::Sell, Decimal::from(101), Decimal::from(3));
        book.apply_level(Side::Sell, Decimal::from(102), Decimal::from(1));

        assert_eq!(
            book.best_bid(),
            Some((Decimal::from(100), Decimal::from(2)))
        );
        assert_eq!(
            book.best_ask(),
            Some((Decimal::from(101), Decimal::from(3)))
        );
        assert_eq!(book.level_count(), (2, 2));
        assert!(!book.is_crossed());
    }

    #[test]
    fn apply_level_overwrites_and_removes() {
        let mut book = BookState::new();
        book.apply_level(Side::Buy, Decimal::from(100), Decimal::from(1));
        book.apply_level(Side::Buy, Decimal::from(100), Decimal::from(3));
        assert_eq!(
            book.best_bid(),
            Some((Decimal::from(100), Decimal::from(3)))
        );

        book.apply_level(Side::Buy, Decimal::from(100), Decimal::ZERO);
        assert!(book.best_bid().is_none());
        assert!(book.is_empty());
    }

    #[test]
    fn load_snapshot_drops_zero_sizes() {
        let mut book = BookState::new();
        book.load_snapshot(
            &[
                (Decimal::from(100), Decimal::from(2)),
                (Decimal::from(99), Decimal::ZERO),
            ],
            &[(Decimal::from(101), Decimal::from(1))],
        );
        assert_eq!(book.level_count(), (1, 1));
    }

    #[test]
    fn ahead_volume_sums_strictly_better_levels() {
        let mut book = BookState::new();
        book.load_snapshot(
            &[
                (Decimal::from(100), Decimal::from(2)),
                (Decimal::from(99), Decimal::from(1)),
                (Decimal::from(98), Decimal::from(4)),
            ],
            &[
                (Decimal::from(101), Decimal::from(2)),
                (Decimal::from(102), Decimal::from(1)),
            ],
        );

        // Bids ahead of 99 are only those priced above it.
        assert_eq!(
            book.ahead_volume(Side::Buy, Decimal::from(99)),
            Decimal::from(2)
        );
        // At the best price nothing is strictly better.
        assert_eq!(
            book.ahead_volume(Side::Buy, Decimal::from(100)),
            Decimal::ZERO
        );
        assert_eq!(
            book.ahead_volume(Side::Sell, Decimal::from(102)),
            Decimal::from(2)
        );
        assert_eq!(
            book.ahead_volume(Side::Sell, Decimal::from(101)),
            Decimal::ZERO
        );
    }

    #[test]
    fn top_n_volume_counts_per_side() {
        let mut book = BookState::new();
        book.load_snapshot(
            &[
                (Decimal::from(100), Decimal::from(2)),
                (Decimal::from(99), Decimal::from(1)),
            ],
            &[(Decimal::from(101), Decimal::from(5))],
        );
        assert_eq!(book.top_n_volume(1), (Decimal::from(2), Decimal::from(5)));
        assert_eq!(book.top_n_volume(5), (Decimal::from(3), Decimal::from(5)));
    }

    #[test]
    fn checksum_reflects_depth() {
        let mut book = BookState::new();
        book.apply_level(Side::Buy, Decimal::from(10), Decimal::from(1));
        book.apply_level(Side::Buy, Decimal::from(9), Decimal::from(2));
        book.apply_level(Side::Sell, Decimal::from(11), Decimal::from(1));
        book.apply_level(Side::Sell, Decimal::from(12), Decimal::from(2));

        assert_ne!(book.checksum(2), book.checksum(1));
        assert_eq!(book.checksum(2), book.clone().checksum(2));
    }

    #[test]
    fn snapshot_validate_checks_ordering() {
        let good = BookSnapshot {
            symbol: "BTCUSDT".to_string(),
            timestamp: ts(0),
            sequence: 1,
            bids: vec![
                PriceLevel::new(Decimal::from(100), Decimal::from(2), 1),
                PriceLevel::new(Decimal::from(99), Decimal::from(1), 1),
            ],
            asks: vec![
                PriceLevel::new(Decimal::from(101), Decimal::from(2), 1),
                PriceLevel::new(Decimal::from(102), Decimal::from(1), 1),
            ],
        };
        assert!(good.validate());
        assert_eq!(good.mid_price(), Some(Decimal::new(1005, 1)));

        let mut crossed_levels = good.clone();
        crossed_levels.bids.swap(0, 1);
        assert!(!crossed_levels.validate());

        let mut duplicate = good.clone();
        duplicate.asks[1].price = duplicate.asks[0].price;
        assert!(!duplicate.validate());
    }

    #[test]
    fn simulated_order_activity_follows_latency() {
        let mut order = SimulatedOrder::new(
            "BTCUSDT",
            Side::Buy,
            Decimal::from(50_000),
            Decimal::from_f64(0.002).unwrap(),
            ts(100),
        );
        order.actual_place_time = ts(101);

        assert!(!order.is_active(ts(100)));
        assert!(order.is_active(ts(101)));

        order.filled_qty = order.qty;
        assert!(!order.is_active(ts(102)));
        assert_eq!(order.remaining_qty(), Decimal::ZERO);
    }
}
