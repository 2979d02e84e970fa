//! Order book synchronization state machine and multi-symbol registry.
//!
//! A [`BookManager`] keeps one symbol's Level-2 book correct under
//! unreliable incremental delivery: snapshots replace the book wholesale,
//! deltas must arrive in contiguous sequence order, and any gap raises a
//! resync flag until a fresh snapshot is accepted. The same entry points
//! serve the live feed handler and the historical replayer, which is what
//! lets backtests reuse the live book logic unchanged.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use strata_core::{BookSnapshot, BookState, DeltaEvent, Price, Quantity, Side, Symbol};
use tracing::{debug, warn};

/// Tuning knobs for a single book manager.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct BookConfig {
    /// Depth used when summarising the book in [`BookStats`].
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Capacity of the rolling mid-price history.
    #[serde(default = "default_mid_history")]
    pub mid_history: usize,
    /// Default lookback for [`BookManager::volatility`].
    #[serde(default = "default_volatility_lookback")]
    pub volatility_lookback: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            mid_history: default_mid_history(),
            volatility_lookback: default_volatility_lookback(),
        }
    }
}

fn default_max_depth() -> usize {
    25
}

fn default_mid_history() -> usize {
    1000
}

fn default_volatility_lookback() -> usize {
    30
}

/// Serializable summary of one book's sync status and headline analytics.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BookStats {
    pub symbol: Symbol,
    pub synced: bool,
    pub needs_resync: bool,
    pub last_sequence: u64,
    pub sequence_gaps: u64,
    pub update_count: u64,
    pub snapshot_count: u64,
    pub delta_count: u64,
    pub last_update_time: Option<DateTime<Utc>>,
    pub mid_price: Option<Price>,
    pub spread_bps: Option<Price>,
    pub imbalance: Price,
    pub volatility: Option<Price>,
    pub checksum: u32,
}

/// Maintains one symbol's book under out-of-order delivery.
///
/// State machine: `UNSYNCED -> SYNCED` on the first accepted snapshot;
/// stays `SYNCED` while deltas apply in contiguous sequence order;
/// `SYNCED(needs_resync)` on a gap, cleared only by a newer snapshot.
/// [`BookManager::reset`] is the only transition back to `UNSYNCED`.
#[derive(Clone, Debug)]
pub struct BookManager {
    symbol: Symbol,
    config: BookConfig,
    state: BookState,
    last_sequence: u64,
    synced: bool,
    needs_resync: bool,
    sequence_gaps: u64,
    update_count: u64,
    snapshot_count: u64,
    delta_count: u64,
    last_update_time: Option<DateTime<Utc>>,
    mid_prices: VecDeque<Price>,
}

impl BookManager {
    /// Create an unsynced manager with default configuration.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>) -> Self {
        Self::with_config(symbol, BookConfig::default())
    }

    /// Create an unsynced manager with explicit configuration.
    #[must_use]
    pub fn with_config(symbol: impl Into<Symbol>, config: BookConfig) -> Self {
        Self {
            symbol: symbol.into(),
            config,
            state: BookState::new(),
            last_sequence: 0,
            synced: false,
            needs_resync: false,
            sequence_gaps: 0,
            update_count: 0,
            snapshot_count: 0,
            delta_count: 0,
            last_update_time: None,
            mid_prices: VecDeque::new(),
        }
    }

    /// Symbol this manager tracks.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Read access to the underlying level store.
    #[must_use]
    pub fn state(&self) -> &BookState {
        &self.state
    }

    /// True once a snapshot has been accepted and no gap is outstanding.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// True when a sequence gap demands a fresh snapshot.
    #[must_use]
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Sequence number of the last applied update.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Number of sequence gaps observed since creation or reset.
    #[must_use]
    pub fn sequence_gaps(&self) -> u64 {
        self.sequence_gaps
    }

    /// Replace both sides wholesale from a full snapshot.
    ///
    /// Returns `false` for a stale snapshot (sequence at or below the
    /// currently synced sequence); otherwise syncs the book, clears any
    /// outstanding resync flag, and records the mid price.
    pub fn apply_snapshot(&mut self, snapshot: &BookSnapshot) -> bool {
        if self.synced && snapshot.sequence <= self.last_sequence {
            debug!(
                symbol = %self.symbol,
                sequence = snapshot.sequence,
                last_sequence = self.last_sequence,
                "ignoring stale snapshot"
            );
            return false;
        }

        let bids: Vec<(Price, Quantity)> = snapshot
            .bids
            .iter()
            .map(|level| (level.price, level.size))
            .collect();
        let asks: Vec<(Price, Quantity)> = snapshot
            .asks
            .iter()
            .map(|level| (level.price, level.size))
            .collect();
        self.state.load_snapshot(&bids, &asks);

        self.last_sequence = snapshot.sequence;
        self.last_update_time = Some(snapshot.timestamp);
        self.synced = true;
        self.needs_resync = false;
        self.snapshot_count += 1;
        self.update_count += 1;
        self.record_mid_price();
        true
    }

    /// Apply an incremental update.
    ///
    /// While synced, the delta must carry exactly the next sequence
    /// number; on a mismatch the gap counter and resync flag are raised
    /// and the price levels are left untouched. Deltas arriving before
    /// the first snapshot are applied without sequence enforcement but
    /// never mark the book synced.
    pub fn apply_delta(&mut self, delta: &DeltaEvent) -> bool {
        if self.synced {
            let expected = self.last_sequence + 1;
            if delta.sequence != expected {
                warn!(
                    symbol = %self.symbol,
                    expected,
                    received = delta.sequence,
                    "sequence gap detected, resync required"
                );
                self.sequence_gaps += 1;
                self.needs_resync = true;
                return false;
            }
        }

        for &(price, size) in &delta.bid_updates {
            self.state.apply_level(Side::Buy, price, size);
        }
        for &(price, size) in &delta.ask_updates {
            self.state.apply_level(Side::Sell, price, size);
        }

        self.last_sequence = delta.sequence;
        self.delta_count += 1;
        self.update_count += 1;
        self.record_mid_price();
        true
    }

    fn record_mid_price(&mut self) {
        if let Some(mid) = self.mid_price() {
            self.mid_prices.push_back(mid);
            while self.mid_prices.len() > self.config.mid_history {
                self.mid_prices.pop_front();
            }
        }
    }

    /// Best bid price/size.
    #[must_use]
    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.state.best_bid()
    }

    /// Best ask price/size.
    #[must_use]
    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.state.best_ask()
    }

    /// Average of best bid and best ask.
    #[must_use]
    pub fn mid_price(&self) -> Option<Price> {
        match (self.state.best_bid(), self.state.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Best ask minus best bid.
    #[must_use]
    pub fn spread(&self) -> Option<Price> {
        match (self.state.best_bid(), self.state.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some(ask - bid),
            _ => None,
        }
    }

    /// Spread expressed in basis points of the mid price.
    #[must_use]
    pub fn spread_bps(&self) -> Option<Price> {
        let mid = self.mid_price()?;
        if mid.is_zero() {
            return None;
        }
        self.spread()
            .map(|spread| spread / mid * Decimal::from(10_000))
    }

    /// Size-weighted price between best bid and ask, biased toward the
    /// side with less resting size. Falls back to the mid price when
    /// both top-of-book sizes are zero.
    #[must_use]
    pub fn microprice(&self) -> Option<Price> {
        let (bid_price, bid_size) = self.state.best_bid()?;
        let (ask_price, ask_size) = self.state.best_ask()?;
        let total = bid_size + ask_size;
        if total.is_zero() {
            return self.mid_price();
        }
        Some((bid_price * ask_size + ask_price * bid_size) / total)
    }

    /// Normalized bid/ask volume difference over the first `depth`
    /// levels per side; zero when neither side holds liquidity.
    #[must_use]
    pub fn imbalance(&self, depth: usize) -> Price {
        let bid_vol = self.state.total_depth(Side::Buy, depth);
        let ask_vol = self.state.total_depth(Side::Sell, depth);
        let total = bid_vol + ask_vol;
        if total.is_zero() {
            Decimal::ZERO
        } else {
            (bid_vol - ask_vol) / total
        }
    }

    /// Standard deviation of simple returns over the trailing mid-price
    /// window. `None` with fewer than two samples.
    #[must_use]
    pub fn volatility(&self, lookback: Option<usize>) -> Option<Price> {
        let lookback = lookback.unwrap_or(self.config.volatility_lookback);
        if self.mid_prices.len() < 2 || lookback < 2 {
            return None;
        }
        let start = self.mid_prices.len().saturating_sub(lookback);
        let window: Vec<Price> = self.mid_prices.iter().skip(start).copied().collect();

        let mut returns = Vec::with_capacity(window.len() - 1);
        for pair in window.windows(2) {
            if pair[0] > Decimal::ZERO {
                returns.push((pair[1] - pair[0]) / pair[0]);
            }
        }
        if returns.is_empty() {
            return None;
        }

        let count = Decimal::from(returns.len() as u64);
        let mean: Decimal = returns.iter().sum::<Decimal>() / count;
        let variance: Decimal = returns
            .iter()
            .map(|ret| {
                let diff = *ret - mean;
                diff * diff
            })
            .sum::<Decimal>()
            / count;
        variance.sqrt()
    }

    /// True when the best bid meets or exceeds the best ask.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        self.state.is_crossed()
    }

    /// Resting size at an exact price level.
    #[must_use]
    pub fn depth_at(&self, price: Price, side: Side) -> Quantity {
        self.state.depth_at(side, price)
    }

    /// Summed size across the first `levels` levels of a side.
    #[must_use]
    pub fn total_depth(&self, side: Side, levels: usize) -> Quantity {
        self.state.total_depth(side, levels)
    }

    /// Price/size pairs for the first `levels` levels of a side.
    #[must_use]
    pub fn price_levels(&self, side: Side, levels: usize) -> Vec<(Price, Quantity)> {
        match side {
            Side::Buy => self.state.bids().take(levels).collect(),
            Side::Sell => self.state.asks().take(levels).collect(),
        }
    }

    /// Sanity probe over the current book.
    ///
    /// Reports a crossed book or a negative stored size. Violations are
    /// logged and tolerated rather than rejected: transient crossed
    /// states occur during feed catch-up, so this is a monitoring
    /// signal, not an enforcement point.
    #[must_use]
    pub fn validate_integrity(&self) -> bool {
        if self.state.is_crossed() {
            warn!(
                symbol = %self.symbol,
                bid = ?self.state.best_bid(),
                ask = ?self.state.best_ask(),
                "book is crossed"
            );
            return false;
        }
        if !self.state.validate() {
            warn!(symbol = %self.symbol, "book holds a negative size");
            return false;
        }
        true
    }

    /// Clear all state back to the unsynced starting point.
    pub fn reset(&mut self) {
        self.state.clear();
        self.last_sequence = 0;
        self.synced = false;
        self.needs_resync = false;
        self.sequence_gaps = 0;
        self.update_count = 0;
        self.snapshot_count = 0;
        self.delta_count = 0;
        self.last_update_time = None;
        self.mid_prices.clear();
    }

    /// Snapshot of sync status, counters, and headline analytics.
    #[must_use]
    pub fn stats(&self) -> BookStats {
        BookStats {
            symbol: self.symbol.clone(),
            synced: self.synced,
            needs_resync: self.needs_resync,
            last_sequence: self.last_sequence,
            sequence_gaps: self.sequence_gaps,
            update_count: self.update_count,
            snapshot_count: self.snapshot_count,
            delta_count: self.delta_count,
            last_update_time: self.last_update_time,
            mid_price: self.mid_price(),
            spread_bps: self.spread_bps(),
            imbalance: self.imbalance(self.config.max_depth),
            volatility: self.volatility(None),
            checksum: self.state.checksum(self.config.max_depth),
        }
    }
}

/// Keyed collection of book managers with cross-symbol queries.
///
/// Unknown-symbol queries return neutral zero values so that a consumer
/// can keep progressing through an event stream even when a symbol has
/// not been registered yet.
#[derive(Clone, Debug, Default)]
pub struct BookRegistry {
    config: BookConfig,
    books: HashMap<Symbol, BookManager>,
}

impl BookRegistry {
    /// Create an empty registry with default book configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry whose managers share `config`.
    #[must_use]
    pub fn with_config(config: BookConfig) -> Self {
        Self {
            config,
            books: HashMap::new(),
        }
    }

    /// Start tracking a symbol; no-op when already present.
    pub fn add_symbol(&mut self, symbol: impl Into<Symbol>) {
        let symbol = symbol.into();
        self.books
            .entry(symbol.clone())
            .or_insert_with(|| BookManager::with_config(symbol, self.config));
    }

    /// Stop tracking a symbol, returning whether it was present.
    pub fn remove_symbol(&mut self, symbol: &str) -> bool {
        self.books.remove(symbol).is_some()
    }

    /// Manager for a symbol, if tracked.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&BookManager> {
        self.books.get(symbol)
    }

    /// Mutable manager for a symbol, if tracked.
    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut BookManager> {
        self.books.get_mut(symbol)
    }

    /// Symbols currently tracked.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.books.keys().cloned().collect()
    }

    /// Number of tracked symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// True when no symbols are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Route a snapshot to its symbol's manager, registering the symbol
    /// on first sight.
    pub fn apply_snapshot(&mut self, snapshot: &BookSnapshot) -> bool {
        self.add_symbol(snapshot.symbol.clone());
        self.books
            .get_mut(&snapshot.symbol)
            .is_some_and(|manager| manager.apply_snapshot(snapshot))
    }

    /// Route a delta to its symbol's manager; `false` for unknown symbols.
    pub fn apply_delta(&mut self, symbol: &str, delta: &DeltaEvent) -> bool {
        match self.books.get_mut(symbol) {
            Some(manager) => manager.apply_delta(delta),
            None => false,
        }
    }

    /// Total size resting at prices strictly better than `price` on one
    /// side of a symbol's book; zero for unknown symbols.
    #[must_use]
    pub fn ahead_volume(&self, symbol: &str, side: Side, price: Price) -> Quantity {
        self.books
            .get(symbol)
            .map(|manager| manager.state().ahead_volume(side, price))
            .unwrap_or(Decimal::ZERO)
    }

    /// Summed size across the first `n` levels of both sides; zeros for
    /// unknown symbols.
    #[must_use]
    pub fn top_n_volume(&self, symbol: &str, n: usize) -> (Quantity, Quantity) {
        self.books
            .get(symbol)
            .map(|manager| manager.state().top_n_volume(n))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO))
    }

    /// True when every tracked book is synced.
    #[must_use]
    pub fn all_synced(&self) -> bool {
        self.books.values().all(BookManager::is_synced)
    }

    /// Symbols whose books are currently synced.
    #[must_use]
    pub fn synced_symbols(&self) -> Vec<Symbol> {
        self.books
            .values()
            .filter(|manager| manager.is_synced())
            .map(|manager| manager.symbol().to_string())
            .collect()
    }

    /// Per-symbol status summaries.
    #[must_use]
    pub fn stats(&self) -> HashMap<Symbol, BookStats> {
        self.books
            .iter()
            .map(|(symbol, manager)| (symbol.clone(), manager.stats()))
            .collect()
    }
}
