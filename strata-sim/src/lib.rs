//! Queue-based fill simulation for backtesting.
//!
//! The [`FillSimulator`] keeps per-symbol/per-side queues of resting
//! simulated orders and, on every book update, decides which of them
//! cross the new best prices and how much of each can realistically
//! fill. Fill size is capped by the volume resting at strictly better
//! prices on the opposing side (the queue-position proxy supplied by
//! [`BookRegistry::ahead_volume`]), and calibrated latency, slippage,
//! and toxic-sweep effects shape the outcome. All randomness flows
//! through an injected seeded generator and the simulation clock is the
//! timestamp of the event being processed, so a fixed seed and a fixed
//! event sequence reproduce the exact same fill stream.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strata_book::BookRegistry;
use strata_core::{
    BookSnapshot, Price, Quantity, Side, SimulatedFill, SimulatedOrder, Symbol,
};
use thiserror::Error;
use tracing::{debug, info};

/// Calibration parameters shaping simulated execution quality.
///
/// Latencies are in milliseconds; `toxic_sweep_prob` is the probability
/// that a crossing fill is classified as an adverse taker sweep instead
/// of a passive maker fill.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CalibrationParams {
    pub latency_mean_ms: f64,
    pub latency_std_ms: f64,
    pub amend_latency_ms: f64,
    pub cancel_latency_ms: f64,
    pub toxic_sweep_prob: f64,
    pub extra_slippage_bps: Decimal,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            latency_mean_ms: 0.0,
            latency_std_ms: 0.0,
            amend_latency_ms: 0.0,
            cancel_latency_ms: 0.0,
            toxic_sweep_prob: 0.0,
            extra_slippage_bps: Decimal::ZERO,
        }
    }
}

/// Rejection reasons for out-of-range calibration values.
///
/// Invalid values fail construction outright; silently clamping them
/// would make backtests non-reproducible against the documented
/// configuration.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("toxic_sweep_prob must lie within [0, 1], got {0}")]
    ToxicSweepProb(f64),
    #[error("{name} must be non-negative, got {value}")]
    NegativeLatency { name: &'static str, value: f64 },
    #[error("extra_slippage_bps must be non-negative, got {0}")]
    NegativeSlippage(Decimal),
}

impl CalibrationParams {
    /// Check all parameter ranges.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !(0.0..=1.0).contains(&self.toxic_sweep_prob) {
            return Err(CalibrationError::ToxicSweepProb(self.toxic_sweep_prob));
        }
        for (name, value) in [
            ("latency_mean_ms", self.latency_mean_ms),
            ("latency_std_ms", self.latency_std_ms),
            ("amend_latency_ms", self.amend_latency_ms),
            ("cancel_latency_ms", self.cancel_latency_ms),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(CalibrationError::NegativeLatency { name, value });
            }
        }
        if self.extra_slippage_bps < Decimal::ZERO {
            return Err(CalibrationError::NegativeSlippage(self.extra_slippage_bps));
        }
        Ok(())
    }
}

/// Aggregate fill counters exposed for observability.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FillStatistics {
    pub total_fills: u64,
    pub maker_fills: u64,
    pub taker_fills: u64,
    pub maker_ratio: f64,
    pub total_fill_value: Decimal,
    pub calibration: CalibrationParams,
}

/// Per-side rollup of a symbol's resting orders.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SideSummary {
    pub count: usize,
    pub total_qty: Quantity,
    /// Volume-weighted price of the open quantity, zero when empty.
    pub avg_price: Price,
}

/// Read-only view of the open orders resting for one symbol.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ActiveOrdersSummary {
    pub symbol: Symbol,
    pub total_orders: usize,
    pub bids: SideSummary,
    pub asks: SideSummary,
    pub total_notional: Decimal,
}

#[derive(Clone, Debug, Default)]
struct OrderQueues {
    bids: Vec<SimulatedOrder>,
    asks: Vec<SimulatedOrder>,
}

impl OrderQueues {
    fn side(&self, side: Side) -> &Vec<SimulatedOrder> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Vec<SimulatedOrder> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }
}

/// Simulates fills for resting orders against a stream of book updates.
///
/// The simulator owns its order queues and RNG exclusively; the book
/// registry is borrowed per update so the caller keeps driving both
/// halves of the engine from a single thread.
#[derive(Clone, Debug)]
pub struct FillSimulator {
    calibration: CalibrationParams,
    rng: StdRng,
    queues: HashMap<Symbol, OrderQueues>,
    fills: Vec<SimulatedFill>,
    total_fills: u64,
    maker_fills: u64,
    taker_fills: u64,
}

impl FillSimulator {
    /// Build a simulator seeded for reproducible runs.
    ///
    /// Fails when the calibration carries out-of-range values.
    pub fn new(calibration: CalibrationParams, seed: u64) -> Result<Self, CalibrationError> {
        Self::with_rng(calibration, StdRng::seed_from_u64(seed))
    }

    /// Build a simulator around a caller-supplied generator.
    pub fn with_rng(
        calibration: CalibrationParams,
        rng: StdRng,
    ) -> Result<Self, CalibrationError> {
        calibration.validate()?;
        info!(?calibration, "fill simulator initialized");
        Ok(Self {
            calibration,
            rng,
            queues: HashMap::new(),
            fills: Vec::new(),
            total_fills: 0,
            maker_fills: 0,
            taker_fills: 0,
        })
    }

    /// Calibration supplied at construction.
    #[must_use]
    pub fn calibration(&self) -> &CalibrationParams {
        &self.calibration
    }

    /// Insert a resting order into its symbol/side queue.
    ///
    /// Placement latency is sampled here and fixes
    /// `actual_place_time = submit_time + latency`; until that instant
    /// the order cannot fill. Each side stays sorted best price first
    /// (bids descending, asks ascending) with FIFO ordering among equal
    /// prices, which defines queue priority.
    pub fn add_order(&mut self, mut order: SimulatedOrder) -> bool {
        let latency_ms = self.sample_placement_latency();
        order.actual_place_time =
            order.submit_time + Duration::microseconds((latency_ms * 1_000.0).round() as i64);

        debug!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            side = ?order.side,
            price = %order.price,
            qty = %order.qty,
            latency_ms,
            "adding simulated order"
        );

        let queue = self
            .queues
            .entry(order.symbol.clone())
            .or_default()
            .side_mut(order.side);
        let position = queue
            .iter()
            .position(|resting| match order.side {
                Side::Buy => resting.price < order.price,
                Side::Sell => resting.price > order.price,
            })
            .unwrap_or(queue.len());
        queue.insert(position, order);
        true
    }

    fn sample_placement_latency(&mut self) -> f64 {
        if self.calibration.latency_std_ms > 0.0 {
            let noise: f64 = self.rng.sample(StandardNormal);
            (self.calibration.latency_mean_ms + self.calibration.latency_std_ms * noise).max(0.0)
        } else {
            self.calibration.latency_mean_ms
        }
    }

    /// Remove an order from the simulation; `false` when absent.
    pub fn cancel_order(&mut self, symbol: &str, order_id: &str) -> bool {
        let Some(queues) = self.queues.get_mut(symbol) else {
            return false;
        };
        for side in [Side::Buy, Side::Sell] {
            let queue = queues.side_mut(side);
            if let Some(position) = queue.iter().position(|order| order.order_id == order_id) {
                queue.remove(position);
                debug!(order_id, symbol, ?side, "cancelled simulated order");
                return true;
            }
        }
        false
    }

    /// Match resting orders against a fresh book update.
    ///
    /// Requires both best bid and best ask on the snapshot; bids are
    /// evaluated before asks, each side in queue-priority order, and
    /// the returned fills preserve that evaluation order for
    /// deterministic replay. Fully filled orders leave their queues.
    pub fn on_book_update(
        &mut self,
        registry: &BookRegistry,
        snapshot: &BookSnapshot,
    ) -> Vec<SimulatedFill> {
        let mut fills = Vec::new();
        let (Some(best_bid), Some(best_ask)) = (snapshot.best_bid(), snapshot.best_ask()) else {
            return fills;
        };
        let (best_bid, best_ask) = (best_bid.price, best_ask.price);
        let Some(queues) = self.queues.get_mut(&snapshot.symbol) else {
            return fills;
        };

        Self::match_crossing(
            &mut self.rng,
            &self.calibration,
            registry,
            &snapshot.symbol,
            snapshot.timestamp,
            Side::Buy,
            best_ask,
            &mut queues.bids,
            &mut fills,
        );
        Self::match_crossing(
            &mut self.rng,
            &self.calibration,
            registry,
            &snapshot.symbol,
            snapshot.timestamp,
            Side::Sell,
            best_bid,
            &mut queues.asks,
            &mut fills,
        );

        queues
            .bids
            .retain(|order| order.remaining_qty() > Decimal::ZERO);
        queues
            .asks
            .retain(|order| order.remaining_qty() > Decimal::ZERO);

        for fill in &fills {
            self.total_fills += 1;
            if fill.is_maker {
                self.maker_fills += 1;
            } else {
                self.taker_fills += 1;
            }
        }
        self.fills.extend_from_slice(&fills);
        fills
    }

    /// Evaluate one side's queue against the opposing best price.
    #[allow(clippy::too_many_arguments)]
    fn match_crossing(
        rng: &mut StdRng,
        calibration: &CalibrationParams,
        registry: &BookRegistry,
        symbol: &str,
        now: DateTime<Utc>,
        side: Side,
        opposing_best: Price,
        orders: &mut Vec<SimulatedOrder>,
        fills: &mut Vec<SimulatedFill>,
    ) {
        for order in orders.iter_mut() {
            if !order.is_active(now) {
                continue;
            }
            let crosses = match side {
                Side::Buy => order.price >= opposing_best,
                Side::Sell => order.price <= opposing_best,
            };
            if !crosses {
                continue;
            }

            // One adversity draw per crossing order, taken before the
            // volume check so the random stream depends only on the
            // event sequence.
            let is_toxic = rng.gen::<f64>() < calibration.toxic_sweep_prob;
            let is_maker = !is_toxic;

            let available = registry.ahead_volume(symbol, side.inverse(), opposing_best);
            let fill_qty = order.remaining_qty().min(available);
            if fill_qty <= Decimal::ZERO {
                continue;
            }

            let mut fill_price = opposing_best;
            if calibration.extra_slippage_bps > Decimal::ZERO {
                let adjustment =
                    opposing_best * calibration.extra_slippage_bps / Decimal::from(10_000);
                fill_price = match side {
                    Side::Buy => fill_price + adjustment,
                    Side::Sell => fill_price - adjustment,
                };
            }

            order.filled_qty += fill_qty;
            debug!(
                order_id = %order.order_id,
                symbol,
                ?side,
                qty = %fill_qty,
                price = %fill_price,
                is_maker,
                "simulated fill"
            );
            fills.push(SimulatedFill {
                order_id: order.order_id.clone(),
                symbol: symbol.to_string(),
                side,
                fill_price,
                fill_qty,
                timestamp: now,
                is_maker,
            });
        }
    }

    /// Count open orders strictly ahead of `price` in a side's queue.
    ///
    /// Ties short-circuit: the first order at exactly `price` defines
    /// the position rather than counting past it.
    #[must_use]
    pub fn get_queue_position(&self, symbol: &str, side: Side, price: Price) -> usize {
        let Some(queues) = self.queues.get(symbol) else {
            return 0;
        };
        let mut position = 0;
        for order in queues.side(side) {
            if order.remaining_qty() <= Decimal::ZERO {
                continue;
            }
            let ahead = match side {
                Side::Buy => order.price > price,
                Side::Sell => order.price < price,
            };
            if ahead {
                position += 1;
            } else if order.price == price {
                return position;
            } else {
                break;
            }
        }
        position
    }

    /// Aggregate fill counters and notional since the last full reset.
    #[must_use]
    pub fn get_fill_statistics(&self) -> FillStatistics {
        let maker_ratio = if self.total_fills > 0 {
            self.maker_fills as f64 / self.total_fills as f64
        } else {
            0.0
        };
        FillStatistics {
            total_fills: self.total_fills,
            maker_fills: self.maker_fills,
            taker_fills: self.taker_fills,
            maker_ratio,
            total_fill_value: self
                .fills
                .iter()
                .map(|fill| fill.fill_price * fill.fill_qty)
                .sum(),
            calibration: self.calibration.clone(),
        }
    }

    /// Summarise the orders resting for a symbol; `None` when unknown.
    #[must_use]
    pub fn get_active_orders_summary(&self, symbol: &str) -> Option<ActiveOrdersSummary> {
        let queues = self.queues.get(symbol)?;
        let bids = Self::summarise_side(&queues.bids);
        let asks = Self::summarise_side(&queues.asks);
        let total_notional = queues
            .bids
            .iter()
            .chain(queues.asks.iter())
            .map(|order| order.price * order.remaining_qty())
            .sum();
        Some(ActiveOrdersSummary {
            symbol: symbol.to_string(),
            total_orders: bids.count + asks.count,
            bids,
            asks,
            total_notional,
        })
    }

    fn summarise_side(orders: &[SimulatedOrder]) -> SideSummary {
        let open: Vec<&SimulatedOrder> = orders
            .iter()
            .filter(|order| order.remaining_qty() > Decimal::ZERO)
            .collect();
        let total_qty: Quantity = open.iter().map(|order| order.remaining_qty()).sum();
        let avg_price = if total_qty.is_zero() {
            Decimal::ZERO
        } else {
            open.iter()
                .map(|order| order.price * order.remaining_qty())
                .sum::<Decimal>()
                / total_qty
        };
        SideSummary {
            count: open.len(),
            total_qty,
            avg_price,
        }
    }

    /// Fills recorded since the last reset touching their symbol.
    #[must_use]
    pub fn fills(&self) -> &[SimulatedFill] {
        &self.fills
    }

    /// Drop one symbol's orders and recorded fills.
    pub fn reset_symbol(&mut self, symbol: &str) {
        self.queues.remove(symbol);
        self.fills.retain(|fill| fill.symbol != symbol);
        info!(symbol, "reset simulation state");
    }

    /// Drop every order, fill, and counter.
    pub fn reset_all(&mut self) {
        self.queues.clear();
        self.fills.clear();
        self.total_fills = 0;
        self.maker_fills = 0;
        self.taker_fills = 0;
        info!("reset all simulation state");
    }
}
