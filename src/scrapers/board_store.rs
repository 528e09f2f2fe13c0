//! Reconciled order book for a single bitFlyer product
//!
//! The board is rebuilt from one `getboard` snapshot plus the stream of
//! `lightning_board_*` diffs. Diffs usually start arriving before the snapshot
//! request returns, so until `initialize` runs every diff is queued and then
//! replayed in arrival order on top of the snapshot.
//!
//! Per applied diff the order is fixed:
//! 1. new mid price, then move levels that crossed it to the other side
//! 2. ask upserts
//! 3. bid upserts
//! 4. spread recompute
//! 5. change callbacks
//!
//! Callbacks run synchronously while the store is exclusively borrowed.
//! They receive a [`BoardView`] and must not lock the store again.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::{
    collections::{BTreeMap, VecDeque},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, error, info, trace, warn};

use super::board::{Board, BoardUpdate, BoardView, PriceLevel, Side};

/// Store shared between the dispatch loop and readers
pub type SharedBoardStore = Arc<Mutex<BoardStore>>;

type ChangeCallback = Box<dyn FnMut(&BoardView) + Send + 'static>;

#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Replay buffered diffs silently and notify once after `initialize`.
    ///
    /// Off by default: every replayed diff notifies on its own, followed by
    /// one more notification once the replay is done.
    pub coalesce_replay_notifications: bool,
}

/// Counters for the store (single owner, plain integers)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub updates_applied: u64,
    pub updates_buffered: u64,
    pub updates_replayed: u64,
    pub levels_reclassified: u64,
    pub notifications_sent: u64,
    pub subscriber_panics: u64,
    /// Wall-clock time the board last changed (snapshot or applied diff)
    pub last_change_at: Option<DateTime<Utc>>,
}

pub struct BoardStore {
    config: StoreConfig,
    /// price -> size, every stored size is > 0
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    mid_price: Option<Decimal>,
    spread: Option<Decimal>,
    is_initialized: bool,
    pending_updates: VecDeque<BoardUpdate>,
    callbacks: Vec<ChangeCallback>,
    metrics: StoreMetrics,
}

impl Default for BoardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BoardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardStore")
            .field("bids", &self.bids.len())
            .field("asks", &self.asks.len())
            .field("mid_price", &self.mid_price)
            .field("spread", &self.spread)
            .field("is_initialized", &self.is_initialized)
            .field("pending_updates", &self.pending_updates.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl BoardStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            mid_price: None,
            spread: None,
            is_initialized: false,
            pending_updates: VecDeque::new(),
            callbacks: Vec::new(),
            metrics: StoreMetrics::default(),
        }
    }

    pub fn shared() -> SharedBoardStore {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn shared_with_config(config: StoreConfig) -> SharedBoardStore {
        Arc::new(Mutex::new(Self::with_config(config)))
    }

    /// Register a change callback. Callbacks fire in registration order.
    pub fn on_change<F>(&mut self, callback: F)
    where
        F: FnMut(&BoardView) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Seed the board from a full snapshot and replay everything buffered so far.
    ///
    /// Single-shot: a second call is a wiring bug and is rejected without
    /// touching state.
    pub fn initialize(&mut self, board: Board) -> Result<()> {
        if self.is_initialized {
            bail!("board store already initialized; refusing second snapshot");
        }

        self.bids = collect_side(board.bids);
        self.asks = collect_side(board.asks);
        self.mid_price = Some(board.mid_price);
        self.is_initialized = true;

        let replay: Vec<BoardUpdate> = self.pending_updates.drain(..).collect();
        let replayed = replay.len();
        let notify_each = !self.config.coalesce_replay_notifications;
        for update in replay {
            self.apply(update, notify_each);
            self.metrics.updates_replayed += 1;
        }

        self.update_metrics();
        self.metrics.last_change_at = Some(Utc::now());
        info!(
            bids = self.bids.len(),
            asks = self.asks.len(),
            mid_price = %board.mid_price,
            replayed,
            "Board initialized from snapshot"
        );
        self.notify_callbacks();

        Ok(())
    }

    /// Apply one diff, or queue it if the snapshot has not landed yet
    pub fn apply_update(&mut self, update: BoardUpdate) {
        if !self.is_initialized {
            self.pending_updates.push_back(update);
            self.metrics.updates_buffered += 1;
            debug!(
                pending = self.pending_updates.len(),
                "Board not initialized, buffering update"
            );
            return;
        }

        self.apply(update, true);
    }

    fn apply(&mut self, update: BoardUpdate, notify: bool) {
        if let Some(mid_price) = update.mid_price {
            self.mid_price = Some(mid_price);
            self.reclassify(mid_price);
        }

        if let Some(asks) = update.asks {
            for level in asks {
                upsert_level(&mut self.asks, level);
            }
        }

        if let Some(bids) = update.bids {
            for level in bids {
                upsert_level(&mut self.bids, level);
            }
        }

        self.metrics.updates_applied += 1;
        self.metrics.last_change_at = Some(Utc::now());
        self.update_metrics();

        trace!(
            bids = self.bids.len(),
            asks = self.asks.len(),
            spread = ?self.spread,
            "Applied board update"
        );

        if notify {
            self.notify_callbacks();
        }
    }

    /// Relabel levels that sit on the wrong side of `mid_price`.
    ///
    /// Asks strictly below the mid become bids, bids strictly above it become
    /// asks. Prices and sizes are kept. A moved level replaces whatever the
    /// destination side already had at that price.
    fn reclassify(&mut self, mid_price: Decimal) {
        // asks: keep [mid, ..), move (.., mid)
        let kept_asks = self.asks.split_off(&mid_price);
        let crossed_asks = std::mem::replace(&mut self.asks, kept_asks);

        // bids: keep (.., mid], move (mid, ..)
        let mut crossed_bids = self.bids.split_off(&mid_price);
        if let Some(size) = crossed_bids.remove(&mid_price) {
            self.bids.insert(mid_price, size);
        }

        let moved = crossed_asks.len() + crossed_bids.len();
        if moved == 0 {
            return;
        }

        for (price, size) in crossed_asks {
            self.side_mut(Side::Bid).insert(price, size);
        }
        for (price, size) in crossed_bids {
            self.side_mut(Side::Ask).insert(price, size);
        }

        self.metrics.levels_reclassified += moved as u64;
        debug!(%mid_price, moved, "Reclassified levels across mid price");
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, Decimal> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    fn update_metrics(&mut self) {
        self.spread = match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        };
    }

    fn notify_callbacks(&mut self) {
        if self.callbacks.is_empty() {
            return;
        }

        let view = self.snapshot();
        for (index, callback) in self.callbacks.iter_mut().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| callback(&view))).is_err() {
                self.metrics.subscriber_panics += 1;
                error!(subscriber = index, "Board change subscriber panicked");
            }
        }
        self.metrics.notifications_sent += 1;
    }

    /// Sorted view of the whole board
    pub fn snapshot(&self) -> BoardView {
        self.book(usize::MAX)
    }

    /// Sorted view truncated to `depth` levels per side
    pub fn book(&self, depth: usize) -> BoardView {
        BoardView {
            bids: self
                .bids
                .iter()
                .rev()
                .take(depth)
                .map(|(&price, &size)| PriceLevel { price, size })
                .collect(),
            asks: self
                .asks
                .iter()
                .take(depth)
                .map(|(&price, &size)| PriceLevel { price, size })
                .collect(),
            mid_price: self.mid_price,
            spread: self.spread,
        }
    }

    #[inline]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(&price, &size)| PriceLevel { price, size })
    }

    #[inline]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(&price, &size)| PriceLevel { price, size })
    }

    #[inline]
    pub fn spread(&self) -> Option<Decimal> {
        self.spread
    }

    #[inline]
    pub fn mid_price(&self) -> Option<Decimal> {
        self.mid_price
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn pending_len(&self) -> usize {
        self.pending_updates.len()
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }
}

/// Build one side from snapshot levels, dropping non-positive sizes
fn collect_side(levels: Vec<PriceLevel>) -> BTreeMap<Decimal, Decimal> {
    let mut side = BTreeMap::new();
    let mut dropped = 0usize;
    for level in levels {
        if level.is_removal() {
            dropped += 1;
            continue;
        }
        side.insert(level.price, level.size);
    }
    if dropped > 0 {
        warn!(dropped, "Snapshot contained empty levels, dropped");
    }
    side
}

/// Replace the level at `level.price`; sizes <= 0 delete it
#[inline]
fn upsert_level(side: &mut BTreeMap<Decimal, Decimal>, level: PriceLevel) {
    side.remove(&level.price);
    if !level.is_removal() {
        side.insert(level.price, level.size);
    }
}
