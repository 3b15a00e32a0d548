//! In-memory per-instrument snapshot store (C2).
//!
//! Two keyed views are kept per token: `current` (most recent tick) and
//! `previous` (the one before it), so the alert engine can compute deltas
//! without a ring buffer. Per-token exclusivity comes from `dashmap`'s entry
//! API — the same pattern the original ticker used for its tick store — so
//! concurrent `apply` calls for distinct tokens never block each other.

use crate::price::Price;
use crate::ticks::{MarketDepth, Ohlc, Tick};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-token state derived from the most recently applied tick.
#[derive(Debug, Clone)]
pub struct Entry {
    pub token: u32,
    pub last_price: Price,
    pub change: Option<Price>,
    pub volume: Option<u32>,
    pub ohlc: Option<Ohlc>,
    pub depth: Option<MarketDepth>,
    pub buy_qty: Option<u32>,
    pub sell_qty: Option<u32>,
    pub avg_price: Option<Price>,
    pub last_qty: Option<u32>,
    pub observed_at: Instant,
}

impl Entry {
    fn from_tick(tick: &Tick, observed_at: Instant) -> Self {
        Self {
            token: tick.token,
            last_price: tick.last_price,
            change: tick.change,
            volume: tick.volume_traded,
            ohlc: tick.ohlc,
            depth: tick.depth,
            buy_qty: tick.total_buy_qty,
            sell_qty: tick.total_sell_qty,
            avg_price: tick.avg_traded_price,
            last_qty: tick.last_traded_qty,
            observed_at,
        }
    }
}

/// The `(old, new)` pair handed to the alert engine after a second-or-later `apply`.
#[derive(Debug, Clone)]
pub struct Delta {
    pub old: Entry,
    pub new: Entry,
}

impl Delta {
    pub fn elapsed(&self) -> Duration {
        self.new.observed_at.saturating_duration_since(self.old.observed_at)
    }

    /// `100*(new.last_price - old.last_price)/old.last_price`; `None` when `old` is zero.
    pub fn pct_change(&self) -> Option<f64> {
        self.new.last_price.pct_change_from(self.old.last_price)
    }
}

struct Slot {
    current: Entry,
    previous: Option<Entry>,
}

pub struct SnapshotStore {
    slots: DashMap<u32, Slot>,
    applied: AtomicU64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            applied: AtomicU64::new(0),
        }
    }

    /// Upsert `current[token]`. If a prior entry existed it is demoted to
    /// `previous[token]` and returned as the `old` half of a `Delta`.
    pub fn apply(&self, tick: &Tick, observed_at: Instant) -> Option<Delta> {
        self.applied.fetch_add(1, Ordering::Relaxed);
        let new_entry = Entry::from_tick(tick, observed_at);
        let mut delta = None;

        self.slots
            .entry(tick.token)
            .and_modify(|slot| {
                let old = slot.current.clone();
                slot.previous = Some(old.clone());
                slot.current = new_entry.clone();
                delta = Some(Delta { old, new: new_entry.clone() });
            })
            .or_insert_with(|| Slot {
                current: new_entry.clone(),
                previous: None,
            });

        delta
    }

    /// Entries ordered per `order` (the subscription registry's stable position).
    /// Tokens with no snapshot yet are skipped.
    pub fn snapshot_for_view(&self, order: &[u32]) -> Vec<Entry> {
        order
            .iter()
            .filter_map(|token| self.slots.get(token).map(|s| s.current.clone()))
            .collect()
    }

    pub fn size(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Drops all tracked state; called on pipeline restart (rotation).
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Purges a single token, e.g. when the feed session unsubscribes it.
    pub fn remove(&self, token: u32) {
        self.slots.remove(&token);
    }

    pub fn ticks_applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn current(&self, token: u32) -> Option<Entry> {
        self.slots.get(&token).map(|s| s.current.clone())
    }

    pub fn previous(&self, token: u32) -> Option<Entry> {
        self.slots.get(&token).and_then(|s| s.previous.clone())
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticks::TickMode;

    fn tick(token: u32, price_hundredths: i64, volume: u32) -> Tick {
        Tick {
            token,
            mode: TickMode::Full,
            last_price: Price(price_hundredths),
            last_traded_qty: Some(1),
            avg_traded_price: Some(Price(price_hundredths)),
            volume_traded: Some(volume),
            total_buy_qty: Some(10),
            total_sell_qty: Some(20),
            ohlc: None,
            change: None,
            last_trade_time: None,
            oi: None,
            oi_day_high: None,
            oi_day_low: None,
            exchange_timestamp: None,
            depth: None,
        }
    }

    #[test]
    fn first_apply_has_no_delta_and_no_previous() {
        let store = SnapshotStore::new();
        let delta = store.apply(&tick(1, 25000, 100), Instant::now());
        assert!(delta.is_none());
        assert!(store.current(1).is_some());
        assert!(store.previous(1).is_none());
    }

    #[test]
    fn second_apply_returns_delta_with_non_decreasing_observed_at() {
        let store = SnapshotStore::new();
        let t0 = Instant::now();
        store.apply(&tick(1, 25000, 100), t0);
        let t1 = t0 + Duration::from_secs(1);
        let delta = store.apply(&tick(1, 24000, 200), t1).unwrap();

        assert_eq!(delta.old.last_price, Price(25000));
        assert_eq!(delta.new.last_price, Price(24000));
        assert!(delta.old.observed_at <= delta.new.observed_at);
        assert!(store.previous(1).is_some());
    }

    #[test]
    fn snapshot_for_view_respects_registry_order_and_skips_unseen_tokens() {
        let store = SnapshotStore::new();
        store.apply(&tick(2, 100, 1), Instant::now());
        store.apply(&tick(1, 200, 1), Instant::now());

        let ordered = store.snapshot_for_view(&[1, 99, 2]);
        let tokens: Vec<u32> = ordered.iter().map(|e| e.token).collect();
        assert_eq!(tokens, vec![1, 2]);
    }

    #[test]
    fn clear_drops_all_state() {
        let store = SnapshotStore::new();
        store.apply(&tick(1, 100, 1), Instant::now());
        assert_eq!(store.size(), 1);
        store.clear();
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn repeated_applies_for_same_token_each_see_prior_current_as_old() {
        let store = SnapshotStore::new();
        let t0 = Instant::now();
        store.apply(&tick(1, 100, 1), t0);
        let d1 = store.apply(&tick(1, 110, 1), t0 + Duration::from_millis(1)).unwrap();
        let d2 = store.apply(&tick(1, 120, 1), t0 + Duration::from_millis(2)).unwrap();

        assert_eq!(d1.old.last_price, Price(100));
        assert_eq!(d1.new.last_price, Price(110));
        assert_eq!(d2.old.last_price, Price(110));
        assert_eq!(d2.new.last_price, Price(120));
    }
}
