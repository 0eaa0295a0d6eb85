use crate::market::history::HistoryBuffer;
use crate::market::types::ReferencePrice;
use std::time::Duration;
use tokio::time::Instant;

/// Which rung of the fallback ladder produced a change value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    Upstream,
    ReferenceCache,
    History,
    PreviousPrice,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedChange {
    pub change: f64,
    pub change_percent: f64,
    pub source: ChangeSource,
}

impl DerivedChange {
    fn zero() -> Self {
        Self {
            change: 0.0,
            change_percent: 0.0,
            source: ChangeSource::Unavailable,
        }
    }

    fn against(current: f64, base: f64, source: ChangeSource) -> Self {
        let change = current - base;
        Self {
            change,
            change_percent: percent_of(change, base),
            source,
        }
    }
}

#[derive(Debug, Default)]
pub struct ChangeCalculator {
    reference_cache: Vec<ReferencePrice>,
    reference_loaded_at: Option<Instant>,
    reference_ttl: Option<Duration>,
    previous_price: Option<f64>,
}

impl ChangeCalculator {
    /// `reference_ttl` bounds how long a lookup result may seed derivations.
    pub fn new(reference_ttl: Duration) -> Self {
        Self {
            reference_ttl: Some(reference_ttl),
            ..Default::default()
        }
    }

    /// Replaces the reference cache. Entries are expected newest first.
    pub fn set_reference_prices(&mut self, prices: Vec<ReferencePrice>, now: Instant) {
        self.reference_cache = prices;
        self.reference_loaded_at = Some(now);
    }

    pub fn clear_reference_prices(&mut self) {
        self.reference_cache.clear();
        self.reference_loaded_at = None;
    }

    /// Stored after every accepted sample, whichever rung produced its change.
    pub fn record_accepted(&mut self, price: f64) {
        self.previous_price = Some(price);
    }

    pub fn derive(
        &self,
        current: f64,
        upstream_change: Option<f64>,
        upstream_change_percent: Option<f64>,
        history: &HistoryBuffer,
        now: Instant,
    ) -> DerivedChange {
        if let (Some(change), Some(change_percent)) = (
            upstream_change.filter(|value| value.is_finite()),
            upstream_change_percent.filter(|value| value.is_finite()),
        ) {
            return DerivedChange {
                change,
                change_percent,
                source: ChangeSource::Upstream,
            };
        }

        if let Some(reference) = self.fresh_reference(now) {
            return DerivedChange::against(current, reference.price, ChangeSource::ReferenceCache);
        }

        if let Some(newest) = history.latest() {
            return DerivedChange::against(current, newest.price, ChangeSource::History);
        }

        if let Some(previous) = self.previous_price {
            return DerivedChange::against(current, previous, ChangeSource::PreviousPrice);
        }

        DerivedChange::zero()
    }

    // The comparison point is the entry before the most recent one.
    fn fresh_reference(&self, now: Instant) -> Option<&ReferencePrice> {
        if self.reference_cache.len() < 2 {
            return None;
        }
        let loaded_at = self.reference_loaded_at?;
        if let Some(ttl) = self.reference_ttl {
            if now.saturating_duration_since(loaded_at) > ttl {
                return None;
            }
        }
        self.reference_cache.get(1)
    }
}

fn percent_of(change: f64, base: f64) -> f64 {
    if base <= 0.0 || !base.is_finite() {
        return 0.0;
    }
    change / base * 100.0
}
