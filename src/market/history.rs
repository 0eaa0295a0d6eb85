use crate::market::types::PriceUpdate;
use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 100;

/// Newest-first bounded sequence of accepted updates.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<PriceUpdate>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl HistoryBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, update: PriceUpdate) {
        self.entries.push_front(update);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn latest(&self) -> Option<&PriceUpdate> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceUpdate> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<PriceUpdate> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::TransportKind;
    use chrono::Utc;

    fn sample(price: f64) -> PriceUpdate {
        PriceUpdate {
            asset: "XAU".to_string(),
            currency: "USD".to_string(),
            price,
            change: 0.0,
            change_percent: 0.0,
            timestamp: Utc::now(),
            source: TransportKind::Push,
            volume: None,
            high_24h: None,
            low_24h: None,
        }
    }

    #[test]
    fn keeps_newest_first() {
        let mut buffer = HistoryBuffer::default();
        buffer.push(sample(1.0));
        buffer.push(sample(2.0));

        let prices: Vec<f64> = buffer.iter().map(|update| update.price).collect();
        assert_eq!(prices, vec![2.0, 1.0]);
        assert_eq!(buffer.latest().map(|update| update.price), Some(2.0));
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut buffer = HistoryBuffer::default();
        for step in 1..=250 {
            buffer.push(sample(step as f64));
        }

        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.latest().map(|update| update.price), Some(250.0));
        assert_eq!(buffer.iter().last().map(|update| update.price), Some(151.0));
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut buffer = HistoryBuffer::with_capacity(3);
        buffer.push(sample(1.0));
        buffer.clear();

        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
        assert_eq!(buffer.capacity(), 3);
    }
}
