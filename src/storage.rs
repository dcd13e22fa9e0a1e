use std::sync::{Arc, PoisonError, RwLock};

use crate::config::StorageConfig;
use crate::types::EnergyMetric;

/// Thread-safe store of recent readings backed by a ring buffer
#[derive(Clone)]
pub struct MetricStore {
    inner: Arc<RwLock<RingBuffer>>,
}

struct RingBuffer {
    data: Vec<EnergyMetric>,
    head: usize,
    capacity: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            head: 0,
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, metric: EnergyMetric) {
        if self.data.len() < self.capacity {
            self.data.push(metric);
        } else {
            self.data[self.head] = metric;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    fn latest(&self) -> Option<&EnergyMetric> {
        if self.data.is_empty() {
            return None;
        }
        let idx = if self.data.len() < self.capacity {
            self.data.len() - 1
        } else {
            (self.head + self.capacity - 1) % self.capacity
        };
        Some(&self.data[idx])
    }

    /// Get the most recent N readings in chronological order
    fn recent(&self, n: usize) -> Vec<EnergyMetric> {
        let count = n.min(self.data.len());
        let mut result = Vec::with_capacity(count);

        if self.data.len() < self.capacity {
            let start = self.data.len() - count;
            result.extend_from_slice(&self.data[start..]);
        } else {
            // Buffer is full, handle wrap-around
            let start = (self.head + self.capacity - count) % self.capacity;
            for i in 0..count {
                result.push(self.data[(start + i) % self.capacity]);
            }
        }

        result
    }
}

impl MetricStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_capacity(config.metric_capacity as usize)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RingBuffer::new(capacity))),
        }
    }

    pub fn insert(&self, metric: EnergyMetric) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.push(metric);
    }

    pub fn extend(&self, metrics: impl IntoIterator<Item = EnergyMetric>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for metric in metrics {
            inner.push(metric);
        }
    }

    pub fn latest(&self) -> Option<EnergyMetric> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.latest().copied()
    }

    pub fn recent(&self, n: usize) -> Vec<EnergyMetric> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.recent(n)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
