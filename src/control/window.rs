use std::collections::VecDeque;

/// Fixed-capacity sample window that evicts its oldest value on overflow
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    values: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn latest(&self) -> Option<T> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns up to `n` most recent values, oldest first
    pub fn recent(&self, n: usize) -> Vec<T> {
        let skip = self.values.len().saturating_sub(n);
        self.values.iter().skip(skip).copied().collect()
    }
}

impl RollingWindow<f64> {
    pub fn mean(&self) -> Option<f64> {
        mean(self.values.iter().copied(), self.values.len())
    }

    /// Mean of the `n` most recent values
    pub fn recent_mean(&self, n: usize) -> Option<f64> {
        let recent = self.recent(n);
        mean(recent.iter().copied(), recent.len())
    }
}

fn mean(values: impl Iterator<Item = f64>, len: usize) -> Option<f64> {
    if len == 0 {
        return None;
    }
    Some(values.sum::<f64>() / len as f64)
}
