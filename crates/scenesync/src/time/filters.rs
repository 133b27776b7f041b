use std::collections::VecDeque;

/// Sliding-window mean that discards the largest `trim` samples.
///
/// Latency spikes only ever push a round trip up, so the top of the window is
/// dropped rather than averaged in.
#[derive(Debug, Clone)]
pub struct TrimmedMeanFilter {
    window: usize,
    trim: usize,
    samples: VecDeque<f64>,
}

impl TrimmedMeanFilter {
    pub fn new(window: usize, trim: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            trim: trim.min(window - 1),
            samples: VecDeque::with_capacity(window),
        }
    }

    pub fn add(&mut self, value: f64) {
        if self.samples.len() >= self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.window
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Shifts every stored sample, used after the measured quantity is
    /// corrected by `delta`.
    pub fn offset(&mut self, delta: f64) {
        for sample in &mut self.samples {
            *sample += delta;
        }
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let keep = sorted.len() - self.trim.min(sorted.len() - 1);
        let kept = &sorted[..keep];
        Some(kept.iter().sum::<f64>() / kept.len() as f64)
    }
}

/// Max-over-window estimate with one unit of hysteresis.
///
/// The raw estimate is the midpoint of the window average and the window
/// maximum, rounded up. It is adopted whenever it rises, but only drops once it
/// falls more than one unit below the current value.
#[derive(Debug, Clone)]
pub struct StabilizedMaxFilter {
    window: usize,
    samples: VecDeque<u32>,
    stabilized: Option<u32>,
}

impl StabilizedMaxFilter {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            stabilized: None,
        }
    }

    pub fn add(&mut self, value: u32) {
        if self.samples.len() >= self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(value);

        let max = self.samples.iter().copied().max().unwrap_or(0);
        let sum: u64 = self.samples.iter().map(|&v| v as u64).sum();
        let average = sum as f64 / self.samples.len() as f64;
        let candidate = ((average + max as f64) / 2.0).ceil() as u32;

        self.stabilized = match self.stabilized {
            Some(current) if candidate <= current && candidate + 1 >= current => Some(current),
            _ => Some(candidate),
        };
    }

    pub fn value(&self) -> Option<u32> {
        self.stabilized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trimmed_mean_drops_outlier() {
        let mut filter = TrimmedMeanFilter::new(5, 1);
        for sample in [50.0, 52.0, 48.0, 400.0, 51.0] {
            filter.add(sample);
        }
        let average = filter.average().unwrap();
        assert!((average - 50.25).abs() < 1e-9);
    }

    #[test]
    fn test_trimmed_mean_window_slides() {
        let mut filter = TrimmedMeanFilter::new(3, 0);
        for sample in [10.0, 20.0, 30.0, 40.0] {
            filter.add(sample);
        }
        assert_eq!(filter.len(), 3);
        assert_eq!(filter.average(), Some(30.0));
    }

    #[test]
    fn test_trimmed_mean_keeps_at_least_one() {
        let mut filter = TrimmedMeanFilter::new(5, 4);
        filter.add(70.0);
        assert_eq!(filter.average(), Some(70.0));
        assert_eq!(TrimmedMeanFilter::new(5, 1).average(), None);
    }

    #[test]
    fn test_stabilized_max_rises_immediately() {
        let mut filter = StabilizedMaxFilter::new(4);
        filter.add(2);
        assert_eq!(filter.value(), Some(2));
        filter.add(6);
        assert_eq!(filter.value(), Some(5));
    }

    #[test]
    fn test_stabilized_max_holds_small_drops() {
        let mut filter = StabilizedMaxFilter::new(2);
        filter.add(4);
        filter.add(4);
        assert_eq!(filter.value(), Some(4));
        filter.add(3);
        assert_eq!(filter.value(), Some(4));
        filter.add(1);
        assert_eq!(filter.value(), Some(4));
        filter.add(1);
        assert_eq!(filter.value(), Some(1));
    }
}
