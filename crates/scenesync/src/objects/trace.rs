use std::collections::VecDeque;

use glam::{Quat, Vec3};

use crate::time::{frame_delta, NetworkFrame, NetworkTime};

pub trait Interpolate: Copy {
    fn interpolate(from: Self, to: Self, t: f32) -> Self;
}

impl Interpolate for f32 {
    fn interpolate(from: f32, to: f32, t: f32) -> f32 {
        from + (to - from) * t
    }
}

impl Interpolate for Vec3 {
    fn interpolate(from: Vec3, to: Vec3, t: f32) -> Vec3 {
        from.lerp(to, t)
    }
}

impl Interpolate for Quat {
    fn interpolate(from: Quat, to: Quat, t: f32) -> Quat {
        from.slerp(to, t)
    }
}

/// Recent values of one replicated property, keyed by frame.
#[derive(Debug, Clone)]
pub struct ValueTrace<T> {
    capacity: usize,
    samples: VecDeque<(NetworkFrame, T)>,
}

impl<T: Interpolate> ValueTrace<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Stores `value` for `frame`. Frames older than a full trace are dropped.
    pub fn set(&mut self, frame: NetworkFrame, value: T) {
        let position = self
            .samples
            .iter()
            .position(|&(existing, _)| frame_delta(existing, frame) >= 0);

        match position {
            Some(index) if self.samples[index].0 == frame => self.samples[index].1 = value,
            Some(0) if self.samples.len() >= self.capacity => {}
            Some(index) => self.samples.insert(index, (frame, value)),
            None => self.samples.push_back((frame, value)),
        }

        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn get(&self, frame: NetworkFrame) -> Option<T> {
        self.samples
            .iter()
            .find(|&&(existing, _)| existing == frame)
            .map(|&(_, value)| value)
    }

    pub fn latest(&self) -> Option<(NetworkFrame, T)> {
        self.samples.back().copied()
    }

    /// Latest stored frame not after `frame`, or the oldest one if all are later.
    pub fn closest_frame(&self, frame: NetworkFrame) -> Option<NetworkFrame> {
        self.samples
            .iter()
            .rev()
            .find(|&&(existing, _)| frame_delta(existing, frame) <= 0)
            .or_else(|| self.samples.front())
            .map(|&(existing, _)| existing)
    }

    /// Value at `time`, blending the stored samples around it. No extrapolation.
    pub fn sample(&self, time: NetworkTime) -> Option<T> {
        let before = self
            .samples
            .iter()
            .rposition(|&(frame, _)| frame_delta(frame, time.frame()) <= 0);

        let Some(before) = before else {
            return self.samples.front().map(|&(_, value)| value);
        };
        let (from_frame, from) = self.samples[before];
        let Some(&(to_frame, to)) = self.samples.get(before + 1) else {
            return Some(from);
        };

        let span = frame_delta(to_frame, from_frame) as f64;
        let t = (time.frames_since(NetworkTime::from_frame(from_frame)) / span).clamp(0.0, 1.0);
        Some(T::interpolate(from, to, t as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_keeps_frames_sorted() {
        let mut trace = ValueTrace::new(4);
        trace.set(10, 1.0f32);
        trace.set(12, 3.0);
        trace.set(11, 2.0);
        trace.set(12, 4.0);

        assert_eq!(trace.len(), 3);
        assert_eq!(trace.get(11), Some(2.0));
        assert_eq!(trace.get(12), Some(4.0));
        assert_eq!(trace.latest(), Some((12, 4.0)));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut trace = ValueTrace::new(2);
        trace.set(1, 1.0f32);
        trace.set(2, 2.0);
        trace.set(3, 3.0);
        assert_eq!(trace.get(1), None);

        trace.set(0, 0.0);
        assert_eq!(trace.get(0), None);
        assert_eq!(trace.len(), 2);
    }

    #[test]
    fn test_sample_interpolates() {
        let mut trace = ValueTrace::new(8);
        trace.set(10, Vec3::ZERO);
        trace.set(12, Vec3::new(4.0, 0.0, 0.0));

        let value = trace.sample(NetworkTime::new(11, 0.5)).unwrap();
        assert!((value.x - 3.0).abs() < 1e-5);

        assert_eq!(trace.sample(NetworkTime::from_frame(5)), Some(Vec3::ZERO));
        assert_eq!(
            trace.sample(NetworkTime::from_frame(20)),
            Some(Vec3::new(4.0, 0.0, 0.0))
        );
    }

    #[test]
    fn test_closest_frame() {
        let mut trace = ValueTrace::new(8);
        trace.set(10, 0.0f32);
        trace.set(14, 0.0);
        assert_eq!(trace.closest_frame(13), Some(10));
        assert_eq!(trace.closest_frame(14), Some(14));
        assert_eq!(trace.closest_frame(2), Some(10));
    }
}
