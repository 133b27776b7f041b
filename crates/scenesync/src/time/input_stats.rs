use std::collections::VecDeque;

use super::network_time::{frame_delta, NetworkFrame};

/// Tracks gaps between consecutive input frames received from one observer.
///
/// The recommended buffer size is the longest recent run of missing frames,
/// capped at `safety_limit`.
#[derive(Debug, Clone)]
pub struct InputStats {
    window: usize,
    safety_limit: u32,
    last_frame: Option<NetworkFrame>,
    gaps: VecDeque<u32>,
}

impl InputStats {
    pub fn new(window: usize, safety_limit: u32) -> Self {
        let window = window.max(1);
        Self {
            window,
            safety_limit,
            last_frame: None,
            gaps: VecDeque::with_capacity(window),
        }
    }

    pub fn on_input_received(&mut self, frame: NetworkFrame) {
        let Some(last_frame) = self.last_frame else {
            self.last_frame = Some(frame);
            return;
        };

        let delta = frame_delta(frame, last_frame);
        if delta <= 0 {
            return;
        }

        let missing = (delta - 1).min(self.safety_limit as i64) as u32;
        if self.gaps.len() >= self.window {
            self.gaps.pop_front();
        }
        self.gaps.push_back(missing);
        self.last_frame = Some(frame);
    }

    pub fn recommended_buffer_size(&self) -> u32 {
        self.gaps
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
            .min(self.safety_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_input_needs_no_buffer() {
        let mut stats = InputStats::new(8, 10);
        for frame in 100..120 {
            stats.on_input_received(frame);
        }
        assert_eq!(stats.recommended_buffer_size(), 0);
    }

    #[test]
    fn test_gap_raises_recommendation() {
        let mut stats = InputStats::new(8, 10);
        stats.on_input_received(10);
        stats.on_input_received(11);
        stats.on_input_received(14);
        assert_eq!(stats.recommended_buffer_size(), 2);
    }

    #[test]
    fn test_old_and_duplicate_frames_ignored() {
        let mut stats = InputStats::new(8, 10);
        stats.on_input_received(10);
        stats.on_input_received(10);
        stats.on_input_received(5);
        stats.on_input_received(11);
        assert_eq!(stats.recommended_buffer_size(), 0);
    }

    #[test]
    fn test_gap_expires_and_is_capped() {
        let mut stats = InputStats::new(2, 3);
        stats.on_input_received(0);
        stats.on_input_received(50);
        assert_eq!(stats.recommended_buffer_size(), 3);
        stats.on_input_received(51);
        stats.on_input_received(52);
        assert_eq!(stats.recommended_buffer_size(), 0);
    }
}
