/// Aligns a follower simulation running at `k * leader` Hz to leader ticks.
///
/// The authority runs exactly `k` follower ticks per leader tick. An observer
/// spreads them over the leader interval as local time passes and catches up
/// on whatever the previous interval left unfinished.
#[derive(Debug, Clone)]
pub struct TickSynchronizer {
    leader_frequency: u32,
    ratio: u32,
    is_authority: bool,
    follower_step: f32,
    interval_time: f32,
    ticks_this_interval: u32,
    synchronized: bool,
}

impl TickSynchronizer {
    pub fn new(leader_frequency: u32, requested_follower_frequency: u32, is_authority: bool) -> Self {
        let leader_frequency = leader_frequency.max(1);
        let ratio = (requested_follower_frequency / leader_frequency).max(1);
        Self {
            leader_frequency,
            ratio,
            is_authority,
            follower_step: 1.0 / (leader_frequency * ratio) as f32,
            interval_time: 0.0,
            ticks_this_interval: 0,
            synchronized: false,
        }
    }

    pub fn ratio(&self) -> u32 {
        self.ratio
    }

    pub fn follower_frequency(&self) -> u32 {
        self.leader_frequency * self.ratio
    }

    pub fn follower_time_step(&self) -> f32 {
        self.follower_step
    }

    /// Called on every leader tick. `overtime` is how far local time has
    /// already moved past the tick. Returns the follower ticks to run now.
    pub fn synchronize(&mut self, overtime: f32) -> u32 {
        if self.is_authority {
            return self.ratio;
        }

        let debt = if self.synchronized {
            self.ratio.saturating_sub(self.ticks_this_interval)
        } else {
            0
        };
        self.synchronized = true;
        self.interval_time = overtime.max(0.0);
        self.ticks_this_interval = 0;
        debt + self.collect_due_ticks()
    }

    /// Called between leader ticks. Returns follower ticks that became due.
    pub fn update(&mut self, time_step: f32) -> u32 {
        if self.is_authority || !self.synchronized {
            return 0;
        }
        self.interval_time += time_step.max(0.0);
        self.collect_due_ticks()
    }

    fn collect_due_ticks(&mut self) -> u32 {
        let elapsed = (self.interval_time / self.follower_step + 1e-4).floor() as u32;
        let due = (1 + elapsed).min(self.ratio);
        let owed = due.saturating_sub(self.ticks_this_interval);
        self.ticks_this_interval = due;
        owed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_selection() {
        assert_eq!(TickSynchronizer::new(30, 60, true).ratio(), 2);
        assert_eq!(TickSynchronizer::new(30, 100, true).ratio(), 3);
        assert_eq!(TickSynchronizer::new(30, 10, true).ratio(), 1);
        assert_eq!(TickSynchronizer::new(30, 100, true).follower_frequency(), 90);
    }

    #[test]
    fn test_authority_is_deterministic() {
        let mut sync = TickSynchronizer::new(30, 90, true);
        for _ in 0..5 {
            assert_eq!(sync.synchronize(0.013), 3);
            assert_eq!(sync.update(1.0 / 60.0), 0);
        }
    }

    #[test]
    fn test_observer_spreads_ticks() {
        let mut sync = TickSynchronizer::new(30, 90, false);
        assert_eq!(sync.synchronize(0.0), 1);
        assert_eq!(sync.update(1.0 / 90.0), 1);
        assert_eq!(sync.update(1.0 / 90.0), 1);
        assert_eq!(sync.update(1.0 / 90.0), 0);
    }

    #[test]
    fn test_observer_never_exceeds_ratio() {
        let mut sync = TickSynchronizer::new(30, 90, false);
        assert_eq!(sync.synchronize(0.0), 1);
        assert_eq!(sync.update(1.0), 2);
        assert_eq!(sync.update(1.0), 0);
    }

    #[test]
    fn test_observer_pays_debt() {
        let mut sync = TickSynchronizer::new(30, 90, false);
        assert_eq!(sync.synchronize(0.0), 1);
        assert_eq!(sync.synchronize(0.0), 2 + 1);
    }

    #[test]
    fn test_overtime_counts_immediately() {
        let mut sync = TickSynchronizer::new(30, 90, false);
        sync.synchronize(0.0);
        sync.update(1.0);
        assert_eq!(sync.synchronize(1.5 / 90.0), 2);
    }
}
