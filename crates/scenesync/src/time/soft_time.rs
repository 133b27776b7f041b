use super::network_time::NetworkTime;

/// Thresholds are measured in frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftTimeSettings {
    pub snap_threshold: f64,
    pub tolerance: f64,
    pub min_scale: f64,
    pub max_scale: f64,
}

impl Default for SoftTimeSettings {
    fn default() -> Self {
        Self {
            snap_threshold: 60.0,
            tolerance: 0.01,
            min_scale: 0.5,
            max_scale: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftTimeStep {
    /// Seconds the soft clock actually advanced by.
    pub time_step: f64,
    pub snapped: bool,
}

/// Local clock that follows a moving target without visible jumps.
///
/// Small errors are closed by dilating the timestep inside
/// `[min_scale, max_scale]`. Errors past `snap_threshold` reset the clock.
#[derive(Debug, Clone)]
pub struct SoftTime {
    frequency: f64,
    time: NetworkTime,
    settings: SoftTimeSettings,
}

impl SoftTime {
    pub fn new(frequency: u32, settings: SoftTimeSettings, initial: NetworkTime) -> Self {
        Self {
            frequency: frequency.max(1) as f64,
            time: initial,
            settings,
        }
    }

    pub fn time(&self) -> NetworkTime {
        self.time
    }

    pub fn reset(&mut self, time: NetworkTime) {
        self.time = time;
    }

    pub fn update(&mut self, nominal_step: f64, target: NetworkTime) -> SoftTimeStep {
        let nominal_frames = nominal_step * self.frequency;
        let expected = self.time + nominal_frames;
        let error = target - expected;

        if error.abs() >= self.settings.snap_threshold {
            log::debug!("Soft time snapped from {} to {} (error {:.2})", self.time, target, error);
            self.time = target;
            return SoftTimeStep {
                time_step: nominal_step,
                snapped: true,
            };
        }

        if error.abs() <= self.settings.tolerance {
            self.time = expected;
            return SoftTimeStep {
                time_step: nominal_step,
                snapped: false,
            };
        }

        let corrected = (nominal_frames + error).clamp(
            nominal_frames * self.settings.min_scale,
            nominal_frames * self.settings.max_scale,
        );
        self.time += corrected;
        SoftTimeStep {
            time_step: corrected / self.frequency,
            snapped: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soft_time(snap_threshold: f64) -> SoftTime {
        let settings = SoftTimeSettings {
            snap_threshold,
            ..Default::default()
        };
        SoftTime::new(60, settings, NetworkTime::from_frame(100))
    }

    #[test]
    fn test_snaps_on_large_jump() {
        let mut soft = soft_time(5.0);
        let target = NetworkTime::from_frame(111);

        let step = soft.update(1.0 / 60.0, target);
        assert!(step.snapped);
        assert_eq!(soft.time(), target);
    }

    #[test]
    fn test_unchanged_within_tolerance() {
        let mut soft = soft_time(5.0);
        let step = soft.update(1.0 / 60.0, NetworkTime::from_frame(101));

        assert!(!step.snapped);
        assert!((step.time_step - 1.0 / 60.0).abs() < 1e-9);
        assert_eq!(soft.time().frame(), 101);
    }

    #[test]
    fn test_dilates_towards_target() {
        let mut soft = soft_time(5.0);
        let step = soft.update(1.0 / 60.0, NetworkTime::from_frame(103));

        assert!(!step.snapped);
        assert!((step.time_step - 2.0 / 60.0).abs() < 1e-9);
        assert!((soft.time() - NetworkTime::from_frame(102)).abs() < 1e-9);
    }

    #[test]
    fn test_contracts_when_ahead() {
        let mut soft = soft_time(5.0);
        let step = soft.update(1.0 / 60.0, NetworkTime::from_frame(99));

        assert!((step.time_step - 0.5 / 60.0).abs() < 1e-9);
        assert!(soft.time() - NetworkTime::from_frame(100) > 0.0);
    }

    #[test]
    fn test_converges() {
        let mut soft = soft_time(50.0);
        let mut target = NetworkTime::from_frame(104);
        for _ in 0..20 {
            target += 1.0;
            soft.update(1.0 / 60.0, target);
        }
        assert!((target - soft.time()).abs() < 0.02);
    }
}
