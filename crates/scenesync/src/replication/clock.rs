use crate::time::{
    frame_delta, NetworkFrame, NetworkTime, SoftTime, TickSynchronizer, TrimmedMeanFilter,
};

use super::settings::{ObserverSettings, ReplicationSettings};

/// Observer estimate of the authority timeline.
///
/// `server_time` tracks where the authority is right now, `client_time` is the
/// delayed point replicas are rendered at, and the smoothed time follows
/// `client_time` without jumps unless the error is large enough to snap.
#[derive(Debug, Clone)]
pub struct ObserverClock {
    update_frequency: u32,
    settings: ObserverSettings,
    latest_server_frame: NetworkFrame,
    latest_ping_ms: u32,
    server_time: NetworkTime,
    client_time: NetworkTime,
    smooth_time: SoftTime,
    server_errors: TrimmedMeanFilter,
    pending_updates: Vec<(NetworkFrame, u32)>,
    follower: TickSynchronizer,
    is_new_frame: bool,
    follower_ticks: u32,
}

impl ObserverClock {
    pub fn new(
        replication: &ReplicationSettings,
        settings: ObserverSettings,
        frame: NetworkFrame,
        ping_ms: u32,
    ) -> Self {
        let update_frequency = replication.update_frequency.max(1);
        let server_time = to_server_time(update_frequency, frame, ping_ms);
        let client_time = to_client_time(update_frequency, &settings, server_time, ping_ms);
        Self {
            update_frequency,
            latest_server_frame: frame,
            latest_ping_ms: ping_ms,
            server_time,
            client_time,
            smooth_time: SoftTime::new(
                update_frequency,
                settings.soft_time_settings(update_frequency),
                client_time,
            ),
            server_errors: TrimmedMeanFilter::new(
                settings.clock_window as usize,
                settings.clock_trimmed_samples as usize,
            ),
            pending_updates: Vec::new(),
            follower: TickSynchronizer::new(
                update_frequency,
                replication.follower_frequency,
                false,
            ),
            is_new_frame: false,
            follower_ticks: 0,
            settings,
        }
    }

    pub fn update_frequency(&self) -> u32 {
        self.update_frequency
    }

    pub fn server_time(&self) -> NetworkTime {
        self.server_time
    }

    pub fn client_time(&self) -> NetworkTime {
        self.client_time
    }

    /// Time replicas are interpolated at.
    pub fn smooth_time(&self) -> NetworkTime {
        self.smooth_time.time()
    }

    pub fn latest_ping_ms(&self) -> u32 {
        self.latest_ping_ms
    }

    /// Whether the last step crossed into a new frame of the smoothed time.
    pub fn is_new_frame(&self) -> bool {
        self.is_new_frame
    }

    /// Follower ticks due after the last step.
    pub fn follower_ticks(&self) -> u32 {
        self.follower_ticks
    }

    pub fn follower(&self) -> &TickSynchronizer {
        &self.follower
    }

    /// Queues a clock sample; it is applied on the next step.
    pub fn process_clock_update(&mut self, frame: NetworkFrame, ping_ms: u32) {
        self.pending_updates.push((frame, ping_ms));
    }

    /// Advances every estimate by `time_step` seconds and returns the adjusted
    /// step the smoothed time actually took.
    pub fn apply_time_step(&mut self, time_step: f32) -> f32 {
        let frames = self.seconds_to_frames(time_step as f64);
        self.server_time += frames;
        self.client_time += frames;

        for (frame, ping_ms) in std::mem::take(&mut self.pending_updates) {
            self.apply_clock_update(frame, ping_ms);
        }

        let previous = self.smooth_time.time();
        let step = self.smooth_time.update(time_step as f64, self.client_time);
        let current = self.smooth_time.time();

        self.is_new_frame = previous.frame() != current.frame();
        self.follower_ticks = if self.is_new_frame {
            let overtime = current.fraction() / self.update_frequency as f64;
            self.follower.synchronize(overtime as f32)
        } else {
            self.follower.update(step.time_step as f32)
        };
        step.time_step as f32
    }

    fn apply_clock_update(&mut self, frame: NetworkFrame, ping_ms: u32) {
        if frame_delta(frame, self.latest_server_frame) <= 0 {
            return;
        }
        self.latest_server_frame = frame;
        self.latest_ping_ms = ping_ms;

        let target = to_server_time(self.update_frequency, frame, ping_ms);
        let error = target - self.server_time;
        if error.abs() >= self.seconds_to_frames(self.settings.time_snap_threshold as f64) {
            self.reset(target);
            return;
        }

        // Late samples under-estimate the authority, so the filter sees
        // negated errors and trims them from the top.
        self.server_errors.add(-error);
        let threshold = self.seconds_to_frames(self.settings.time_rewind_threshold as f64);
        if self.server_errors.is_full() {
            if let Some(negated) = self.server_errors.average() {
                let average = -negated;
                if average.abs() >= threshold {
                    let adjustment = average.signum() * (average.abs() - threshold / 2.0);
                    log::debug!("Server time adjusted by {:.3} frames", adjustment);
                    self.server_time += adjustment;
                    self.server_errors.offset(adjustment);
                }
            }
        }

        let expected_client_time = self.to_client_time(self.server_time);
        let client_error = expected_client_time - self.client_time;
        if client_error.abs() >= threshold {
            self.client_time += client_error.signum() * (client_error.abs() - threshold / 2.0);
        }
    }

    fn reset(&mut self, server_time: NetworkTime) {
        log::info!("Observer clock reset from {} to {}", self.server_time, server_time);
        self.server_time = server_time;
        self.client_time = self.to_client_time(server_time);
        self.smooth_time.reset(self.client_time);
        self.server_errors.clear();
    }

    fn seconds_to_frames(&self, seconds: f64) -> f64 {
        seconds * self.update_frequency as f64
    }

    fn to_client_time(&self, server_time: NetworkTime) -> NetworkTime {
        to_client_time(
            self.update_frequency,
            &self.settings,
            server_time,
            self.latest_ping_ms,
        )
    }
}

fn to_server_time(update_frequency: u32, frame: NetworkFrame, ping_ms: u32) -> NetworkTime {
    NetworkTime::from_frame(frame) + ping_ms as f64 * update_frequency as f64 / 1000.0
}

fn to_client_time(
    update_frequency: u32,
    settings: &ObserverSettings,
    server_time: NetworkTime,
    ping_ms: u32,
) -> NetworkTime {
    let delay_seconds = settings.interpolation_delay as f64 + ping_ms as f64 / 1000.0;
    server_time - delay_seconds * update_frequency as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: f32 = 1.0 / 30.0;

    fn clock(frame: NetworkFrame, ping_ms: u32) -> ObserverClock {
        let settings = ObserverSettings {
            interpolation_delay: 0.1,
            ..Default::default()
        };
        ObserverClock::new(&ReplicationSettings::default(), settings, frame, ping_ms)
    }

    #[test]
    fn test_initial_estimates() {
        let clock = clock(100, 100);
        // 100 ms at 30 Hz is 3 frames ahead; delay is 0.1 s plus ping.
        assert!((clock.server_time() - NetworkTime::from_frame(103)).abs() < 1e-6);
        assert!((clock.client_time() - NetworkTime::from_frame(97)).abs() < 1e-6);
        assert_eq!(clock.smooth_time(), clock.client_time());
    }

    #[test]
    fn test_steady_updates_keep_pace() {
        let mut clock = clock(100, 0);
        for frame in 101..=160 {
            clock.process_clock_update(frame, 0);
            clock.apply_time_step(STEP);
        }
        assert!((clock.server_time() - NetworkTime::from_frame(160)).abs() < 0.1);
        assert!((clock.smooth_time() - NetworkTime::from_frame(157)).abs() < 0.1);
    }

    #[test]
    fn test_large_error_snaps() {
        let mut clock = clock(100, 0);
        clock.process_clock_update(400, 0);
        clock.apply_time_step(STEP);

        assert!((clock.server_time() - NetworkTime::from_frame(400)).abs() < 1e-6);
        assert!((clock.client_time() - NetworkTime::from_frame(397)).abs() < 1e-6);
        let smoothed = clock.smooth_time() - NetworkTime::from_frame(397);
        assert!((-1e-6..=1.0).contains(&smoothed));
    }

    #[test]
    fn test_outdated_updates_ignored() {
        let mut clock = clock(100, 0);
        clock.process_clock_update(100, 0);
        clock.process_clock_update(40, 0);
        clock.apply_time_step(STEP);
        assert!((clock.server_time() - NetworkTime::from_frame(101)).abs() < 1e-6);
    }

    #[test]
    fn test_new_frames_drive_follower() {
        let mut clock = clock(100, 0);
        let mut new_frames = 0;
        let mut ticks = 0;
        for _ in 0..30 {
            clock.apply_time_step(STEP);
            if clock.is_new_frame() {
                new_frames += 1;
            }
            ticks += clock.follower_ticks();
        }
        assert!((29..=31).contains(&new_frames));
        assert!(ticks >= 2 * (new_frames - 1));
        assert!(ticks <= 2 * new_frames);
    }
}
