use rkyv::{Archive, Deserialize, Serialize};

use crate::net::MAX_PACKET_SIZE;
use crate::time::SoftTimeSettings;

/// Authority-side tuning, shipped to every observer inside `Configure`.
#[derive(
    Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, Archive, Serialize, Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct ReplicationSettings {
    /// Network frames per second.
    pub update_frequency: u32,
    /// Seconds between relevance re-evaluations of a replicated object.
    pub relevance_timeout: f32,
    pub periodic_clock_interval: f32,
    pub ping_interval: f32,
    pub ping_window: u32,
    pub ping_trimmed_samples: u32,
    pub input_delay_filter_size: u32,
    pub input_buffering_window: u32,
    pub input_buffering_filter_size: u32,
    pub input_buffering_tweak: i32,
    pub min_input_buffering: u32,
    pub max_input_buffering: u32,
    /// Ceiling for batched unreliable messages.
    pub packet_size_limit: u32,
    /// Requested rate of the follower simulation; rounded down to a multiple
    /// of `update_frequency`.
    pub follower_frequency: u32,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            update_frequency: 30,
            relevance_timeout: 5.0,
            periodic_clock_interval: 0.5,
            ping_interval: 0.25,
            ping_window: 10,
            ping_trimmed_samples: 2,
            input_delay_filter_size: 8,
            input_buffering_window: 90,
            input_buffering_filter_size: 8,
            input_buffering_tweak: 0,
            min_input_buffering: 0,
            max_input_buffering: 10,
            packet_size_limit: MAX_PACKET_SIZE as u32,
            follower_frequency: 60,
        }
    }
}

impl ReplicationSettings {
    pub fn time_step(&self) -> f32 {
        1.0 / self.update_frequency.max(1) as f32
    }
}

/// Observer-local clock tuning. Times are in seconds.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObserverSettings {
    /// Server time error that forces an immediate resynchronization.
    pub time_snap_threshold: f32,
    /// Averaged server time error that triggers a gradual adjustment.
    pub time_rewind_threshold: f32,
    /// How far behind the estimated server time replicas are rendered.
    pub interpolation_delay: f32,
    pub clock_window: u32,
    pub clock_trimmed_samples: u32,
    pub min_time_step_scale: f32,
    pub max_time_step_scale: f32,
    /// Smoothed time error, in frames, that is considered converged.
    pub time_tolerance: f32,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            time_snap_threshold: 2.0,
            time_rewind_threshold: 0.05,
            interpolation_delay: 0.1,
            clock_window: 10,
            clock_trimmed_samples: 3,
            min_time_step_scale: 0.5,
            max_time_step_scale: 2.0,
            time_tolerance: 0.01,
        }
    }
}

impl ObserverSettings {
    pub fn soft_time_settings(&self, update_frequency: u32) -> SoftTimeSettings {
        SoftTimeSettings {
            snap_threshold: (self.time_snap_threshold * update_frequency as f32) as f64,
            tolerance: self.time_tolerance as f64,
            min_scale: self.min_time_step_scale as f64,
            max_scale: self.max_time_step_scale as f64,
        }
    }
}
