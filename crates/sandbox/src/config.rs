use std::time::Duration;

use scenesync::{LinkSimulation, ObserverSettings, ReplicationSettings};

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub replication: ReplicationSettings,
    pub observer: ObserverSettings,
    pub observers: u32,
    pub shared_objects: usize,
    pub owned_per_observer: usize,
    /// Stops the run after this long. `None` runs until the process is killed.
    pub duration: Option<Duration>,
    pub stats_interval: Duration,
    pub link: LinkSimulation,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            replication: ReplicationSettings::default(),
            observer: ObserverSettings::default(),
            observers: 2,
            shared_objects: 16,
            owned_per_observer: 1,
            duration: Some(Duration::from_secs(10)),
            stats_interval: Duration::from_secs(1),
            link: LinkSimulation::default(),
        }
    }
}
