use crate::net::{random_u64, Connection, ConnectionId, ControlMessage};
use crate::time::{InputStats, NetworkFrame, StabilizedMaxFilter, TrimmedMeanFilter};

use super::settings::ReplicationSettings;
use super::ProtocolError;

/// Largest input gap, in frames, the input statistics will ever report.
const INPUT_STATS_SAFETY_LIMIT: u32 = 64;

/// Consumes one interval from `accumulator` if it has elapsed.
fn consume_interval(accumulator: &mut f32, interval: f32) -> bool {
    if *accumulator < interval {
        return false;
    }
    *accumulator = if interval > 0.0 {
        (*accumulator / interval).fract() * interval
    } else {
        0.0
    };
    true
}

fn make_magic() -> u32 {
    (random_u64() as u32).max(1)
}

/// Clock handshake and latency estimation for one observer connection.
pub struct SynchronizationState {
    connection: Box<dyn Connection>,
    settings: ReplicationSettings,
    frame: NetworkFrame,
    frame_local_time_ms: u64,
    clock_accumulator: f32,
    ping_accumulator: f32,
    magic: Option<u32>,
    synchronized: bool,
    ping_filter: TrimmedMeanFilter,
    ping_ms: f64,
    has_new_round_trip: bool,
    input_delay_filter: StabilizedMaxFilter,
    input_delay: u32,
    input_stats: InputStats,
    input_buffer_filter: StabilizedMaxFilter,
    input_buffer_size: u32,
}

impl std::fmt::Debug for SynchronizationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizationState")
            .field("connection", &self.connection.id())
            .field("synchronized", &self.synchronized)
            .field("ping_ms", &self.ping_ms)
            .field("input_delay", &self.input_delay)
            .field("input_buffer_size", &self.input_buffer_size)
            .finish()
    }
}

impl SynchronizationState {
    pub fn new(connection: Box<dyn Connection>, settings: ReplicationSettings) -> Self {
        Self {
            ping_filter: TrimmedMeanFilter::new(
                settings.ping_window as usize,
                settings.ping_trimmed_samples as usize,
            ),
            input_delay_filter: StabilizedMaxFilter::new(settings.input_delay_filter_size as usize),
            input_stats: InputStats::new(
                settings.input_buffering_window as usize,
                INPUT_STATS_SAFETY_LIMIT,
            ),
            input_buffer_filter: StabilizedMaxFilter::new(
                settings.input_buffering_filter_size as usize,
            ),
            input_buffer_size: settings.min_input_buffering,
            connection,
            settings,
            frame: 0,
            frame_local_time_ms: 0,
            clock_accumulator: 0.0,
            ping_accumulator: 0.0,
            magic: None,
            synchronized: false,
            ping_ms: 0.0,
            has_new_round_trip: false,
            input_delay: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub fn connection_mut(&mut self) -> &mut dyn Connection {
        self.connection.as_mut()
    }

    pub fn settings(&self) -> &ReplicationSettings {
        &self.settings
    }

    pub fn current_frame(&self) -> NetworkFrame {
        self.frame
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Smoothed one-way latency.
    pub fn ping_ms(&self) -> u32 {
        self.ping_ms.round() as u32
    }

    pub fn input_delay(&self) -> u32 {
        self.input_delay
    }

    pub fn input_buffer_size(&self) -> u32 {
        self.input_buffer_size
    }

    /// Frames the authority should expect feedback to lag behind.
    pub fn feedback_delay(&self) -> u32 {
        self.input_delay + self.input_buffer_size
    }

    pub fn begin_frame(&mut self, frame: NetworkFrame, overtime: f32) {
        let time_step = self.settings.time_step();
        let overtime_ms = (overtime.max(0.0) * 1000.0).round() as u64;
        self.frame = frame;
        self.frame_local_time_ms = self.connection.local_time_ms().saturating_sub(overtime_ms);
        self.clock_accumulator += time_step;
        self.ping_accumulator += time_step;
    }

    /// Sends the handshake, pings and clock updates that are due.
    pub fn send_messages(&mut self) -> Result<(), ProtocolError> {
        if self.magic.is_none() {
            let magic = make_magic();
            self.send_control(&ControlMessage::Configure {
                magic,
                connection_id: self.id().to_raw(),
                settings: self.settings.clone(),
            })?;
            self.magic = Some(magic);
            log::info!("{}: configuration sent", self.id());
        }

        if consume_interval(&mut self.ping_accumulator, self.settings.ping_interval) {
            self.send_control(&ControlMessage::Ping {
                magic: self.magic.unwrap_or_default(),
                timestamp_ms: self.connection.local_time_ms(),
            })?;
        }

        if consume_interval(&mut self.clock_accumulator, self.settings.periodic_clock_interval) {
            self.update_input_delay();
            self.update_input_buffer();
            self.send_control(&ControlMessage::SceneClock {
                frame: self.frame,
                timestamp_ms: self.frame_local_time_ms,
                ping_ms: self.ping_ms(),
                input_delay: self.feedback_delay(),
            })?;
        }
        Ok(())
    }

    fn send_control(&mut self, message: &ControlMessage) -> Result<(), ProtocolError> {
        let payload = message.serialize()?;
        let kind = message.kind();
        self.connection.send_message(kind, &payload, kind.delivery());
        Ok(())
    }

    pub fn process_synchronized(&mut self, magic: u32) -> Result<(), ProtocolError> {
        let expected = self.magic.unwrap_or_default();
        if self.magic != Some(magic) {
            log::warn!("{}: unexpected synchronization acknowledgement", self.id());
            return Err(ProtocolError::StaleMagic {
                expected,
                actual: magic,
            });
        }
        if !self.synchronized {
            self.synchronized = true;
            // First clock goes out on the next frame.
            self.clock_accumulator = self.settings.periodic_clock_interval;
            log::info!("{}: synchronized", self.id());
        }
        Ok(())
    }

    pub fn process_pong(&mut self, magic: u32, timestamp_ms: u64) -> Result<(), ProtocolError> {
        let expected = self.magic.unwrap_or_default();
        if self.magic != Some(magic) {
            return Err(ProtocolError::StaleMagic {
                expected,
                actual: magic,
            });
        }

        let round_trip_ms = self.connection.local_time_ms().saturating_sub(timestamp_ms);
        self.add_ping_sample(round_trip_ms as f64 / 2.0);
        Ok(())
    }

    pub(crate) fn add_ping_sample(&mut self, ping_ms: f64) {
        self.ping_filter.add(ping_ms);
        self.ping_ms = self.ping_filter.average().unwrap_or(ping_ms);
        self.has_new_round_trip = true;
    }

    pub fn on_input_received(&mut self, frame: NetworkFrame) {
        self.input_stats.on_input_received(frame);
    }

    fn update_input_delay(&mut self) {
        if !std::mem::take(&mut self.has_new_round_trip) {
            return;
        }
        let frames = (self.ping_ms * self.settings.update_frequency as f64 / 1000.0).ceil();
        self.input_delay_filter.add(frames.max(0.0) as u32);
        self.input_delay = self.input_delay_filter.value().unwrap_or(0);
    }

    fn update_input_buffer(&mut self) {
        self.input_buffer_filter
            .add(self.input_stats.recommended_buffer_size());

        let stabilized = self.input_buffer_filter.value().unwrap_or(0) as i64;
        let size = stabilized + self.settings.input_buffering_tweak as i64;
        self.input_buffer_size = size
            .max(self.settings.min_input_buffering as i64)
            .min(self.settings.max_input_buffering as i64)
            .max(0) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{InboundQueue, Link, LinkSimulation, MessageKind};

    fn state(settings: ReplicationSettings) -> (Link, InboundQueue, SynchronizationState) {
        let link = Link::with_manual_clock(LinkSimulation::default());
        let authority_inbox = InboundQueue::new();
        let observer_inbox = InboundQueue::new();
        let (to_observer, _) = link.connect(
            ConnectionId::new(1).unwrap(),
            &authority_inbox,
            &observer_inbox,
        );
        (link, observer_inbox, SynchronizationState::new(Box::new(to_observer), settings))
    }

    fn sent_kinds(link: &Link, inbox: &InboundQueue) -> Vec<MessageKind> {
        link.flush();
        inbox.drain().into_iter().map(|m| m.kind).collect()
    }

    fn configured_magic(link: &Link, inbox: &InboundQueue) -> u32 {
        link.flush();
        inbox
            .drain()
            .into_iter()
            .find_map(|m| match ControlMessage::deserialize(m.kind, &m.payload) {
                Ok(ControlMessage::Configure { magic, .. }) => Some(magic),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_configure_sent_once() {
        let (link, inbox, mut sync) = state(ReplicationSettings::default());
        sync.begin_frame(1, 0.0);
        sync.send_messages().unwrap();
        sync.begin_frame(2, 0.0);
        sync.send_messages().unwrap();

        let kinds = sent_kinds(&link, &inbox);
        assert_eq!(
            kinds.iter().filter(|&&k| k == MessageKind::Configure).count(),
            1
        );
        assert!(!sync.is_synchronized());
    }

    #[test]
    fn test_wrong_magic_ignored() {
        let (link, inbox, mut sync) = state(ReplicationSettings::default());
        sync.begin_frame(1, 0.0);
        sync.send_messages().unwrap();
        let magic = configured_magic(&link, &inbox);

        assert!(matches!(
            sync.process_synchronized(magic.wrapping_add(1)),
            Err(ProtocolError::StaleMagic { .. })
        ));
        assert!(!sync.is_synchronized());

        sync.process_synchronized(magic).unwrap();
        assert!(sync.is_synchronized());
    }

    #[test]
    fn test_clock_follows_synchronization() {
        let (link, inbox, mut sync) = state(ReplicationSettings::default());
        sync.begin_frame(1, 0.0);
        sync.send_messages().unwrap();
        let magic = configured_magic(&link, &inbox);
        sync.process_synchronized(magic).unwrap();

        sync.begin_frame(2, 0.0);
        sync.send_messages().unwrap();
        let kinds = sent_kinds(&link, &inbox);
        assert!(kinds.contains(&MessageKind::SceneClock));
    }

    #[test]
    fn test_input_delay_from_ping() {
        let settings = ReplicationSettings {
            periodic_clock_interval: 0.0,
            ..Default::default()
        };
        let (_link, _inbox, mut sync) = state(settings);
        sync.add_ping_sample(100.0);
        sync.begin_frame(1, 0.0);
        sync.send_messages().unwrap();

        // 100 ms at 30 Hz is 3 frames.
        assert_eq!(sync.input_delay(), 3);
        assert_eq!(sync.feedback_delay(), 3);
    }

    #[test]
    fn test_input_delay_needs_new_round_trip() {
        let settings = ReplicationSettings {
            periodic_clock_interval: 0.0,
            input_delay_filter_size: 1,
            ..Default::default()
        };
        let (_link, _inbox, mut sync) = state(settings);
        sync.add_ping_sample(100.0);
        sync.begin_frame(1, 0.0);
        sync.send_messages().unwrap();
        assert_eq!(sync.input_delay(), 3);

        sync.ping_ms = 1000.0;
        sync.begin_frame(2, 0.0);
        sync.send_messages().unwrap();
        assert_eq!(sync.input_delay(), 3);
    }

    #[test]
    fn test_input_buffer_clamped() {
        let settings = ReplicationSettings {
            periodic_clock_interval: 0.0,
            input_buffering_tweak: 2,
            min_input_buffering: 1,
            max_input_buffering: 4,
            ..Default::default()
        };
        let (_link, _inbox, mut sync) = state(settings);
        sync.on_input_received(10);
        sync.on_input_received(20);
        sync.begin_frame(1, 0.0);
        sync.send_messages().unwrap();
        assert_eq!(sync.input_buffer_size(), 4);
    }

    #[test]
    fn test_interval_consumption() {
        let mut accumulator = 0.7;
        assert!(consume_interval(&mut accumulator, 0.5));
        assert!((accumulator - 0.2).abs() < 1e-5);
        assert!(!consume_interval(&mut accumulator, 0.5));
    }
}
