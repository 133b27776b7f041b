use std::collections::BTreeMap;

use crate::net::{Connection, ConnectionId, InboundMessage, InboundQueue};
use crate::objects::Scene;
use crate::time::{NetworkFrame, TickSynchronizer};

use super::replication_state::ReplicationState;
use super::settings::ReplicationSettings;
use super::shared_state::SharedReplicationState;
use super::sync_state::SynchronizationState;
use super::ProtocolError;

/// Authority-side driver: owns the frame counter, the shared per-frame state
/// and one [`ReplicationState`] per observer.
///
/// A network frame is [`Replicator::begin_frame`], then game logic mutates the
/// scene, then [`Replicator::send_updates`].
#[derive(Debug)]
pub struct Replicator {
    settings: ReplicationSettings,
    current_frame: NetworkFrame,
    shared: SharedReplicationState,
    connections: BTreeMap<ConnectionId, ReplicationState>,
    follower: TickSynchronizer,
}

impl Replicator {
    pub fn new(settings: ReplicationSettings) -> Self {
        let follower = TickSynchronizer::new(
            settings.update_frequency,
            settings.follower_frequency,
            true,
        );
        Self {
            settings,
            current_frame: 0,
            shared: SharedReplicationState::new(),
            connections: BTreeMap::new(),
            follower,
        }
    }

    pub fn settings(&self) -> &ReplicationSettings {
        &self.settings
    }

    pub fn current_frame(&self) -> NetworkFrame {
        self.current_frame
    }

    pub fn set_current_frame(&mut self, frame: NetworkFrame) {
        self.current_frame = frame;
    }

    pub fn follower(&self) -> &TickSynchronizer {
        &self.follower
    }

    pub fn add_connection(&mut self, connection: Box<dyn Connection>) {
        let id = connection.id();
        let sync = SynchronizationState::new(connection, self.settings.clone());
        if self.connections.insert(id, ReplicationState::new(sync)).is_some() {
            log::warn!("{} was already added and has been reset", id);
        }
        log::info!("{} added", id);
    }

    /// Drops a connection. Nothing is sent to it; objects it owned stay on
    /// the authority without an owner.
    pub fn remove_connection(&mut self, scene: &mut Scene, id: ConnectionId) -> bool {
        let Some(mut state) = self.connections.remove(&id) else {
            log::warn!("{} is not added", id);
            return false;
        };
        let released = state.release_owned_objects(scene);
        log::info!("{} removed, released {} objects", id, released);
        true
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&ReplicationState> {
        self.connections.get(&id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &ReplicationState> {
        self.connections.values()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Frames the feedback of `id` is expected to lag behind.
    pub fn feedback_delay(&self, id: ConnectionId) -> u32 {
        self.connections
            .get(&id)
            .map_or(0, |state| state.sync().feedback_delay())
    }

    /// Starts the next network frame. Returns the follower ticks to run.
    pub fn begin_frame(&mut self, overtime: f32) -> u32 {
        self.current_frame = self.current_frame.wrapping_add(1);
        for state in self.connections.values_mut() {
            state.sync_mut().begin_frame(self.current_frame, overtime);
        }
        self.follower.synchronize(overtime)
    }

    /// Follower ticks due between network frames. Always zero here, the
    /// authority runs all of them at [`Replicator::begin_frame`].
    pub fn update_follower(&mut self, time_step: f32) -> u32 {
        self.follower.update(time_step)
    }

    pub fn send_updates(&mut self, scene: &mut Scene) {
        for (object, owner) in self.shared.begin_frame(scene) {
            let Some(owner) = owner else {
                continue;
            };
            match self.connections.get_mut(&owner) {
                Some(state) => state.add_owned_object(object),
                None => log::debug!("Object {} is owned by {}, which is not connected", object, owner),
            }
        }

        for state in self.connections.values_mut() {
            state.update_objects(&mut self.shared, scene);
        }
        self.shared.cook_delta_updates(scene, self.current_frame);

        for state in self.connections.values_mut() {
            if let Err(err) = state.send_messages(&self.shared, scene) {
                log::error!("{}: failed to send updates: {}", state.id(), err);
            }
        }
    }

    pub fn process_message(
        &mut self,
        scene: &mut Scene,
        message: &InboundMessage,
    ) -> Result<(), ProtocolError> {
        let state = self
            .connections
            .get_mut(&message.connection)
            .ok_or(ProtocolError::UnknownConnection(message.connection))?;
        state.process_message(scene, message)
    }

    /// Applies everything waiting in `inbox`. Bad messages are logged and
    /// dropped. Returns the number of messages handled.
    pub fn process_inbound(&mut self, scene: &mut Scene, inbox: &InboundQueue) -> usize {
        let messages = inbox.drain();
        for message in &messages {
            if let Err(err) = self.process_message(scene, message) {
                log::warn!(
                    "Dropped {:?} from {}: {}",
                    message.kind,
                    message.connection,
                    err
                );
            }
        }
        messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Link, LinkSimulation};
    use crate::objects::{ObjectMode, TransformObject};

    fn connect(link: &Link, replicator: &mut Replicator, raw: u32) -> ConnectionId {
        let id = ConnectionId::new(raw).unwrap();
        let (to_observer, _) = link.connect(id, &InboundQueue::new(), &InboundQueue::new());
        replicator.add_connection(Box::new(to_observer));
        id
    }

    fn frame(replicator: &mut Replicator, scene: &mut Scene) {
        replicator.begin_frame(0.0);
        replicator.send_updates(scene);
    }

    #[test]
    fn test_frames_advance_and_initialize_objects() {
        let mut replicator = Replicator::new(ReplicationSettings::default());
        let mut scene = Scene::new();
        let id = scene.spawn(Box::new(TransformObject::new("box"))).unwrap();

        frame(&mut replicator, &mut scene);
        frame(&mut replicator, &mut scene);
        assert_eq!(replicator.current_frame(), 2);
        assert_eq!(scene.get(id).unwrap().mode(), ObjectMode::Authority);
    }

    #[test]
    fn test_remove_connection_releases_ownership() {
        let link = Link::with_manual_clock(LinkSimulation::default());
        let mut replicator = Replicator::new(ReplicationSettings::default());
        let mut scene = Scene::new();

        let owner = ConnectionId::new(5).unwrap();
        let early = scene
            .spawn_owned(Box::new(TransformObject::new("early")), owner)
            .unwrap();
        let late = scene.spawn(Box::new(TransformObject::new("late"))).unwrap();
        frame(&mut replicator, &mut scene);

        connect(&link, &mut replicator, 5);
        let other = connect(&link, &mut replicator, 6);
        let kept = scene
            .spawn_owned(Box::new(TransformObject::new("kept")), other)
            .unwrap();
        frame(&mut replicator, &mut scene);
        scene.set_owner(late, Some(owner)).unwrap();
        frame(&mut replicator, &mut scene);

        assert!(replicator.remove_connection(&mut scene, owner));
        assert_eq!(scene.get(early).unwrap().owner(), None);
        assert_eq!(scene.get(late).unwrap().owner(), None);
        assert_eq!(scene.get(kept).unwrap().owner(), Some(other));
        assert!(!replicator.remove_connection(&mut scene, owner));
        assert_eq!(replicator.connection_count(), 1);
    }

    #[test]
    fn test_message_from_unknown_connection_rejected() {
        let mut replicator = Replicator::new(ReplicationSettings::default());
        let mut scene = Scene::new();
        let message = InboundMessage {
            connection: ConnectionId::new(9).unwrap(),
            kind: crate::net::MessageKind::ObjectsFeedbackUnreliable,
            payload: Vec::new(),
        };
        assert!(matches!(
            replicator.process_message(&mut scene, &message),
            Err(ProtocolError::UnknownConnection(_))
        ));
    }
}
