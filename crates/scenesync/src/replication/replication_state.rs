use std::collections::BTreeSet;

use crate::net::{
    send_large_message, ByteReader, ByteWriter, ConnectionId, ControlMessage, InboundMessage,
    MessageBatcher, MessageKind,
};
use crate::objects::{ObjectId, Relevance, Scene};

use super::settings::ReplicationSettings;
use super::shared_state::SharedReplicationState;
use super::sync_state::SynchronizationState;
use super::ProtocolError;

#[derive(Debug, Clone, Copy)]
struct RelevanceEntry {
    replicated: bool,
    relevance: Relevance,
    timeout: f32,
    /// An unreliable delta was cooked on a frame this connection skipped.
    unreliable_pending: bool,
}

impl Default for RelevanceEntry {
    fn default() -> Self {
        Self {
            replicated: false,
            relevance: Relevance::Irrelevant,
            timeout: 0.0,
            unreliable_pending: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingUpdate {
    id: ObjectId,
    snapshot: bool,
}

/// Everything the authority tracks about one observer: the handshake and
/// clock, which objects it sees, and what goes out to it this frame.
#[derive(Debug)]
pub struct ReplicationState {
    sync: SynchronizationState,
    entries: Vec<RelevanceEntry>,
    pending_removed: Vec<ObjectId>,
    pending_updates: Vec<PendingUpdate>,
    owned_objects: BTreeSet<ObjectId>,
    scratch: ByteWriter,
}

impl ReplicationState {
    pub fn new(sync: SynchronizationState) -> Self {
        Self {
            sync,
            entries: Vec::new(),
            pending_removed: Vec::new(),
            pending_updates: Vec::new(),
            owned_objects: BTreeSet::new(),
            scratch: ByteWriter::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.sync.id()
    }

    pub fn sync(&self) -> &SynchronizationState {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut SynchronizationState {
        &mut self.sync
    }

    fn settings(&self) -> &ReplicationSettings {
        self.sync.settings()
    }

    pub fn is_replicated(&self, id: ObjectId) -> bool {
        self.entries
            .get(id.index() as usize)
            .is_some_and(|entry| entry.replicated)
    }

    pub fn replicated_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.replicated).count()
    }

    pub fn owned_objects(&self) -> &BTreeSet<ObjectId> {
        &self.owned_objects
    }

    pub fn add_owned_object(&mut self, id: ObjectId) {
        self.owned_objects.insert(id);
    }

    /// Clears the owner of every object in `scene` owned by this connection,
    /// including objects spawned before it connected or reassigned later.
    pub fn release_owned_objects(&mut self, scene: &mut Scene) -> usize {
        let id = self.id();
        self.owned_objects.clear();

        let mut released = 0;
        for object in scene.objects_mut() {
            if object.owner() == Some(id) {
                object.set_owner(None);
                released += 1;
            }
        }
        released
    }

    /// Follows ownership changes made through the scene since the last frame.
    fn refresh_owned_objects(&mut self, shared: &SharedReplicationState, scene: &Scene) {
        let connection = self.id();
        self.owned_objects.clear();
        self.owned_objects.extend(
            shared
                .sorted_objects()
                .iter()
                .copied()
                .filter(|&id| scene.get(id).is_some_and(|object| object.owner() == Some(connection))),
        );
    }

    /// Walks relevance for every object and queues this frame's removals,
    /// snapshots and delta updates.
    pub fn update_objects(&mut self, shared: &mut SharedReplicationState, scene: &Scene) {
        self.refresh_owned_objects(shared, scene);
        if !self.sync.is_synchronized() {
            return;
        }

        let connection = self.id();
        let frame = self.sync.current_frame();
        let time_step = self.settings().time_step();
        let relevance_timeout = self.settings().relevance_timeout;

        let upper_bound = shared.index_upper_bound();
        if self.entries.len() < upper_bound {
            self.entries.resize(upper_bound, RelevanceEntry::default());
        }
        self.pending_removed.clear();
        self.pending_updates.clear();

        for &id in shared.recently_removed() {
            if let Some(entry) = self.entries.get_mut(id.index() as usize) {
                if entry.replicated {
                    entry.replicated = false;
                    self.pending_removed.push(id);
                }
            }
        }

        for sorted_index in 0..shared.sorted_objects().len() {
            let id = shared.sorted_objects()[sorted_index];
            let Some(object) = scene.get(id) else {
                continue;
            };
            let parent_replicated = object.parent().is_none_or(|parent| {
                self.entries
                    .get(parent.index() as usize)
                    .is_some_and(|entry| entry.replicated)
            });

            let entry = &mut self.entries[id.index() as usize];
            if !entry.replicated {
                if !parent_replicated {
                    continue;
                }
                let relevance = object.relevance_for(connection);
                if relevance.is_relevant() {
                    *entry = RelevanceEntry {
                        replicated: true,
                        relevance,
                        timeout: relevance_timeout,
                        unreliable_pending: false,
                    };
                    self.pending_updates.push(PendingUpdate { id, snapshot: true });
                }
                continue;
            }

            if !parent_replicated {
                entry.replicated = false;
                self.pending_removed.push(id);
                continue;
            }

            entry.timeout -= time_step;
            if entry.timeout < 0.0 {
                let relevance = object.relevance_for(connection);
                if !relevance.is_relevant() {
                    entry.replicated = false;
                    self.pending_removed.push(id);
                    continue;
                }
                entry.relevance = relevance;
                entry.timeout = relevance_timeout;
            }

            if entry.unreliable_pending && entry.relevance.sends_unreliable_on(frame) {
                shared.queue_unreliable_refresh(id);
            }
            self.pending_updates.push(PendingUpdate {
                id,
                snapshot: false,
            });
        }

        for update in &self.pending_updates {
            if !update.snapshot {
                shared.queue_delta_update(update.id);
            }
        }
    }

    /// Sends control traffic and, once synchronized, this frame's object
    /// messages.
    pub fn send_messages(
        &mut self,
        shared: &SharedReplicationState,
        scene: &Scene,
    ) -> Result<(), ProtocolError> {
        self.sync.send_messages()?;
        if !self.sync.is_synchronized() {
            return Ok(());
        }

        // Relevance entries are already updated, so a failed stream must not
        // hold back the others.
        self.send_remove_objects();
        let added = self.send_add_objects(scene);
        let updated = self.send_update_objects_reliable(shared, scene);
        self.send_update_objects_unreliable(shared, scene);
        added.and(updated)
    }

    /// Sends pending removals, spread over as many bounded messages as needed.
    fn send_remove_objects(&mut self) {
        if self.pending_removed.is_empty() {
            return;
        }

        let mut header = ByteWriter::new();
        header.write_i64(self.sync.current_frame());
        let connection = self.sync.connection_mut();
        let mut batcher = MessageBatcher::new(
            MessageKind::RemoveObjects,
            connection.max_message_size(),
            header.as_slice(),
        );
        for id in &self.pending_removed {
            let _ = batcher.push(&mut *connection, &id.to_raw().to_le_bytes());
        }
        let messages = batcher.finish(&mut *connection);
        log::debug!(
            "{}: removing {} objects in {} messages",
            self.sync.id(),
            self.pending_removed.len(),
            messages
        );
    }

    fn send_add_objects(&mut self, scene: &Scene) -> Result<(), ProtocolError> {
        let frame = self.sync.current_frame();
        let mut message = ByteWriter::new();
        message.write_i64(frame);

        let mut count = 0;
        for update in self.pending_updates.iter().filter(|update| update.snapshot) {
            let Some(object) = scene.get(update.id) else {
                continue;
            };

            message.write_u32(update.id.to_raw());
            message.write_u32(object.type_tag().to_raw());
            message.write_vle(ConnectionId::raw_or_zero(object.owner()));

            self.scratch.clear();
            object.write_snapshot(frame, &mut self.scratch);
            message.write_buffer(self.scratch.as_slice());
            count += 1;
        }

        if count == 0 {
            return Ok(());
        }
        log::debug!("{}: adding {} objects", self.sync.id(), count);
        let connection = self.sync.connection_mut();
        let max_size = connection.max_message_size();
        send_large_message(connection, MessageKind::AddObjects, message.as_slice(), max_size)?;
        Ok(())
    }

    fn send_update_objects_reliable(
        &mut self,
        shared: &SharedReplicationState,
        scene: &Scene,
    ) -> Result<(), ProtocolError> {
        let mut message = ByteWriter::new();
        message.write_i64(self.sync.current_frame());

        let mut any = false;
        for update in self.pending_updates.iter().filter(|update| !update.snapshot) {
            let Some(delta) = shared.reliable_delta(update.id.index()) else {
                continue;
            };
            let Some(object) = scene.get(update.id) else {
                continue;
            };

            message.write_u32(update.id.to_raw());
            message.write_u32(object.type_tag().to_raw());
            message.write_buffer(delta);
            any = true;
        }

        if !any {
            return Ok(());
        }
        let connection = self.sync.connection_mut();
        let max_size = connection.max_message_size();
        send_large_message(
            connection,
            MessageKind::UpdateObjectsReliable,
            message.as_slice(),
            max_size,
        )?;
        Ok(())
    }

    fn send_update_objects_unreliable(&mut self, shared: &SharedReplicationState, scene: &Scene) {
        let frame = self.sync.current_frame();
        let mut header = ByteWriter::new();
        header.write_i64(frame);

        let ceiling = self.settings().packet_size_limit as usize;
        let mut batcher = MessageBatcher::new(
            MessageKind::UpdateObjectsUnreliable,
            ceiling,
            header.as_slice(),
        );

        let mut payload = ByteWriter::new();
        for update in self.pending_updates.iter().filter(|update| !update.snapshot) {
            let index = update.id.index();
            let Some(delta) = shared.unreliable_delta(index) else {
                continue;
            };
            let Some(entry) = self.entries.get_mut(index as usize) else {
                continue;
            };
            if !entry.relevance.sends_unreliable_on(frame) {
                entry.unreliable_pending = true;
                continue;
            }
            let Some(object) = scene.get(update.id) else {
                continue;
            };
            entry.unreliable_pending = false;

            payload.clear();
            payload.write_u32(update.id.to_raw());
            payload.write_u32(object.type_tag().to_raw());
            payload.write_buffer(delta);
            // Oversized payloads are reported by the batcher.
            let _ = batcher.push(self.sync.connection_mut(), payload.as_slice());
        }
        batcher.finish(self.sync.connection_mut());
    }

    pub fn process_message(
        &mut self,
        scene: &mut Scene,
        message: &InboundMessage,
    ) -> Result<(), ProtocolError> {
        match message.kind {
            MessageKind::Synchronized | MessageKind::Pong => {
                match ControlMessage::deserialize(message.kind, &message.payload)? {
                    ControlMessage::Synchronized { magic } => self.sync.process_synchronized(magic),
                    ControlMessage::Pong {
                        magic,
                        timestamp_ms,
                    } => self.sync.process_pong(magic, timestamp_ms),
                    other => Err(ProtocolError::UnexpectedMessage {
                        kind: other.kind(),
                        context: "on the authority",
                    }),
                }
            }
            MessageKind::ObjectsFeedbackUnreliable => {
                self.process_objects_feedback(scene, &message.payload)
            }
            kind => Err(ProtocolError::UnexpectedMessage {
                kind,
                context: "on the authority",
            }),
        }
    }

    fn process_objects_feedback(
        &mut self,
        scene: &mut Scene,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let sender = self.id();
        if !self.sync.is_synchronized() {
            log::warn!("{}: feedback received before synchronization", sender);
            return Err(ProtocolError::NotSynchronized(sender));
        }

        let mut reader = ByteReader::new(payload);
        let frame = reader.read_i64()?;
        self.sync.on_input_received(frame);

        while !reader.is_eof() {
            let raw = reader.read_u32()?;
            let data = reader.read_buffer()?;

            let Some(object) = ObjectId::from_raw(raw).and_then(|id| scene.get_mut(id)) else {
                log::warn!("{}: feedback for unknown object {:#010x}", sender, raw);
                continue;
            };
            if object.owner() != Some(sender) {
                log::warn!(
                    "{}: feedback for object {} it does not own",
                    sender,
                    object.id()
                );
                continue;
            }
            if let Err(err) = object.read_feedback(frame, &mut ByteReader::new(data)) {
                log::warn!("{}: malformed feedback for {}: {}", sender, object.id(), err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::net::{InboundQueue, Link, LinkSimulation, MAX_MESSAGE_SIZE};
    use crate::objects::TransformObject;
    use crate::time::NetworkFrame;

    struct Fixture {
        link: Link,
        inbox: InboundQueue,
        scene: Scene,
        shared: SharedReplicationState,
        state: ReplicationState,
    }

    impl Fixture {
        fn new(settings: ReplicationSettings) -> Self {
            let link = Link::with_manual_clock(LinkSimulation::default());
            let inbox = InboundQueue::new();
            let (to_observer, _) =
                link.connect(ConnectionId::new(1).unwrap(), &InboundQueue::new(), &inbox);
            let mut state =
                ReplicationState::new(SynchronizationState::new(Box::new(to_observer), settings));

            state.sync_mut().begin_frame(1, 0.0);
            state.sync_mut().send_messages().unwrap();
            link.flush();
            let magic = inbox
                .drain()
                .into_iter()
                .find_map(|m| match ControlMessage::deserialize(m.kind, &m.payload) {
                    Ok(ControlMessage::Configure { magic, .. }) => Some(magic),
                    _ => None,
                })
                .unwrap();
            state.sync_mut().process_synchronized(magic).unwrap();

            Self {
                link,
                inbox,
                scene: Scene::new(),
                shared: SharedReplicationState::new(),
                state,
            }
        }

        /// Runs one authority frame and returns the object-stream messages sent.
        fn frame(&mut self, frame: NetworkFrame) -> Vec<InboundMessage> {
            self.state.sync_mut().begin_frame(frame, 0.0);
            self.shared.begin_frame(&mut self.scene);
            self.state.update_objects(&mut self.shared, &self.scene);
            self.shared.cook_delta_updates(&mut self.scene, frame);
            self.state.send_messages(&self.shared, &self.scene).unwrap();

            self.link.flush();
            self.inbox
                .drain()
                .into_iter()
                .filter(|m| !m.kind.is_control())
                .collect()
        }

        fn spawn(&mut self) -> ObjectId {
            self.scene.spawn(Box::new(TransformObject::new("box"))).unwrap()
        }

        fn transform(&mut self, id: ObjectId) -> &mut TransformObject {
            self.scene
                .get_mut(id)
                .and_then(|object| object.downcast_mut::<TransformObject>())
                .unwrap()
        }
    }

    fn header_frame(message: &InboundMessage) -> NetworkFrame {
        ByteReader::new(&message.payload).read_i64().unwrap()
    }

    fn removed_ids(message: &InboundMessage) -> Vec<u32> {
        let mut reader = ByteReader::new(&message.payload);
        reader.read_i64().unwrap();
        let mut ids = Vec::new();
        while !reader.is_eof() {
            ids.push(reader.read_u32().unwrap());
        }
        ids
    }

    /// Positions carried by an unreliable update, keyed by raw object id.
    fn unreliable_positions(message: &InboundMessage) -> Vec<(u32, Vec3)> {
        let mut reader = ByteReader::new(&message.payload);
        reader.read_i64().unwrap();
        let mut positions = Vec::new();
        while !reader.is_eof() {
            let id = reader.read_u32().unwrap();
            reader.read_u32().unwrap();
            let delta = reader.read_buffer().unwrap();
            positions.push((id, ByteReader::new(delta).read_vec3().unwrap()));
        }
        positions
    }

    fn of_kind(messages: &[InboundMessage], kind: MessageKind) -> Vec<&InboundMessage> {
        messages.iter().filter(|m| m.kind == kind).collect()
    }

    #[test]
    fn test_removals_split_over_bounded_messages() {
        let mut fixture = Fixture::new(ReplicationSettings::default());
        let count = MAX_MESSAGE_SIZE / 4 + 100;
        let ids: Vec<ObjectId> = (0..count).map(|_| fixture.spawn()).collect();
        fixture.frame(2);
        assert_eq!(fixture.state.replicated_count(), count);

        for &id in &ids {
            fixture.scene.despawn(id);
        }
        let fresh = fixture.spawn();
        let messages = fixture.frame(3);

        let removes = of_kind(&messages, MessageKind::RemoveObjects);
        assert!(removes.len() >= 2);
        assert!(removes.iter().all(|m| m.payload.len() <= MAX_MESSAGE_SIZE));
        assert!(removes.iter().all(|m| header_frame(m) == 3));
        let removed: usize = removes.iter().map(|m| removed_ids(m).len()).sum();
        assert_eq!(removed, count);

        assert!(!of_kind(&messages, MessageKind::AddObjects).is_empty());
        assert!(fixture.state.is_replicated(fresh));
        assert_eq!(fixture.state.replicated_count(), 1);
    }

    #[test]
    fn test_release_covers_every_owned_object() {
        let mut fixture = Fixture::new(ReplicationSettings::default());
        let me = fixture.state.id();
        let other = ConnectionId::new(2).unwrap();
        let early = fixture
            .scene
            .spawn_owned(Box::new(TransformObject::new("early")), me)
            .unwrap();
        let foreign = fixture
            .scene
            .spawn_owned(Box::new(TransformObject::new("foreign")), other)
            .unwrap();
        let late = fixture.spawn();
        fixture.frame(2);

        fixture.scene.set_owner(late, Some(me)).unwrap();
        fixture.frame(3);
        assert!(fixture.state.owned_objects().contains(&early));
        assert!(fixture.state.owned_objects().contains(&late));

        assert_eq!(fixture.state.release_owned_objects(&mut fixture.scene), 2);
        assert_eq!(fixture.scene.get(early).unwrap().owner(), None);
        assert_eq!(fixture.scene.get(late).unwrap().owner(), None);
        assert_eq!(fixture.scene.get(foreign).unwrap().owner(), Some(other));
        assert!(fixture.state.owned_objects().is_empty());
    }

    #[test]
    fn test_owned_set_forgets_despawned_objects() {
        let mut fixture = Fixture::new(ReplicationSettings::default());
        let me = fixture.state.id();
        let id = fixture
            .scene
            .spawn_owned(Box::new(TransformObject::new("pawn")), me)
            .unwrap();
        fixture.frame(2);
        assert!(fixture.state.owned_objects().contains(&id));

        fixture.scene.despawn(id);
        fixture.frame(3);
        assert!(fixture.state.owned_objects().is_empty());
    }

    #[test]
    fn test_periodic_change_sent_on_next_due_frame() {
        let mut fixture = Fixture::new(ReplicationSettings::default());
        let id = fixture.spawn();
        fixture.transform(id).set_relevance(Relevance::every(4));
        fixture.frame(2);

        fixture.transform(id).set_position(Vec3::new(7.0, 0.0, 0.0));
        for frame in 5..8 {
            let messages = fixture.frame(frame);
            assert!(of_kind(&messages, MessageKind::UpdateObjectsUnreliable).is_empty());
        }

        let messages = fixture.frame(8);
        let updates = of_kind(&messages, MessageKind::UpdateObjectsUnreliable);
        assert_eq!(updates.len(), 1);
        assert_eq!(
            unreliable_positions(updates[0]),
            vec![(id.to_raw(), Vec3::new(7.0, 0.0, 0.0))]
        );

        let messages = fixture.frame(12);
        assert!(of_kind(&messages, MessageKind::UpdateObjectsUnreliable).is_empty());
    }

    #[test]
    fn test_no_periodic_updates_keeps_reliable_deltas() {
        let mut fixture = Fixture::new(ReplicationSettings::default());
        let id = fixture.spawn();
        fixture.transform(id).set_relevance(Relevance::NoPeriodicUpdates);
        fixture.frame(2);

        fixture.transform(id).set_position(Vec3::ONE);
        fixture.transform(id).set_name("renamed");
        let messages = fixture.frame(3);
        assert!(of_kind(&messages, MessageKind::UpdateObjectsUnreliable).is_empty());
        assert_eq!(of_kind(&messages, MessageKind::UpdateObjectsReliable).len(), 1);
    }

    #[test]
    fn test_removal_frame_carries_no_updates() {
        let settings = ReplicationSettings {
            relevance_timeout: 0.1,
            ..Default::default()
        };
        let mut fixture = Fixture::new(settings);
        let id = fixture.spawn();
        fixture.frame(2);

        let me = fixture.state.id();
        fixture
            .transform(id)
            .set_relevance_for(me, Relevance::Irrelevant);
        let mut removal_frame = None;
        for frame in 3..20 {
            let object = fixture.transform(id);
            object.set_position(Vec3::splat(frame as f32));
            object.set_name(format!("frame {}", frame));

            let messages = fixture.frame(frame);
            if of_kind(&messages, MessageKind::RemoveObjects).is_empty() {
                continue;
            }
            assert!(of_kind(&messages, MessageKind::UpdateObjectsReliable).is_empty());
            assert!(of_kind(&messages, MessageKind::UpdateObjectsUnreliable).is_empty());
            removal_frame = Some(frame);
            break;
        }

        assert!(removal_frame.is_some());
        assert!(!fixture.state.is_replicated(id));
    }
}
