use std::collections::BTreeSet;

use crate::net::{
    ByteReader, ByteWriter, Connection, ConnectionId, ControlMessage, InboundMessage,
    InboundQueue, MessageBatcher, MessageKind, MessageReassembler,
};
use crate::objects::{NetworkObject, ObjectFactory, ObjectId, ObjectMode, Scene, TypeTag};
use crate::time::NetworkFrame;

use super::clock::ObserverClock;
use super::settings::{ObserverSettings, ReplicationSettings};
use super::ProtocolError;

/// Applies object-stream messages to the observer scene.
#[derive(Debug)]
struct ObjectStream {
    factory: ObjectFactory,
    connection_id: Option<ConnectionId>,
    owned_objects: BTreeSet<ObjectId>,
}

impl ObjectStream {
    fn remove_objects(&mut self, scene: &mut Scene, payload: &[u8]) -> Result<(), ProtocolError> {
        let mut reader = ByteReader::new(payload);
        let _frame = reader.read_i64()?;
        while !reader.is_eof() {
            let raw = reader.read_u32()?;
            match ObjectId::from_raw(raw).filter(|&id| scene.contains(id)) {
                Some(id) => self.remove_object(scene, id),
                None => log::warn!("Cannot find object {:#010x} to remove", raw),
            }
        }
        Ok(())
    }

    fn remove_object(&mut self, scene: &mut Scene, id: ObjectId) {
        self.owned_objects.remove(&id);
        scene.despawn(id);
    }

    fn add_objects(&mut self, scene: &mut Scene, payload: &[u8]) -> Result<(), ProtocolError> {
        let mut reader = ByteReader::new(payload);
        let frame = reader.read_i64()?;
        while !reader.is_eof() {
            let raw = reader.read_u32()?;
            let type_tag = TypeTag::from_raw(reader.read_u32()?);
            let owner = ConnectionId::new(reader.read_vle()?);
            let snapshot = reader.read_buffer()?;

            let Some(id) = ObjectId::from_raw(raw) else {
                log::warn!("Cannot add object with invalid id {:#010x}", raw);
                continue;
            };
            let Some(behavior) = self.factory.create(type_tag) else {
                log::warn!("Cannot create object {} of unknown type {}", id, type_tag);
                continue;
            };

            let is_owned = owner.is_some() && owner == self.connection_id;
            let mut object = NetworkObject::new(id, behavior);
            object.set_owner(owner);
            object.set_mode(if is_owned {
                ObjectMode::ObserverOwned
            } else {
                ObjectMode::ObserverReplicated
            })?;
            if let Err(err) = object.read_snapshot(frame, &mut ByteReader::new(snapshot)) {
                log::warn!("Malformed snapshot for object {}: {}", id, err);
                continue;
            }

            if let Some(previous) = scene.insert_replicated(object) {
                log::warn!("Object {} overwrites existing object {}", id, previous.id());
                self.owned_objects.remove(&previous.id());
            }
            if is_owned {
                self.owned_objects.insert(id);
            }
        }
        Ok(())
    }

    fn update_objects(
        &mut self,
        scene: &mut Scene,
        payload: &[u8],
        reliable: bool,
    ) -> Result<(), ProtocolError> {
        let mut reader = ByteReader::new(payload);
        let frame = reader.read_i64()?;
        while !reader.is_eof() {
            let raw = reader.read_u32()?;
            let type_tag = TypeTag::from_raw(reader.read_u32()?);
            let delta = reader.read_buffer()?;

            let Some(object) = checked_object(scene, raw, type_tag) else {
                continue;
            };
            let mut input = ByteReader::new(delta);
            let result = if reliable {
                object.read_reliable_delta(frame, &mut input)
            } else {
                object.read_unreliable_delta(frame, &mut input)
            };
            if let Err(err) = result {
                log::warn!("Malformed delta for object {}: {}", object.id(), err);
            }
        }
        Ok(())
    }
}

fn checked_object(scene: &mut Scene, raw: u32, type_tag: TypeTag) -> Option<&mut NetworkObject> {
    let Some(object) = ObjectId::from_raw(raw).and_then(|id| scene.get_mut(id)) else {
        log::warn!("Cannot find existing object {:#010x}", raw);
        return None;
    };
    if object.type_tag() != type_tag {
        log::warn!(
            "Object {} has type {}, message was prepared for {}",
            object.id(),
            object.type_tag(),
            type_tag
        );
        return None;
    }
    Some(object)
}

/// Observer-side driver: rebuilds the authority's objects locally, keeps the
/// observer clock and sends feedback for owned objects.
pub struct Replica {
    connection: Box<dyn Connection>,
    settings: ObserverSettings,
    server_settings: Option<ReplicationSettings>,
    clock: Option<ObserverClock>,
    feedback_delay: u32,
    stream: ObjectStream,
    add_reassembler: MessageReassembler,
    update_reassembler: MessageReassembler,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("connection", &self.connection.id())
            .field("connection_id", &self.stream.connection_id)
            .field("clock", &self.clock)
            .field("owned_objects", &self.stream.owned_objects)
            .finish()
    }
}

impl Replica {
    pub fn new(
        connection: Box<dyn Connection>,
        factory: ObjectFactory,
        settings: ObserverSettings,
    ) -> Self {
        Self {
            connection,
            settings,
            server_settings: None,
            clock: None,
            feedback_delay: 0,
            stream: ObjectStream {
                factory,
                connection_id: None,
                owned_objects: BTreeSet::new(),
            },
            add_reassembler: MessageReassembler::new(),
            update_reassembler: MessageReassembler::new(),
        }
    }

    /// Id the authority assigned to this observer.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.stream.connection_id
    }

    pub fn server_settings(&self) -> Option<&ReplicationSettings> {
        self.server_settings.as_ref()
    }

    pub fn is_configured(&self) -> bool {
        self.server_settings.is_some()
    }

    pub fn clock(&self) -> Option<&ObserverClock> {
        self.clock.as_ref()
    }

    /// Frame replicas are currently rendered at.
    pub fn current_frame(&self) -> Option<NetworkFrame> {
        self.clock.as_ref().map(|clock| clock.smooth_time().frame())
    }

    /// Input delay plus buffering the authority last advertised.
    pub fn feedback_delay(&self) -> u32 {
        self.feedback_delay
    }

    pub fn owned_objects(&self) -> &BTreeSet<ObjectId> {
        &self.stream.owned_objects
    }

    pub fn process_message(
        &mut self,
        scene: &mut Scene,
        message: &InboundMessage,
    ) -> Result<(), ProtocolError> {
        match message.kind {
            kind if kind.is_control() => {
                let control = ControlMessage::deserialize(kind, &message.payload)?;
                self.process_control(control)
            }
            MessageKind::RemoveObjects => self.stream.remove_objects(scene, &message.payload),
            MessageKind::AddObjectsIncomplete => {
                self.add_reassembler.push(&message.payload, false);
                Ok(())
            }
            MessageKind::AddObjects => match self.add_reassembler.push(&message.payload, true) {
                Some(payload) => self.stream.add_objects(scene, &payload),
                None => Ok(()),
            },
            MessageKind::UpdateObjectsReliableIncomplete => {
                self.update_reassembler.push(&message.payload, false);
                Ok(())
            }
            MessageKind::UpdateObjectsReliable => {
                match self.update_reassembler.push(&message.payload, true) {
                    Some(payload) => self.stream.update_objects(scene, &payload, true),
                    None => Ok(()),
                }
            }
            MessageKind::UpdateObjectsUnreliable => {
                self.stream.update_objects(scene, &message.payload, false)
            }
            kind => Err(ProtocolError::UnexpectedMessage {
                kind,
                context: "on an observer",
            }),
        }
    }

    fn process_control(&mut self, message: ControlMessage) -> Result<(), ProtocolError> {
        match message {
            ControlMessage::Configure {
                magic,
                connection_id,
                settings,
            } => {
                self.stream.connection_id = ConnectionId::new(connection_id);
                self.server_settings = Some(settings);
                self.clock = None;
                self.send_control(&ControlMessage::Synchronized { magic })?;
                log::info!("Configured as connection {}", connection_id);
                Ok(())
            }
            ControlMessage::SceneClock {
                frame,
                ping_ms,
                input_delay,
                ..
            } => {
                let Some(server_settings) = self.server_settings.as_ref() else {
                    log::warn!("Clock update received before configuration");
                    return Err(ProtocolError::UnexpectedMessage {
                        kind: MessageKind::SceneClock,
                        context: "before Configure",
                    });
                };
                self.feedback_delay = input_delay;
                match self.clock.as_mut() {
                    Some(clock) => clock.process_clock_update(frame, ping_ms),
                    None => {
                        let clock = ObserverClock::new(
                            server_settings,
                            self.settings.clone(),
                            frame,
                            ping_ms,
                        );
                        log::info!("Observer clock started from {}", clock.server_time());
                        self.clock = Some(clock);
                    }
                }
                Ok(())
            }
            ControlMessage::Ping {
                magic,
                timestamp_ms,
            } => self.send_control(&ControlMessage::Pong {
                magic,
                timestamp_ms,
            }),
            other => Err(ProtocolError::UnexpectedMessage {
                kind: other.kind(),
                context: "on an observer",
            }),
        }
    }

    fn send_control(&mut self, message: &ControlMessage) -> Result<(), ProtocolError> {
        let payload = message.serialize()?;
        let kind = message.kind();
        self.connection.send_message(kind, &payload, kind.delivery());
        Ok(())
    }

    /// Applies everything waiting in `inbox`. Bad messages are logged and
    /// dropped. Returns the number of messages handled.
    pub fn process_inbound(&mut self, scene: &mut Scene, inbox: &InboundQueue) -> usize {
        let messages = inbox.drain();
        for message in &messages {
            if let Err(err) = self.process_message(scene, message) {
                log::warn!("Dropped {:?}: {}", message.kind, err);
            }
        }
        messages.len()
    }

    /// Advances the observer clock by `time_step` seconds, interpolates every
    /// replica and sends feedback when a new frame starts. Returns the
    /// follower ticks due.
    pub fn update(&mut self, scene: &mut Scene, time_step: f32) -> u32 {
        // Registry events only matter on the authority.
        scene.drain_events();

        let Some(clock) = self.clock.as_mut() else {
            return 0;
        };
        clock.apply_time_step(time_step);
        let time = clock.smooth_time();
        let is_new_frame = clock.is_new_frame();
        let follower_ticks = clock.follower_ticks();

        for object in scene.objects_mut() {
            object.interpolate_state(time, is_new_frame);
        }
        if is_new_frame {
            self.send_objects_feedback(scene, time.frame());
        }
        follower_ticks
    }

    fn send_objects_feedback(&mut self, scene: &mut Scene, frame: NetworkFrame) {
        let ceiling = self
            .server_settings
            .as_ref()
            .map_or(crate::net::MAX_PACKET_SIZE, |settings| {
                settings.packet_size_limit as usize
            });
        let mut header = ByteWriter::new();
        header.write_i64(frame);
        let mut batcher = MessageBatcher::new(
            MessageKind::ObjectsFeedbackUnreliable,
            ceiling,
            header.as_slice(),
        );

        let mut feedback = ByteWriter::new();
        let mut entry = ByteWriter::new();
        for &id in &self.stream.owned_objects {
            let Some(object) = scene.get_mut(id) else {
                continue;
            };
            feedback.clear();
            if !object.write_feedback(frame, &mut feedback) {
                continue;
            }

            entry.clear();
            entry.write_u32(id.to_raw());
            entry.write_buffer(feedback.as_slice());
            // Oversized payloads are reported by the batcher.
            let _ = batcher.push(self.connection.as_mut(), entry.as_slice());
        }
        batcher.finish(self.connection.as_mut());
    }
}
