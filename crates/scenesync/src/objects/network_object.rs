use std::fmt;

use bitflags::bitflags;

use crate::net::{ByteReader, ByteWriter, CodecError, ConnectionId};
use crate::time::{NetworkFrame, NetworkTime};

use super::id::ObjectId;
use super::mode::ObjectMode;
use super::replicated::{Relevance, ReplicatedObject, TypeTag};

bitflags! {
    /// Leading byte of every reliable delta.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeltaMask: u8 {
        const PARENT = 1 << 0;
        const BODY = 1 << 1;
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ObjectError {
    #[error("object {0} does not exist")]
    NotFound(ObjectId),
    #[error("cannot switch object {id} from {from} to {to}")]
    InvalidModeTransition {
        id: ObjectId,
        from: ObjectMode,
        to: ObjectMode,
    },
    #[error("parenting {child} under {parent} would create a cycle")]
    ParentCycle { child: ObjectId, parent: ObjectId },
}

/// Registry entry: identity, hierarchy and ownership around a behaviour.
pub struct NetworkObject {
    id: ObjectId,
    parent: Option<ObjectId>,
    owner: Option<ConnectionId>,
    mode: ObjectMode,
    replicated_parent: Option<ObjectId>,
    pending_mask: DeltaMask,
    behavior: Box<dyn ReplicatedObject>,
}

impl fmt::Debug for NetworkObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkObject")
            .field("id", &self.id)
            .field("type", &self.type_tag())
            .field("parent", &self.parent)
            .field("owner", &self.owner)
            .field("mode", &self.mode)
            .finish()
    }
}

impl NetworkObject {
    pub fn new(id: ObjectId, behavior: Box<dyn ReplicatedObject>) -> Self {
        Self {
            id,
            parent: None,
            owner: None,
            mode: ObjectMode::Standalone,
            replicated_parent: None,
            pending_mask: DeltaMask::empty(),
            behavior,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    pub(crate) fn set_parent_unchecked(&mut self, parent: Option<ObjectId>) {
        self.parent = parent;
    }

    pub fn owner(&self) -> Option<ConnectionId> {
        self.owner
    }

    pub fn set_owner(&mut self, owner: Option<ConnectionId>) {
        self.owner = owner;
    }

    pub fn mode(&self) -> ObjectMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ObjectMode) -> Result<(), ObjectError> {
        if !self.mode.can_transition_to(mode) {
            return Err(ObjectError::InvalidModeTransition {
                id: self.id,
                from: self.mode,
                to: mode,
            });
        }
        self.mode = mode;
        Ok(())
    }

    pub fn type_tag(&self) -> TypeTag {
        self.behavior.type_tag()
    }

    pub fn behavior(&self) -> &dyn ReplicatedObject {
        self.behavior.as_ref()
    }

    pub fn behavior_mut(&mut self) -> &mut dyn ReplicatedObject {
        self.behavior.as_mut()
    }

    pub fn downcast_ref<T: ReplicatedObject>(&self) -> Option<&T> {
        self.behavior.as_any().downcast_ref()
    }

    pub fn downcast_mut<T: ReplicatedObject>(&mut self) -> Option<&mut T> {
        self.behavior.as_any_mut().downcast_mut()
    }

    pub fn initialize_on_authority(&mut self) -> Result<(), ObjectError> {
        self.set_mode(ObjectMode::Authority)?;
        self.replicated_parent = self.parent;
        self.behavior.initialize_on_authority();
        Ok(())
    }

    pub fn relevance_for(&self, connection: ConnectionId) -> Relevance {
        self.behavior.relevance_for(connection)
    }

    pub fn write_snapshot(&self, frame: NetworkFrame, out: &mut ByteWriter) {
        out.write_object_id(self.parent);
        self.behavior.write_snapshot(frame, out);
    }

    pub fn read_snapshot(
        &mut self,
        frame: NetworkFrame,
        input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        self.parent = input.read_object_id()?;
        self.behavior.read_snapshot(frame, input)
    }

    pub fn prepare_reliable_delta(&mut self, frame: NetworkFrame) -> bool {
        let mut mask = DeltaMask::empty();
        if self.parent != self.replicated_parent {
            mask |= DeltaMask::PARENT;
        }
        if self.behavior.prepare_reliable_delta(frame) {
            mask |= DeltaMask::BODY;
        }
        self.pending_mask = mask;
        !mask.is_empty()
    }

    pub fn write_reliable_delta(&mut self, frame: NetworkFrame, out: &mut ByteWriter) {
        let mask = std::mem::take(&mut self.pending_mask);
        out.write_u8(mask.bits());
        if mask.contains(DeltaMask::PARENT) {
            out.write_object_id(self.parent);
            self.replicated_parent = self.parent;
        }
        if mask.contains(DeltaMask::BODY) {
            self.behavior.write_reliable_delta(frame, out);
        }
    }

    pub fn read_reliable_delta(
        &mut self,
        frame: NetworkFrame,
        input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        let mask = DeltaMask::from_bits_truncate(input.read_u8()?);
        if mask.contains(DeltaMask::PARENT) {
            self.parent = input.read_object_id()?;
        }
        if mask.contains(DeltaMask::BODY) {
            self.behavior.read_reliable_delta(frame, input)?;
        }
        Ok(())
    }

    pub fn prepare_unreliable_delta(&mut self, frame: NetworkFrame) -> bool {
        self.behavior.prepare_unreliable_delta(frame)
    }

    pub fn write_unreliable_delta(&self, frame: NetworkFrame, out: &mut ByteWriter) {
        self.behavior.write_unreliable_delta(frame, out);
    }

    pub fn read_unreliable_delta(
        &mut self,
        frame: NetworkFrame,
        input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        self.behavior.read_unreliable_delta(frame, input)
    }

    /// Writes feedback if this owned object has any for `frame`.
    pub fn write_feedback(&mut self, frame: NetworkFrame, out: &mut ByteWriter) -> bool {
        if self.mode != ObjectMode::ObserverOwned || !self.behavior.prepare_feedback(frame) {
            return false;
        }
        self.behavior.write_feedback(frame, out);
        true
    }

    pub fn read_feedback(
        &mut self,
        frame: NetworkFrame,
        input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        self.behavior.read_feedback(frame, input)
    }

    pub fn interpolate_state(&mut self, time: NetworkTime, is_new_frame: bool) {
        self.behavior.interpolate_state(time, is_new_frame);
    }

    pub(crate) fn detach(&mut self) {
        self.behavior.prepare_to_remove();
        self.mode = ObjectMode::Standalone;
    }
}
