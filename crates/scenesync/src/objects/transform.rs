use std::any::Any;
use std::collections::HashMap;

use glam::{Quat, Vec3};

use crate::net::{ByteReader, ByteWriter, CodecError, ConnectionId};
use crate::time::{frame_delta, NetworkFrame, NetworkTime};

use super::replicated::{Relevance, ReplicatedObject, TypeTag};
use super::trace::ValueTrace;

const TRACE_CAPACITY: usize = 32;

/// Default replicated object: a named transform.
///
/// Name and scale travel as reliable deltas, position and rotation as
/// unreliable ones. Observers keep a short trace of received transforms and
/// render an interpolated pose. An owned copy can push a movement input back
/// to the authority through feedback.
#[derive(Debug, Clone)]
pub struct TransformObject {
    name: String,
    position: Vec3,
    rotation: Quat,
    scale: Vec3,
    properties_dirty: bool,
    transform_dirty: bool,
    relevance: Relevance,
    relevance_overrides: HashMap<ConnectionId, Relevance>,
    position_trace: ValueTrace<Vec3>,
    rotation_trace: ValueTrace<Quat>,
    pending_input: Option<Vec3>,
    latest_input: Option<(NetworkFrame, Vec3)>,
}

impl Default for TransformObject {
    fn default() -> Self {
        Self::new("")
    }
}

impl TransformObject {
    pub const TYPE_TAG: TypeTag = TypeTag::of("TransformObject");

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            properties_dirty: false,
            transform_dirty: false,
            relevance: Relevance::ALWAYS,
            relevance_overrides: HashMap::new(),
            position_trace: ValueTrace::new(TRACE_CAPACITY),
            rotation_trace: ValueTrace::new(TRACE_CAPACITY),
            pending_input: None,
            latest_input: None,
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.properties_dirty = true;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        if self.position != position {
            self.position = position;
            self.transform_dirty = true;
        }
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        if self.rotation != rotation {
            self.rotation = rotation;
            self.transform_dirty = true;
        }
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.properties_dirty = true;
    }

    pub fn set_relevance(&mut self, relevance: Relevance) {
        self.relevance = relevance;
    }

    pub fn set_relevance_for(&mut self, connection: ConnectionId, relevance: Relevance) {
        self.relevance_overrides.insert(connection, relevance);
    }

    /// Movement input an owning observer wants applied. Sent every frame
    /// until cleared.
    pub fn set_input(&mut self, input: Option<Vec3>) {
        self.pending_input = input;
    }

    /// Most recent input accepted from the owner, with its frame.
    pub fn latest_input(&self) -> Option<(NetworkFrame, Vec3)> {
        self.latest_input
    }

    pub fn take_input(&mut self) -> Option<(NetworkFrame, Vec3)> {
        self.latest_input.take()
    }

    pub fn received_frames(&self) -> usize {
        self.position_trace.len()
    }

    fn record(&mut self, frame: NetworkFrame) {
        self.position_trace.set(frame, self.position);
        self.rotation_trace.set(frame, self.rotation);
    }
}

impl ReplicatedObject for TransformObject {
    fn type_tag(&self) -> TypeTag {
        Self::TYPE_TAG
    }

    fn initialize_on_authority(&mut self) {
        self.properties_dirty = false;
        self.transform_dirty = false;
    }

    fn relevance_for(&self, connection: ConnectionId) -> Relevance {
        self.relevance_overrides
            .get(&connection)
            .copied()
            .unwrap_or(self.relevance)
    }

    fn write_snapshot(&self, _frame: NetworkFrame, out: &mut ByteWriter) {
        out.write_string(&self.name);
        out.write_vec3(self.position);
        out.write_quat(self.rotation);
        out.write_vec3(self.scale);
    }

    fn read_snapshot(
        &mut self,
        frame: NetworkFrame,
        input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        self.name = input.read_string()?;
        self.position = input.read_vec3()?;
        self.rotation = input.read_quat()?;
        self.scale = input.read_vec3()?;
        self.record(frame);
        Ok(())
    }

    fn prepare_reliable_delta(&mut self, _frame: NetworkFrame) -> bool {
        std::mem::take(&mut self.properties_dirty)
    }

    fn write_reliable_delta(&self, _frame: NetworkFrame, out: &mut ByteWriter) {
        out.write_string(&self.name);
        out.write_vec3(self.scale);
    }

    fn read_reliable_delta(
        &mut self,
        _frame: NetworkFrame,
        input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        self.name = input.read_string()?;
        self.scale = input.read_vec3()?;
        Ok(())
    }

    fn prepare_unreliable_delta(&mut self, _frame: NetworkFrame) -> bool {
        std::mem::take(&mut self.transform_dirty)
    }

    fn write_unreliable_delta(&self, _frame: NetworkFrame, out: &mut ByteWriter) {
        out.write_vec3(self.position);
        out.write_quat(self.rotation);
    }

    fn read_unreliable_delta(
        &mut self,
        frame: NetworkFrame,
        input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        let position = input.read_vec3()?;
        let rotation = input.read_quat()?;
        self.position_trace.set(frame, position);
        self.rotation_trace.set(frame, rotation);
        Ok(())
    }

    fn prepare_feedback(&mut self, _frame: NetworkFrame) -> bool {
        self.pending_input.is_some()
    }

    fn write_feedback(&self, _frame: NetworkFrame, out: &mut ByteWriter) {
        out.write_vec3(self.pending_input.unwrap_or(Vec3::ZERO));
    }

    fn read_feedback(
        &mut self,
        frame: NetworkFrame,
        input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        let value = input.read_vec3()?;
        let is_newer = self
            .latest_input
            .is_none_or(|(latest, _)| frame_delta(frame, latest) > 0);
        if is_newer {
            self.latest_input = Some((frame, value));
        }
        Ok(())
    }

    fn interpolate_state(&mut self, time: NetworkTime, _is_new_frame: bool) {
        if let Some(position) = self.position_trace.sample(time) {
            self.position = position;
        }
        if let Some(rotation) = self.rotation_trace.sample(time) {
            self.rotation = rotation;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_round_trip() {
        let mut source = TransformObject::new("crate").with_position(Vec3::new(1.0, 2.0, 3.0));
        source.set_scale(Vec3::splat(2.0));

        let mut out = ByteWriter::new();
        source.write_snapshot(7, &mut out);

        let mut replica = TransformObject::default();
        replica
            .read_snapshot(7, &mut ByteReader::new(out.as_slice()))
            .unwrap();
        assert_eq!(replica.name(), "crate");
        assert_eq!(replica.position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(replica.scale(), Vec3::splat(2.0));
    }

    #[test]
    fn test_dirty_flags_consumed_once() {
        let mut source = TransformObject::new("a");
        source.initialize_on_authority();
        assert!(!source.prepare_unreliable_delta(1));

        source.set_position(Vec3::X);
        assert!(source.prepare_unreliable_delta(2));
        assert!(!source.prepare_unreliable_delta(3));

        source.set_name("b");
        assert!(source.prepare_reliable_delta(4));
        assert!(!source.prepare_reliable_delta(5));
    }

    #[test]
    fn test_observer_interpolates_between_updates() {
        let mut source = TransformObject::new("a");
        let mut replica = TransformObject::default();

        for (frame, x) in [(10, 0.0), (11, 1.0)] {
            source.set_position(Vec3::new(x, 0.0, 0.0));
            let mut out = ByteWriter::new();
            source.write_unreliable_delta(frame, &mut out);
            replica
                .read_unreliable_delta(frame, &mut ByteReader::new(out.as_slice()))
                .unwrap();
        }

        replica.interpolate_state(NetworkTime::new(10, 0.25), false);
        assert!((replica.position().x - 0.25).abs() < 1e-5);
        assert_eq!(replica.received_frames(), 2);
    }

    #[test]
    fn test_feedback_keeps_newest_frame() {
        let mut observer = TransformObject::new("a");
        observer.set_input(Some(Vec3::Z));
        assert!(observer.prepare_feedback(3));
        let mut newer = ByteWriter::new();
        observer.write_feedback(3, &mut newer);

        observer.set_input(Some(Vec3::X));
        let mut older = ByteWriter::new();
        observer.write_feedback(2, &mut older);

        let mut authority = TransformObject::new("a");
        authority
            .read_feedback(3, &mut ByteReader::new(newer.as_slice()))
            .unwrap();
        authority
            .read_feedback(2, &mut ByteReader::new(older.as_slice()))
            .unwrap();
        assert_eq!(authority.latest_input(), Some((3, Vec3::Z)));
    }

    #[test]
    fn test_relevance_override() {
        let mut object = TransformObject::new("a");
        let first = ConnectionId::new(1).unwrap();
        let second = ConnectionId::new(2).unwrap();
        object.set_relevance_for(second, Relevance::Irrelevant);

        assert_eq!(object.relevance_for(first), Relevance::ALWAYS);
        assert_eq!(object.relevance_for(second), Relevance::Irrelevant);
    }
}
