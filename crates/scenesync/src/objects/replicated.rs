use std::any::Any;
use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::net::{ByteReader, ByteWriter, CodecError, ConnectionId};
use crate::time::{NetworkFrame, NetworkTime};

/// 32-bit FNV-1a hash of a type name, used to pick a constructor on observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeTag(u32);

impl TypeTag {
    pub const fn of(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash: u32 = 0x811C_9DC5;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(0x0100_0193);
            i += 1;
        }
        Self(hash)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn to_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// How a connection should see an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    Irrelevant,
    /// Replicated, but unreliable deltas are never sent.
    NoPeriodicUpdates,
    /// Unreliable deltas go out on frames divisible by the period.
    PeriodicUpdates(NonZeroU32),
}

impl Relevance {
    pub const ALWAYS: Relevance = Relevance::PeriodicUpdates(NonZeroU32::MIN);

    pub fn every(period: u32) -> Relevance {
        NonZeroU32::new(period).map_or(Relevance::ALWAYS, Relevance::PeriodicUpdates)
    }

    pub fn is_relevant(self) -> bool {
        self != Relevance::Irrelevant
    }

    pub fn sends_unreliable_on(self, frame: NetworkFrame) -> bool {
        match self {
            Relevance::PeriodicUpdates(period) => frame.rem_euclid(period.get() as i64) == 0,
            _ => false,
        }
    }
}

/// Behaviour of a replicated object.
///
/// Authority hooks encode state, observer hooks decode it. Every method has a
/// no-op default so a type only implements what it replicates. `prepare_*`
/// consumes the dirty state for the frame and is always followed by the
/// matching `write_*` when it returns true.
pub trait ReplicatedObject: Any + Send {
    fn type_tag(&self) -> TypeTag;

    fn initialize_on_authority(&mut self) {}

    fn relevance_for(&self, _connection: ConnectionId) -> Relevance {
        Relevance::ALWAYS
    }

    fn write_snapshot(&self, _frame: NetworkFrame, _out: &mut ByteWriter) {}

    fn read_snapshot(
        &mut self,
        _frame: NetworkFrame,
        _input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    fn prepare_reliable_delta(&mut self, _frame: NetworkFrame) -> bool {
        false
    }

    fn write_reliable_delta(&self, _frame: NetworkFrame, _out: &mut ByteWriter) {}

    fn read_reliable_delta(
        &mut self,
        _frame: NetworkFrame,
        _input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    fn prepare_unreliable_delta(&mut self, _frame: NetworkFrame) -> bool {
        false
    }

    fn write_unreliable_delta(&self, _frame: NetworkFrame, _out: &mut ByteWriter) {}

    fn read_unreliable_delta(
        &mut self,
        _frame: NetworkFrame,
        _input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// Observer side, owned objects only.
    fn prepare_feedback(&mut self, _frame: NetworkFrame) -> bool {
        false
    }

    fn write_feedback(&self, _frame: NetworkFrame, _out: &mut ByteWriter) {}

    /// Authority side, after ownership has been verified.
    fn read_feedback(
        &mut self,
        _frame: NetworkFrame,
        _input: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    fn interpolate_state(&mut self, _time: NetworkTime, _is_new_frame: bool) {}

    fn prepare_to_remove(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
