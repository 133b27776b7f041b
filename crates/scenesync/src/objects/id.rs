use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

pub const INDEX_BITS: u32 = 24;
pub const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
pub const MAX_INDICES: u32 = 1 << INDEX_BITS;

/// Stable handle of a replicated object.
///
/// The low 24 bits select a registry slot, the high 8 bits carry the slot
/// generation. Generation zero is never handed out, so a valid id is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(NonZeroU32);

impl ObjectId {
    pub fn new(index: u32, generation: u8) -> Option<Self> {
        if index > INDEX_MASK || generation == 0 {
            return None;
        }
        NonZeroU32::new(((generation as u32) << INDEX_BITS) | index).map(Self)
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        let generation = (raw >> INDEX_BITS) as u8;
        if generation == 0 {
            return None;
        }
        NonZeroU32::new(raw).map(Self)
    }

    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0.get()
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0.get() & INDEX_MASK
    }

    #[inline]
    pub fn generation(self) -> u8 {
        (self.0.get() >> INDEX_BITS) as u8
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.index(), self.generation())
    }
}

/// Generation that follows `generation` once its slot is freed. Skips zero.
#[inline]
pub fn next_generation(generation: u8) -> u8 {
    match generation.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_and_unpack() {
        let id = ObjectId::new(0x00AB_CDEF, 7).unwrap();
        assert_eq!(id.index(), 0x00AB_CDEF);
        assert_eq!(id.generation(), 7);
        assert_eq!(ObjectId::from_raw(id.to_raw()), Some(id));
    }

    #[test]
    fn test_zero_is_invalid() {
        assert_eq!(ObjectId::from_raw(0), None);
        assert_eq!(ObjectId::new(5, 0), None);
        assert_eq!(ObjectId::from_raw(5), None);
        assert_eq!(ObjectId::new(MAX_INDICES, 1), None);
    }

    #[test]
    fn test_generation_wraps_without_zero() {
        assert_eq!(next_generation(1), 2);
        assert_eq!(next_generation(255), 1);
    }

    #[test]
    fn test_display() {
        let id = ObjectId::new(12, 3).unwrap();
        assert_eq!(id.to_string(), "#12:3");
    }
}
