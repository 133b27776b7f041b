use std::collections::VecDeque;

use super::id::{next_generation, ObjectId, MAX_INDICES};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("object index space exhausted ({capacity} slots in use)")]
    IndexSpaceExhausted { capacity: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(ObjectId),
    Removed(ObjectId),
}

#[derive(Debug)]
struct Slot<T> {
    generation: u8,
    value: Option<T>,
}

/// Generational slot table.
///
/// Freed indices are reused in FIFO order so a stale handle has to survive a
/// full trip through the free list before its index is handed out again; the
/// generation check catches it either way.
#[derive(Debug)]
pub struct ObjectRegistry<T> {
    slots: Vec<Slot<T>>,
    free: VecDeque<u32>,
    len: usize,
    capacity: u32,
    events: Vec<RegistryEvent>,
}

impl<T> Default for ObjectRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectRegistry<T> {
    pub fn new() -> Self {
        Self::with_capacity_limit(MAX_INDICES)
    }

    pub fn with_capacity_limit(capacity: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: VecDeque::new(),
            len: 0,
            capacity: capacity.min(MAX_INDICES),
            events: Vec::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> Result<ObjectId, RegistryError> {
        self.insert_with(|_| value)
    }

    pub fn insert_with(
        &mut self,
        make: impl FnOnce(ObjectId) -> T,
    ) -> Result<ObjectId, RegistryError> {
        let index = match self.free.pop_front() {
            Some(index) => index,
            None => {
                let index = self.slots.len() as u32;
                if index >= self.capacity {
                    log::error!("Cannot allocate object: {} slots in use", self.len);
                    return Err(RegistryError::IndexSpaceExhausted {
                        capacity: self.capacity,
                    });
                }
                self.slots.push(Slot {
                    generation: 1,
                    value: None,
                });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        let id = ObjectId::new(index, slot.generation).ok_or(RegistryError::IndexSpaceExhausted {
            capacity: self.capacity,
        })?;
        slot.value = Some(make(id));
        self.len += 1;
        self.events.push(RegistryEvent::Added(id));
        Ok(id)
    }

    /// Places `value` exactly at `id`, as dictated by a remote authority.
    /// Returns whatever occupied the slot before, regardless of its generation.
    pub fn insert_at(&mut self, id: ObjectId, value: T) -> Option<T> {
        let index = id.index();
        while self.slots.len() <= index as usize {
            let new_index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 1,
                value: None,
            });
            if new_index != index {
                self.free.push_back(new_index);
            }
        }
        self.free.retain(|&free_index| free_index != index);

        let slot = &mut self.slots[index as usize];
        let previous = slot.value.replace(value);
        slot.generation = id.generation();
        if previous.is_none() {
            self.len += 1;
        }
        self.events.push(RegistryEvent::Added(id));
        previous
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<T> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = next_generation(slot.generation);
        self.free.push_back(id.index());
        self.len -= 1;
        self.events.push(RegistryEvent::Removed(id));
        Some(value)
    }

    pub fn get(&self, id: ObjectId) -> Option<&T> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    /// Unchecked lookup by index; ignores the generation.
    pub fn get_by_index(&self, index: u32) -> Option<(ObjectId, &T)> {
        let slot = self.slots.get(index as usize)?;
        let value = slot.value.as_ref()?;
        let id = ObjectId::new(index, slot.generation)?;
        Some((id, value))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the highest index ever used.
    pub fn index_upper_bound(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let value = slot.value.as_ref()?;
            Some((ObjectId::new(index as u32, slot.generation)?, value))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ObjectId, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            let value = slot.value.as_mut()?;
            Some((ObjectId::new(index as u32, generation)?, value))
        })
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn drain_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }
}
