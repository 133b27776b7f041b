use std::collections::HashMap;

use crate::net::ConnectionId;

use super::id::ObjectId;
use super::network_object::{NetworkObject, ObjectError};
use super::registry::{ObjectRegistry, RegistryError, RegistryEvent};
use super::replicated::ReplicatedObject;

/// The set of network objects one process knows about.
#[derive(Debug, Default)]
pub struct Scene {
    objects: ObjectRegistry<NetworkObject>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_limit(capacity: u32) -> Self {
        Self {
            objects: ObjectRegistry::with_capacity_limit(capacity),
        }
    }

    pub fn spawn(&mut self, behavior: Box<dyn ReplicatedObject>) -> Result<ObjectId, RegistryError> {
        self.objects
            .insert_with(|id| NetworkObject::new(id, behavior))
    }

    pub fn spawn_owned(
        &mut self,
        behavior: Box<dyn ReplicatedObject>,
        owner: ConnectionId,
    ) -> Result<ObjectId, RegistryError> {
        let id = self.spawn(behavior)?;
        if let Some(object) = self.objects.get_mut(id) {
            object.set_owner(Some(owner));
        }
        Ok(id)
    }

    /// Puts a remotely created object at the id its authority assigned.
    /// Any previous occupant of the slot is removed first and returned.
    pub fn insert_replicated(&mut self, object: NetworkObject) -> Option<NetworkObject> {
        let id = object.id();
        if let Some((existing, _)) = self.objects.get_by_index(id.index()) {
            let previous = self.despawn(existing);
            self.objects.insert_at(id, object);
            return previous;
        }
        self.objects.insert_at(id, object)
    }

    /// Removes an object. Its children are reparented to its own parent.
    ///
    /// Children are found by scanning every live object, so each call is
    /// linear in the size of the scene.
    pub fn despawn(&mut self, id: ObjectId) -> Option<NetworkObject> {
        let grandparent = self.objects.get(id)?.parent();
        for child in self.children_of(id) {
            if let Some(object) = self.objects.get_mut(child) {
                object.set_parent_unchecked(grandparent);
            }
        }

        let mut object = self.objects.remove(id)?;
        object.detach();
        Some(object)
    }

    pub fn set_parent(&mut self, id: ObjectId, parent: Option<ObjectId>) -> Result<(), ObjectError> {
        if !self.objects.contains(id) {
            return Err(ObjectError::NotFound(id));
        }
        if let Some(parent) = parent {
            let mut cursor = Some(parent);
            while let Some(ancestor) = cursor {
                if ancestor == id {
                    return Err(ObjectError::ParentCycle { child: id, parent });
                }
                cursor = self
                    .objects
                    .get(ancestor)
                    .ok_or(ObjectError::NotFound(ancestor))?
                    .parent();
            }
        }

        if let Some(object) = self.objects.get_mut(id) {
            object.set_parent_unchecked(parent);
        }
        Ok(())
    }

    pub fn set_owner(&mut self, id: ObjectId, owner: Option<ConnectionId>) -> Result<(), ObjectError> {
        let object = self.objects.get_mut(id).ok_or(ObjectError::NotFound(id))?;
        object.set_owner(owner);
        Ok(())
    }

    pub fn get(&self, id: ObjectId) -> Option<&NetworkObject> {
        self.objects.get(id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut NetworkObject> {
        self.objects.get_mut(id)
    }

    pub fn get_by_index(&self, index: u32) -> Option<&NetworkObject> {
        self.objects.get_by_index(index).map(|(_, object)| object)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn index_upper_bound(&self) -> usize {
        self.objects.index_upper_bound()
    }

    pub fn objects(&self) -> impl Iterator<Item = &NetworkObject> {
        self.objects.iter().map(|(_, object)| object)
    }

    pub fn objects_mut(&mut self) -> impl Iterator<Item = &mut NetworkObject> {
        self.objects.iter_mut().map(|(_, object)| object)
    }

    pub fn children_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|(_, object)| object.parent() == Some(id))
            .map(|(child, _)| child)
            .collect()
    }

    pub fn drain_events(&mut self) -> Vec<RegistryEvent> {
        self.objects.drain_events()
    }

    /// Every live object, parents before their children.
    pub fn sorted_by_depth(&self) -> Vec<ObjectId> {
        let mut depths: HashMap<ObjectId, usize> = HashMap::with_capacity(self.objects.len());
        let mut sorted: Vec<(usize, ObjectId)> = Vec::with_capacity(self.objects.len());

        for (id, _) in self.objects.iter() {
            let depth = self.depth_of(id, &mut depths);
            sorted.push((depth, id));
        }
        sorted.sort_by_key(|&(depth, id)| (depth, id.index()));
        sorted.into_iter().map(|(_, id)| id).collect()
    }

    fn depth_of(&self, id: ObjectId, depths: &mut HashMap<ObjectId, usize>) -> usize {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        let mut base = 0;
        while let Some(current) = cursor {
            if let Some(&known) = depths.get(&current) {
                base = known + 1;
                break;
            }
            if chain.len() > self.objects.len() {
                break;
            }
            chain.push(current);
            cursor = self.objects.get(current).and_then(NetworkObject::parent);
        }

        for (offset, node) in chain.iter().rev().enumerate() {
            depths.insert(*node, base + offset);
        }
        depths.get(&id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use super::*;
    use crate::objects::{ObjectMode, TypeTag};

    struct Marker;

    impl ReplicatedObject for Marker {
        fn type_tag(&self) -> TypeTag {
            TypeTag::of("Marker")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn spawn(scene: &mut Scene) -> ObjectId {
        scene.spawn(Box::new(Marker)).unwrap()
    }

    #[test]
    fn test_despawn_reparents_children() {
        let mut scene = Scene::new();
        let root = spawn(&mut scene);
        let middle = spawn(&mut scene);
        let leaf = spawn(&mut scene);
        scene.set_parent(middle, Some(root)).unwrap();
        scene.set_parent(leaf, Some(middle)).unwrap();

        let removed = scene.despawn(middle).unwrap();
        assert_eq!(removed.mode(), ObjectMode::Standalone);
        assert_eq!(scene.get(leaf).unwrap().parent(), Some(root));
        assert!(scene.get(middle).is_none());
    }

    #[test]
    fn test_cycles_rejected() {
        let mut scene = Scene::new();
        let a = spawn(&mut scene);
        let b = spawn(&mut scene);
        scene.set_parent(b, Some(a)).unwrap();

        assert_eq!(
            scene.set_parent(a, Some(b)),
            Err(ObjectError::ParentCycle { child: a, parent: b })
        );
        assert_eq!(
            scene.set_parent(a, Some(a)),
            Err(ObjectError::ParentCycle { child: a, parent: a })
        );
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut scene = Scene::new();
        let a = spawn(&mut scene);
        let b = spawn(&mut scene);
        scene.despawn(b);
        assert_eq!(scene.set_parent(a, Some(b)), Err(ObjectError::NotFound(b)));
    }

    #[test]
    fn test_sorted_parents_first() {
        let mut scene = Scene::new();
        let leaf = spawn(&mut scene);
        let middle = spawn(&mut scene);
        let root = spawn(&mut scene);
        let lone = spawn(&mut scene);
        scene.set_parent(middle, Some(root)).unwrap();
        scene.set_parent(leaf, Some(middle)).unwrap();

        let sorted = scene.sorted_by_depth();
        let position = |id| sorted.iter().position(|&x| x == id).unwrap();
        assert_eq!(sorted.len(), 4);
        assert!(position(root) < position(middle));
        assert!(position(middle) < position(leaf));
        assert!(position(lone) < position(middle));
    }

    #[test]
    fn test_insert_replicated_replaces_stale_slot() {
        let mut scene = Scene::new();
        let old = ObjectId::new(0, 1).unwrap();
        let new = ObjectId::new(0, 2).unwrap();
        scene.insert_replicated(NetworkObject::new(old, Box::new(Marker)));

        let previous = scene.insert_replicated(NetworkObject::new(new, Box::new(Marker)));
        assert_eq!(previous.map(|o| o.id()), Some(old));
        assert!(scene.get(old).is_none());
        assert!(scene.get(new).is_some());
        assert_eq!(scene.len(), 1);
    }
}
