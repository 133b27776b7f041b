use std::collections::HashMap;
use std::fmt;

use super::replicated::{ReplicatedObject, TypeTag};
use super::transform::TransformObject;

type Constructor = Box<dyn Fn() -> Box<dyn ReplicatedObject> + Send + Sync>;

/// Builds observer-side objects from the type tag carried in `AddObjects`.
#[derive(Default)]
pub struct ObjectFactory {
    constructors: HashMap<TypeTag, Constructor>,
}

impl fmt::Debug for ObjectFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

impl ObjectFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory that knows the built-in object types.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register::<TransformObject>();
        factory
    }

    pub fn register<T: ReplicatedObject + Default>(&mut self) -> TypeTag {
        let tag = T::default().type_tag();
        self.register_with(tag, || Box::new(T::default()));
        tag
    }

    pub fn register_with(
        &mut self,
        tag: TypeTag,
        constructor: impl Fn() -> Box<dyn ReplicatedObject> + Send + Sync + 'static,
    ) {
        if self.constructors.insert(tag, Box::new(constructor)).is_some() {
            log::warn!("Object type {} registered twice", tag);
        }
    }

    pub fn create(&self, tag: TypeTag) -> Option<Box<dyn ReplicatedObject>> {
        self.constructors.get(&tag).map(|constructor| constructor())
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.constructors.contains_key(&tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_registered_types() {
        let factory = ObjectFactory::with_defaults();
        let object = factory.create(TransformObject::TYPE_TAG).unwrap();
        assert_eq!(object.type_tag(), TransformObject::TYPE_TAG);
        assert!(factory.create(TypeTag::of("Unknown")).is_none());
    }
}
