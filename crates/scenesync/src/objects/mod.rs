mod factory;
mod id;
mod mode;
mod network_object;
mod registry;
mod replicated;
mod scene;
mod trace;
mod transform;

pub use factory::ObjectFactory;
pub use id::ObjectId;
pub use mode::ObjectMode;
pub use network_object::{DeltaMask, NetworkObject, ObjectError};
pub use registry::{ObjectRegistry, RegistryError, RegistryEvent};
pub use replicated::{Relevance, ReplicatedObject, TypeTag};
pub use scene::Scene;
pub use trace::{Interpolate, ValueTrace};
pub use transform::TransformObject;
