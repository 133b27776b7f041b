use std::collections::BTreeSet;

use glam::{Quat, Vec3};

use scenesync::{ConnectionId, ObjectId, Relevance, RegistryError, Scene, TransformObject};

const ORBIT_RADIUS: f32 = 8.0;
const ORBIT_SPEED: f32 = 0.6;
const MOVE_SPEED: f32 = 5.0;

/// Spawns the authority population: `shared` objects nobody owns, then
/// `per_owner` objects for each observer.
pub fn spawn_objects(
    scene: &mut Scene,
    shared: usize,
    owners: &[ConnectionId],
    per_owner: usize,
) -> Result<Vec<ObjectId>, RegistryError> {
    let mut spawned = Vec::with_capacity(shared + owners.len() * per_owner);

    for i in 0..shared {
        let mut object = TransformObject::new(format!("orbiter-{}", i));
        if i % 2 == 1 {
            object.set_relevance(Relevance::every(2));
        }
        spawned.push(scene.spawn(Box::new(object))?);
    }

    for &owner in owners {
        for i in 0..per_owner {
            let object = TransformObject::new(format!("avatar-{}-{}", owner.to_raw(), i))
                .with_position(Vec3::new(owner.to_raw() as f32 * 2.0, 0.0, 0.0));
            spawned.push(scene.spawn_owned(Box::new(object), owner)?);
        }
    }
    Ok(spawned)
}

/// Advances every authority object by one follower tick. Owned objects move
/// by the latest input their owner sent, the rest orbit the origin.
pub fn simulate_scene(scene: &mut Scene, dt: f32, time: f32) -> usize {
    let mut inputs_applied = 0;
    for object in scene.objects_mut() {
        let id = object.id();
        let owned = object.owner().is_some();
        let Some(transform) = object.downcast_mut::<TransformObject>() else {
            continue;
        };

        if owned {
            if let Some((_, input)) = transform.take_input() {
                let velocity = input.normalize_or_zero() * MOVE_SPEED;
                transform.set_position(transform.position() + velocity * dt);
                inputs_applied += 1;
            }
            continue;
        }

        let phase = id.index() as f32 * 0.7;
        let angle = time * ORBIT_SPEED + phase;
        let (sin, cos) = angle.sin_cos();
        transform.set_position(Vec3::new(cos, 0.0, sin) * ORBIT_RADIUS);
        transform.set_rotation(Quat::from_rotation_y(-angle));
    }
    inputs_applied
}

/// Points every object an observer owns in a slowly turning direction.
pub fn steer_owned(scene: &mut Scene, owned: &BTreeSet<ObjectId>, time: f32) {
    let (sin, cos) = (time * 0.25).sin_cos();
    let input = Vec3::new(cos, 0.0, sin);
    for &id in owned {
        if let Some(transform) = scene
            .get_mut(id)
            .and_then(|object| object.downcast_mut::<TransformObject>())
        {
            transform.set_input(Some(input));
        }
    }
}
