use glam::Vec3;

pub const GRAVITY: Vec3 = Vec3::new(0.0, -9.82, 0.0);

/// The player body: a vertical capsule footprint (XZ circle of `radius`,
/// `half_height` above and below the center) integrated with a fixed
/// discrete step. Created once with its controller, destroyed with it.
#[derive(Debug, Clone, Copy)]
pub struct RigidBody {
    pub position: Vec3,
    pub velocity: Vec3,
    pub mass: f32,
    pub radius: f32,
    pub half_height: f32,
}

impl RigidBody {
    pub fn new(position: Vec3, mass: f32, radius: f32, height: f32) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            mass,
            radius,
            half_height: height * 0.5,
        }
    }
}

/// Static, immovable axis-aligned box collider.
#[derive(Debug, Clone, Copy)]
pub struct StaticBox {
    pub center: Vec3,
    pub half_extents: Vec3,
    pub friction: f32,
}

/// Minimal physics world: gravity, a static ground plane at y = 0, and a set
/// of static boxes. The step is not reentrant and must not run concurrently
/// with itself; the animation loop is its only caller.
#[derive(Debug)]
pub struct PhysicsWorld {
    pub gravity: Vec3,
    ground_y: f32,
    statics: Vec<StaticBox>,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        Self {
            gravity: GRAVITY,
            ground_y: 0.0,
            statics: Vec::new(),
        }
    }

    pub fn add_static_box(&mut self, center: Vec3, half_extents: Vec3, friction: f32) {
        self.statics.push(StaticBox {
            center,
            half_extents,
            friction,
        });
    }

    /// One discrete integration step: gravity, position advance, then
    /// positional resolution against the ground plane and every static box.
    pub fn step(&self, body: &mut RigidBody, delta_time: f32) {
        let force = self.gravity * body.mass;
        body.velocity += force * (delta_time / body.mass);
        body.position += body.velocity * delta_time;

        self.resolve_ground(body);
        for collider in &self.statics {
            resolve_box(body, collider);
        }
    }

    fn resolve_ground(&self, body: &mut RigidBody) {
        let floor = self.ground_y + body.half_height;
        if body.position.y < floor {
            body.position.y = floor;
            if body.velocity.y < 0.0 {
                body.velocity.y = 0.0;
            }
        }
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Pushes the body's XZ footprint out of a static box and removes the
/// velocity component driving it in, with optional tangential friction
/// damping. Vertical spans that do not overlap never collide.
fn resolve_box(body: &mut RigidBody, collider: &StaticBox) {
    let body_low = body.position.y - body.half_height;
    let body_high = body.position.y + body.half_height;
    let box_low = collider.center.y - collider.half_extents.y;
    let box_high = collider.center.y + collider.half_extents.y;
    if body_high <= box_low || body_low >= box_high {
        return;
    }

    let closest_x = body.position.x.clamp(
        collider.center.x - collider.half_extents.x,
        collider.center.x + collider.half_extents.x,
    );
    let closest_z = body.position.z.clamp(
        collider.center.z - collider.half_extents.z,
        collider.center.z + collider.half_extents.z,
    );
    let dx = body.position.x - closest_x;
    let dz = body.position.z - closest_z;
    let dist_sq = dx * dx + dz * dz;
    if dist_sq >= body.radius * body.radius {
        return;
    }

    let normal = if dist_sq > 1e-12 {
        let dist = dist_sq.sqrt();
        let normal = Vec3::new(dx / dist, 0.0, dz / dist);
        body.position += normal * (body.radius - dist);
        normal
    } else {
        // Center inside the box: escape along the shallower horizontal axis.
        let pen_x = collider.half_extents.x + body.radius
            - (body.position.x - collider.center.x).abs();
        let pen_z = collider.half_extents.z + body.radius
            - (body.position.z - collider.center.z).abs();
        if pen_x < pen_z {
            let sign = (body.position.x - collider.center.x).signum();
            body.position.x += sign * pen_x;
            Vec3::new(sign, 0.0, 0.0)
        } else {
            let sign = (body.position.z - collider.center.z).signum();
            body.position.z += sign * pen_z;
            Vec3::new(0.0, 0.0, sign)
        }
    };

    let into_surface = body.velocity.dot(normal);
    if into_surface < 0.0 {
        body.velocity -= normal * into_surface;
        if collider.friction > 0.0 {
            let damp = (1.0 - collider.friction).clamp(0.0, 1.0);
            body.velocity.x *= damp;
            body.velocity.z *= damp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> RigidBody {
        RigidBody::new(Vec3::new(0.0, 1.5, 0.0), 75.0, 0.25, 0.6)
    }

    #[test]
    fn gravity_pulls_a_falling_body_down() {
        let world = PhysicsWorld::new();
        let mut body = player();
        world.step(&mut body, 0.016);
        assert!(body.velocity.y < 0.0);
        assert!(body.position.y < 1.5);
    }

    #[test]
    fn ground_plane_stops_the_fall() {
        let world = PhysicsWorld::new();
        let mut body = player();
        for _ in 0..1_000 {
            world.step(&mut body, 0.016);
        }
        assert!((body.position.y - body.half_height).abs() < 1e-5);
        assert_eq!(body.velocity.y, 0.0);
    }

    #[test]
    fn wall_blocks_a_driven_body() {
        let mut world = PhysicsWorld::new();
        // Wall face at x = 4.5, matching the controller's wall shape.
        world.add_static_box(Vec3::new(5.0, 5.0, 0.0), Vec3::new(0.5, 5.0, 5.0), 0.0);
        let mut body = player();
        for _ in 0..2_000 {
            body.velocity.x = 10.0;
            world.step(&mut body, 0.016);
        }
        assert!(body.position.x + body.radius <= 4.5 + 1e-4);
    }

    #[test]
    fn non_overlapping_heights_do_not_collide() {
        let mut world = PhysicsWorld::new();
        // A box floating well above the body.
        world.add_static_box(Vec3::new(0.0, 20.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 0.0);
        let mut body = player();
        let start = body.position;
        world.step(&mut body, 0.001);
        assert!((body.position.x - start.x).abs() < 1e-6);
        assert!((body.position.z - start.z).abs() < 1e-6);
    }
}
