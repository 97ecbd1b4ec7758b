use glam::Vec3;

use crate::physics::{PhysicsWorld, RigidBody};

/// Pitch stops just short of straight up/down to avoid gimbal flip.
pub const MAX_PITCH: f32 = std::f32::consts::FRAC_PI_2 - 0.1;

/// Ground-contact proxy: jumping is allowed while the body sits below this
/// height. Not a true contact manifold, but the arena floor is flat.
const NEAR_GROUND_Y: f32 = 2.0;

const WALL_HEIGHT: f32 = 5.0;
const WALL_THICKNESS: f32 = 0.5;
const PLAYER_SPAWN: Vec3 = Vec3::new(1.0, 1.5, 0.0);

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub camera_height: f32,
    pub player_mass: f32,
    pub player_radius: f32,
    pub player_height: f32,
    pub move_speed: f32,
    pub jump_force: f32,
    pub mouse_sensitivity: f32,
    /// Half-extent of the square playable footprint bounded by the four
    /// invisible walls.
    pub grid_half_extent: f32,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            camera_height: 1.2,
            player_mass: 75.0,
            player_radius: 0.25,
            player_height: 0.6,
            move_speed: 2.0,
            jump_force: 8.0,
            mouse_sensitivity: 0.002,
            grid_half_extent: 10.0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MovementIntent {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
}

impl MovementIntent {
    /// Raw intent vector in camera-local space; forward is -z.
    fn direction(&self) -> Vec3 {
        Vec3::new(
            (self.right as i8 - self.left as i8) as f32,
            0.0,
            (self.back as i8 - self.forward as i8) as f32,
        )
    }
}

/// Camera pose produced by one controller update. Roll is always zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
}

/// First-person controller: a rigid body in a small physics world plus
/// yaw/pitch look state, driven by movement-intent flags and mouse deltas.
#[derive(Debug)]
pub struct FpsController {
    options: ControllerOptions,
    world: PhysicsWorld,
    body: RigidBody,
    pub intent: MovementIntent,
    yaw: f32,
    pitch: f32,
    can_jump: bool,
    pointer_locked: bool,
    /// Mirror of the body position for an external visual marker.
    pub position_marker: Option<Vec3>,
}

impl FpsController {
    pub fn new(options: ControllerOptions) -> Self {
        let mut world = PhysicsWorld::new();
        let half = options.grid_half_extent;
        // Four static walls closing the playable square; collision response
        // is entirely the physics world's push-out.
        let walls = [
            (Vec3::new(0.0, WALL_HEIGHT, -half), Vec3::new(half, WALL_HEIGHT, WALL_THICKNESS)),
            (Vec3::new(0.0, WALL_HEIGHT, half), Vec3::new(half, WALL_HEIGHT, WALL_THICKNESS)),
            (Vec3::new(-half, WALL_HEIGHT, 0.0), Vec3::new(WALL_THICKNESS, WALL_HEIGHT, half)),
            (Vec3::new(half, WALL_HEIGHT, 0.0), Vec3::new(WALL_THICKNESS, WALL_HEIGHT, half)),
        ];
        for (center, half_extents) in walls {
            world.add_static_box(center, half_extents, 0.0);
        }

        let body = RigidBody::new(
            PLAYER_SPAWN,
            options.player_mass,
            options.player_radius,
            options.player_height,
        );

        Self {
            options,
            world,
            body,
            intent: MovementIntent::default(),
            yaw: 0.0,
            pitch: 0.0,
            can_jump: false,
            pointer_locked: false,
            position_marker: None,
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn body_position(&self) -> Vec3 {
        self.body.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.body.velocity
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn can_jump(&self) -> bool {
        self.can_jump
    }

    pub fn pointer_locked(&self) -> bool {
        self.pointer_locked
    }

    pub fn set_pointer_locked(&mut self, locked: bool) {
        self.pointer_locked = locked;
    }

    /// Extra static collider in the playable space (crates, plinths, ...).
    pub fn add_static_collider(&mut self, position: Vec3, size: Vec3, friction: Option<f32>) {
        self.world
            .add_static_box(position, size * 0.5, friction.unwrap_or(0.0));
    }

    /// Raw mouse movement while pointer lock is engaged; ignored otherwise.
    pub fn mouse_delta(&mut self, dx: f32, dy: f32) {
        if !self.pointer_locked {
            return;
        }
        self.yaw -= dx * self.options.mouse_sensitivity;
        self.pitch =
            (self.pitch - dy * self.options.mouse_sensitivity).clamp(-MAX_PITCH, MAX_PITCH);
    }

    /// One-shot jump; silently ignored (not queued) while airborne.
    pub fn jump(&mut self) {
        if self.can_jump {
            self.body.velocity.y = self.options.jump_force;
            self.can_jump = false;
        }
    }

    /// Per-frame update. The caller clamps `delta_time` (<= 0.02 s) to keep
    /// the discrete integration stable on frame hitches.
    pub fn update(&mut self, delta_time: f32) -> CameraPose {
        self.world.step(&mut self.body, delta_time);
        self.can_jump = self.body.position.y < NEAR_GROUND_Y;

        let direction = self.intent.direction();
        if direction.length_squared() > 0.0 {
            let direction = direction.normalize();
            let (sin, cos) = self.yaw.sin_cos();
            let rotated_x = direction.x * cos + direction.z * sin;
            let rotated_z = -direction.x * sin + direction.z * cos;
            // Horizontal velocity is overwritten, not accumulated: instant
            // start/stop, no inertia beyond gravity and collisions.
            self.body.velocity.x = rotated_x * self.options.move_speed;
            self.body.velocity.z = rotated_z * self.options.move_speed;
        } else {
            self.body.velocity.x = 0.0;
            self.body.velocity.z = 0.0;
        }

        if self.position_marker.is_some() {
            self.position_marker = Some(self.body.position);
        }

        CameraPose {
            position: self.body.position + Vec3::Y * self.options.camera_height,
            yaw: self.yaw,
            pitch: self.pitch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn settled_controller() -> FpsController {
        let mut controller = FpsController::new(ControllerOptions::default());
        // Let the spawn drop settle onto the ground plane.
        for _ in 0..200 {
            controller.update(0.016);
        }
        controller
    }

    #[test]
    fn idle_update_zeroes_horizontal_velocity() {
        let mut controller = settled_controller();
        controller.body.velocity.x = 3.0;
        controller.body.velocity.z = -1.5;
        controller.update(0.016);
        assert_eq!(controller.velocity().x, 0.0);
        assert_eq!(controller.velocity().z, 0.0);
    }

    #[test]
    fn forward_at_zero_yaw_moves_along_negative_z() {
        let mut controller = settled_controller();
        controller.intent.forward = true;
        controller.update(0.016);
        let velocity = controller.velocity();
        assert!(velocity.x.abs() < 1e-6);
        assert!((velocity.z + controller.options().move_speed).abs() < 1e-6);
    }

    #[test]
    fn jump_while_airborne_is_ignored() {
        let mut controller = FpsController::new(ControllerOptions::default());
        // Freshly spawned at y = 1.5 with can_jump still false.
        assert!(!controller.can_jump());
        let before = controller.velocity().y;
        controller.jump();
        assert_eq!(controller.velocity().y, before);
    }

    #[test]
    fn jump_fires_once_near_the_ground() {
        let mut controller = settled_controller();
        controller.update(0.016);
        assert!(controller.can_jump());
        controller.jump();
        assert_eq!(
            controller.velocity().y,
            controller.options().jump_force
        );
        assert!(!controller.can_jump());
    }

    #[test]
    fn position_marker_mirrors_the_body() {
        let mut controller = settled_controller();
        assert_eq!(controller.position_marker, None);
        controller.position_marker = Some(Vec3::ZERO);
        controller.intent.forward = true;
        controller.update(0.016);
        assert_eq!(controller.position_marker, Some(controller.body_position()));
    }

    #[test]
    fn pitch_clamps_short_of_vertical() {
        let mut controller = settled_controller();
        controller.set_pointer_locked(true);
        controller.mouse_delta(0.0, -1.0e6);
        assert!(controller.pitch() <= MAX_PITCH);
        controller.mouse_delta(0.0, 1.0e6);
        assert!(controller.pitch() >= -MAX_PITCH);
    }

    #[test]
    fn mouse_is_ignored_without_pointer_lock() {
        let mut controller = settled_controller();
        controller.mouse_delta(500.0, 500.0);
        assert_eq!(controller.yaw(), 0.0);
        assert_eq!(controller.pitch(), 0.0);
    }

    #[test]
    fn walls_contain_random_walks() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
        let mut controller = settled_controller();
        controller.set_pointer_locked(true);
        let half = controller.options().grid_half_extent;
        let limit = half - WALL_THICKNESS - controller.options().player_radius + 1e-3;

        for step in 0..5_000 {
            if step % 40 == 0 {
                controller.intent = MovementIntent {
                    forward: rng.random_bool(0.6),
                    back: rng.random_bool(0.2),
                    left: rng.random_bool(0.3),
                    right: rng.random_bool(0.3),
                };
                controller.mouse_delta(rng.random_range(-400.0..400.0), 0.0);
                if rng.random_bool(0.1) {
                    controller.jump();
                }
            }
            controller.update(0.016);
            let position = controller.body_position();
            assert!(
                position.x.abs() <= limit && position.z.abs() <= limit,
                "escaped the walls at step {step}: {position:?}"
            );
        }
    }
}
