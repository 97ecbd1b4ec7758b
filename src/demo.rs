use glam::Vec3;
use rand::Rng;
use std::f32::consts::TAU;

use crate::splat::Splat;

// --- Demo scene generators ---
//
// Everything is laid out inside the fenced 20x20 unit courtyard the walk
// controller patrols, at heights visible from a 1.2m eye line.

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let c = v * s;
    let hp = (h % 360.0) / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [
        clamp_u8((r + m) * 255.0),
        clamp_u8((g + m) * 255.0),
        clamp_u8((b + m) * 255.0),
    ]
}

fn generate_ground_splats(count: usize, half_extent: f32) -> Vec<Splat> {
    let mut rng = rand::rng();
    let mut splats = Vec::with_capacity(count);

    for _ in 0..count {
        let x = rng.random_range(-half_extent..half_extent);
        let z = rng.random_range(-half_extent..half_extent);
        // Checkerboard tint so forward motion reads even without parallax.
        let tile = ((x.floor() as i32 + z.floor() as i32) & 1) == 0;
        let base = if tile { 150.0 } else { 95.0 };
        let shade = base + rng.random_range(-18.0_f32..18.0_f32);

        splats.push(Splat {
            position: Vec3::new(x, rng.random_range(0.0_f32..0.03_f32), z),
            color: [clamp_u8(shade), clamp_u8(shade * 0.96), clamp_u8(shade * 0.88)],
            opacity: rng.random_range(0.80_f32..0.98_f32),
        });
    }

    splats
}

/// Pillar positions in the courtyard; the bootstrap drops matching static
/// colliders on these.
pub const PILLAR_FOOTPRINTS: [(f32, f32); 6] = [
    (4.0, -4.0),
    (-4.0, -4.0),
    (4.0, 4.0),
    (-4.0, 4.0),
    (0.0, -7.0),
    (0.0, 7.0),
];

fn generate_pillar_splats(per_pillar: usize) -> Vec<Splat> {
    let mut rng = rand::rng();
    let mut splats = Vec::with_capacity(per_pillar * PILLAR_FOOTPRINTS.len());
    for (i, (x, z)) in PILLAR_FOOTPRINTS.iter().enumerate() {
        let base = Vec3::new(*x, 0.0, *z);
        let hue = i as f32 / PILLAR_FOOTPRINTS.len() as f32 * 360.0;
        for _ in 0..per_pillar {
            let theta = rng.random_range(0.0_f32..TAU);
            let y = rng.random_range(0.0_f32..3.2_f32);
            // Slight taper toward the top.
            let radius = (0.35 - y * 0.04) * rng.random_range(0.85_f32..1.0_f32);

            splats.push(Splat {
                position: base + Vec3::new(radius * theta.cos(), y, radius * theta.sin()),
                color: hsv_to_rgb(hue, 0.55, 0.92),
                opacity: rng.random_range(0.70_f32..0.95_f32),
            });
        }
    }

    splats
}

fn generate_orbiting_ring_splats(count: usize) -> Vec<Splat> {
    let mut rng = rand::rng();
    let mut splats = Vec::with_capacity(count);

    // A tilted ring floating over the courtyard center, good for judging
    // back-to-front order as the camera circles it.
    let major = 2.6;
    let minor = 0.22;
    let tilt = 0.45_f32;

    for i in 0..count {
        let t = i as f32 / count.max(1) as f32 * TAU;
        let phi = rng.random_range(0.0_f32..TAU);

        let flat = Vec3::new(
            (major + minor * phi.cos()) * t.cos(),
            minor * phi.sin(),
            (major + minor * phi.cos()) * t.sin(),
        );
        let tilted = Vec3::new(
            flat.x,
            flat.y * tilt.cos() - flat.z * tilt.sin(),
            flat.y * tilt.sin() + flat.z * tilt.cos(),
        );

        let hue = (t.sin() * 0.5 + 0.5) * 360.0;
        splats.push(Splat {
            position: tilted + Vec3::new(0.0, 2.4, 0.0),
            color: hsv_to_rgb(hue, 0.80, 0.95),
            opacity: rng.random_range(0.65_f32..0.95_f32),
        });
    }

    splats
}

pub fn generate_demo_splats(total: usize, half_extent: f32) -> Vec<Splat> {
    // Roughly half ground, a third pillars, the rest the floating ring.
    let ground = total / 2;
    let pillars = total / 3 / 6;
    let ring = total.saturating_sub(ground + pillars * 6);

    let mut splats = generate_ground_splats(ground, half_extent);
    splats.extend(generate_pillar_splats(pillars));
    splats.extend(generate_orbiting_ring_splats(ring));
    splats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_scene_hits_the_requested_count() {
        let splats = generate_demo_splats(10_000, 10.0);
        assert_eq!(splats.len(), 10_000);
    }

    #[test]
    fn demo_scene_stays_inside_the_fence() {
        for splat in generate_demo_splats(5_000, 10.0) {
            assert!(splat.position.x.abs() <= 10.0);
            assert!(splat.position.z.abs() <= 10.0);
        }
    }
}
