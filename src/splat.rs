use glam::Vec3;
use rayon::prelude::*;

use crate::arena::CENTER_LANES;

/// Fixed-point scale for quantized integer centers; pairs with the matrix
/// scaling inside the integer sort path.
pub const CENTER_QUANT_SCALE: f32 = 1000.0;

#[derive(Debug, Clone, Copy)]
pub struct Splat {
    pub position: Vec3,
    pub color: [u8; 3],
    pub opacity: f32,
}

/// Packs splat centers into the 4-lane float layout the sort arena expects
/// (x, y, z, 1).
pub fn pack_centers_f32(splats: &[Splat]) -> Vec<f32> {
    let mut centers = Vec::with_capacity(splats.len() * CENTER_LANES);
    for splat in splats {
        centers.push(splat.position.x);
        centers.push(splat.position.y);
        centers.push(splat.position.z);
        centers.push(1.0);
    }
    centers
}

/// Fixed-point counterpart: each lane scaled by [`CENTER_QUANT_SCALE`] and
/// rounded.
pub fn pack_centers_i32(splats: &[Splat]) -> Vec<i32> {
    let mut centers = Vec::with_capacity(splats.len() * CENTER_LANES);
    for splat in splats {
        centers.push((splat.position.x * CENTER_QUANT_SCALE).round() as i32);
        centers.push((splat.position.y * CENTER_QUANT_SCALE).round() as i32);
        centers.push((splat.position.z * CENTER_QUANT_SCALE).round() as i32);
        centers.push(CENTER_QUANT_SCALE as i32);
    }
    centers
}

/// Per-splat depths for the precomputed-distance sort path, evaluated against
/// the camera-forward row of a column-major model-view-projection.
pub fn compute_view_distances(splats: &[Splat], mvp: &[f32; 16]) -> Vec<f32> {
    let (m2, m6, m10) = (mvp[2], mvp[6], mvp[10]);
    splats
        .par_iter()
        .map(|splat| {
            let p = splat.position;
            m2 * p.x + m6 * p.y + m10 * p.z
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splat_at(z: f32) -> Splat {
        Splat {
            position: Vec3::new(0.0, 0.0, z),
            color: [255, 255, 255],
            opacity: 1.0,
        }
    }

    #[test]
    fn float_packing_is_four_lanes_with_unit_w() {
        let centers = pack_centers_f32(&[splat_at(2.5)]);
        assert_eq!(centers, vec![0.0, 0.0, 2.5, 1.0]);
    }

    #[test]
    fn integer_packing_quantizes_by_the_fixed_scale() {
        let centers = pack_centers_i32(&[splat_at(-1.2345)]);
        assert_eq!(centers, vec![0, 0, -1235, 1000]);
    }

    #[test]
    fn view_distances_follow_the_depth_row() {
        let mut mvp = [0.0f32; 16];
        mvp[10] = 1.0;
        let distances =
            compute_view_distances(&[splat_at(1.0), splat_at(4.0)], &mvp);
        assert_eq!(distances, vec![1.0, 4.0]);
    }
}
