use rayon::prelude::*;

use crate::arena::{SortArena, CENTER_LANES};

/// Fixed-point scale applied to the projection row in integer-based sort
/// mode, matching the quantization of integer splat centers.
pub const INTEGER_MVP_SCALE: f32 = 1000.0;

/// The four precompiled sorter builds. Wide variants run the distance-mapping
/// passes data-parallel; the non-shared builds exist because some platforms
/// cannot take a shared-memory-shaped kernel at all (see the capability table
/// in the client).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelVariant {
    Simd,
    SimdNonShared,
    NoSimd,
    NoSimdNonShared,
}

impl KernelVariant {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Simd => "simd",
            Self::SimdNonShared => "simd-non-shared",
            Self::NoSimd => "no-simd",
            Self::NoSimdNonShared => "no-simd-non-shared",
        }
    }

    pub fn wide(&self) -> bool {
        matches!(self, Self::Simd | Self::SimdNonShared)
    }

    pub fn shared_memory_shaped(&self) -> bool {
        matches!(self, Self::Simd | Self::NoSimd)
    }
}

/// Per-invocation kernel arguments. Counts arrive pre-clamped by the
/// coordinator; the kernel itself trusts them (hot path, no bounds defense).
#[derive(Debug, Clone, Copy)]
pub struct SortArgs {
    pub distance_map_range: usize,
    pub splat_sort_count: usize,
    pub splat_render_count: usize,
    pub splat_count: usize,
    pub use_precomputed_distances: bool,
    pub integer_based_sort: bool,
    pub dynamic_mode: bool,
}

pub struct SortKernel {
    variant: KernelVariant,
}

impl SortKernel {
    pub fn instantiate(variant: KernelVariant) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> KernelVariant {
        self.variant
    }

    /// Counting sort of `splat_sort_count` candidates by depth, quantized
    /// into `distance_map_range` buckets, written back-to-front (farthest
    /// first, non-increasing depth, ties in stable candidate order) into the
    /// sorted-indexes region. Slots `splat_sort_count..splat_render_count`
    /// pass through from the candidate list unchanged, so exactly
    /// `splat_render_count` entries are populated.
    ///
    /// Expects the histogram region to be zeroed by the caller.
    pub fn sort_indexes(&self, arena: &SortArena, args: &SortArgs) {
        let range = args.distance_map_range;
        let sort_count = args.splat_sort_count;
        let render_count = args.splat_render_count;
        debug_assert!(sort_count <= args.splat_count);
        debug_assert!(render_count <= args.splat_count);

        // SAFETY: all views are disjoint regions of the arena, and the
        // coordinator serializes kernel invocations.
        let (indexes, mapped, frequencies, sorted) = unsafe {
            (
                &arena.indexes_to_sort()[..],
                arena.mapped_distances(),
                arena.frequencies(),
                arena.sorted_indexes(),
            )
        };

        if sort_count > 0 {
            let candidates = &indexes[..sort_count];
            let mapped = &mut mapped[..sort_count];
            if args.integer_based_sort {
                self.fill_depths_i32(arena, args, candidates, mapped);
                self.bucketize_i32(mapped, range);
            } else {
                self.fill_depths_f32(arena, args, candidates, mapped);
                self.bucketize_f32(mapped, range);
            }

            let (histogram, starts) = frequencies.split_at_mut(range);
            for &bucket in mapped.iter() {
                histogram[bucket as usize] += 1;
            }
            // Reverse-cumulative starts: the highest (farthest) bucket lands
            // at the front of the output.
            starts[range - 1] = 0;
            for bucket in (0..range - 1).rev() {
                starts[bucket] = starts[bucket + 1] + histogram[bucket + 1];
            }
            for (slot, &bucket) in mapped.iter().enumerate() {
                let cursor = &mut starts[bucket as usize];
                sorted[*cursor as usize] = candidates[slot];
                *cursor += 1;
            }
        }

        // Entries beyond the sort window keep their submitted order.
        if render_count > sort_count {
            sorted[sort_count..render_count].copy_from_slice(&indexes[sort_count..render_count]);
        }
    }

    /// Raw f32 depths, stored as bits in the mapped-distances scratch.
    fn fill_depths_f32(&self, arena: &SortArena, args: &SortArgs, candidates: &[u32], mapped: &mut [u32]) {
        // SAFETY: read-only views of regions the kernel does not write.
        let (centers, mvp, scene_indexes, transforms) = unsafe {
            (
                &arena.centers_f32()[..],
                &arena.model_view_proj()[..],
                &arena.scene_indexes()[..],
                &arena.transforms()[..],
            )
        };
        // Camera-forward row of the column-major model-view-projection; the
        // translation term shifts every depth equally so it is dropped.
        let (m2, m6, m10) = (mvp[2], mvp[6], mvp[10]);
        let dynamic = args.dynamic_mode;
        let precomputed = args.use_precomputed_distances;
        let distances = if precomputed {
            // SAFETY: as above; only read.
            Some(unsafe { &arena.precomputed_distances_f32()[..] })
        } else {
            None
        };

        let depth_bits = |idx: usize| -> u32 {
            if let Some(distances) = distances {
                return distances[idx].to_bits();
            }
            let c = &centers[idx * CENTER_LANES..idx * CENTER_LANES + 3];
            let (x, y, z) = if dynamic {
                let t = &transforms[scene_indexes[idx] as usize * 16..][..16];
                (
                    t[0] * c[0] + t[4] * c[1] + t[8] * c[2] + t[12],
                    t[1] * c[0] + t[5] * c[1] + t[9] * c[2] + t[13],
                    t[2] * c[0] + t[6] * c[1] + t[10] * c[2] + t[14],
                )
            } else {
                (c[0], c[1], c[2])
            };
            (m2 * x + m6 * y + m10 * z).to_bits()
        };

        if self.variant.wide() {
            mapped
                .par_iter_mut()
                .zip(candidates.par_iter())
                .for_each(|(slot, &idx)| *slot = depth_bits(idx as usize));
        } else {
            for (slot, &idx) in mapped.iter_mut().zip(candidates) {
                *slot = depth_bits(idx as usize);
            }
        }
    }

    /// Raw fixed-point depths, stored as i32 bit patterns in the scratch.
    fn fill_depths_i32(&self, arena: &SortArena, args: &SortArgs, candidates: &[u32], mapped: &mut [u32]) {
        // SAFETY: read-only views of regions the kernel does not write.
        let (centers, mvp, scene_indexes, transforms) = unsafe {
            (
                &arena.centers_i32()[..],
                &arena.model_view_proj()[..],
                &arena.scene_indexes()[..],
                &arena.transforms()[..],
            )
        };
        let m2 = (mvp[2] * INTEGER_MVP_SCALE).round() as i64;
        let m6 = (mvp[6] * INTEGER_MVP_SCALE).round() as i64;
        let m10 = (mvp[10] * INTEGER_MVP_SCALE).round() as i64;
        let dynamic = args.dynamic_mode;
        let distances = if args.use_precomputed_distances {
            // SAFETY: as above; only read.
            Some(unsafe { &arena.precomputed_distances_i32()[..] })
        } else {
            None
        };

        let depth_bits = |idx: usize| -> u32 {
            if let Some(distances) = distances {
                return distances[idx] as u32;
            }
            let c = &centers[idx * CENTER_LANES..idx * CENTER_LANES + 3];
            let depth = if dynamic {
                // Scene transforms stay in float; quantize after applying.
                let t = &transforms[scene_indexes[idx] as usize * 16..][..16];
                let (x, y, z) = (c[0] as f32, c[1] as f32, c[2] as f32);
                let tz = t[2] * x + t[6] * y + t[10] * z + t[14];
                let ty = t[1] * x + t[5] * y + t[9] * z + t[13];
                let tx = t[0] * x + t[4] * y + t[8] * z + t[12];
                m2 * tx as i64 + m6 * ty as i64 + m10 * tz as i64
            } else {
                m2 * c[0] as i64 + m6 * c[1] as i64 + m10 * c[2] as i64
            };
            depth.clamp(i32::MIN as i64, i32::MAX as i64) as i32 as u32
        };

        if self.variant.wide() {
            mapped
                .par_iter_mut()
                .zip(candidates.par_iter())
                .for_each(|(slot, &idx)| *slot = depth_bits(idx as usize));
        } else {
            for (slot, &idx) in mapped.iter_mut().zip(candidates) {
                *slot = depth_bits(idx as usize);
            }
        }
    }

    fn bucketize_f32(&self, mapped: &mut [u32], range: usize) {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &bits in mapped.iter() {
            let v = f32::from_bits(bits);
            min = min.min(v);
            max = max.max(v);
        }
        if max <= min {
            mapped.fill(0);
            return;
        }
        let scale = (range - 1) as f32 / (max - min);
        let map = |bits: u32| ((f32::from_bits(bits) - min) * scale) as u32;
        if self.variant.wide() {
            mapped.par_iter_mut().for_each(|slot| *slot = map(*slot));
        } else {
            for slot in mapped.iter_mut() {
                *slot = map(*slot);
            }
        }
    }

    fn bucketize_i32(&self, mapped: &mut [u32], range: usize) {
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        for &bits in mapped.iter() {
            let v = bits as i32 as i64;
            min = min.min(v);
            max = max.max(v);
        }
        if max <= min {
            mapped.fill(0);
            return;
        }
        let scale = (range - 1) as f64 / (max - min) as f64;
        let map = |bits: u32| (((bits as i32 as i64 - min) as f64) * scale) as u32;
        if self.variant.wide() {
            mapped.par_iter_mut().for_each(|slot| *slot = map(*slot));
        } else {
            for slot in mapped.iter_mut() {
                *slot = map(*slot);
            }
        }
    }
}

impl std::fmt::Debug for SortKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortKernel")
            .field("variant", &self.variant.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaConfig;

    // Column-major matrix whose camera-forward row reads raw z, so a splat's
    // depth is simply its z coordinate.
    const Z_DEPTH_MVP: [f32; 16] = [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ];

    fn arena_with_line_of_splats(count: usize, integer: bool, dynamic: bool) -> SortArena {
        let config = ArenaConfig::new(count, integer, dynamic, 12);
        let arena = SortArena::allocate(config).unwrap();
        unsafe {
            for (i, slot) in arena.indexes_to_sort().iter_mut().enumerate() {
                *slot = i as u32;
            }
            arena.model_view_proj().copy_from_slice(&Z_DEPTH_MVP);
            if integer {
                let centers = arena.centers_i32();
                for i in 0..count {
                    centers[i * CENTER_LANES] = 0;
                    centers[i * CENTER_LANES + 1] = 0;
                    centers[i * CENTER_LANES + 2] = (i as i32) * 100;
                    centers[i * CENTER_LANES + 3] = 1000;
                }
            } else {
                let centers = arena.centers_f32();
                for i in 0..count {
                    centers[i * CENTER_LANES] = 0.0;
                    centers[i * CENTER_LANES + 1] = 0.0;
                    centers[i * CENTER_LANES + 2] = i as f32;
                    centers[i * CENTER_LANES + 3] = 1.0;
                }
            }
        }
        arena
    }

    fn args_for(arena: &SortArena, sort_count: usize, render_count: usize) -> SortArgs {
        let config = arena.config();
        SortArgs {
            distance_map_range: config.distance_map_range,
            splat_sort_count: sort_count,
            splat_render_count: render_count,
            splat_count: config.splat_count,
            use_precomputed_distances: false,
            integer_based_sort: config.integer_based_sort,
            dynamic_mode: config.dynamic_mode,
        }
    }

    fn run(arena: &SortArena, args: &SortArgs, variant: KernelVariant) -> Vec<u32> {
        unsafe { arena.frequencies().fill(0) };
        SortKernel::instantiate(variant).sort_indexes(arena, args);
        unsafe { arena.sorted_indexes()[..args.splat_render_count].to_vec() }
    }

    fn assert_non_increasing_depth(order: &[u32], depth_of: impl Fn(u32) -> f32) {
        for pair in order.windows(2) {
            assert!(
                depth_of(pair[0]) >= depth_of(pair[1]),
                "order not back-to-front: {pair:?}"
            );
        }
    }

    #[test]
    fn linear_depths_sort_back_to_front() {
        let n = 1024;
        let arena = arena_with_line_of_splats(n, false, false);
        let order = run(&arena, &args_for(&arena, n, n), KernelVariant::NoSimd);
        assert_eq!(order.len(), n);
        assert_non_increasing_depth(&order, |idx| idx as f32);
        // Linear depths across the bucket range are a total order.
        assert_eq!(order[0], (n - 1) as u32);
        assert_eq!(order[n - 1], 0);
    }

    #[test]
    fn wide_variant_matches_scalar() {
        let n = 4096;
        let arena = arena_with_line_of_splats(n, false, false);
        let args = args_for(&arena, n, n);
        let scalar = run(&arena, &args, KernelVariant::NoSimd);
        let wide = run(&arena, &args, KernelVariant::Simd);
        assert_eq!(scalar, wide);
    }

    #[test]
    fn integer_mode_sorts_quantized_centers() {
        let n = 512;
        let arena = arena_with_line_of_splats(n, true, false);
        let order = run(&arena, &args_for(&arena, n, n), KernelVariant::NoSimdNonShared);
        assert_non_increasing_depth(&order, |idx| idx as f32);
    }

    #[test]
    fn populates_exactly_render_count_entries() {
        let n = 256;
        let arena = arena_with_line_of_splats(n, false, false);
        unsafe { arena.sorted_indexes().fill(u32::MAX) };
        let order = run(&arena, &args_for(&arena, 64, 200), KernelVariant::NoSimd);
        assert_eq!(order.len(), 200);
        assert!(order.iter().all(|&idx| idx != u32::MAX));
        // Slots past the sort window pass through in submitted order.
        assert_eq!(&order[64..200], unsafe {
            &arena.indexes_to_sort()[64..200]
        });
        // Nothing past the render count was touched.
        assert!(unsafe { &arena.sorted_indexes()[200..] }
            .iter()
            .all(|&idx| idx == u32::MAX));
    }

    #[test]
    fn precomputed_distances_override_projection() {
        let n = 128;
        let arena = arena_with_line_of_splats(n, false, false);
        // Reverse the depth order via the precomputed region.
        unsafe {
            let distances = arena.precomputed_distances_f32();
            for (i, slot) in distances.iter_mut().enumerate() {
                *slot = (n - i) as f32;
            }
        }
        let mut args = args_for(&arena, n, n);
        args.use_precomputed_distances = true;
        let order = run(&arena, &args, KernelVariant::NoSimd);
        assert_eq!(order[0], 0);
        assert_eq!(order[n - 1], (n - 1) as u32);
    }

    #[test]
    fn dynamic_mode_applies_scene_transforms() {
        let n = 4;
        let config = ArenaConfig::new(n, false, true, 12);
        let arena = SortArena::allocate(config).unwrap();
        unsafe {
            for (i, slot) in arena.indexes_to_sort().iter_mut().enumerate() {
                *slot = i as u32;
            }
            arena.model_view_proj().copy_from_slice(&Z_DEPTH_MVP);
            let centers = arena.centers_f32();
            for i in 0..n {
                centers[i * CENTER_LANES + 2] = i as f32;
                centers[i * CENTER_LANES + 3] = 1.0;
            }
            // Splats 0 and 1 belong to scene 1, pushed far along +z.
            let scenes = arena.scene_indexes();
            scenes.copy_from_slice(&[1, 1, 0, 0]);
            let transforms = arena.transforms();
            transforms[..16].copy_from_slice(&Z_DEPTH_MVP);
            transforms[16..32].copy_from_slice(&Z_DEPTH_MVP);
            // Column-major translation slot for z.
            transforms[16 + 14] = 100.0;
        }
        let order = run(&arena, &args_for(&arena, n, n), KernelVariant::NoSimd);
        // Scene-1 splats are farthest after their transform.
        assert_eq!(&order[..2], &[1, 0]);
        assert_eq!(&order[2..], &[3, 2]);
    }
}
