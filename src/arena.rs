use std::cell::UnsafeCell;

use crate::sorter::SorterError;

// Protocol constants. These travel inside the init message so the client and
// the coordinator always plan against the same numbers.
pub const BYTES_PER_FLOAT: usize = 4;
pub const BYTES_PER_INT: usize = 4;
pub const MEMORY_PAGE_SIZE: usize = 65_536;
pub const MAX_SCENES: usize = 32;
pub const DEFAULT_DISTANCE_MAP_PRECISION: u32 = 16;

const MATRIX_BYTES: usize = 16 * BYTES_PER_FLOAT;
const EXTRA_SLACK_PAGES: usize = 32;

/// Every splat center occupies four 4-byte lanes (x, y, z, w) in both the
/// float and the quantized-integer representation.
pub const CENTER_LANES: usize = 4;
pub const CENTER_BYTES_PER_ENTRY: usize = CENTER_LANES * BYTES_PER_FLOAT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    pub splat_count: usize,
    pub integer_based_sort: bool,
    pub dynamic_mode: bool,
    pub distance_map_range: usize,
    pub max_scenes: usize,
    pub page_size: usize,
}

impl ArenaConfig {
    pub fn new(
        splat_count: usize,
        integer_based_sort: bool,
        dynamic_mode: bool,
        distance_map_precision: u32,
    ) -> Self {
        Self {
            splat_count,
            integer_based_sort,
            dynamic_mode,
            distance_map_range: 1 << distance_map_precision,
            max_scenes: MAX_SCENES,
            page_size: MEMORY_PAGE_SIZE,
        }
    }
}

/// Byte offsets of every arena region, in their fixed order. Computed once at
/// init and never recomputed; planning is pure, so a client and a coordinator
/// handed the same `ArenaConfig` agree on the layout without exchanging it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaLayout {
    pub indexes_to_sort: usize,
    pub centers: usize,
    pub model_view_proj: usize,
    pub precomputed_distances: usize,
    pub mapped_distances: usize,
    pub frequencies: usize,
    pub sorted_indexes: usize,
    pub scene_indexes: usize,
    pub transforms: usize,
    pub total_bytes: usize,
    pub total_pages: usize,
}

pub fn plan_layout(config: &ArenaConfig) -> ArenaLayout {
    let n = config.splat_count;

    let indexes_to_sort_bytes = n * BYTES_PER_INT;
    let centers_bytes = n * CENTER_BYTES_PER_ENTRY;
    let model_view_proj_bytes = MATRIX_BYTES;
    let precomputed_distances_bytes = n * BYTES_PER_INT;
    let mapped_distances_bytes = n * BYTES_PER_INT;
    // Histogram plus the bucket-start scratch that the counting sort derives
    // from it.
    let frequencies_bytes = config.distance_map_range * BYTES_PER_INT * 2;
    let sorted_indexes_bytes = n * BYTES_PER_INT;
    let scene_indexes_bytes = if config.dynamic_mode {
        n * BYTES_PER_INT
    } else {
        0
    };
    let transforms_bytes = if config.dynamic_mode {
        config.max_scenes * MATRIX_BYTES
    } else {
        0
    };

    let indexes_to_sort = 0;
    let centers = indexes_to_sort + indexes_to_sort_bytes;
    let model_view_proj = centers + centers_bytes;
    let precomputed_distances = model_view_proj + model_view_proj_bytes;
    let mapped_distances = precomputed_distances + precomputed_distances_bytes;
    let frequencies = mapped_distances + mapped_distances_bytes;
    let sorted_indexes = frequencies + frequencies_bytes;
    let scene_indexes = sorted_indexes + sorted_indexes_bytes;
    let transforms = scene_indexes + scene_indexes_bytes;

    let required = transforms + transforms_bytes + EXTRA_SLACK_PAGES * config.page_size;
    let total_pages = required / config.page_size + 1;
    let total_bytes = total_pages * config.page_size;

    ArenaLayout {
        indexes_to_sort,
        centers,
        model_view_proj,
        precomputed_distances,
        mapped_distances,
        frequencies,
        sorted_indexes,
        scene_indexes,
        transforms,
        total_bytes,
        total_pages,
    }
}

/// The sort arena: one contiguous, fixed-size block holding every buffer the
/// kernel touches. Stored as whole words so region views stay 4-byte aligned.
///
/// Shared-memory mode hands an `Arc<SortArena>` to both sides of the
/// protocol. There is no lock; the region accessors are `unsafe` and their
/// safety contract is the protocol's serialization invariant: the client must
/// not touch the input regions while a sort is in flight, and must only read
/// `sorted_indexes` between a `SortDone` reply and its next sort request.
pub struct SortArena {
    config: ArenaConfig,
    layout: ArenaLayout,
    words: UnsafeCell<Box<[u32]>>,
}

// Region accessors never hand out overlapping views of one region, and
// cross-region aliasing is excluded by the protocol contract above.
unsafe impl Send for SortArena {}
unsafe impl Sync for SortArena {}

impl SortArena {
    /// Allocates exactly `total_pages * page_size` bytes up front. The block
    /// is never grown; a failed allocation is fatal to sorter setup.
    pub fn allocate(config: ArenaConfig) -> Result<Self, SorterError> {
        let layout = plan_layout(&config);
        let word_count = layout.total_bytes / BYTES_PER_INT;
        let mut words: Vec<u32> = Vec::new();
        words
            .try_reserve_exact(word_count)
            .map_err(|_| SorterError::ArenaAllocation {
                bytes: layout.total_bytes,
            })?;
        words.resize(word_count, 0);
        Ok(Self {
            config,
            layout,
            words: UnsafeCell::new(words.into_boxed_slice()),
        })
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn layout(&self) -> &ArenaLayout {
        &self.layout
    }

    /// # Safety
    /// Callers must honor the serialization contract in the type docs: no two
    /// live views of the same region, no reads of a region the coordinator is
    /// concurrently writing.
    unsafe fn region(&self, byte_offset: usize, word_len: usize) -> &mut [u32] {
        let base = (*self.words.get()).as_mut_ptr();
        debug_assert!(byte_offset / BYTES_PER_INT + word_len <= self.layout.total_bytes / BYTES_PER_INT);
        std::slice::from_raw_parts_mut(base.add(byte_offset / BYTES_PER_INT), word_len)
    }

    /// # Safety
    /// See [`SortArena::region`].
    pub unsafe fn indexes_to_sort(&self) -> &mut [u32] {
        self.region(self.layout.indexes_to_sort, self.config.splat_count)
    }

    /// # Safety
    /// See [`SortArena::region`].
    pub unsafe fn centers_f32(&self) -> &mut [f32] {
        let words = self.region(self.layout.centers, self.config.splat_count * CENTER_LANES);
        bytemuck::cast_slice_mut(words)
    }

    /// # Safety
    /// See [`SortArena::region`].
    pub unsafe fn centers_i32(&self) -> &mut [i32] {
        let words = self.region(self.layout.centers, self.config.splat_count * CENTER_LANES);
        bytemuck::cast_slice_mut(words)
    }

    /// # Safety
    /// See [`SortArena::region`].
    pub unsafe fn model_view_proj(&self) -> &mut [f32] {
        let words = self.region(self.layout.model_view_proj, 16);
        bytemuck::cast_slice_mut(words)
    }

    /// # Safety
    /// See [`SortArena::region`].
    pub unsafe fn precomputed_distances_f32(&self) -> &mut [f32] {
        let words = self.region(self.layout.precomputed_distances, self.config.splat_count);
        bytemuck::cast_slice_mut(words)
    }

    /// # Safety
    /// See [`SortArena::region`].
    pub unsafe fn precomputed_distances_i32(&self) -> &mut [i32] {
        let words = self.region(self.layout.precomputed_distances, self.config.splat_count);
        bytemuck::cast_slice_mut(words)
    }

    /// # Safety
    /// See [`SortArena::region`].
    pub unsafe fn mapped_distances(&self) -> &mut [u32] {
        self.region(self.layout.mapped_distances, self.config.splat_count)
    }

    /// Histogram in the first half, bucket starts in the second.
    ///
    /// # Safety
    /// See [`SortArena::region`].
    pub unsafe fn frequencies(&self) -> &mut [u32] {
        self.region(self.layout.frequencies, self.config.distance_map_range * 2)
    }

    /// # Safety
    /// See [`SortArena::region`].
    pub unsafe fn sorted_indexes(&self) -> &mut [u32] {
        self.region(self.layout.sorted_indexes, self.config.splat_count)
    }

    /// Empty slice outside dynamic mode.
    ///
    /// # Safety
    /// See [`SortArena::region`].
    pub unsafe fn scene_indexes(&self) -> &mut [u32] {
        let len = if self.config.dynamic_mode {
            self.config.splat_count
        } else {
            0
        };
        self.region(self.layout.scene_indexes, len)
    }

    /// Per-scene 4x4 matrices, column-major. Empty outside dynamic mode.
    ///
    /// # Safety
    /// See [`SortArena::region`].
    pub unsafe fn transforms(&self) -> &mut [f32] {
        let len = if self.config.dynamic_mode {
            self.config.max_scenes * 16
        } else {
            0
        };
        let words = self.region(self.layout.transforms, len);
        bytemuck::cast_slice_mut(words)
    }
}

impl std::fmt::Debug for SortArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortArena")
            .field("splat_count", &self.config.splat_count)
            .field("integer_based_sort", &self.config.integer_based_sort)
            .field("dynamic_mode", &self.config.dynamic_mode)
            .field("distance_map_range", &self.config.distance_map_range)
            .field("total_pages", &self.layout.total_pages)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_grid() -> Vec<ArenaConfig> {
        let mut configs = Vec::new();
        for &splat_count in &[1usize, 257, 50_000, 1_200_000] {
            for &integer_based_sort in &[false, true] {
                for &dynamic_mode in &[false, true] {
                    for &precision in &[12u32, 16] {
                        configs.push(ArenaConfig::new(
                            splat_count,
                            integer_based_sort,
                            dynamic_mode,
                            precision,
                        ));
                    }
                }
            }
        }
        configs
    }

    #[test]
    fn planning_is_deterministic() {
        for config in config_grid() {
            assert_eq!(plan_layout(&config), plan_layout(&config));
        }
    }

    #[test]
    fn offsets_are_ordered_and_disjoint() {
        for config in config_grid() {
            let layout = plan_layout(&config);
            let n = config.splat_count;
            // (offset, size) pairs in the fixed region order.
            let regions = [
                (layout.indexes_to_sort, n * BYTES_PER_INT),
                (layout.centers, n * CENTER_BYTES_PER_ENTRY),
                (layout.model_view_proj, MATRIX_BYTES),
                (layout.precomputed_distances, n * BYTES_PER_INT),
                (layout.mapped_distances, n * BYTES_PER_INT),
                (
                    layout.frequencies,
                    config.distance_map_range * BYTES_PER_INT * 2,
                ),
                (layout.sorted_indexes, n * BYTES_PER_INT),
                (
                    layout.scene_indexes,
                    if config.dynamic_mode { n * BYTES_PER_INT } else { 0 },
                ),
                (
                    layout.transforms,
                    if config.dynamic_mode {
                        config.max_scenes * MATRIX_BYTES
                    } else {
                        0
                    },
                ),
            ];
            for pair in regions.windows(2) {
                let (offset, size) = pair[0];
                let (next_offset, _) = pair[1];
                assert_eq!(offset + size, next_offset, "config: {config:?}");
            }
            let (last_offset, last_size) = regions[regions.len() - 1];
            assert!(last_offset + last_size <= layout.total_bytes);
        }
    }

    #[test]
    fn page_count_includes_slack() {
        let config = ArenaConfig::new(10_000, false, false, 16);
        let layout = plan_layout(&config);
        assert_eq!(layout.total_bytes, layout.total_pages * config.page_size);
        // Even a one-splat arena carries the 32 slack pages plus the
        // rounding page.
        let tiny = plan_layout(&ArenaConfig::new(1, false, false, 8));
        assert!(tiny.total_pages > EXTRA_SLACK_PAGES);
    }

    #[test]
    fn dynamic_regions_are_empty_when_disabled() {
        let config = ArenaConfig::new(64, false, false, 12);
        let arena = SortArena::allocate(config).unwrap();
        unsafe {
            assert!(arena.scene_indexes().is_empty());
            assert!(arena.transforms().is_empty());
            assert_eq!(arena.indexes_to_sort().len(), 64);
            assert_eq!(arena.centers_f32().len(), 64 * CENTER_LANES);
            assert_eq!(arena.model_view_proj().len(), 16);
        }
    }

    #[test]
    fn dynamic_regions_sized_when_enabled() {
        let config = ArenaConfig::new(64, true, true, 12);
        let arena = SortArena::allocate(config).unwrap();
        unsafe {
            assert_eq!(arena.scene_indexes().len(), 64);
            assert_eq!(arena.transforms().len(), MAX_SCENES * 16);
        }
    }
}
