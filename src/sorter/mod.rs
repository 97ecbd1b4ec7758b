//! Depth-sort coordination: the message protocol between the render side and
//! the sorter worker thread, and the types both ends share.

pub mod client;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use crate::arena::SortArena;
use crate::kernel::KernelVariant;

pub use client::{create_sort_client, probe_platform, OsVersion, SortClient};

#[derive(Debug)]
pub enum SorterError {
    ArenaAllocation {
        bytes: usize,
    },
    /// A message arrived in a coordinator phase that cannot service it, e.g.
    /// a sort request before init completed.
    InvalidPhase {
        message: &'static str,
        phase: &'static str,
    },
    /// The worker thread or its channel is gone; the client is unusable and
    /// must be recreated from scratch.
    WorkerDisconnected,
    SharedMemoryUnavailable,
    Other(String),
}

impl std::fmt::Display for SorterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArenaAllocation { bytes } => {
                write!(f, "failed to allocate {bytes}-byte sort arena")
            }
            Self::InvalidPhase { message, phase } => {
                write!(f, "{message} message rejected in {phase} phase")
            }
            Self::WorkerDisconnected => f.write_str("sort worker disconnected"),
            Self::SharedMemoryUnavailable => {
                f.write_str("shared arena handles requested in copy-memory mode")
            }
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for SorterError {}

/// Protocol constants carried inside the init message so both ends plan the
/// arena from identical numbers.
#[derive(Debug, Clone, Copy)]
pub struct SorterConstants {
    pub bytes_per_float: usize,
    pub bytes_per_int: usize,
    pub memory_page_size: usize,
    pub max_scenes: usize,
}

impl Default for SorterConstants {
    fn default() -> Self {
        Self {
            bytes_per_float: crate::arena::BYTES_PER_FLOAT,
            bytes_per_int: crate::arena::BYTES_PER_INT,
            memory_page_size: crate::arena::MEMORY_PAGE_SIZE,
            max_scenes: crate::arena::MAX_SCENES,
        }
    }
}

/// A contiguous, non-overlapping range of splat entries. `from` and `count`
/// are entry indexes, not bytes. Range validity is the caller's obligation;
/// the coordinator does not bounds-check uploads on the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRange {
    pub from: usize,
    pub count: usize,
}

#[derive(Debug)]
pub struct InitMessage {
    pub variant: KernelVariant,
    pub splat_count: usize,
    pub use_shared_memory: bool,
    pub integer_based_sort: bool,
    pub dynamic_mode: bool,
    pub distance_map_range: usize,
    pub constants: SorterConstants,
}

/// Precomputed per-splat depths supplied in copy mode; the representation
/// follows the sort mode.
#[derive(Debug, Clone)]
pub enum DistanceData {
    Float(Vec<f32>),
    Integer(Vec<i32>),
}

#[derive(Debug)]
pub struct SortMessage {
    pub splat_sort_count: usize,
    pub splat_render_count: usize,
    pub model_view_proj: [f32; 16],
    pub use_precomputed_distances: bool,
    /// Copy-memory mode only; shared mode writes the arena region directly.
    pub indexes_to_sort: Option<Vec<u32>>,
    pub precomputed_distances: Option<DistanceData>,
    pub transforms: Option<Vec<f32>>,
}

/// Every message the coordinator understands. An unhandled kind is a
/// compile-time gap, not a silent no-op.
#[derive(Debug)]
pub enum SorterRequest {
    Init(Box<InitMessage>),
    Centers {
        centers: Vec<u8>,
        scene_indexes: Option<Vec<u8>>,
        range: UploadRange,
    },
    Sort(Box<SortMessage>),
    Shutdown,
}

/// Raw buffer handle plus the four offsets the render side needs when both
/// ends share the arena.
#[derive(Clone)]
pub struct SharedArenaHandles {
    pub arena: Arc<SortArena>,
    pub indexes_to_sort_offset: usize,
    pub sorted_indexes_offset: usize,
    pub precomputed_distances_offset: usize,
    pub transforms_offset: usize,
}

impl std::fmt::Debug for SharedArenaHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedArenaHandles")
            .field("indexes_to_sort_offset", &self.indexes_to_sort_offset)
            .field("sorted_indexes_offset", &self.sorted_indexes_offset)
            .field(
                "precomputed_distances_offset",
                &self.precomputed_distances_offset,
            )
            .field("transforms_offset", &self.transforms_offset)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SortDone {
    pub splat_sort_count: usize,
    pub splat_render_count: usize,
    pub sort_time: Duration,
    /// Populated in copy-memory mode only; shared mode reads the arena
    /// region directly and skips the copy.
    pub sorted_indexes: Option<Vec<u32>>,
}

#[derive(Debug)]
pub enum SorterReply {
    SetupComplete { shared: Option<SharedArenaHandles> },
    SortDone(SortDone),
    Error(SorterError),
}
