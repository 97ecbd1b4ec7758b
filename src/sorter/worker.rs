use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use crate::arena::{ArenaConfig, SortArena};
use crate::kernel::{SortArgs, SortKernel};

use super::{
    DistanceData, InitMessage, SharedArenaHandles, SortDone, SortMessage, SorterError,
    SorterReply, SorterRequest, UploadRange,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    AwaitingKernel,
    Ready,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingKernel => "awaiting-kernel",
            Self::Ready => "ready",
        }
    }
}

/// What the dispatch loop does with a serviced request.
enum Dispatch {
    Reply(SorterReply),
    Silent,
    Shutdown,
}

/// Owns the arena and the kernel, and is the single consumer of the request
/// queue: every arena write and kernel invocation happens sequentially as
/// messages are dequeued, so no locking exists anywhere in the subsystem.
struct SortCoordinator {
    phase: Phase,
    arena: Option<Arc<SortArena>>,
    kernel: Option<SortKernel>,
    use_shared_memory: bool,
    integer_based_sort: bool,
    dynamic_mode: bool,
    distance_map_range: usize,
    splat_count: usize,
    /// High-water mark of entries with valid center data; only contiguous
    /// range uploads advance it, and sorts clamp against it.
    uploaded_splat_count: usize,
}

impl SortCoordinator {
    fn new() -> Self {
        Self {
            phase: Phase::Uninitialized,
            arena: None,
            kernel: None,
            use_shared_memory: false,
            integer_based_sort: false,
            dynamic_mode: false,
            distance_map_range: 0,
            splat_count: 0,
            uploaded_splat_count: 0,
        }
    }

    fn expect_phase(&self, wanted: Phase, message: &'static str) -> Result<(), SorterError> {
        if self.phase == wanted {
            Ok(())
        } else {
            Err(SorterError::InvalidPhase {
                message,
                phase: self.phase.name(),
            })
        }
    }

    fn handle(&mut self, request: SorterRequest) -> Result<Dispatch, SorterError> {
        match request {
            SorterRequest::Init(init) => self.handle_init(*init).map(Dispatch::Reply),
            SorterRequest::Centers {
                centers,
                scene_indexes,
                range,
            } => {
                self.handle_centers(&centers, scene_indexes.as_deref(), range)?;
                Ok(Dispatch::Silent)
            }
            SorterRequest::Sort(sort) => self.handle_sort(*sort).map(Dispatch::Reply),
            SorterRequest::Shutdown => Ok(Dispatch::Shutdown),
        }
    }

    fn handle_init(&mut self, init: InitMessage) -> Result<SorterReply, SorterError> {
        self.expect_phase(Phase::Uninitialized, "init")?;
        // Both ends must plan the arena from the same word sizes.
        debug_assert_eq!(init.constants.bytes_per_float, crate::arena::BYTES_PER_FLOAT);
        debug_assert_eq!(init.constants.bytes_per_int, crate::arena::BYTES_PER_INT);
        self.phase = Phase::AwaitingKernel;
        self.use_shared_memory = init.use_shared_memory;
        self.integer_based_sort = init.integer_based_sort;
        self.dynamic_mode = init.dynamic_mode;
        self.distance_map_range = init.distance_map_range;
        self.splat_count = init.splat_count;
        self.uploaded_splat_count = 0;

        let config = ArenaConfig {
            splat_count: init.splat_count,
            integer_based_sort: init.integer_based_sort,
            dynamic_mode: init.dynamic_mode,
            distance_map_range: init.distance_map_range,
            max_scenes: init.constants.max_scenes,
            page_size: init.constants.memory_page_size,
        };
        let arena = Arc::new(SortArena::allocate(config)?);
        let kernel = SortKernel::instantiate(init.variant);
        log::debug!(
            "sort coordinator ready: {} splats, {} pages, kernel {}",
            init.splat_count,
            arena.layout().total_pages,
            kernel.variant().name()
        );

        let shared = if init.use_shared_memory {
            let layout = arena.layout();
            Some(SharedArenaHandles {
                arena: Arc::clone(&arena),
                indexes_to_sort_offset: layout.indexes_to_sort,
                sorted_indexes_offset: layout.sorted_indexes,
                precomputed_distances_offset: layout.precomputed_distances,
                transforms_offset: layout.transforms,
            })
        } else {
            None
        };

        self.arena = Some(arena);
        self.kernel = Some(kernel);
        self.phase = Phase::Ready;
        Ok(SorterReply::SetupComplete { shared })
    }

    fn handle_centers(
        &mut self,
        centers: &[u8],
        scene_indexes: Option<&[u8]>,
        range: UploadRange,
    ) -> Result<(), SorterError> {
        self.expect_phase(Phase::Ready, "centers")?;
        let arena = self.arena.as_ref().ok_or(SorterError::InvalidPhase {
            message: "centers",
            phase: self.phase.name(),
        })?;

        // Payloads arrive as raw bytes; decode word-wise so no alignment is
        // assumed of the transport buffer. Range validity is a caller
        // precondition (hot path, not bounds-defended).
        let lane_count = range.count * crate::arena::CENTER_LANES;
        let lane_from = range.from * crate::arena::CENTER_LANES;
        if self.integer_based_sort {
            // SAFETY: single consumer; no sort is running while this message
            // is being serviced.
            let dst = unsafe { &mut arena.centers_i32()[lane_from..lane_from + lane_count] };
            for (slot, bytes) in dst.iter_mut().zip(centers.chunks_exact(4)) {
                *slot = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
        } else {
            // SAFETY: as above.
            let dst = unsafe { &mut arena.centers_f32()[lane_from..lane_from + lane_count] };
            for (slot, bytes) in dst.iter_mut().zip(centers.chunks_exact(4)) {
                *slot = f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
        }
        if self.dynamic_mode {
            if let Some(scene_bytes) = scene_indexes {
                // SAFETY: as above.
                let dst =
                    unsafe { &mut arena.scene_indexes()[range.from..range.from + range.count] };
                for (slot, bytes) in dst.iter_mut().zip(scene_bytes.chunks_exact(4)) {
                    *slot = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                }
            }
        }

        self.uploaded_splat_count = self.uploaded_splat_count.max(range.from + range.count);
        log::trace!(
            "uploaded range {}..{} (high-water {})",
            range.from,
            range.from + range.count,
            self.uploaded_splat_count
        );
        Ok(())
    }

    fn handle_sort(&mut self, sort: SortMessage) -> Result<SorterReply, SorterError> {
        self.expect_phase(Phase::Ready, "sort")?;
        let (arena, kernel) = match (self.arena.as_ref(), self.kernel.as_ref()) {
            (Some(arena), Some(kernel)) => (arena, kernel),
            _ => {
                return Err(SorterError::InvalidPhase {
                    message: "sort",
                    phase: self.phase.name(),
                })
            }
        };
        let start = Instant::now();

        // Never sort more entries than have been uploaded; partial uploads
        // are a normal transient while a scene streams in.
        let splat_sort_count = sort.splat_sort_count.min(self.uploaded_splat_count);
        let splat_render_count = sort.splat_render_count.min(self.uploaded_splat_count);

        if !self.use_shared_memory {
            // SAFETY: single consumer; the kernel is not running.
            unsafe {
                if let Some(indexes) = &sort.indexes_to_sort {
                    arena.indexes_to_sort()[..indexes.len()].copy_from_slice(indexes);
                }
                if self.dynamic_mode {
                    if let Some(transforms) = &sort.transforms {
                        arena.transforms()[..transforms.len()].copy_from_slice(transforms);
                    }
                }
                if sort.use_precomputed_distances {
                    match &sort.precomputed_distances {
                        Some(DistanceData::Float(distances)) => {
                            arena.precomputed_distances_f32()[..distances.len()]
                                .copy_from_slice(distances);
                        }
                        Some(DistanceData::Integer(distances)) => {
                            arena.precomputed_distances_i32()[..distances.len()]
                                .copy_from_slice(distances);
                        }
                        None => {}
                    }
                }
            }
        }

        // SAFETY: as above. The histogram is reused scratch, cleared on
        // every call; the matrix slot is rewritten wholesale.
        unsafe {
            arena.frequencies()[..self.distance_map_range].fill(0);
            arena.model_view_proj().copy_from_slice(&sort.model_view_proj);
        }

        kernel.sort_indexes(
            arena,
            &SortArgs {
                distance_map_range: self.distance_map_range,
                splat_sort_count,
                splat_render_count,
                splat_count: self.splat_count,
                use_precomputed_distances: sort.use_precomputed_distances,
                integer_based_sort: self.integer_based_sort,
                dynamic_mode: self.dynamic_mode,
            },
        );

        let sorted_indexes = if self.use_shared_memory {
            None
        } else {
            // SAFETY: the kernel has returned; the region is quiescent.
            Some(unsafe { arena.sorted_indexes()[..splat_render_count].to_vec() })
        };
        let sort_time = start.elapsed();
        log::trace!(
            "sorted {splat_sort_count} splats ({splat_render_count} rendered) in {sort_time:?}"
        );

        Ok(SorterReply::SortDone(SortDone {
            splat_sort_count,
            splat_render_count,
            sort_time,
            sorted_indexes,
        }))
    }
}

/// Spawns the coordinator on its own thread and returns its message
/// endpoints. Requests are serviced strictly in arrival order; errors travel
/// back as [`SorterReply::Error`] instead of tearing the worker down.
pub fn spawn_coordinator() -> (Sender<SorterRequest>, Receiver<SorterReply>) {
    let (request_tx, request_rx) = mpsc::channel::<SorterRequest>();
    let (reply_tx, reply_rx) = mpsc::channel::<SorterReply>();
    std::thread::spawn(move || {
        let mut coordinator = SortCoordinator::new();
        while let Ok(request) = request_rx.recv() {
            match coordinator.handle(request) {
                Ok(Dispatch::Reply(reply)) => {
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                Ok(Dispatch::Silent) => {}
                Ok(Dispatch::Shutdown) => {
                    log::debug!("sort coordinator shutting down");
                    break;
                }
                Err(err) => {
                    log::warn!("sort coordinator rejected message: {err}");
                    if reply_tx.send(SorterReply::Error(err)).is_err() {
                        break;
                    }
                }
            }
        }
    });
    (request_tx, reply_rx)
}
