use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

use crate::kernel::KernelVariant;

use super::worker::spawn_coordinator;
use super::{
    InitMessage, SharedArenaHandles, SortDone, SortMessage, SorterConstants, SorterError,
    SorterReply, SorterRequest, UploadRange,
};

const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
}

impl OsVersion {
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        self.major > major || (self.major == major && self.minor >= minor)
    }
}

/// Everything variant selection needs to know about the platform.
#[derive(Debug, Clone, Copy)]
pub struct PlatformCaps {
    /// Cross-origin isolation: whether a memory buffer may be mutated from
    /// both execution contexts without copying.
    pub cross_origin_isolated: bool,
    pub simd_supported: bool,
    /// iOS-family version when running inside that mobile webview. Builds
    /// below 16.4 reject shared-memory-shaped kernel binaries outright, even
    /// when isolation is nominally granted.
    pub mobile_os_version: Option<OsVersion>,
}

impl PlatformCaps {
    fn forces_non_shared(&self) -> bool {
        match self.mobile_os_version {
            Some(version) => !version.at_least(16, 4),
            None => false,
        }
    }
}

/// The capability table: legacy mobile builds are downgraded to a non-shared
/// binary first, then (SIMD x shared) picks among the four variants 1:1.
/// Returns the variant together with the effective shared-memory decision.
pub fn select_kernel_variant(caps: &PlatformCaps) -> (KernelVariant, bool) {
    let shared = caps.cross_origin_isolated && !caps.forces_non_shared();
    let variant = match (caps.simd_supported, shared) {
        (true, true) => KernelVariant::Simd,
        (true, false) => KernelVariant::SimdNonShared,
        (false, true) => KernelVariant::NoSimd,
        (false, false) => KernelVariant::NoSimdNonShared,
    };
    (variant, shared)
}

/// Native capability probe. Threads share one address space, so the shared
/// arena is always on the table; wide kernels are worth it on the 64-bit
/// targets this ships to.
pub fn probe_platform() -> PlatformCaps {
    PlatformCaps {
        cross_origin_isolated: true,
        simd_supported: cfg!(any(target_arch = "x86_64", target_arch = "aarch64")),
        mobile_os_version: None,
    }
}

/// Main-thread proxy for the sort coordinator. One outstanding sort request
/// at a time is the expected usage; overlapping requests are not
/// deduplicated and are serviced in arrival order.
pub struct SortClient {
    request_tx: Sender<SorterRequest>,
    reply_rx: Receiver<SorterReply>,
    shared: Option<SharedArenaHandles>,
    variant: KernelVariant,
    splat_count: usize,
    use_shared_memory: bool,
}

/// Creates a coordinator for one splat scene: selects the kernel variant for
/// the platform, spawns the worker, and blocks until setup completes. Setup
/// failure is fatal and unretried; callers may re-invoke from scratch.
pub fn create_sort_client(
    splat_count: usize,
    caps: &PlatformCaps,
    integer_based_sort: bool,
    dynamic_mode: bool,
    distance_map_precision: u32,
) -> Result<SortClient, SorterError> {
    let (variant, use_shared_memory) = select_kernel_variant(caps);
    debug_assert_eq!(variant.shared_memory_shaped(), use_shared_memory);
    log::info!(
        "sort kernel variant: {} (shared memory: {use_shared_memory})",
        variant.name()
    );

    let (request_tx, reply_rx) = spawn_coordinator();
    request_tx
        .send(SorterRequest::Init(Box::new(InitMessage {
            variant,
            splat_count,
            use_shared_memory,
            integer_based_sort,
            dynamic_mode,
            distance_map_range: 1 << distance_map_precision,
            constants: SorterConstants::default(),
        })))
        .map_err(|_| SorterError::WorkerDisconnected)?;

    match reply_rx.recv_timeout(SETUP_TIMEOUT) {
        Ok(SorterReply::SetupComplete { shared }) => Ok(SortClient {
            request_tx,
            reply_rx,
            shared,
            variant,
            splat_count,
            use_shared_memory,
        }),
        Ok(SorterReply::Error(err)) => Err(err),
        Ok(reply) => Err(SorterError::Other(format!(
            "unexpected setup reply: {reply:?}"
        ))),
        Err(_) => Err(SorterError::WorkerDisconnected),
    }
}

impl SortClient {
    pub fn splat_count(&self) -> usize {
        self.splat_count
    }

    pub fn variant(&self) -> KernelVariant {
        self.variant
    }

    pub fn uses_shared_memory(&self) -> bool {
        self.use_shared_memory
    }

    /// Uploads one contiguous range of float centers (4 lanes per entry).
    /// Uploads sent before a sort request are visible to that sort.
    pub fn upload_centers_f32(
        &self,
        centers: &[f32],
        scene_indexes: Option<&[u32]>,
        range: UploadRange,
    ) -> Result<(), SorterError> {
        self.send_centers(bytemuck::cast_slice(centers), scene_indexes, range)
    }

    /// Quantized-integer counterpart of [`SortClient::upload_centers_f32`].
    pub fn upload_centers_i32(
        &self,
        centers: &[i32],
        scene_indexes: Option<&[u32]>,
        range: UploadRange,
    ) -> Result<(), SorterError> {
        self.send_centers(bytemuck::cast_slice(centers), scene_indexes, range)
    }

    fn send_centers(
        &self,
        centers: &[u8],
        scene_indexes: Option<&[u32]>,
        range: UploadRange,
    ) -> Result<(), SorterError> {
        self.request_tx
            .send(SorterRequest::Centers {
                centers: centers.to_vec(),
                scene_indexes: scene_indexes
                    .map(|indexes| bytemuck::cast_slice(indexes).to_vec()),
                range,
            })
            .map_err(|_| SorterError::WorkerDisconnected)
    }

    /// Round-trips one sort request. Blocks until the coordinator replies;
    /// there is no cancellation, a slow sort simply delays the caller.
    pub fn request_sort(&self, message: SortMessage) -> Result<SortDone, SorterError> {
        self.request_tx
            .send(SorterRequest::Sort(Box::new(message)))
            .map_err(|_| SorterError::WorkerDisconnected)?;
        match self.reply_rx.recv() {
            Ok(SorterReply::SortDone(done)) => Ok(done),
            Ok(SorterReply::Error(err)) => Err(err),
            Ok(reply) => Err(SorterError::Other(format!(
                "unexpected sort reply: {reply:?}"
            ))),
            Err(_) => Err(SorterError::WorkerDisconnected),
        }
    }

    /// Copies the sorted order for `done` into `out`: from the reply payload
    /// in copy mode, or straight out of the shared region (no extra hop
    /// through the message) in shared mode.
    pub fn read_sorted(&self, done: &SortDone, out: &mut Vec<u32>) {
        out.clear();
        match (&done.sorted_indexes, &self.shared) {
            (Some(sorted), _) => out.extend_from_slice(sorted),
            (None, Some(handles)) => {
                // SAFETY: called between a SortDone reply and the next sort
                // request, which is exactly the window the protocol grants
                // the client for this region.
                let sorted = unsafe { &handles.arena.sorted_indexes()[..done.splat_render_count] };
                out.extend_from_slice(sorted);
            }
            (None, None) => {}
        }
    }

    /// Shared mode only: writes the candidate index list directly into the
    /// arena. Must not be called while a sort is in flight.
    pub fn write_indexes_to_sort(&self, indexes: &[u32]) -> Result<(), SorterError> {
        let handles = self
            .shared
            .as_ref()
            .ok_or(SorterError::SharedMemoryUnavailable)?;
        // SAFETY: see the serialization contract on SortArena.
        unsafe {
            handles.arena.indexes_to_sort()[..indexes.len()].copy_from_slice(indexes);
        }
        Ok(())
    }

    /// Shared mode only: writes precomputed float depths in place.
    pub fn write_precomputed_distances_f32(&self, distances: &[f32]) -> Result<(), SorterError> {
        let handles = self
            .shared
            .as_ref()
            .ok_or(SorterError::SharedMemoryUnavailable)?;
        // SAFETY: see the serialization contract on SortArena.
        unsafe {
            handles.arena.precomputed_distances_f32()[..distances.len()]
                .copy_from_slice(distances);
        }
        Ok(())
    }

    /// Shared mode only: writes per-scene transforms in place.
    pub fn write_transforms(&self, transforms: &[f32]) -> Result<(), SorterError> {
        let handles = self
            .shared
            .as_ref()
            .ok_or(SorterError::SharedMemoryUnavailable)?;
        // SAFETY: see the serialization contract on SortArena.
        unsafe {
            handles.arena.transforms()[..transforms.len()].copy_from_slice(transforms);
        }
        Ok(())
    }
}

impl Drop for SortClient {
    fn drop(&mut self) {
        let _ = self.request_tx.send(SorterRequest::Shutdown);
    }
}

impl std::fmt::Debug for SortClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortClient")
            .field("variant", &self.variant.name())
            .field("splat_count", &self.splat_count)
            .field("use_shared_memory", &self.use_shared_memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(isolated: bool, simd: bool, mobile: Option<(u32, u32)>) -> PlatformCaps {
        PlatformCaps {
            cross_origin_isolated: isolated,
            simd_supported: simd,
            mobile_os_version: mobile.map(|(major, minor)| OsVersion { major, minor }),
        }
    }

    #[test]
    fn variant_table_covers_all_capability_combinations() {
        let cases = [
            (caps(true, true, None), KernelVariant::Simd, true),
            (caps(true, false, None), KernelVariant::NoSimd, true),
            (caps(false, true, None), KernelVariant::SimdNonShared, false),
            (
                caps(false, false, None),
                KernelVariant::NoSimdNonShared,
                false,
            ),
        ];
        for (caps, expected_variant, expected_shared) in cases {
            let (variant, shared) = select_kernel_variant(&caps);
            assert_eq!(variant, expected_variant, "caps: {caps:?}");
            assert_eq!(shared, expected_shared, "caps: {caps:?}");
        }
    }

    #[test]
    fn legacy_mobile_never_gets_a_shared_shaped_kernel() {
        // Isolation granted, but the platform build predates the fix.
        let (variant, shared) = select_kernel_variant(&caps(true, true, Some((16, 3))));
        assert_eq!(variant, KernelVariant::SimdNonShared);
        assert!(!shared);
        assert!(!variant.shared_memory_shaped());

        let (variant, shared) = select_kernel_variant(&caps(true, false, Some((15, 7))));
        assert_eq!(variant, KernelVariant::NoSimdNonShared);
        assert!(!shared);
    }

    #[test]
    fn fixed_mobile_versions_keep_shared_memory() {
        let (variant, shared) = select_kernel_variant(&caps(true, true, Some((16, 4))));
        assert_eq!(variant, KernelVariant::Simd);
        assert!(shared);
        let (variant, _) = select_kernel_variant(&caps(true, true, Some((17, 0))));
        assert_eq!(variant, KernelVariant::Simd);
    }
}
