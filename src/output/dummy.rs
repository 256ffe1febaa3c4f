//! Scratch DMA buffers installed whenever a line has no caller buffer, so the
//! writer never targets unmapped memory between power-on and the first real
//! buffer.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info};

use super::refcount::RefCount;
use crate::capture::{DmaAddr, FrameFormat};
use crate::capture::format::FRAME_WIDTH_ALIGN;
use crate::hw::{DmaAllocator, DmaRegion, DummyModule, Pad};
use crate::utils::{align_up, page_align};

/// One per-pad scratch region
#[derive(Default)]
pub struct DummyBuffer {
    pub format: Option<FrameFormat>,
    pub size: usize,
    /// Null when unallocated or when the allocation failed
    pub planes: [DmaAddr; 2],
    region: Option<Box<dyn DmaRegion>>,
}

impl DummyBuffer {
    pub fn is_allocated(&self) -> bool {
        self.region.is_some()
    }
}

impl std::fmt::Debug for DummyBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBuffer")
            .field("format", &self.format)
            .field("size", &self.size)
            .field("planes", &self.planes)
            .finish()
    }
}

/// Row stride and total size of the scratch buffer for `pad`
pub fn dummy_layout(pad: Pad, width: u32, height: u32) -> (usize, usize) {
    let (width, height) = (width as usize, height as usize);
    let align = FRAME_WIDTH_ALIGN as usize;
    match pad {
        // Raw writer: up to four bytes per pixel
        Pad::Sink => {
            let stride = align_up(width * 4, align);
            (stride, page_align(stride * height))
        }
        // Y plane followed by half-height interleaved UV
        Pad::Src => {
            let stride = align_up(width, align);
            (stride, page_align(stride * height * 3 / 2))
        }
    }
}

/// Scratch buffers of one module plus the number of streams using them
#[derive(Debug)]
pub struct DummyBufferPool {
    module: DummyModule,
    pub(crate) streams: RefCount,
    buffers: Vec<DummyBuffer>,
}

impl DummyBufferPool {
    pub fn new(module: DummyModule) -> Self {
        Self {
            module,
            streams: RefCount::new(),
            buffers: (0..module.buffer_count()).map(|_| DummyBuffer::default()).collect(),
        }
    }

    /// Allocate every pad buffer sized for `fmt`. Failed allocations leave
    /// null addresses behind.
    pub fn allocate(&mut self, alloc: &dyn DmaAllocator, fmt: &FrameFormat) {
        let module = self.module;
        for (i, buffer) in self.buffers.iter_mut().enumerate() {
            let pad = if i == Pad::Sink.index() { Pad::Sink } else { Pad::Src };
            let (stride, size) = dummy_layout(pad, fmt.width, fmt.height);

            *buffer = DummyBuffer {
                format: Some(*fmt),
                size,
                ..DummyBuffer::default()
            };

            let Some(region) = alloc.alloc_coherent(size) else {
                error!(?module, ?pad, size, "Dummy buffer allocation failed");
                continue;
            };
            buffer.planes[0] = region.addr();
            if pad == Pad::Src {
                buffer.planes[1] = region.addr().offset((stride * fmt.height as usize) as u64);
            } else {
                debug!(?module, "Single plane dummy buffer");
            }
            buffer.region = Some(region);
        }
        info!(?module, width = fmt.width, height = fmt.height, "Dummy buffers allocated");
    }

    /// Release every region and null the addresses.
    pub fn free(&mut self) {
        for buffer in self.buffers.iter_mut() {
            *buffer = DummyBuffer::default();
        }
        info!(module = ?self.module, "Dummy buffers freed");
    }

    /// Scratch buffer for `pad`, if the module carries one
    pub fn buffer(&self, pad: Pad) -> Option<&DummyBuffer> {
        self.buffers.get(pad.index())
    }

    pub fn streams(&self) -> u32 {
        self.streams.count()
    }
}

struct RegistryEntry {
    pool: Mutex<DummyBufferPool>,
    frame_skip: AtomicU32,
}

/// Device-wide table of dummy pools, indexed by module
pub struct DummyRegistry {
    entries: [RegistryEntry; 2],
}

impl DummyRegistry {
    pub fn new() -> Self {
        let entry = |module| RegistryEntry {
            pool: Mutex::new(DummyBufferPool::new(module)),
            frame_skip: AtomicU32::new(0),
        };
        Self {
            entries: [entry(DummyModule::Vin), entry(DummyModule::Isp)],
        }
    }

    /// Lock a module's pool. Blocks; control path only.
    pub fn lock(&self, module: DummyModule) -> MutexGuard<'_, DummyBufferPool> {
        self.entries[module.index()].pool.lock()
    }

    /// Grace counter set on allocation; interpretation is up to the pipeline
    pub fn frame_skip(&self, module: DummyModule) -> u32 {
        self.entries[module.index()].frame_skip.load(Ordering::Acquire)
    }

    pub fn set_frame_skip(&self, module: DummyModule, frames: u32) {
        self.entries[module.index()]
            .frame_skip
            .store(frames, Ordering::Release);
    }
}

impl Default for DummyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MbusCode;
    use crate::hw::MmapDmaAllocator;

    #[test]
    fn layouts_are_row_and_page_aligned() {
        let page = page_size::get();
        let (stride, size) = dummy_layout(Pad::Sink, 1918, 1080);
        assert_eq!(stride, 7672);
        assert_eq!(size % page, 0);
        assert!(size >= 7672 * 1080);

        let (stride, size) = dummy_layout(Pad::Src, 1918, 1080);
        assert_eq!(stride, 1920);
        assert_eq!(size, page_align(1920 * 1080 * 3 / 2));
    }

    #[test]
    fn isp_pool_derives_chroma_plane() {
        let alloc = MmapDmaAllocator::new();
        let fmt = FrameFormat::new(MbusCode::Y12, 640, 480);
        let mut pool = DummyBufferPool::new(DummyModule::Isp);
        pool.allocate(&alloc, &fmt);

        let sink = pool.buffer(Pad::Sink).unwrap();
        assert!(sink.is_allocated());
        assert!(sink.planes[1].is_null());

        let src = pool.buffer(Pad::Src).unwrap();
        assert_eq!(src.planes[1], src.planes[0].offset(640 * 480));
        assert_eq!(alloc.allocations(), 2);

        pool.free();
        assert!(pool.buffer(Pad::Src).unwrap().planes[0].is_null());
        assert!(!pool.buffer(Pad::Sink).unwrap().is_allocated());
    }

    #[test]
    fn failed_allocation_leaves_null_addresses() {
        let alloc = MmapDmaAllocator::new();
        alloc.set_fail(true);
        let mut pool = DummyBufferPool::new(DummyModule::Vin);
        pool.allocate(&alloc, &FrameFormat::new(MbusCode::Srggb10, 640, 480));

        let sink = pool.buffer(Pad::Sink).unwrap();
        assert!(!sink.is_allocated());
        assert!(sink.planes[0].is_null());
        assert!(pool.buffer(Pad::Src).is_none());
    }
}
