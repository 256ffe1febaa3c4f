//! In-process stand-ins for the VIN register block and the DMA allocator.
//!
//! `SimHardware` journals every register write and power transition so the
//! simulation binary and the tests can replay what real hardware would have
//! seen. `MmapDmaAllocator` hands out anonymous mappings whose virtual
//! address doubles as the bus address.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use memmap2::MmapMut;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{DmaAddressSink, DmaAllocator, DmaRegion, Link, PowerDomain, VinHardware};
use crate::capture::DmaAddr;
use crate::utils::page_align;

/// One observable side effect on the simulated block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwEvent {
    WrPing(DmaAddr),
    WrPong(DmaAddr),
    IspYuv { y: DmaAddr, uv: DmaAddr },
    StreamSet(Link),
    WrIrqEnable(bool),
    WrStreamSet,
    RuntimeGet,
    RuntimePut,
    ClkEnable(Link),
    ClkDisable(Link),
}

impl HwEvent {
    pub fn is_address_write(&self) -> bool {
        matches!(
            self,
            HwEvent::WrPing(_) | HwEvent::WrPong(_) | HwEvent::IspYuv { .. }
        )
    }
}

/// Recording VIN block
#[derive(Debug, Default)]
pub struct SimHardware {
    events: Mutex<Vec<HwEvent>>,
}

impl SimHardware {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: HwEvent) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<HwEvent> {
        self.events.lock().clone()
    }

    /// Drain the journal
    pub fn take_events(&self) -> Vec<HwEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn address_writes(&self) -> Vec<HwEvent> {
        self.events
            .lock()
            .iter()
            .copied()
            .filter(HwEvent::is_address_write)
            .collect()
    }

    pub fn count(&self, event: HwEvent) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }

    /// Most recent ping address, as the writer would use it next frame
    pub fn current_wr_addr(&self) -> Option<DmaAddr> {
        self.events.lock().iter().rev().find_map(|e| match e {
            HwEvent::WrPing(addr) => Some(*addr),
            _ => None,
        })
    }

    /// Most recent Y/UV pair
    pub fn current_yuv_addr(&self) -> Option<(DmaAddr, DmaAddr)> {
        self.events.lock().iter().rev().find_map(|e| match e {
            HwEvent::IspYuv { y, uv } => Some((*y, *uv)),
            _ => None,
        })
    }
}

impl DmaAddressSink for SimHardware {
    fn set_wr_ping_addr(&self, addr: DmaAddr) {
        self.record(HwEvent::WrPing(addr));
    }

    fn set_wr_pong_addr(&self, addr: DmaAddr) {
        self.record(HwEvent::WrPong(addr));
    }

    fn set_isp_yuv_addr(&self, y: DmaAddr, uv: DmaAddr) {
        self.record(HwEvent::IspYuv { y, uv });
    }
}

impl VinHardware for SimHardware {
    fn stream_set(&self, link: Link) {
        self.record(HwEvent::StreamSet(link));
    }

    fn wr_irq_enable(&self, enable: bool) {
        self.record(HwEvent::WrIrqEnable(enable));
    }

    fn wr_stream_set(&self) {
        self.record(HwEvent::WrStreamSet);
    }
}

impl PowerDomain for SimHardware {
    fn runtime_get(&self) {
        self.record(HwEvent::RuntimeGet);
    }

    fn runtime_put(&self) {
        self.record(HwEvent::RuntimePut);
    }

    fn clk_enable(&self, link: Link) {
        self.record(HwEvent::ClkEnable(link));
    }

    fn clk_disable(&self, link: Link) {
        self.record(HwEvent::ClkDisable(link));
    }
}

/// Anonymous mapping posing as coherent DMA memory
pub struct MmapRegion {
    map: MmapMut,
}

impl DmaRegion for MmapRegion {
    fn addr(&self) -> DmaAddr {
        DmaAddr(self.map.as_ptr() as u64)
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Allocator backed by anonymous mappings
#[derive(Debug, Default)]
pub struct MmapDmaAllocator {
    fail: AtomicBool,
    allocated: AtomicUsize,
}

impl MmapDmaAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following allocation fail
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    /// Allocations handed out so far
    pub fn allocations(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl DmaAllocator for MmapDmaAllocator {
    fn alloc_coherent(&self, size: usize) -> Option<Box<dyn DmaRegion>> {
        if self.fail.load(Ordering::Relaxed) {
            return None;
        }
        let map = match MmapMut::map_anon(page_align(size.max(1))) {
            Ok(map) => map,
            Err(e) => {
                warn!("DMA mapping of {} bytes failed: {}", size, e);
                return None;
            }
        };
        self.allocated.fetch_add(1, Ordering::Relaxed);
        debug!("Mapped {} byte DMA region at {:p}", map.len(), map.as_ptr());
        Some(Box::new(MmapRegion { map }))
    }
}
