//! Seams to the hardware the output engine drives.
//!
//! Register layouts, clock trees and IRQ wiring live outside this crate; the
//! engine only sees the narrow traits below.

pub mod sim;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capture::DmaAddr;

pub use sim::{MmapDmaAllocator, SimHardware};

/// Capture lines of the VIN block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineId {
    /// Raw AXI write path, single-plane ping/pong sink
    Wr,
    /// ISP output, dual-plane Y/UV sink
    Isp,
}

impl LineId {
    pub fn index(self) -> usize {
        match self {
            LineId::Wr => 0,
            LineId::Isp => 1,
        }
    }

    /// Which scratch-buffer module backs this line
    pub fn dummy_module(self) -> DummyModule {
        match self {
            LineId::Wr => DummyModule::Vin,
            LineId::Isp => DummyModule::Isp,
        }
    }

    /// Pad whose scratch buffer is re-installed when another consumer of
    /// the module keeps streaming
    pub fn dummy_pad(self) -> Pad {
        match self {
            LineId::Wr => Pad::Sink,
            LineId::Isp => Pad::Src,
        }
    }

    /// Which register set a line's addresses go to
    pub fn route(self) -> AddressRoute {
        match self {
            LineId::Wr => AddressRoute::PingPong,
            LineId::Isp => AddressRoute::YuvPlanes,
        }
    }
}

impl LineId {
    pub fn name(self) -> &'static str {
        match self {
            LineId::Wr => "wr",
            LineId::Isp => "isp0",
        }
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pad {
    Sink,
    Src,
}

impl Pad {
    pub fn index(self) -> usize {
        match self {
            Pad::Sink => 0,
            Pad::Src => 1,
        }
    }
}

/// Resolved upstream path of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Link {
    CsiToWr,
    CsiToIsp,
    DvpToWr,
    DvpToIsp,
}

/// Per-device scratch buffer modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DummyModule {
    Vin,
    Isp,
}

impl DummyModule {
    pub fn index(self) -> usize {
        match self {
            DummyModule::Vin => 0,
            DummyModule::Isp => 1,
        }
    }

    /// Number of per-pad scratch buffers the module carries
    pub fn buffer_count(self) -> usize {
        match self {
            DummyModule::Vin => 1,
            DummyModule::Isp => 2,
        }
    }
}

/// Register set a line writes its frame addresses to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRoute {
    /// Ping and pong both get plane 0
    PingPong,
    /// Plane 0 is luma, plane 1 chroma
    YuvPlanes,
}

/// Write-only address registers. New values take effect at the next
/// hardware buffer-swap boundary.
pub trait DmaAddressSink: Send + Sync {
    fn set_wr_ping_addr(&self, addr: DmaAddr);
    fn set_wr_pong_addr(&self, addr: DmaAddr);
    fn set_isp_yuv_addr(&self, y: DmaAddr, uv: DmaAddr);

    /// Install a plane set along `route`.
    fn install(&self, route: AddressRoute, planes: &[DmaAddr; 2]) {
        match route {
            AddressRoute::PingPong => {
                self.set_wr_ping_addr(planes[0]);
                self.set_wr_pong_addr(planes[0]);
            }
            AddressRoute::YuvPlanes => self.set_isp_yuv_addr(planes[0], planes[1]),
        }
    }
}

/// Stream control registers of the VIN block
pub trait VinHardware: DmaAddressSink {
    fn stream_set(&self, link: Link);
    fn wr_irq_enable(&self, enable: bool);
    fn wr_stream_set(&self);
}

/// Shared power/clock domain. Calls may block.
pub trait PowerDomain: Send + Sync {
    fn runtime_get(&self);
    fn runtime_put(&self);
    fn clk_enable(&self, link: Link);
    fn clk_disable(&self, link: Link);
}

/// A coherent DMA allocation. Memory is released on drop.
pub trait DmaRegion: Send + Sync {
    fn addr(&self) -> DmaAddr;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Coherent DMA allocator. May block; never called from interrupt context.
pub trait DmaAllocator: Send + Sync {
    fn alloc_coherent(&self, size: usize) -> Option<Box<dyn DmaRegion>>;
}
