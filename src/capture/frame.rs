use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Maximum number of colour planes a capture buffer carries
pub const MAX_PLANES: usize = 2;

/// Bus address as seen by the DMA engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DmaAddr(pub u64);

impl DmaAddr {
    pub const NULL: DmaAddr = DmaAddr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn offset(self, bytes: u64) -> DmaAddr {
        DmaAddr(self.0 + bytes)
    }
}

impl fmt::Display for DmaAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// One capture buffer handed in by the video queue.
///
/// Deliberately not `Clone`: the output engine owns a buffer exclusively from
/// `queue_buffer` until it comes back out through the completion channel.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Video-queue index, used to identify the buffer on its way back
    pub index: u32,

    /// Plane addresses; unused planes stay null
    pub planes: [DmaAddr; MAX_PLANES],

    /// Per-line completion sequence, valid once done
    pub sequence: u32,

    /// Completion timestamp, shared by every buffer drained in one interrupt
    pub timestamp: Option<Instant>,
}

impl FrameBuffer {
    pub fn single_plane(index: u32, addr: DmaAddr) -> Self {
        Self::with_planes(index, [addr, DmaAddr::NULL])
    }

    pub fn with_planes(index: u32, planes: [DmaAddr; MAX_PLANES]) -> Self {
        Self {
            index,
            planes,
            sequence: 0,
            timestamp: None,
        }
    }
}

/// How a buffer left the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferStatus {
    /// Filled by hardware
    Done,
    /// Aborted; contents are undefined
    Error,
}

/// A buffer returned to the video queue
#[derive(Debug)]
pub struct CompletedBuffer {
    pub buffer: FrameBuffer,
    pub status: BufferStatus,
}
