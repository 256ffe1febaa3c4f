pub mod format;
pub mod frame;

pub use format::{FrameFormat, MbusCode, PadFormats};
pub use frame::{BufferStatus, CompletedBuffer, DmaAddr, FrameBuffer};
