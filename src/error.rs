use thiserror::Error;

use crate::hw::LineId;

/// Which reference count a logic error was reported against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    LinePower,
    DevicePower,
    Stream,
}

impl std::fmt::Display for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Counter::LinePower => "line power",
            Counter::DevicePower => "device power",
            Counter::Stream => "stream",
        })
    }
}

/// Errors returned to the subdevice and video-queue layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VinError {
    #[error("line {0} already has an upstream link")]
    Busy(LineId),

    #[error("line {0} has no upstream link")]
    NoLink(LineId),

    #[error("{counter} already off on line {line}")]
    AlreadyOff { line: LineId, counter: Counter },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
