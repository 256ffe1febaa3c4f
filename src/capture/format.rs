//! Media-bus formats and the minimal per-pad negotiation a capture line needs
//! to size its scratch buffers.

use serde::{Deserialize, Serialize};

use crate::error::VinError;
use crate::hw::{LineId, Pad};

pub const FRAME_MIN_WIDTH: u32 = 64;
pub const FRAME_MAX_WIDTH: u32 = 1920;
pub const FRAME_MIN_HEIGHT: u32 = 64;
pub const FRAME_MAX_HEIGHT: u32 = 1080;

/// Row alignment the DMA writer requires
pub const FRAME_WIDTH_ALIGN: u32 = 8;

/// Media-bus codes the capture lines understand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MbusCode {
    Srggb10,
    Sgrbg10,
    Sgbrg10,
    Sbggr10,
    Y12,
    Rgb565,
}

/// Supported code and its stored bit depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VinFormat {
    pub code: MbusCode,
    pub bpp: u32,
}

const WR_FORMATS: &[VinFormat] = &[
    VinFormat { code: MbusCode::Srggb10, bpp: 10 },
    VinFormat { code: MbusCode::Sgrbg10, bpp: 10 },
    VinFormat { code: MbusCode::Sgbrg10, bpp: 10 },
    VinFormat { code: MbusCode::Sbggr10, bpp: 10 },
];

const ISP_FORMATS: &[VinFormat] = &[VinFormat { code: MbusCode::Y12, bpp: 8 }];

/// Formats accepted on the sink pad of `line`
pub fn line_formats(line: LineId) -> &'static [VinFormat] {
    match line {
        LineId::Wr => WR_FORMATS,
        LineId::Isp => ISP_FORMATS,
    }
}

/// Negotiated frame geometry on one pad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub code: MbusCode,
    pub width: u32,
    pub height: u32,
}

impl FrameFormat {
    pub fn new(code: MbusCode, width: u32, height: u32) -> Self {
        Self { code, width, height }
    }
}

/// Smallest and largest frame a pad accepts for one code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSizeRange {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

/// Active formats of both pads of one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadFormats {
    line: LineId,
    sink: FrameFormat,
    src: FrameFormat,
}

impl PadFormats {
    /// Formats as a freshly registered line sees them
    pub fn new(line: LineId, width: u32, height: u32) -> Self {
        let initial = FrameFormat::new(MbusCode::Rgb565, width, height);
        let mut formats = Self {
            line,
            sink: initial,
            src: initial,
        };
        formats.apply(Pad::Sink, initial);
        formats
    }

    pub fn get(&self, pad: Pad) -> FrameFormat {
        match pad {
            Pad::Sink => self.sink,
            Pad::Src => self.src,
        }
    }

    /// Coerce `fmt` into something `pad` supports.
    pub fn try_format(&self, pad: Pad, mut fmt: FrameFormat) -> FrameFormat {
        match pad {
            Pad::Sink => {
                let formats = line_formats(self.line);
                if !formats.iter().any(|f| f.code == fmt.code) {
                    fmt.code = formats[0].code;
                }
                fmt.width = fmt.width.clamp(FRAME_MIN_WIDTH, FRAME_MAX_WIDTH);
                fmt.height = fmt.height.clamp(FRAME_MIN_HEIGHT, FRAME_MAX_HEIGHT);
                fmt
            }
            // The source pad mirrors whatever the sink carries
            Pad::Src => self.sink,
        }
    }

    /// Try, store and propagate. Returns the format actually applied.
    pub fn apply(&mut self, pad: Pad, fmt: FrameFormat) -> FrameFormat {
        let applied = self.try_format(pad, fmt);
        match pad {
            Pad::Sink => {
                self.sink = applied;
                self.src = self.try_format(Pad::Src, applied);
            }
            Pad::Src => self.src = applied,
        }
        applied
    }

    pub fn enum_mbus_code(&self, pad: Pad, index: usize) -> Result<MbusCode, VinError> {
        let formats = line_formats(self.line);
        if index >= formats.len() {
            return Err(VinError::InvalidArgument("mbus code index out of range"));
        }
        Ok(match pad {
            Pad::Sink => formats[index].code,
            Pad::Src => self.sink.code,
        })
    }

    pub fn enum_frame_size(&self, pad: Pad, code: MbusCode) -> Result<FrameSizeRange, VinError> {
        let min = self.try_format(pad, FrameFormat::new(code, 1, 1));
        if min.code != code {
            return Err(VinError::InvalidArgument("mbus code not supported on pad"));
        }
        let max = self.try_format(pad, FrameFormat::new(code, u32::MAX, u32::MAX));
        Ok(FrameSizeRange {
            min_width: min.width,
            min_height: min.height,
            max_width: max.width,
            max_height: max.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_format_is_coerced_to_line_table() {
        let wr = PadFormats::new(LineId::Wr, 1920, 1080);
        assert_eq!(wr.get(Pad::Sink), FrameFormat::new(MbusCode::Srggb10, 1920, 1080));
        assert_eq!(wr.get(Pad::Src), wr.get(Pad::Sink));

        let isp = PadFormats::new(LineId::Isp, 1920, 1080);
        assert_eq!(isp.get(Pad::Sink).code, MbusCode::Y12);
    }

    #[test]
    fn sink_is_clamped_and_propagated() {
        let mut formats = PadFormats::new(LineId::Wr, 1920, 1080);
        let applied = formats.apply(Pad::Sink, FrameFormat::new(MbusCode::Sbggr10, 4000, 10));
        assert_eq!(applied, FrameFormat::new(MbusCode::Sbggr10, 1920, 64));
        assert_eq!(formats.get(Pad::Src), applied);
    }

    #[test]
    fn source_pad_ignores_requested_geometry() {
        let mut formats = PadFormats::new(LineId::Wr, 640, 480);
        let applied = formats.apply(Pad::Src, FrameFormat::new(MbusCode::Y12, 100, 100));
        assert_eq!(applied, FrameFormat::new(MbusCode::Srggb10, 640, 480));
    }

    #[test]
    fn frame_size_range_for_supported_code() {
        let formats = PadFormats::new(LineId::Wr, 640, 480);
        let range = formats.enum_frame_size(Pad::Sink, MbusCode::Sgrbg10).unwrap();
        assert_eq!(
            range,
            FrameSizeRange {
                min_width: FRAME_MIN_WIDTH,
                min_height: FRAME_MIN_HEIGHT,
                max_width: FRAME_MAX_WIDTH,
                max_height: FRAME_MAX_HEIGHT,
            }
        );
        assert!(formats.enum_frame_size(Pad::Sink, MbusCode::Y12).is_err());
    }

    #[test]
    fn mbus_code_enumeration() {
        let formats = PadFormats::new(LineId::Wr, 640, 480);
        assert_eq!(formats.enum_mbus_code(Pad::Sink, 3).unwrap(), MbusCode::Sbggr10);
        assert_eq!(formats.enum_mbus_code(Pad::Src, 2).unwrap(), MbusCode::Srggb10);
        assert!(formats.enum_mbus_code(Pad::Sink, 4).is_err());
    }
}
