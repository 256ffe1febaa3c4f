//! VIN device context: both capture lines, the dummy buffer registry and the
//! device-wide power count.
//!
//! Control-path entry points (`set_power`, `set_stream`, formats) take
//! blocking `parking_lot` locks. Buffer traffic and the interrupt entry
//! points go straight to the line's [`OutputEngine`], which only ever takes
//! its own spin lock.

use std::sync::Arc;

use flume::Receiver;
use parking_lot::Mutex;
use tracing::{error, info, instrument, warn};

use crate::capture::format::FrameSizeRange;
use crate::capture::{
    BufferStatus, CompletedBuffer, DmaAddr, FrameBuffer, FrameFormat, MbusCode, PadFormats,
};
use crate::error::{Counter, VinError};
use crate::hw::{
    AddressRoute, DmaAllocator, DummyModule, LineId, Link, Pad, PowerDomain, VinHardware,
};
use crate::output::{
    DummyBufferPool, DummyRegistry, Edge, EngineStats, OutputEngine, OutputSnapshot,
    OutputState, RefCount,
};
use crate::Config;

/// Stream count and the formats it protects
struct LineStream {
    count: RefCount,
    formats: PadFormats,
}

/// One capture line
pub struct VinLine {
    id: LineId,
    engine: OutputEngine,
    link: Mutex<Option<Link>>,
    stream: Mutex<LineStream>,
    power: Mutex<RefCount>,
    completions: Receiver<CompletedBuffer>,
}

impl VinLine {
    fn link(&self) -> Result<Link, VinError> {
        (*self.link.lock()).ok_or_else(|| {
            warn!(line = %self.id, "No upstream link");
            VinError::NoLink(self.id)
        })
    }
}

/// The VIN block
pub struct VinDevice {
    hw: Arc<dyn VinHardware>,
    power: Arc<dyn PowerDomain>,
    alloc: Arc<dyn DmaAllocator>,
    lines: [VinLine; 2],
    dummies: DummyRegistry,
    power_count: Mutex<RefCount>,
    frame_skip: u32,
}

impl VinDevice {
    pub fn new<H>(
        hw: Arc<H>,
        power: Arc<dyn PowerDomain>,
        alloc: Arc<dyn DmaAllocator>,
        config: &Config,
    ) -> Self
    where
        H: VinHardware + 'static,
    {
        let make_line = |id: LineId| {
            let (tx, rx) = flume::unbounded();
            VinLine {
                id,
                engine: OutputEngine::new(id, hw.clone(), tx, config.device.queue_depth),
                link: Mutex::new(None),
                stream: Mutex::new(LineStream {
                    count: RefCount::new(),
                    formats: PadFormats::new(id, config.format.width, config.format.height),
                }),
                power: Mutex::new(RefCount::new()),
                completions: rx,
            }
        };
        let lines = [make_line(LineId::Wr), make_line(LineId::Isp)];

        info!("VIN device initialised");
        Self {
            hw,
            power,
            alloc,
            lines,
            dummies: DummyRegistry::new(),
            power_count: Mutex::new(RefCount::new()),
            frame_skip: config.device.frame_skip,
        }
    }

    fn line(&self, id: LineId) -> &VinLine {
        &self.lines[id.index()]
    }

    pub fn engine(&self, line: LineId) -> &OutputEngine {
        &self.line(line).engine
    }

    /// Attach the resolved upstream path of `line`.
    pub fn connect(&self, line: LineId, link: Link) -> Result<(), VinError> {
        let mut current = self.line(line).link.lock();
        if current.is_some() {
            return Err(VinError::Busy(line));
        }
        *current = Some(link);
        info!(%line, ?link, "Link enabled");
        Ok(())
    }

    pub fn disconnect(&self, line: LineId) {
        if let Some(link) = self.line(line).link.lock().take() {
            info!(%line, ?link, "Link disabled");
        }
    }

    #[instrument(skip(self))]
    pub fn set_power(&self, line: LineId, on: bool) -> Result<(), VinError> {
        let l = self.line(line);
        let link = l.link()?;

        {
            let mut count = l.power.lock();
            if on {
                if count.get() == Edge::First {
                    l.engine.reset();
                }
            } else if count.put().is_err() {
                error!("Line power off on power count 0");
                return Err(VinError::AlreadyOff {
                    line,
                    counter: Counter::LinePower,
                });
            }
        }

        let mut count = self.power_count.lock();
        if on {
            if count.get() == Edge::First {
                self.power.runtime_get();
                self.power.clk_enable(link);
                info!(?link, "VIN powered up");
            }
        } else {
            match count.put() {
                Ok(Edge::Last) => {
                    self.power.clk_disable(link);
                    self.power.runtime_put();
                    info!(?link, "VIN powered down");
                }
                Ok(_) => {}
                Err(_) => {
                    error!("Device power off on power count 0");
                    return Err(VinError::AlreadyOff {
                        line,
                        counter: Counter::DevicePower,
                    });
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_stream(&self, line: LineId, enable: bool) -> Result<(), VinError> {
        let l = self.line(line);
        let link = l.link()?;

        let mut stream = l.stream.lock();
        if !enable && !stream.count.is_active() {
            error!("Stream off with no active stream");
            return Err(VinError::AlreadyOff {
                line,
                counter: Counter::Stream,
            });
        }

        let fmt = stream.formats.get(Pad::Sink);
        self.sequence_dummy(line, enable, &fmt);

        if enable {
            if stream.count.get() == Edge::First {
                self.hw.stream_set(link);
                if line == LineId::Wr {
                    self.hw.wr_irq_enable(true);
                    self.hw.wr_stream_set();
                }
                l.engine.enable();
            }
        } else if stream.count.put() == Ok(Edge::Last) {
            if line == LineId::Wr {
                self.hw.wr_irq_enable(false);
            }
            l.engine.disable();
        }
        Ok(())
    }

    /// Allocate scratch memory on the module's first stream, release it on
    /// the last, and keep hardware pointed at something valid throughout.
    fn sequence_dummy(&self, line: LineId, enable: bool, fmt: &FrameFormat) {
        let module = line.dummy_module();
        let mut pool = self.dummies.lock(module);

        if enable {
            if pool.streams.get() == Edge::First {
                pool.allocate(self.alloc.as_ref(), fmt);
                self.install_dummy(line, &pool, Pad::Sink);
                self.dummies.set_frame_skip(module, self.frame_skip);
            }
            return;
        }

        match pool.streams.put() {
            Ok(Edge::Last) => {
                pool.free();
                // Addresses are null now
                self.install_dummy(line, &pool, Pad::Sink);
            }
            Ok(_) => {
                // Still streaming: keep hardware on the engine's own buffer
                let planes = Self::dummy_addrs(line, &pool, line.dummy_pad()).1;
                self.line(line).engine.reinstall_or(&planes);
            }
            Err(_) => error!(?module, "Dummy stream count underflow"),
        }
    }

    fn dummy_addrs(line: LineId, pool: &DummyBufferPool, pad: Pad) -> (AddressRoute, [DmaAddr; 2]) {
        let (route, buffer_pad) = match (line, pad) {
            (LineId::Wr, Pad::Sink) => (AddressRoute::PingPong, Pad::Sink),
            _ => (AddressRoute::YuvPlanes, Pad::Src),
        };
        let planes = pool
            .buffer(buffer_pad)
            .map(|b| b.planes)
            .unwrap_or([DmaAddr::NULL; 2]);
        (route, planes)
    }

    fn install_dummy(&self, line: LineId, pool: &DummyBufferPool, pad: Pad) {
        let (route, planes) = Self::dummy_addrs(line, pool, pad);
        self.hw.install(route, &planes);
    }

    pub fn get_format(&self, line: LineId, pad: Pad) -> FrameFormat {
        self.line(line).stream.lock().formats.get(pad)
    }

    /// Negotiate a pad format. While streaming the request is ignored and
    /// the current format is returned.
    pub fn set_format(&self, line: LineId, pad: Pad, fmt: FrameFormat) -> FrameFormat {
        let mut stream = self.line(line).stream.lock();
        if stream.count.is_active() {
            warn!(%line, ?pad, "Format change while streaming ignored");
            return stream.formats.get(pad);
        }
        stream.formats.apply(pad, fmt)
    }

    pub fn enum_mbus_code(&self, line: LineId, pad: Pad, index: usize) -> Result<MbusCode, VinError> {
        self.line(line).stream.lock().formats.enum_mbus_code(pad, index)
    }

    pub fn enum_frame_size(
        &self,
        line: LineId,
        pad: Pad,
        code: MbusCode,
    ) -> Result<FrameSizeRange, VinError> {
        self.line(line).stream.lock().formats.enum_frame_size(pad, code)
    }

    pub fn queue_buffer(&self, line: LineId, buf: FrameBuffer) {
        self.engine(line).queue_buffer(buf);
    }

    pub fn flush_buffers(&self, line: LineId, status: BufferStatus) -> usize {
        self.engine(line).flush(status)
    }

    /// Frame-done interrupt entry point
    pub fn on_buffer_done(&self, line: LineId) -> usize {
        self.engine(line).on_buffer_done()
    }

    /// Buffer-change interrupt entry point
    pub fn on_buffer_changed(&self, line: LineId) {
        self.engine(line).on_buffer_changed();
    }

    /// Where completed and aborted buffers come back
    pub fn completions(&self, line: LineId) -> Receiver<CompletedBuffer> {
        self.line(line).completions.clone()
    }

    pub fn output_state(&self, line: LineId) -> OutputState {
        self.engine(line).state()
    }

    pub fn snapshot(&self, line: LineId) -> OutputSnapshot {
        self.engine(line).snapshot()
    }

    pub fn stats(&self, line: LineId) -> EngineStats {
        self.engine(line).stats()
    }

    pub fn frame_skip(&self, module: DummyModule) -> u32 {
        self.dummies.frame_skip(module)
    }

    pub fn set_frame_skip(&self, module: DummyModule, frames: u32) {
        self.dummies.set_frame_skip(module, frames);
    }

    /// Scratch addresses currently held for `module`/`pad`
    pub fn dummy_planes(&self, module: DummyModule, pad: Pad) -> Option<[DmaAddr; 2]> {
        self.dummies.lock(module).buffer(pad).map(|b| b.planes)
    }
}
