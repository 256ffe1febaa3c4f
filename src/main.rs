//! VIN output engine simulation: a frame clock raises the two interrupts, an
//! application task recycles completed buffers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use tracing::{error, info, warn};

use vinline::capture::{BufferStatus, DmaAddr, FrameBuffer};
use vinline::hw::{DmaAllocator, DmaRegion, Link, MmapDmaAllocator, Pad, SimHardware};
use vinline::output::dummy::dummy_layout;
use vinline::{utils, Config, LineId, VinDevice};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Load configuration
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    utils::init_tracing(&config.log.filter);
    vinline::CONFIG.store(Arc::new(config.clone()));

    info!("VIN simulation launching...");

    let hw = Arc::new(SimHardware::new());
    let alloc = Arc::new(MmapDmaAllocator::new());
    let device = Arc::new(VinDevice::new(hw.clone(), hw.clone(), alloc.clone(), &config));

    let line = config.sim.line;
    let link = match line {
        LineId::Wr => Link::CsiToWr,
        LineId::Isp => Link::CsiToIsp,
    };
    device.connect(line, link)?;
    device.set_power(line, true)?;

    // Application buffers, sized like the line's scratch buffer
    let fmt = device.get_format(line, Pad::Sink);
    let pad = line.dummy_pad();
    let (stride, size) = dummy_layout(pad, fmt.width, fmt.height);
    let mut regions: Vec<Box<dyn DmaRegion>> = Vec::new();
    for index in 0..config.sim.buffer_count {
        let Some(region) = alloc.alloc_coherent(size) else {
            warn!(index, "Application buffer allocation failed");
            continue;
        };
        let y = region.addr();
        let uv = match pad {
            Pad::Src => y.offset((stride * fmt.height as usize) as u64),
            Pad::Sink => DmaAddr::NULL,
        };
        device.queue_buffer(line, FrameBuffer::with_planes(index, [y, uv]));
        regions.push(region);
    }
    info!(count = regions.len(), size, "Application buffers queued");

    device.set_stream(line, true)?;

    // Frame clock: rotation strictly before completion, as hardware orders them
    let period = Duration::from_secs_f64(1.0 / config.sim.fps.max(1) as f64);
    let frames = config.sim.frames;
    let clock_device = device.clone();
    let clock = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        for _ in 0..frames {
            ticker.tick().await;
            clock_device.on_buffer_changed(line);
            clock_device.on_buffer_done(line);
        }
    });

    // Application: requeue every completed buffer
    let completions = device.completions(line);
    let app_device = device.clone();
    let app = tokio::spawn(async move {
        let started = Instant::now();
        while let Ok(done) = completions.recv_async().await {
            if done.status != BufferStatus::Done {
                info!(index = done.buffer.index, status = ?done.status, "Buffer returned");
                continue;
            }
            if let Some(ts) = done.buffer.timestamp {
                metrics::histogram!("vin_frame_age_ms").record(ts.elapsed().as_secs_f64() * 1e3);
            }
            if done.buffer.sequence % 30 == 0 {
                info!(
                    sequence = done.buffer.sequence,
                    index = done.buffer.index,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Frame done"
                );
            }
            let planes = done.buffer.planes;
            app_device.queue_buffer(line, FrameBuffer::with_planes(done.buffer.index, planes));
        }
    });

    if let Err(e) = clock.await {
        error!("Frame clock failed: {}", e);
    }

    device.set_stream(line, false)?;
    device.flush_buffers(line, BufferStatus::Error);
    device.set_power(line, false)?;
    device.disconnect(line);

    let stats = device.stats(line);
    info!(
        completed = stats.completed,
        aborted = stats.aborted,
        repeats = stats.repeats,
        underflows = stats.underflows,
        register_writes = hw.address_writes().len(),
        "VIN simulation finished"
    );

    // The device still owns the completion senders; stop the consumer here
    app.abort();
    drop(regions);
    Ok(())
}
