use std::sync::Arc;

use vinline::capture::{BufferStatus, DmaAddr, FrameBuffer, FrameFormat, MbusCode};
use vinline::error::Counter;
use vinline::hw::sim::HwEvent;
use vinline::hw::{DummyModule, Link, MmapDmaAllocator, Pad, SimHardware};
use vinline::{Config, LineId, OutputState, VinDevice, VinError};

struct Rig {
    hw: Arc<SimHardware>,
    alloc: Arc<MmapDmaAllocator>,
    device: VinDevice,
}

fn rig() -> Rig {
    let mut config = Config::default();
    config.format.width = 640;
    config.format.height = 480;
    let hw = Arc::new(SimHardware::new());
    let alloc = Arc::new(MmapDmaAllocator::new());
    let device = VinDevice::new(hw.clone(), hw.clone(), alloc.clone(), &config);
    Rig { hw, alloc, device }
}

fn buf(index: u32) -> FrameBuffer {
    FrameBuffer::single_plane(index, DmaAddr(0x4000_0000 + 0x10_0000 * index as u64))
}

#[test]
fn nested_stream_calls_touch_hardware_once() {
    let rig = rig();
    rig.device.connect(LineId::Wr, Link::CsiToWr).unwrap();

    for _ in 0..3 {
        rig.device.set_stream(LineId::Wr, true).unwrap();
    }
    for _ in 0..3 {
        rig.device.set_stream(LineId::Wr, false).unwrap();
    }

    let events = rig.hw.events();
    assert_eq!(rig.hw.count(HwEvent::StreamSet(Link::CsiToWr)), 1);
    assert_eq!(rig.hw.count(HwEvent::WrStreamSet), 1);
    assert_eq!(rig.hw.count(HwEvent::WrIrqEnable(true)), 1);
    assert_eq!(rig.hw.count(HwEvent::WrIrqEnable(false)), 1);

    let enable = events.iter().position(|e| *e == HwEvent::WrIrqEnable(true)).unwrap();
    let disable = events.iter().position(|e| *e == HwEvent::WrIrqEnable(false)).unwrap();
    assert!(enable < disable);
    assert_eq!(rig.device.output_state(LineId::Wr), OutputState::Off);
}

#[test]
fn stream_off_without_stream_is_a_reported_no_op() {
    let rig = rig();
    rig.device.connect(LineId::Wr, Link::CsiToWr).unwrap();

    assert_eq!(
        rig.device.set_stream(LineId::Wr, false),
        Err(VinError::AlreadyOff {
            line: LineId::Wr,
            counter: Counter::Stream
        })
    );
    assert!(rig.hw.events().is_empty());
}

#[test]
fn stream_on_installs_dummy_before_any_buffer() {
    let rig = rig();
    rig.device.connect(LineId::Wr, Link::DvpToWr).unwrap();
    rig.device.set_stream(LineId::Wr, true).unwrap();

    let dummy = rig.device.dummy_planes(DummyModule::Vin, Pad::Sink).unwrap();
    assert!(!dummy[0].is_null());
    assert_eq!(rig.hw.current_wr_addr(), Some(dummy[0]));
    assert_eq!(rig.device.output_state(LineId::Wr), OutputState::Idle);
    assert_eq!(rig.device.frame_skip(DummyModule::Vin), 34);

    // First real buffer replaces the scratch address
    rig.device.queue_buffer(LineId::Wr, buf(0));
    assert_eq!(rig.hw.current_wr_addr(), Some(DmaAddr(0x4000_0000)));
    assert_eq!(rig.device.output_state(LineId::Wr), OutputState::Single);
}

#[test]
fn last_stream_off_frees_scratch_and_nulls_registers() {
    let rig = rig();
    rig.device.connect(LineId::Wr, Link::CsiToWr).unwrap();
    rig.device.set_stream(LineId::Wr, true).unwrap();
    rig.device.set_stream(LineId::Wr, true).unwrap();
    let dummy = rig.device.dummy_planes(DummyModule::Vin, Pad::Sink).unwrap();

    rig.hw.take_events();
    rig.device.set_stream(LineId::Wr, false).unwrap();
    assert_eq!(rig.hw.current_wr_addr(), Some(dummy[0]));

    // A nested stop keeps hardware on the caller's buffer
    rig.device.set_stream(LineId::Wr, true).unwrap();
    rig.device.queue_buffer(LineId::Wr, buf(0));
    rig.device.set_stream(LineId::Wr, false).unwrap();
    assert_eq!(rig.hw.current_wr_addr(), Some(DmaAddr(0x4000_0000)));
    assert_eq!(rig.device.output_state(LineId::Wr), OutputState::Single);
    assert_eq!(rig.device.snapshot(LineId::Wr).slots, [Some(0), None]);

    rig.device.set_stream(LineId::Wr, false).unwrap();
    assert_eq!(rig.hw.current_wr_addr(), Some(DmaAddr::NULL));
    assert_eq!(
        rig.device.dummy_planes(DummyModule::Vin, Pad::Sink),
        Some([DmaAddr::NULL; 2])
    );
}

#[test]
fn isp_line_uses_yuv_scratch() {
    let rig = rig();
    rig.device.connect(LineId::Isp, Link::CsiToIsp).unwrap();
    rig.device.set_stream(LineId::Isp, true).unwrap();

    let [y, uv] = rig.device.dummy_planes(DummyModule::Isp, Pad::Src).unwrap();
    assert_eq!(uv, y.offset(640 * 480));
    assert_eq!(rig.hw.current_yuv_addr(), Some((y, uv)));
    assert_eq!(rig.hw.current_wr_addr(), None);
    assert_eq!(rig.hw.count(HwEvent::WrStreamSet), 0);
}

#[test]
fn scratch_allocation_failure_installs_null() {
    let rig = rig();
    rig.alloc.set_fail(true);
    rig.device.connect(LineId::Wr, Link::CsiToWr).unwrap();
    rig.device.set_stream(LineId::Wr, true).unwrap();

    assert_eq!(rig.hw.current_wr_addr(), Some(DmaAddr::NULL));
    assert_eq!(rig.device.output_state(LineId::Wr), OutputState::Idle);
}

#[test]
fn operations_without_link_fail_cleanly() {
    let rig = rig();
    assert_eq!(
        rig.device.set_stream(LineId::Isp, true),
        Err(VinError::NoLink(LineId::Isp))
    );
    assert_eq!(
        rig.device.set_power(LineId::Isp, true),
        Err(VinError::NoLink(LineId::Isp))
    );
    assert!(rig.hw.events().is_empty());
}

#[test]
fn second_link_is_busy() {
    let rig = rig();
    rig.device.connect(LineId::Wr, Link::CsiToWr).unwrap();
    assert_eq!(
        rig.device.connect(LineId::Wr, Link::DvpToWr),
        Err(VinError::Busy(LineId::Wr))
    );
    rig.device.disconnect(LineId::Wr);
    rig.device.connect(LineId::Wr, Link::DvpToWr).unwrap();
}

#[test]
fn power_is_shared_across_lines() {
    let rig = rig();
    rig.device.connect(LineId::Wr, Link::CsiToWr).unwrap();
    rig.device.connect(LineId::Isp, Link::CsiToIsp).unwrap();

    rig.device.set_power(LineId::Wr, true).unwrap();
    rig.device.set_power(LineId::Isp, true).unwrap();
    rig.device.set_power(LineId::Isp, false).unwrap();
    rig.device.set_power(LineId::Wr, false).unwrap();

    assert_eq!(
        rig.hw.events(),
        [
            HwEvent::RuntimeGet,
            HwEvent::ClkEnable(Link::CsiToWr),
            HwEvent::ClkDisable(Link::CsiToWr),
            HwEvent::RuntimePut,
        ]
    );

    assert_eq!(
        rig.device.set_power(LineId::Wr, false),
        Err(VinError::AlreadyOff {
            line: LineId::Wr,
            counter: Counter::LinePower
        })
    );
    assert_eq!(rig.hw.events().len(), 4);
}

#[test]
fn first_power_on_aborts_stale_buffers() {
    let rig = rig();
    let completions = rig.device.completions(LineId::Wr);
    rig.device.connect(LineId::Wr, Link::CsiToWr).unwrap();
    rig.device.queue_buffer(LineId::Wr, buf(9));

    rig.device.set_power(LineId::Wr, true).unwrap();
    let stale = completions.try_recv().unwrap();
    assert_eq!(stale.buffer.index, 9);
    assert_eq!(stale.status, BufferStatus::Error);

    // Nested power-on leaves queued buffers alone
    rig.device.queue_buffer(LineId::Wr, buf(10));
    rig.device.set_power(LineId::Wr, true).unwrap();
    assert!(completions.is_empty());
    assert_eq!(rig.device.snapshot(LineId::Wr).pending, [10]);
}

#[test]
fn format_is_frozen_while_streaming() {
    let rig = rig();
    rig.device.connect(LineId::Wr, Link::CsiToWr).unwrap();

    let applied = rig.device.set_format(
        LineId::Wr,
        Pad::Sink,
        FrameFormat::new(MbusCode::Sgbrg10, 1280, 720),
    );
    assert_eq!(applied, FrameFormat::new(MbusCode::Sgbrg10, 1280, 720));
    assert_eq!(rig.device.get_format(LineId::Wr, Pad::Src), applied);

    rig.device.set_stream(LineId::Wr, true).unwrap();
    let kept = rig.device.set_format(
        LineId::Wr,
        Pad::Sink,
        FrameFormat::new(MbusCode::Srggb10, 64, 64),
    );
    assert_eq!(kept, applied);
    assert_eq!(
        rig.device.enum_mbus_code(LineId::Wr, Pad::Src, 0).unwrap(),
        MbusCode::Sgbrg10
    );
}

#[test]
fn full_capture_cycle() {
    let rig = rig();
    let completions = rig.device.completions(LineId::Wr);
    rig.device.connect(LineId::Wr, Link::CsiToWr).unwrap();
    rig.device.set_power(LineId::Wr, true).unwrap();
    for i in 0..3 {
        rig.device.queue_buffer(LineId::Wr, buf(i));
    }
    rig.device.set_stream(LineId::Wr, true).unwrap();

    for _ in 0..2 {
        rig.device.on_buffer_changed(LineId::Wr);
        rig.device.on_buffer_done(LineId::Wr);
    }
    let done: Vec<_> = completions
        .try_iter()
        .map(|c| (c.buffer.index, c.buffer.sequence, c.status))
        .collect();
    assert_eq!(done, [(0, 0, BufferStatus::Done), (1, 1, BufferStatus::Done)]);

    rig.device.set_stream(LineId::Wr, false).unwrap();
    assert_eq!(rig.device.flush_buffers(LineId::Wr, BufferStatus::Error), 1);
    assert_eq!(rig.device.flush_buffers(LineId::Wr, BufferStatus::Error), 0);
    rig.device.set_power(LineId::Wr, false).unwrap();

    let stats = rig.device.stats(LineId::Wr);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.aborted, 1);
}
