//! Per-line output buffer engine.
//!
//! Buffers flow `pending -> slot -> ready -> caller`. The control path
//! (`queue_buffer`, `enable`, `disable`, `flush`) and the two interrupt
//! handlers (`on_buffer_done`, `on_buffer_changed`) share one spin lock.
//! Critical sections never block and never allocate; buffers are returned
//! through a non-blocking channel send.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::utils::CachePadded;
use flume::Sender;
use spin::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::queue::BufferQueues;
use super::state::OutputState;
use crate::capture::{BufferStatus, CompletedBuffer, DmaAddr, FrameBuffer};
use crate::hw::{AddressRoute, DmaAddressSink, LineId};

/// Output engine of one capture line
pub struct OutputEngine {
    line: LineId,
    route: AddressRoute,
    sink: Arc<dyn DmaAddressSink>,
    completions: Sender<CompletedBuffer>,
    inner: Mutex<OutputInner>,
    stats: CachePadded<Stats>,
    underflow_counter: metrics::Counter,
}

struct OutputInner {
    state: OutputState,
    /// Hardware-visible slots
    slots: [Option<FrameBuffer>; 2],
    /// Slot hardware is currently writing
    active: usize,
    /// Buffer still referenced by hardware while `Stopping`
    last_buffer: Option<FrameBuffer>,
    queues: BufferQueues,
    sequence: u32,
}

#[derive(Default)]
struct Stats {
    completed: AtomicU64,
    aborted: AtomicU64,
    rotations: AtomicU64,
    repeats: AtomicU64,
    underflows: AtomicU64,
}

/// Counters since the engine was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub completed: u64,
    pub aborted: u64,
    pub rotations: u64,
    /// Rotations that found no pending buffer and repeated a frame
    pub repeats: u64,
    /// Rotations that found the active slot empty
    pub underflows: u64,
}

/// Point-in-time view of the engine, buffers identified by index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSnapshot {
    pub state: OutputState,
    pub active_slot: usize,
    pub slots: [Option<u32>; 2],
    pub pending: Vec<u32>,
    pub ready: Vec<u32>,
    pub last_buffer: Option<u32>,
    pub sequence: u32,
}

impl OutputEngine {
    pub fn new(
        line: LineId,
        sink: Arc<dyn DmaAddressSink>,
        completions: Sender<CompletedBuffer>,
        queue_depth: usize,
    ) -> Self {
        Self {
            line,
            route: line.route(),
            sink,
            completions,
            inner: Mutex::new(OutputInner {
                state: OutputState::Off,
                slots: [None, None],
                active: 0,
                last_buffer: None,
                queues: BufferQueues::with_capacity(queue_depth),
                sequence: 0,
            }),
            stats: CachePadded::new(Stats::default()),
            underflow_counter: metrics::counter!("vin_output_underflows_total", "line" => line.name()),
        }
    }

    pub fn line(&self) -> LineId {
        self.line
    }

    pub fn state(&self) -> OutputState {
        self.inner.lock().state
    }

    /// Bring the engine back to its power-on shape. Anything still held is
    /// aborted.
    pub fn reset(&self) {
        let stale = self.flush(BufferStatus::Error);
        if stale > 0 {
            warn!(line = %self.line, stale, "Aborted stale buffers on output reset");
        }
    }

    /// Start output: slot 0 gets the buffer hardware was last left on, or
    /// else the oldest pending buffer, and its address is installed. Calling this on an enabled line is a caller error and
    /// is ignored.
    #[instrument(skip(self), fields(line = %self.line))]
    pub fn enable(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.state != OutputState::Off {
            warn!(state = ?inner.state, "Output enable on an already enabled line");
            return;
        }

        inner.state = OutputState::Idle;
        if inner.slots[0].is_none() {
            let next = match inner.last_buffer.take() {
                Some(buf) => Some(buf),
                None => match inner.queues.take_pending() {
                    Some(buf) => Some(buf),
                    None => inner.slots[1].take(),
                },
            };
            inner.slots[0] = next;
        }
        if inner.slots[0].is_some() {
            inner.state = OutputState::Single;
        }
        inner.sequence = 0;
        self.init_addrs(inner);

        info!(state = ?inner.state, "Output enabled");
    }

    /// Stop output. Queues are left for `flush`.
    #[instrument(skip(self), fields(line = %self.line))]
    pub fn disable(&self) {
        self.inner.lock().state = OutputState::Off;
        info!("Output disabled");
    }

    /// Take ownership of a caller buffer.
    pub fn queue_buffer(&self, buf: FrameBuffer) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        debug!(line = %self.line, index = buf.index, state = ?inner.state, "Queue buffer");

        match inner.state {
            OutputState::Idle if inner.slots[0].is_none() => {
                inner.slots[0] = Some(buf);
                self.init_addrs(inner);
                inner.state = OutputState::Single;
            }
            OutputState::Stopping => {
                if let Some(last) = inner.last_buffer.take() {
                    inner.slots[inner.active] = Some(last);
                }
                inner.state = OutputState::Single;
                inner.queues.add_pending(buf);
            }
            _ => inner.queues.add_pending(buf),
        }
    }

    /// Return every buffer the engine holds with `status` and switch the
    /// line off. Safe in any state, including an already flushed line.
    #[instrument(skip(self), fields(line = %self.line))]
    pub fn flush(&self, status: BufferStatus) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut returned = 0;

        for buf in inner.queues.drain_all() {
            self.complete(buf, status);
            returned += 1;
        }
        for slot in inner.slots.iter_mut() {
            if let Some(buf) = slot.take() {
                self.complete(buf, status);
                returned += 1;
            }
        }
        if let Some(buf) = inner.last_buffer.take() {
            self.complete(buf, status);
            returned += 1;
        }

        inner.state = OutputState::Off;
        inner.active = 0;
        drop(guard);

        self.stats.aborted.fetch_add(returned as u64, Ordering::Relaxed);
        if returned > 0 {
            info!(returned, ?status, "Flushed buffers");
        }
        returned
    }

    /// Frame-done interrupt: hand every ready buffer back to the caller.
    pub fn on_buffer_done(&self) -> usize {
        let timestamp = Instant::now();

        let mut batch = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.state.gates_done() {
                return 0;
            }
            let mut batch = inner.queues.take_ready_batch();
            for buf in batch.iter_mut() {
                buf.timestamp = Some(timestamp);
                buf.sequence = inner.sequence;
                inner.sequence = inner.sequence.wrapping_add(1);
            }
            batch
        };

        let count = batch.len();
        for buf in batch.drain(..) {
            debug!(line = %self.line, index = buf.index, sequence = buf.sequence, "Buffer done");
            self.complete(buf, BufferStatus::Done);
        }
        self.inner.lock().queues.recycle(batch);

        self.stats.completed.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Buffer-change interrupt: rotate the active slot before hardware
    /// starts on the next frame.
    pub fn on_buffer_changed(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.state.gates_change() {
            return;
        }

        let mut active = inner.active;
        let ready_buf = match inner.slots[active].take() {
            Some(buf) => buf,
            None => {
                warn!(line = %self.line, active, state = ?inner.state, "Missing ready buffer in active slot");
                self.stats.underflows.fetch_add(1, Ordering::Relaxed);
                self.underflow_counter.increment(1);
                active ^= 1;
                match inner.slots[active].take() {
                    Some(buf) => buf,
                    None => {
                        error!(line = %self.line, active, state = ?inner.state, "Missing ready buffer in both slots");
                        return;
                    }
                }
            }
        };

        let next = inner.queues.take_pending();
        let ((state, toggle), planes) = match &next {
            // Nothing queued: keep hardware on the same address
            None => {
                self.stats.repeats.fetch_add(1, Ordering::Relaxed);
                (inner.state.on_last(), ready_buf.planes)
            }
            Some(buf) => (inner.state.on_next(), buf.planes),
        };
        inner.slots[active] = next;
        inner.state = state;
        if toggle {
            inner.active ^= 1;
        }

        if state == OutputState::Stopping {
            debug!(line = %self.line, index = ready_buf.index, "Output starved, holding last buffer");
            if let Some(stale) = inner.last_buffer.replace(ready_buf) {
                inner.queues.add_ready(stale);
            }
        } else {
            self.sink.install(self.route, &planes);
            inner.queues.add_ready(ready_buf);
        }
        self.stats.rotations.fetch_add(1, Ordering::Relaxed);
    }

    /// Point hardware back at the buffer it is filling, or at `fallback`
    /// when the engine holds none.
    pub fn reinstall_or(&self, fallback: &[DmaAddr; 2]) {
        let inner = self.inner.lock();
        let current = inner.slots[inner.active]
            .as_ref()
            .or(inner.slots[inner.active ^ 1].as_ref())
            .or(inner.last_buffer.as_ref());
        match current {
            Some(buf) => self.sink.install(self.route, &buf.planes),
            None => self.sink.install(self.route, fallback),
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            completed: self.stats.completed.load(Ordering::Relaxed),
            aborted: self.stats.aborted.load(Ordering::Relaxed),
            rotations: self.stats.rotations.load(Ordering::Relaxed),
            repeats: self.stats.repeats.load(Ordering::Relaxed),
            underflows: self.stats.underflows.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> OutputSnapshot {
        let inner = self.inner.lock();
        let index = |b: &Option<FrameBuffer>| b.as_ref().map(|b| b.index);
        OutputSnapshot {
            state: inner.state,
            active_slot: inner.active,
            slots: [index(&inner.slots[0]), index(&inner.slots[1])],
            pending: inner.queues.pending().iter().map(|b| b.index).collect(),
            ready: inner.queues.ready().iter().map(|b| b.index).collect(),
            last_buffer: index(&inner.last_buffer),
            sequence: inner.sequence,
        }
    }

    /// Point hardware at slot 0, if it holds anything
    fn init_addrs(&self, inner: &mut OutputInner) {
        inner.active = 0;
        if let Some(buf) = &inner.slots[0] {
            self.sink.install(self.route, &buf.planes);
        }
    }

    fn complete(&self, buffer: FrameBuffer, status: BufferStatus) {
        if let Err(e) = self.completions.try_send(CompletedBuffer { buffer, status }) {
            let lost = e.into_inner();
            warn!(line = %self.line, index = lost.buffer.index, "Completion receiver gone, dropping buffer");
        }
    }
}
