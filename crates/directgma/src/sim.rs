//! Simulated device API.
//!
//! [`SimApi`] behaves like a small OpenCL runtime with bus-addressable memory:
//! buffers own real byte storage, residency hands out bus addresses that
//! external buffers in another context can alias, copies move bytes and
//! advance a deterministic device clock, and profiling events report that
//! clock. It also records every call, counts live handles and can inject
//! failures, which makes it the harness for ordering and cleanup checks.

use crate::api::{
    ApiError, ApiResult, BufferKind, BusAddress, ComputeApi, EventTimes, MapAccess, ops, status,
};
use crate::config::{AMD_VENDOR, BUS_ADDRESSABLE_EXTENSION};
use crate::discovery::{MAKE_RESIDENT_ENTRY, WAIT_SIGNAL_ENTRY, WRITE_SIGNAL_ENTRY};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Base of the simulated bus address window.
const BUS_WINDOW_BASE: u64 = 0x4000_0000_0000;
/// Stride between successive resident allocations.
const BUS_WINDOW_STRIDE: u64 = 0x1_0000_0000;
/// Offset of the marker slot inside an allocation's window.
const MARKER_OFFSET: u64 = 0xFFFF_F000;

// ---------------------------------------------------------------------------
// Topology description
// ---------------------------------------------------------------------------

/// One simulated GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct SimDeviceSpec {
    pub name: String,
    /// Space-separated extension string, as `CL_DEVICE_EXTENSIONS` reports it.
    pub extensions: String,
}

impl SimDeviceSpec {
    /// A device advertising the bus-addressable memory capability.
    pub fn capable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            extensions: format!("cl_khr_global_int32_base_atomics {BUS_ADDRESSABLE_EXTENSION} cl_khr_fp64"),
        }
    }

    /// A device without the capability.
    pub fn plain(name: &str) -> Self {
        Self { name: name.to_string(), extensions: "cl_khr_global_int32_base_atomics cl_khr_fp64".into() }
    }
}

/// One simulated platform.
#[derive(Debug, Clone, PartialEq)]
pub struct SimPlatformSpec {
    pub vendor: String,
    pub devices: Vec<SimDeviceSpec>,
    /// Extension entry points that resolve to a non-null address.
    pub entry_points: Vec<String>,
}

impl SimPlatformSpec {
    /// Platform exposing all residency entry points.
    pub fn new(vendor: &str, devices: Vec<SimDeviceSpec>) -> Self {
        Self {
            vendor: vendor.to_string(),
            devices,
            entry_points: [MAKE_RESIDENT_ENTRY, WAIT_SIGNAL_ENTRY, WRITE_SIGNAL_ENTRY]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Platforms plus the copy-engine timing model.
#[derive(Debug, Clone, PartialEq)]
pub struct SimSpec {
    pub platforms: Vec<SimPlatformSpec>,
    /// Peer copy bandwidth in bytes per second of device time.
    pub copy_bandwidth: f64,
    /// Fixed device time per copy command.
    pub copy_latency_ns: u64,
}

impl SimSpec {
    /// Default copy-engine bandwidth: 12 GiB/s.
    pub const DEFAULT_BANDWIDTH: f64 = 12.0 * 1024.0 * 1024.0 * 1024.0;
    /// Default per-copy latency.
    pub const DEFAULT_LATENCY_NS: u64 = 2_000;

    /// One vendor platform with two capable GPUs.
    pub fn amd_pair() -> Self {
        Self {
            platforms: vec![SimPlatformSpec::new(
                AMD_VENDOR,
                vec![SimDeviceSpec::capable("Simulated GPU 0"), SimDeviceSpec::capable("Simulated GPU 1")],
            )],
            copy_bandwidth: Self::DEFAULT_BANDWIDTH,
            copy_latency_ns: Self::DEFAULT_LATENCY_NS,
        }
    }

    /// Device nanoseconds one copy of `size` bytes takes.
    pub fn copy_duration_ns(&self, size: usize) -> u64 {
        self.copy_latency_ns + (size as f64 / self.copy_bandwidth * 1e9).round() as u64
    }
}

impl Default for SimSpec {
    fn default() -> Self {
        Self::amd_pair()
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Fault {
    Fail { op: &'static str, nth: usize, status: i32 },
    CorruptRead { nth: usize, word: usize },
}

/// Byte storage of one physical allocation.
#[derive(Debug)]
struct SimMemory {
    id: u64,
    bytes: Vec<u8>,
    /// Bumped on every write.
    version: u64,
    /// `(source id, source version, own version, size)` of the last copy in.
    last_copy: Option<(u64, u64, u64, usize)>,
}

impl SimMemory {
    fn new(id: u64, size: usize) -> Self {
        Self { id, bytes: vec![0u8; size], version: 0, last_copy: None }
    }

    fn write(&mut self, data: &[u8]) {
        self.bytes[..data.len()].copy_from_slice(data);
        self.version += 1;
    }

    /// Copy `size` bytes from `src`. Skipped when neither side changed since
    /// an identical copy, which keeps long simulated loops cheap.
    fn copy_from(&mut self, src: &SimMemory, size: usize) {
        let key = (src.id, src.version, self.version, size);
        if self.last_copy == Some(key) {
            return;
        }
        self.write(&src.bytes[..size]);
        self.last_copy = Some((src.id, src.version, self.version, size));
    }
}

type Storage = Rc<RefCell<SimMemory>>;

#[derive(Default)]
struct SimState {
    calls: RefCell<Vec<&'static str>>,
    counts: RefCell<HashMap<&'static str, usize>>,
    faults: RefCell<Vec<Fault>>,
    live: Cell<usize>,
    released: RefCell<Vec<String>>,
    next_id: Cell<u64>,
    clock_ns: Cell<u64>,
    resident: RefCell<HashMap<u64, (Storage, usize)>>,
}

impl SimState {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }
}

/// Keeps the live-handle count and release log accurate.
struct LiveHandle {
    state: Rc<SimState>,
    label: String,
}

impl LiveHandle {
    fn new(state: &Rc<SimState>, label: String) -> Self {
        state.live.set(state.live.get() + 1);
        Self { state: Rc::clone(state), label }
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        self.state.live.set(self.state.live.get() - 1);
        self.state.released.borrow_mut().push(std::mem::take(&mut self.label));
    }
}

impl std::fmt::Debug for LiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimPlatform(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimDevice {
    platform: usize,
    index: usize,
}

#[derive(Debug)]
pub struct SimContext {
    id: u64,
    device: SimDevice,
    _live: LiveHandle,
}

#[derive(Debug)]
pub struct SimQueue {
    context: u64,
    profiling: bool,
    _live: LiveHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Residency {
    Plain,
    BusAddressable { surface: Option<u64> },
    External,
}

#[derive(Debug)]
pub struct SimBuffer {
    id: u64,
    context: u64,
    residency: Residency,
    storage: Storage,
    live: LiveHandle,
}

impl SimBuffer {
    fn len(&self) -> usize {
        self.storage.borrow().bytes.len()
    }
}

impl Drop for SimBuffer {
    fn drop(&mut self) {
        if let Residency::BusAddressable { surface: Some(surface) } = self.residency {
            self.live.state.resident.borrow_mut().remove(&surface);
        }
    }
}

#[derive(Debug)]
pub struct SimEvent {
    times: EventTimes,
    profiled: bool,
    _live: LiveHandle,
}

/// Host copy of a mapped range; written back on unmap for write mappings.
#[derive(Debug)]
pub struct SimMapping {
    buffer: u64,
    access: MapAccess,
    data: Vec<u8>,
}

impl AsRef<[u8]> for SimMapping {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for SimMapping {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimEntryPoint {
    platform: usize,
    slot: usize,
}

// ---------------------------------------------------------------------------
// SimApi
// ---------------------------------------------------------------------------

/// Simulated compute runtime. Clones share state.
#[derive(Clone)]
pub struct SimApi {
    spec: Rc<SimSpec>,
    state: Rc<SimState>,
}

impl std::fmt::Debug for SimApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimApi")
            .field("platforms", &self.spec.platforms.len())
            .field("live_handles", &self.live_handles())
            .finish()
    }
}

impl Default for SimApi {
    fn default() -> Self {
        Self::new(SimSpec::amd_pair())
    }
}

impl SimApi {
    pub fn new(spec: SimSpec) -> Self {
        Self { spec: Rc::new(spec), state: Rc::new(SimState::default()) }
    }

    pub fn spec(&self) -> &SimSpec {
        &self.spec
    }

    /// Make the `nth` (1-based) call of `op` return `status`.
    pub fn fail_on(&self, op: &'static str, nth: usize, status: i32) {
        self.state.faults.borrow_mut().push(Fault::Fail { op, nth, status });
    }

    /// Flip the bits of 32-bit word `word` in the data returned by the `nth`
    /// (1-based) blocking read.
    pub fn corrupt_read(&self, nth: usize, word: usize) {
        self.state.faults.borrow_mut().push(Fault::CorruptRead { nth, word });
    }

    /// Every API call made so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.calls.borrow().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state.counts.borrow().get(op).copied().unwrap_or(0)
    }

    /// Index of the first call to `op` in [`calls`](Self::calls).
    pub fn first_call(&self, op: &str) -> Option<usize> {
        self.state.calls.borrow().iter().position(|c| *c == op)
    }

    /// Contexts, queues, buffers and events not yet released.
    pub fn live_handles(&self) -> usize {
        self.state.live.get()
    }

    /// Labels of released handles in release order, e.g. `"buffer#4:external"`.
    pub fn released(&self) -> Vec<String> {
        self.state.released.borrow().clone()
    }

    /// Current device clock.
    pub fn clock_ns(&self) -> u64 {
        self.state.clock_ns.get()
    }

    fn enter(&self, op: &'static str) -> ApiResult<usize> {
        self.state.calls.borrow_mut().push(op);
        let nth = {
            let mut counts = self.state.counts.borrow_mut();
            let n = counts.entry(op).or_insert(0);
            *n += 1;
            *n
        };
        let failure = self.state.faults.borrow().iter().find_map(|f| match *f {
            Fault::Fail { op: fop, nth: fnth, status } if fop == op && fnth == nth => Some(status),
            _ => None,
        });
        match failure {
            Some(status) => Err(ApiError::new(op, status)),
            None => Ok(nth),
        }
    }

    fn platform(&self, p: &SimPlatform, op: &'static str) -> ApiResult<&SimPlatformSpec> {
        self.spec.platforms.get(p.0).ok_or(ApiError::new(op, status::INVALID_VALUE))
    }

    fn device(&self, d: &SimDevice, op: &'static str) -> ApiResult<&SimDeviceSpec> {
        self.spec
            .platforms
            .get(d.platform)
            .and_then(|p| p.devices.get(d.index))
            .ok_or(ApiError::new(op, status::INVALID_DEVICE))
    }

    fn check_context(queue: &SimQueue, buffer: &SimBuffer, op: &'static str) -> ApiResult<()> {
        if queue.context != buffer.context {
            return Err(ApiError::new(op, status::INVALID_CONTEXT));
        }
        Ok(())
    }

    fn check_range(buffer: &SimBuffer, size: usize, op: &'static str) -> ApiResult<()> {
        if size > buffer.len() {
            return Err(ApiError::new(op, status::INVALID_VALUE));
        }
        Ok(())
    }
}

impl ComputeApi for SimApi {
    type Platform = SimPlatform;
    type Device = SimDevice;
    type Context = SimContext;
    type Queue = SimQueue;
    type Buffer = SimBuffer;
    type Event = SimEvent;
    type Mapping = SimMapping;
    type EntryPoint = SimEntryPoint;

    fn platforms(&self) -> ApiResult<Vec<SimPlatform>> {
        self.enter(ops::GET_PLATFORM_IDS)?;
        Ok((0..self.spec.platforms.len()).map(SimPlatform).collect())
    }

    fn platform_vendor(&self, platform: &SimPlatform) -> ApiResult<String> {
        self.enter(ops::GET_PLATFORM_INFO)?;
        Ok(self.platform(platform, ops::GET_PLATFORM_INFO)?.vendor.clone())
    }

    fn gpu_devices(&self, platform: &SimPlatform) -> ApiResult<Vec<SimDevice>> {
        self.enter(ops::GET_DEVICE_IDS)?;
        let spec = self.platform(platform, ops::GET_DEVICE_IDS)?;
        Ok((0..spec.devices.len()).map(|index| SimDevice { platform: platform.0, index }).collect())
    }

    fn device_name(&self, device: &SimDevice) -> ApiResult<String> {
        self.enter(ops::GET_DEVICE_INFO)?;
        Ok(self.device(device, ops::GET_DEVICE_INFO)?.name.clone())
    }

    fn device_extensions(&self, device: &SimDevice) -> ApiResult<String> {
        self.enter(ops::GET_DEVICE_INFO)?;
        Ok(self.device(device, ops::GET_DEVICE_INFO)?.extensions.clone())
    }

    fn extension_entry_point(&self, platform: &SimPlatform, name: &str) -> Option<SimEntryPoint> {
        let spec = self.spec.platforms.get(platform.0)?;
        let slot = spec.entry_points.iter().position(|e| e == name)?;
        Some(SimEntryPoint { platform: platform.0, slot })
    }

    fn create_context(&self, platform: &SimPlatform, device: &SimDevice) -> ApiResult<SimContext> {
        self.enter(ops::CREATE_CONTEXT)?;
        self.device(device, ops::CREATE_CONTEXT)?;
        if device.platform != platform.0 {
            return Err(ApiError::new(ops::CREATE_CONTEXT, status::INVALID_DEVICE));
        }
        let id = self.state.next_id();
        Ok(SimContext { id, device: *device, _live: LiveHandle::new(&self.state, format!("context#{id}")) })
    }

    fn create_queue(&self, context: &SimContext, device: &SimDevice, profiling: bool) -> ApiResult<SimQueue> {
        self.enter(ops::CREATE_QUEUE)?;
        if context.device != *device {
            return Err(ApiError::new(ops::CREATE_QUEUE, status::INVALID_DEVICE));
        }
        let id = self.state.next_id();
        Ok(SimQueue {
            context: context.id,
            profiling,
            _live: LiveHandle::new(&self.state, format!("queue#{id}")),
        })
    }

    fn create_buffer(&self, context: &SimContext, kind: BufferKind, size: usize) -> ApiResult<SimBuffer> {
        self.enter(ops::CREATE_BUFFER)?;
        if size == 0 {
            return Err(ApiError::new(ops::CREATE_BUFFER, status::INVALID_BUFFER_SIZE));
        }
        let id = self.state.next_id();
        let (residency, tag) = match kind {
            BufferKind::ReadWrite => (Residency::Plain, "read-write"),
            BufferKind::BusAddressable => (Residency::BusAddressable { surface: None }, "bus-addressable"),
        };
        Ok(SimBuffer {
            id,
            context: context.id,
            residency,
            storage: Rc::new(RefCell::new(SimMemory::new(id, size))),
            live: LiveHandle::new(&self.state, format!("buffer#{id}:{tag}")),
        })
    }

    fn make_resident(&self, entry: SimEntryPoint, queue: &SimQueue, buffer: &mut SimBuffer) -> ApiResult<BusAddress> {
        self.enter(ops::MAKE_RESIDENT)?;
        let resolved = self
            .spec
            .platforms
            .get(entry.platform)
            .and_then(|p| p.entry_points.get(entry.slot))
            .map(String::as_str);
        if resolved != Some(MAKE_RESIDENT_ENTRY) {
            return Err(ApiError::new(ops::MAKE_RESIDENT, status::INVALID_VALUE));
        }
        Self::check_context(queue, buffer, ops::MAKE_RESIDENT)?;
        if !matches!(buffer.residency, Residency::BusAddressable { .. }) {
            return Err(ApiError::new(ops::MAKE_RESIDENT, status::INVALID_MEM_OBJECT));
        }

        let surface = BUS_WINDOW_BASE + buffer.id * BUS_WINDOW_STRIDE;
        let len = buffer.len();
        self.state.resident.borrow_mut().insert(surface, (Rc::clone(&buffer.storage), len));
        buffer.residency = Residency::BusAddressable { surface: Some(surface) };
        Ok(BusAddress { surface, marker: surface + MARKER_OFFSET })
    }

    fn create_external_buffer(&self, context: &SimContext, size: usize, address: BusAddress) -> ApiResult<SimBuffer> {
        self.enter(ops::CREATE_EXTERNAL_BUFFER)?;
        let storage = match self.state.resident.borrow().get(&address.surface) {
            Some((storage, len)) if size <= *len => Rc::clone(storage),
            Some(_) => return Err(ApiError::new(ops::CREATE_EXTERNAL_BUFFER, status::INVALID_BUFFER_SIZE)),
            None => return Err(ApiError::new(ops::CREATE_EXTERNAL_BUFFER, status::INVALID_VALUE)),
        };
        let id = self.state.next_id();
        Ok(SimBuffer {
            id,
            context: context.id,
            residency: Residency::External,
            storage,
            live: LiveHandle::new(&self.state, format!("buffer#{id}:external")),
        })
    }

    fn enqueue_copy(
        &self,
        queue: &SimQueue,
        src: &SimBuffer,
        dst: &mut SimBuffer,
        size: usize,
        want_event: bool,
    ) -> ApiResult<Option<SimEvent>> {
        self.enter(ops::COPY_BUFFER)?;
        Self::check_context(queue, src, ops::COPY_BUFFER)?;
        Self::check_context(queue, dst, ops::COPY_BUFFER)?;
        Self::check_range(src, size, ops::COPY_BUFFER)?;
        Self::check_range(dst, size, ops::COPY_BUFFER)?;

        if !Rc::ptr_eq(&src.storage, &dst.storage) {
            dst.storage.borrow_mut().copy_from(&src.storage.borrow(), size);
        }

        let start_ns = self.state.clock_ns.get();
        let end_ns = start_ns + self.spec.copy_duration_ns(size);
        self.state.clock_ns.set(end_ns);

        Ok(want_event.then(|| {
            let id = self.state.next_id();
            SimEvent {
                times: EventTimes { start_ns, end_ns },
                profiled: queue.profiling,
                _live: LiveHandle::new(&self.state, format!("event#{id}")),
            }
        }))
    }

    fn enqueue_write(&self, queue: &SimQueue, buffer: &mut SimBuffer, data: &[u8]) -> ApiResult<()> {
        self.enter(ops::WRITE_BUFFER)?;
        Self::check_context(queue, buffer, ops::WRITE_BUFFER)?;
        Self::check_range(buffer, data.len(), ops::WRITE_BUFFER)?;
        buffer.storage.borrow_mut().write(data);
        Ok(())
    }

    fn enqueue_read(&self, queue: &SimQueue, buffer: &SimBuffer, data: &mut [u8]) -> ApiResult<()> {
        let nth = self.enter(ops::READ_BUFFER)?;
        Self::check_context(queue, buffer, ops::READ_BUFFER)?;
        Self::check_range(buffer, data.len(), ops::READ_BUFFER)?;
        data.copy_from_slice(&buffer.storage.borrow().bytes[..data.len()]);

        for fault in self.state.faults.borrow().iter() {
            if let Fault::CorruptRead { nth: fnth, word } = *fault {
                if fnth == nth {
                    if let Some(bytes) = data.get_mut(word * 4..word * 4 + 4) {
                        bytes.iter_mut().for_each(|b| *b ^= 0xFF);
                    }
                }
            }
        }
        Ok(())
    }

    fn map_buffer(&self, queue: &SimQueue, buffer: &SimBuffer, access: MapAccess, size: usize) -> ApiResult<SimMapping> {
        self.enter(ops::MAP_BUFFER)?;
        Self::check_context(queue, buffer, ops::MAP_BUFFER)?;
        Self::check_range(buffer, size, ops::MAP_BUFFER)?;
        Ok(SimMapping { buffer: buffer.id, access, data: buffer.storage.borrow().bytes[..size].to_vec() })
    }

    fn unmap_buffer(&self, queue: &SimQueue, buffer: &SimBuffer, mapping: SimMapping) -> ApiResult<()> {
        self.enter(ops::UNMAP_BUFFER)?;
        Self::check_context(queue, buffer, ops::UNMAP_BUFFER)?;
        if mapping.buffer != buffer.id {
            return Err(ApiError::new(ops::UNMAP_BUFFER, status::INVALID_VALUE));
        }
        if mapping.access == MapAccess::Write {
            buffer.storage.borrow_mut().write(&mapping.data);
        }
        Ok(())
    }

    fn finish(&self, _queue: &SimQueue) -> ApiResult<()> {
        self.enter(ops::FINISH)?;
        Ok(())
    }

    fn event_times(&self, event: &SimEvent) -> ApiResult<EventTimes> {
        self.enter(ops::EVENT_PROFILING)?;
        if !event.profiled {
            return Err(ApiError::new(ops::EVENT_PROFILING, status::PROFILING_INFO_NOT_AVAILABLE));
        }
        Ok(event.times)
    }
}
