//! Device API seam.
//!
//! The measurement core is generic over [`ComputeApi`], which exposes the
//! handful of OpenCL-shaped calls a peer-to-peer DMA benchmark needs. Handle
//! types release their underlying driver object on `Drop`, so a partially
//! built session or buffer set cleans up on every early return.
//!
//! Two implementations ship with the crate: [`crate::sim::SimApi`] and, with
//! the `opencl-runtime` feature, `crate::opencl::ClApi`.

use serde::Serialize;
use std::fmt;

/// Names reported in [`ApiError::op`]. Both backends use the same strings so
/// diagnostics and call logs read identically.
pub mod ops {
    pub const GET_PLATFORM_IDS: &str = "clGetPlatformIDs";
    pub const GET_PLATFORM_INFO: &str = "clGetPlatformInfo";
    pub const GET_DEVICE_IDS: &str = "clGetDeviceIDs";
    pub const GET_DEVICE_INFO: &str = "clGetDeviceInfo";
    pub const CREATE_CONTEXT: &str = "clCreateContext";
    pub const CREATE_QUEUE: &str = "clCreateCommandQueueWithProperties";
    pub const CREATE_BUFFER: &str = "clCreateBuffer";
    pub const CREATE_EXTERNAL_BUFFER: &str = "clCreateBuffer(CL_MEM_EXTERNAL_PHYSICAL_AMD)";
    pub const MAKE_RESIDENT: &str = "clEnqueueMakeBuffersResidentAMD";
    pub const COPY_BUFFER: &str = "clEnqueueCopyBuffer";
    pub const WRITE_BUFFER: &str = "clEnqueueWriteBuffer";
    pub const READ_BUFFER: &str = "clEnqueueReadBuffer";
    pub const MAP_BUFFER: &str = "clEnqueueMapBuffer";
    pub const UNMAP_BUFFER: &str = "clEnqueueUnmapMemObject";
    pub const FINISH: &str = "clFinish";
    pub const EVENT_PROFILING: &str = "clGetEventProfilingInfo";
}

/// OpenCL status codes the simulated backend reports.
pub mod status {
    pub const DEVICE_NOT_FOUND: i32 = -1;
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const PROFILING_INFO_NOT_AVAILABLE: i32 = -7;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_DEVICE: i32 = -33;
    pub const INVALID_CONTEXT: i32 = -34;
    pub const INVALID_MEM_OBJECT: i32 = -38;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
}

/// A non-success status returned by a device API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiError {
    /// API call that failed, e.g. `clEnqueueCopyBuffer`.
    pub op: &'static str,
    /// Raw status code returned by the call.
    pub status: i32,
}

impl ApiError {
    pub fn new(op: &'static str, status: i32) -> Self {
        Self { op, status }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed. Error code = {}", self.op, self.status)
    }
}

impl std::error::Error for ApiError {}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Allocation flavour for [`ComputeApi::create_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Ordinary device read/write buffer.
    ReadWrite,
    /// Buffer placed in the device's bus-addressable pool so it can be pinned
    /// and exposed to a peer device.
    BusAddressable,
}

/// Host access requested when mapping a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAccess {
    Read,
    Write,
}

/// Physical bus addresses of a resident buffer.
///
/// Layout matches `cl_bus_address_amd`: the surface address locates the
/// buffer storage, the marker address locates its signalling slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct BusAddress {
    pub surface: u64,
    pub marker: u64,
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface={:#x} marker={:#x}", self.surface, self.marker)
    }
}

/// Device-side start and end timestamps of one command, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTimes {
    pub start_ns: u64,
    pub end_ns: u64,
}

impl EventTimes {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// The subset of a compute API the benchmark drives.
///
/// Contexts are always created for exactly one device; a buffer handle
/// belongs to the context it was created in and may only be used with queues
/// of that context.
pub trait ComputeApi {
    type Platform;
    type Device: Clone;
    type Context;
    type Queue;
    type Buffer;
    type Event;
    /// Host view of a mapped buffer, valid until passed to `unmap_buffer`.
    type Mapping: AsRef<[u8]> + AsMut<[u8]>;
    /// Resolved extension function pointer.
    type EntryPoint: Copy;

    fn platforms(&self) -> ApiResult<Vec<Self::Platform>>;
    fn platform_vendor(&self, platform: &Self::Platform) -> ApiResult<String>;
    fn gpu_devices(&self, platform: &Self::Platform) -> ApiResult<Vec<Self::Device>>;
    fn device_name(&self, device: &Self::Device) -> ApiResult<String>;
    fn device_extensions(&self, device: &Self::Device) -> ApiResult<String>;

    /// Look up an extension entry point; `None` when the platform returns null.
    fn extension_entry_point(&self, platform: &Self::Platform, name: &str) -> Option<Self::EntryPoint>;

    fn create_context(&self, platform: &Self::Platform, device: &Self::Device) -> ApiResult<Self::Context>;
    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::Device,
        profiling: bool,
    ) -> ApiResult<Self::Queue>;
    fn create_buffer(&self, context: &Self::Context, kind: BufferKind, size: usize) -> ApiResult<Self::Buffer>;

    /// Pin `buffer` resident, blocking until it is, and return its bus address.
    fn make_resident(
        &self,
        entry: Self::EntryPoint,
        queue: &Self::Queue,
        buffer: &mut Self::Buffer,
    ) -> ApiResult<BusAddress>;

    /// Create a handle in `context` that aliases the physical memory at `address`.
    fn create_external_buffer(
        &self,
        context: &Self::Context,
        size: usize,
        address: BusAddress,
    ) -> ApiResult<Self::Buffer>;

    /// Enqueue a whole-range copy without waiting for it. The completion event
    /// is returned only when `want_event` is set.
    fn enqueue_copy(
        &self,
        queue: &Self::Queue,
        src: &Self::Buffer,
        dst: &mut Self::Buffer,
        size: usize,
        want_event: bool,
    ) -> ApiResult<Option<Self::Event>>;

    /// Blocking host-to-device write at offset 0.
    fn enqueue_write(&self, queue: &Self::Queue, buffer: &mut Self::Buffer, data: &[u8]) -> ApiResult<()>;

    /// Blocking device-to-host read at offset 0.
    fn enqueue_read(&self, queue: &Self::Queue, buffer: &Self::Buffer, data: &mut [u8]) -> ApiResult<()>;

    /// Blocking map of the first `size` bytes of `buffer`.
    fn map_buffer(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        access: MapAccess,
        size: usize,
    ) -> ApiResult<Self::Mapping>;

    fn unmap_buffer(&self, queue: &Self::Queue, buffer: &Self::Buffer, mapping: Self::Mapping) -> ApiResult<()>;

    /// Block until every command enqueued on `queue` has completed.
    fn finish(&self, queue: &Self::Queue) -> ApiResult<()>;

    /// Device timestamps of a completed command. Requires a profiling queue.
    fn event_times(&self, event: &Self::Event) -> ApiResult<EventTimes>;
}
