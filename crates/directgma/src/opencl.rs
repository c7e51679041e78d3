//! OpenCL backend built on `opencl3`.
//!
//! The AMD bus-addressable memory extension is not covered by `opencl3`, so
//! its memory flags, the `cl_bus_address_amd` layout and the
//! `clEnqueueMakeBuffersResidentAMD` signature are declared here. Every
//! other call goes through `opencl3`, whose handle types release their
//! driver objects on drop.

use crate::api::{ops, status, ApiError, ApiResult, BufferKind, BusAddress, ComputeApi, EventTimes, MapAccess};
use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{Device, CL_DEVICE_TYPE_GPU};
use opencl3::error_codes::ClError;
use opencl3::event::Event;
use opencl3::memory::{Buffer, ClMem, CL_MAP_READ, CL_MAP_WRITE, CL_MEM_READ_WRITE};
use opencl3::platform::{get_platforms, Platform};
use opencl3::types::{
    cl_bool, cl_command_queue, cl_event, cl_int, cl_mem, cl_mem_flags, cl_platform_id, cl_uint, CL_BLOCKING,
};
use std::ffi::{c_char, c_void, CString};
use std::ptr::NonNull;
use tracing::debug;

/// Allocate in the device's bus-addressable pool.
pub const CL_MEM_BUS_ADDRESSABLE_AMD: cl_mem_flags = 1 << 30;
/// Create a buffer over a peer's physical bus address.
pub const CL_MEM_EXTERNAL_PHYSICAL_AMD: cl_mem_flags = 1 << 31;

const CL_SUCCESS: cl_int = 0;
const CL_DEVICE_NOT_FOUND: cl_int = -1;

type MakeBuffersResidentFn = unsafe extern "system" fn(
    command_queue: cl_command_queue,
    num_mem_objs: cl_uint,
    mem_objects: *mut cl_mem,
    blocking_make_resident: cl_bool,
    bus_addresses: *mut BusAddress,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int;

#[link(name = "OpenCL")]
extern "system" {
    fn clGetExtensionFunctionAddressForPlatform(platform: cl_platform_id, func_name: *const c_char) -> *mut c_void;
}

fn cl_err(op: &'static str) -> impl Fn(ClError) -> ApiError {
    move |e| ApiError::new(op, e.0)
}

/// Non-null extension function address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClEntryPoint(NonNull<c_void>);

/// Host pointer returned by a blocking map.
#[derive(Debug)]
pub struct ClMapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl AsRef<[u8]> for ClMapping {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: the driver maps `len` bytes at `ptr` until the mapping is
        // passed to `unmap_buffer`, which consumes it.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl AsMut<[u8]> for ClMapping {
    fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `as_ref`; `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// OpenCL runtime accessed through the system ICD loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClApi;

impl ClApi {
    pub fn new() -> Self {
        Self
    }
}

impl ComputeApi for ClApi {
    type Platform = Platform;
    type Device = Device;
    type Context = Context;
    type Queue = CommandQueue;
    type Buffer = Buffer<u8>;
    type Event = Event;
    type Mapping = ClMapping;
    type EntryPoint = ClEntryPoint;

    fn platforms(&self) -> ApiResult<Vec<Platform>> {
        get_platforms().map_err(cl_err(ops::GET_PLATFORM_IDS))
    }

    fn platform_vendor(&self, platform: &Platform) -> ApiResult<String> {
        platform.vendor().map_err(cl_err(ops::GET_PLATFORM_INFO))
    }

    fn gpu_devices(&self, platform: &Platform) -> ApiResult<Vec<Device>> {
        match platform.get_devices(CL_DEVICE_TYPE_GPU) {
            Ok(ids) => Ok(ids.into_iter().map(Device::new).collect()),
            Err(ClError(CL_DEVICE_NOT_FOUND)) => Ok(Vec::new()),
            Err(e) => Err(cl_err(ops::GET_DEVICE_IDS)(e)),
        }
    }

    fn device_name(&self, device: &Device) -> ApiResult<String> {
        device.name().map_err(cl_err(ops::GET_DEVICE_INFO))
    }

    fn device_extensions(&self, device: &Device) -> ApiResult<String> {
        device.extensions().map_err(cl_err(ops::GET_DEVICE_INFO))
    }

    fn extension_entry_point(&self, platform: &Platform, name: &str) -> Option<ClEntryPoint> {
        let name = CString::new(name).ok()?;
        // SAFETY: valid platform id and NUL-terminated name.
        let addr = unsafe { clGetExtensionFunctionAddressForPlatform(platform.id(), name.as_ptr()) };
        NonNull::new(addr).map(ClEntryPoint)
    }

    fn create_context(&self, _platform: &Platform, device: &Device) -> ApiResult<Context> {
        Context::from_device(device).map_err(cl_err(ops::CREATE_CONTEXT))
    }

    fn create_queue(&self, context: &Context, _device: &Device, profiling: bool) -> ApiResult<CommandQueue> {
        let properties = if profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };
        // Single-device context, so its default device is `_device`.
        CommandQueue::create_default_with_properties(context, properties, 0).map_err(cl_err(ops::CREATE_QUEUE))
    }

    fn create_buffer(&self, context: &Context, kind: BufferKind, size: usize) -> ApiResult<Buffer<u8>> {
        let flags = match kind {
            BufferKind::ReadWrite => CL_MEM_READ_WRITE,
            BufferKind::BusAddressable => CL_MEM_BUS_ADDRESSABLE_AMD,
        };
        // SAFETY: no host pointer is supplied.
        unsafe { Buffer::<u8>::create(context, flags, size, std::ptr::null_mut()) }
            .map_err(cl_err(ops::CREATE_BUFFER))
    }

    fn make_resident(
        &self,
        entry: ClEntryPoint,
        queue: &CommandQueue,
        buffer: &mut Buffer<u8>,
    ) -> ApiResult<BusAddress> {
        // SAFETY: the entry point was resolved for `clEnqueueMakeBuffersResidentAMD`.
        let make_resident: MakeBuffersResidentFn = unsafe { std::mem::transmute(entry.0.as_ptr()) };
        let mut mem = buffer.get();
        let mut address = BusAddress::default();
        // SAFETY: one valid mem object and one output address slot; blocking call.
        let status = unsafe {
            make_resident(
                queue.get(),
                1,
                &mut mem,
                CL_BLOCKING,
                &mut address,
                0,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        if status != CL_SUCCESS {
            return Err(ApiError::new(ops::MAKE_RESIDENT, status));
        }
        debug!("clEnqueueMakeBuffersResidentAMD: {}", address);
        Ok(address)
    }

    fn create_external_buffer(&self, context: &Context, size: usize, address: BusAddress) -> ApiResult<Buffer<u8>> {
        let mut address = address;
        // SAFETY: with CL_MEM_EXTERNAL_PHYSICAL_AMD the host pointer is read as
        // a `cl_bus_address_amd` during the call only.
        unsafe {
            Buffer::<u8>::create(
                context,
                CL_MEM_EXTERNAL_PHYSICAL_AMD,
                size,
                (&mut address as *mut BusAddress).cast::<c_void>(),
            )
        }
        .map_err(cl_err(ops::CREATE_EXTERNAL_BUFFER))
    }

    fn enqueue_copy(
        &self,
        queue: &CommandQueue,
        src: &Buffer<u8>,
        dst: &mut Buffer<u8>,
        size: usize,
        want_event: bool,
    ) -> ApiResult<Option<Event>> {
        // SAFETY: both buffers belong to the queue's context and hold `size` bytes.
        let event = unsafe { queue.enqueue_copy_buffer(src, dst, 0, 0, size, &[]) }
            .map_err(cl_err(ops::COPY_BUFFER))?;
        Ok(want_event.then_some(event))
    }

    fn enqueue_write(&self, queue: &CommandQueue, buffer: &mut Buffer<u8>, data: &[u8]) -> ApiResult<()> {
        // SAFETY: blocking write; `data` outlives the call.
        unsafe { queue.enqueue_write_buffer(buffer, CL_BLOCKING, 0, data, &[]) }
            .map(drop)
            .map_err(cl_err(ops::WRITE_BUFFER))
    }

    fn enqueue_read(&self, queue: &CommandQueue, buffer: &Buffer<u8>, data: &mut [u8]) -> ApiResult<()> {
        // SAFETY: blocking read; `data` outlives the call.
        unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, 0, data, &[]) }
            .map(drop)
            .map_err(cl_err(ops::READ_BUFFER))
    }

    fn map_buffer(
        &self,
        queue: &CommandQueue,
        buffer: &Buffer<u8>,
        access: MapAccess,
        size: usize,
    ) -> ApiResult<ClMapping> {
        let flags = match access {
            MapAccess::Read => CL_MAP_READ,
            MapAccess::Write => CL_MAP_WRITE,
        };
        let mut host_ptr = std::ptr::null_mut();
        // SAFETY: blocking map of the first `size` bytes.
        unsafe { queue.enqueue_map_buffer(buffer, CL_BLOCKING, flags, 0, size, &mut host_ptr, &[]) }
            .map_err(cl_err(ops::MAP_BUFFER))?;
        let ptr = NonNull::new(host_ptr as *mut u8).ok_or(ApiError::new(ops::MAP_BUFFER, status::OUT_OF_RESOURCES))?;
        Ok(ClMapping { ptr, len: size })
    }

    fn unmap_buffer(&self, queue: &CommandQueue, buffer: &Buffer<u8>, mapping: ClMapping) -> ApiResult<()> {
        // SAFETY: `mapping` came from `map_buffer` on this buffer.
        let event = unsafe {
            queue.enqueue_unmap_mem_object(buffer.get(), mapping.ptr.as_ptr().cast::<c_void>(), &[])
        }
        .map_err(cl_err(ops::UNMAP_BUFFER))?;
        event.wait().map_err(cl_err(ops::UNMAP_BUFFER))
    }

    fn finish(&self, queue: &CommandQueue) -> ApiResult<()> {
        queue.finish().map_err(cl_err(ops::FINISH))
    }

    fn event_times(&self, event: &Event) -> ApiResult<EventTimes> {
        let start_ns = event.profiling_command_start().map_err(cl_err(ops::EVENT_PROFILING))?;
        let end_ns = event.profiling_command_end().map_err(cl_err(ops::EVENT_PROFILING))?;
        Ok(EventTimes { start_ns, end_ns })
    }
}
