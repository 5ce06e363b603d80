//! System OpenCL runtime through the `opencl3` crate.
//!
//! Each function here backs one pipeline operation for OpenCL handles; the
//! public types in the rest of the crate dispatch to them.

use std::ptr;
use std::sync::Arc;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    Device as ClDevice, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
    CL_DEVICE_TYPE_CUSTOM, CL_DEVICE_TYPE_GPU,
};
use opencl3::error_codes::{
    ClError, CL_BUILD_PROGRAM_FAILURE, CL_DEVICE_NOT_FOUND, CL_INVALID_BUILD_OPTIONS,
    CL_INVALID_CONTEXT, CL_INVALID_KERNEL_NAME, CL_MEM_OBJECT_ALLOCATION_FAILURE,
    CL_OUT_OF_RESOURCES,
};
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{
    Buffer as ClBuffer, ClMem, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY,
};
use opencl3::platform::{get_platforms, Platform as ClPlatform};
use opencl3::program::Program as ClProgram;
use opencl3::types::{cl_device_id, cl_device_type, cl_mem_flags, CL_BLOCKING};
use tracing::{debug, warn};

use crate::buffer::AccessMode;
use crate::error::{DispatchError, Result};
use crate::kernel::{KernelArg, Scalar};
use crate::platform::{Device, DeviceFilter, DeviceHandle, DeviceType, Platform, PlatformHandle};
use crate::program::{BuildOutcome, ProgramInner};

fn cl_error(op: &'static str) -> impl Fn(ClError) -> DispatchError {
    move |e| DispatchError::OpenCl { op, code: e.0 }
}

/// Error for a handle pair that mixes the reference and OpenCL runtimes.
/// Context ids already rule this out for well-formed callers.
pub(crate) fn backend_mismatch(op: &'static str) -> DispatchError {
    DispatchError::OpenCl { op, code: CL_INVALID_CONTEXT }
}

fn filter_flags(filter: DeviceFilter) -> cl_device_type {
    match filter {
        DeviceFilter::All => CL_DEVICE_TYPE_ALL,
        DeviceFilter::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceFilter::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceFilter::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
    }
}

fn device_type(flags: cl_device_type) -> DeviceType {
    if flags & CL_DEVICE_TYPE_GPU != 0 {
        DeviceType::Gpu
    } else if flags & CL_DEVICE_TYPE_CPU != 0 {
        DeviceType::Cpu
    } else if flags & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceType::Accelerator
    } else if flags & CL_DEVICE_TYPE_CUSTOM != 0 {
        DeviceType::Custom
    } else {
        DeviceType::Unknown
    }
}

fn mode_to_flags(mode: AccessMode) -> cl_mem_flags {
    match mode {
        AccessMode::ReadOnly => CL_MEM_READ_ONLY,
        AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
        AccessMode::ReadWrite => CL_MEM_READ_WRITE,
    }
}

pub(crate) fn list_platforms() -> Result<Vec<Platform>> {
    // The ICD loader reports "no platforms" as an error code rather than
    // an empty list; both mean the same thing here.
    let platforms = match get_platforms() {
        Ok(platforms) => platforms,
        Err(e) => {
            debug!(code = e.0, "clGetPlatformIDs failed");
            return Ok(Vec::new());
        }
    };
    Ok(platforms
        .into_iter()
        .map(|p| {
            Platform::new(
                p.name().unwrap_or_default(),
                p.vendor().unwrap_or_default(),
                p.version().unwrap_or_default(),
                PlatformHandle::OpenCl(p),
            )
        })
        .collect())
}

pub(crate) fn list_devices(
    platform: &ClPlatform,
    platform_name: &str,
    filter: DeviceFilter,
) -> Result<Vec<Device>> {
    let ids = match platform.get_devices(filter_flags(filter)) {
        Ok(ids) => ids,
        Err(e) if e.0 == CL_DEVICE_NOT_FOUND => Vec::new(),
        Err(e) => return Err(cl_error("clGetDeviceIDs")(e)),
    };
    Ok(ids
        .into_iter()
        .map(|id| {
            let device = ClDevice::new(id);
            Device {
                name: device.name().unwrap_or_default(),
                vendor: device.vendor().unwrap_or_default(),
                platform_name: platform_name.to_string(),
                device_type: device_type(device.dev_type().unwrap_or_default()),
                global_mem_bytes: device.global_mem_size().unwrap_or_default(),
                max_alloc_bytes: device.max_mem_alloc_size().unwrap_or_default(),
                handle: DeviceHandle::OpenCl(id),
            }
        })
        .collect())
}

pub(crate) fn create_context(id: cl_device_id) -> Result<Context> {
    Context::from_device(&ClDevice::new(id)).map_err(cl_error("clCreateContext"))
}

pub(crate) fn build_program(
    context: &Context,
    device: &Device,
    source: &str,
    options: &str,
) -> Result<BuildOutcome> {
    let &DeviceHandle::OpenCl(device_id) = &device.handle else {
        return Err(backend_mismatch("clBuildProgram"));
    };
    let mut program =
        ClProgram::create_from_source(context, source).map_err(cl_error("clCreateProgramWithSource"))?;

    let built = match program.build(&[device_id], options) {
        Ok(()) => true,
        Err(e) if e.0 == CL_BUILD_PROGRAM_FAILURE || e.0 == CL_INVALID_BUILD_OPTIONS => false,
        Err(e) => return Err(cl_error("clBuildProgram")(e)),
    };
    let mut log = program.get_build_log(device_id).unwrap_or_default();
    if !built && log.trim().is_empty() {
        log = format!("build failed with options '{options}'");
    }

    let entry_points = if built {
        program
            .get_kernel_names()
            .map_err(cl_error("clGetProgramInfo"))?
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    Ok(BuildOutcome { built, log, entry_points, inner: ProgramInner::OpenCl(Arc::new(program)) })
}

pub(crate) fn create_kernel(program: &ClProgram, name: &str) -> Result<Kernel> {
    Kernel::create(program, name).map_err(|e| {
        if e.0 == CL_INVALID_KERNEL_NAME {
            DispatchError::EntryPointNotFound { name: name.to_string(), available: Vec::new() }
        } else {
            cl_error("clCreateKernel")(e)
        }
    })
}

pub(crate) fn kernel_arity(kernel: &Kernel) -> Result<u32> {
    kernel.num_args().map_err(cl_error("clGetKernelInfo"))
}

pub(crate) fn create_buffer(context: &Context, size: usize, mode: AccessMode) -> Result<ClBuffer<u8>> {
    // SAFETY: no host pointer is supplied, so the runtime owns the storage.
    unsafe { ClBuffer::<u8>::create(context, mode_to_flags(mode), size, ptr::null_mut()) }.map_err(
        |e| match e.0 {
            CL_MEM_OBJECT_ALLOCATION_FAILURE | CL_OUT_OF_RESOURCES => {
                DispatchError::OutOfDeviceMemory { requested: size, available: 0 }
            }
            _ => cl_error("clCreateBuffer")(e),
        },
    )
}

pub(crate) fn create_queue(context: &Context) -> Result<CommandQueue> {
    CommandQueue::create_default_with_properties(context, 0, 0)
        .map_err(cl_error("clCreateCommandQueue"))
}

pub(crate) fn write_buffer(
    queue: &CommandQueue,
    buffer: &mut ClBuffer<u8>,
    offset: usize,
    data: &[u8],
) -> Result<()> {
    // SAFETY: the write is blocking and the range was checked against the
    // buffer size, so `data` outlives the transfer.
    unsafe { queue.enqueue_write_buffer(buffer, CL_BLOCKING, offset, data, &[]) }
        .map_err(cl_error("clEnqueueWriteBuffer"))?;
    Ok(())
}

pub(crate) fn read_buffer(
    queue: &CommandQueue,
    buffer: &ClBuffer<u8>,
    offset: usize,
    out: &mut [u8],
) -> Result<()> {
    // SAFETY: as for `write_buffer`; the read completes before returning.
    unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, offset, out, &[]) }
        .map_err(cl_error("clEnqueueReadBuffer"))?;
    Ok(())
}

/// Bind `arg` as the next argument of `exec`.
///
/// # Safety
/// The value must match the size of the OpenCL C parameter it lands on;
/// `ExecuteKernel` panics when the driver rejects it.
unsafe fn push_arg(exec: &mut ExecuteKernel<'_>, arg: &KernelArg<'_>) -> Result<()> {
    match arg {
        KernelArg::Buffer(buffer) => match &buffer.inner {
            crate::buffer::BufferInner::OpenCl(raw) => {
                exec.set_arg(&raw.get());
            }
            crate::buffer::BufferInner::Reference(_) => {
                return Err(backend_mismatch("clSetKernelArg"));
            }
        },
        KernelArg::Scalar(Scalar::I32(v)) => {
            exec.set_arg(v);
        }
        KernelArg::Scalar(Scalar::U32(v)) => {
            exec.set_arg(v);
        }
        KernelArg::Scalar(Scalar::I64(v)) => {
            exec.set_arg(v);
        }
        KernelArg::Scalar(Scalar::U64(v)) => {
            exec.set_arg(v);
        }
        KernelArg::Scalar(Scalar::F32(v)) => {
            exec.set_arg(v);
        }
        KernelArg::Scalar(Scalar::F64(v)) => {
            exec.set_arg(v);
        }
    }
    Ok(())
}

pub(crate) fn launch(
    queue: &CommandQueue,
    kernel: &Kernel,
    args: &[KernelArg<'_>],
    global_work_size: usize,
) -> Result<()> {
    // SAFETY: scalar widths match their parameters and the buffers are
    // borrowed by the invocation for the whole call; the event is waited
    // on before return.
    let event = unsafe {
        let mut exec = ExecuteKernel::new(kernel);
        for arg in args {
            push_arg(&mut exec, arg)?;
        }
        exec.set_global_work_size(global_work_size);
        exec.enqueue_nd_range(queue).map_err(cl_error("clEnqueueNDRangeKernel"))?
    };
    event.wait().map_err(|e| {
        warn!(code = e.0, "kernel did not complete");
        cl_error("clWaitForEvents")(e)
    })
}

pub(crate) fn finish(queue: &CommandQueue) -> Result<()> {
    queue.finish().map_err(cl_error("clFinish"))
}
