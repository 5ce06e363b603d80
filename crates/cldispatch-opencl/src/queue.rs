//! Blocking command queue for transfers and kernel launches.

use std::fmt;

use bytemuck::Pod;
use tracing::debug;

use crate::buffer::{AccessMode, Buffer, BufferInner};
use crate::context::{Context, ContextId};
use crate::error::{DispatchError, Result};
use crate::kernel::{InvocationInner, KernelArg, KernelInvocation};
use crate::platform::Device;
use crate::reference::LaunchArg;

enum QueueInner {
    Reference,
    #[cfg(feature = "opencl")]
    OpenCl(opencl3::command_queue::CommandQueue),
}

/// An in-order submission channel to one device of one context.
///
/// Every operation blocks until the device has completed it, so commands
/// never overlap and complete in submission order.
pub struct CommandQueue {
    context: ContextId,
    device: Device,
    inner: QueueInner,
}

impl CommandQueue {
    /// Create a queue on `device`, which must be the device `context` binds.
    pub fn new(context: &Context, device: &Device) -> Result<Self> {
        context.check_device(device)?;
        let inner = match &context.inner {
            crate::context::ContextInner::Reference { .. } => QueueInner::Reference,
            #[cfg(feature = "opencl")]
            crate::context::ContextInner::OpenCl(raw) => {
                QueueInner::OpenCl(crate::opencl::create_queue(raw)?)
            }
        };
        debug!(context = %context.id(), device = %device.name(), "created command queue");
        Ok(Self { context: context.id(), device: device.clone(), inner })
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Copy `data` into `buffer` starting at byte `offset`.
    pub fn write_buffer(&self, buffer: &mut Buffer, offset: usize, data: &[u8]) -> Result<()> {
        DispatchError::check_context(self.context, buffer.context_id())?;
        buffer.check_range(offset, data.len())?;
        match (&self.inner, &mut buffer.inner) {
            (QueueInner::Reference, BufferInner::Reference(raw)) => raw.write(offset, data),
            #[cfg(feature = "opencl")]
            (QueueInner::OpenCl(queue), BufferInner::OpenCl(raw)) => {
                crate::opencl::write_buffer(queue, raw, offset, data)?
            }
            #[cfg(feature = "opencl")]
            _ => return Err(crate::opencl::backend_mismatch("write_buffer")),
        }
        debug!(offset, bytes = data.len(), "write_buffer complete");
        Ok(())
    }

    /// Copy `out.len()` bytes from `buffer` starting at byte `offset`.
    pub fn read_buffer(&self, buffer: &Buffer, offset: usize, out: &mut [u8]) -> Result<()> {
        DispatchError::check_context(self.context, buffer.context_id())?;
        buffer.check_range(offset, out.len())?;
        match (&self.inner, &buffer.inner) {
            (QueueInner::Reference, BufferInner::Reference(raw)) => raw.read(offset, out),
            #[cfg(feature = "opencl")]
            (QueueInner::OpenCl(queue), BufferInner::OpenCl(raw)) => {
                crate::opencl::read_buffer(queue, raw, offset, out)?
            }
            #[cfg(feature = "opencl")]
            _ => return Err(crate::opencl::backend_mismatch("read_buffer")),
        }
        debug!(offset, bytes = out.len(), "read_buffer complete");
        Ok(())
    }

    /// Write a typed host slice to the start of `buffer`.
    pub fn write_pod<T: Pod>(&self, buffer: &mut Buffer, data: &[T]) -> Result<()> {
        self.write_buffer(buffer, 0, bytemuck::cast_slice(data))
    }

    /// Fill a typed host slice from the start of `buffer`.
    pub fn read_pod<T: Pod>(&self, buffer: &Buffer, out: &mut [T]) -> Result<()> {
        self.read_buffer(buffer, 0, bytemuck::cast_slice_mut(out))
    }

    /// Launch `invocation` over `global_work_size` work-items and wait for it.
    pub fn enqueue_kernel(
        &self,
        invocation: &KernelInvocation<'_>,
        global_work_size: usize,
    ) -> Result<()> {
        if global_work_size == 0 {
            return Err(DispatchError::InvalidWorkSize);
        }
        DispatchError::check_context(self.context, invocation.context_id())?;
        let args = invocation.bound_args()?;

        match (&self.inner, &invocation.inner) {
            (QueueInner::Reference, InvocationInner::Reference { host, .. }) => {
                let mut launch = Vec::with_capacity(args.len());
                for (index, arg) in args.iter().enumerate() {
                    launch.push(match arg {
                        KernelArg::Buffer(buffer) => match &buffer.inner {
                            BufferInner::Reference(raw) => LaunchArg::Buffer {
                                buffer: raw,
                                writable: buffer.access() != AccessMode::ReadOnly
                                    && !invocation.param_read_only(index),
                            },
                            #[cfg(feature = "opencl")]
                            BufferInner::OpenCl(_) => {
                                return Err(crate::opencl::backend_mismatch("enqueue_kernel"));
                            }
                        },
                        KernelArg::Scalar(value) => LaunchArg::Scalar(*value),
                    });
                }
                host.launch(invocation.name(), &launch, global_work_size)?;
            }
            #[cfg(feature = "opencl")]
            (QueueInner::OpenCl(queue), InvocationInner::OpenCl(kernel)) => {
                crate::opencl::launch(queue, kernel, &args, global_work_size)?
            }
            #[cfg(feature = "opencl")]
            _ => return Err(crate::opencl::backend_mismatch("enqueue_kernel")),
        }
        debug!(kernel = %invocation.name(), global_work_size, "kernel completed");
        Ok(())
    }

    /// Wait for all submitted commands. Submissions already block, so this
    /// only matters to the OpenCL runtime's driver-side bookkeeping.
    pub fn finish(&self) -> Result<()> {
        match &self.inner {
            QueueInner::Reference => Ok(()),
            #[cfg(feature = "opencl")]
            QueueInner::OpenCl(queue) => crate::opencl::finish(queue),
        }
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("context", &self.context)
            .field("device", &self.device.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{ADD_ENTRY_POINT, ADD_SOURCE};
    use crate::platform::{DeviceFilter, Runtime};
    use crate::program::Program;
    use crate::reference::ReferenceHost;

    fn setup() -> (Context, CommandQueue) {
        let rt = Runtime::reference(ReferenceHost::default());
        let platform = rt.list_platforms().unwrap().remove(0);
        let device = rt.list_devices(&platform, DeviceFilter::All).unwrap().remove(0);
        let ctx = Context::new(&device).unwrap();
        let queue = CommandQueue::new(&ctx, &device).unwrap();
        (ctx, queue)
    }

    #[test]
    fn round_trip_bytes() {
        let (ctx, queue) = setup();
        let mut buf = Buffer::allocate(&ctx, 8, AccessMode::ReadWrite).unwrap();
        queue.write_buffer(&mut buf, 0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut out = [0u8; 4];
        queue.read_buffer(&buf, 4, &mut out).unwrap();
        assert_eq!(out, [5, 6, 7, 8]);
        queue.finish().unwrap();
    }

    #[test]
    fn transfer_out_of_range() {
        let (ctx, queue) = setup();
        let mut buf = Buffer::allocate(&ctx, 8, AccessMode::ReadWrite).unwrap();
        let err = queue.write_buffer(&mut buf, 6, &[0; 4]).unwrap_err();
        assert!(matches!(err, DispatchError::Transfer { offset: 6, len: 4, capacity: 8 }));
        let err = queue.read_buffer(&buf, 0, &mut []).unwrap_err();
        assert!(matches!(err, DispatchError::Transfer { len: 0, .. }));
    }

    #[test]
    fn pod_helpers() {
        let (ctx, queue) = setup();
        let mut buf = Buffer::allocate_for::<f32>(&ctx, 3, AccessMode::ReadWrite).unwrap();
        queue.write_pod(&mut buf, &[1.5f32, -2.0, 3.25]).unwrap();
        let mut out = [0f32; 3];
        queue.read_pod(&buf, &mut out).unwrap();
        assert_eq!(out, [1.5, -2.0, 3.25]);
    }

    #[test]
    fn foreign_buffer_is_context_mismatch() {
        let (_ctx_a, queue_a) = setup();
        let (ctx_b, _queue_b) = setup();
        let mut buf = Buffer::allocate(&ctx_b, 4, AccessMode::ReadWrite).unwrap();
        let err = queue_a.write_buffer(&mut buf, 0, &[0; 4]).unwrap_err();
        assert!(matches!(err, DispatchError::ContextMismatch { .. }));
    }

    #[test]
    fn zero_work_size_rejected() {
        let (ctx, queue) = setup();
        let program = Program::build(&ctx, ADD_SOURCE).unwrap();
        let invocation = KernelInvocation::new(&program, ADD_ENTRY_POINT).unwrap();
        assert!(matches!(
            queue.enqueue_kernel(&invocation, 0),
            Err(DispatchError::InvalidWorkSize)
        ));
    }

    #[test]
    fn unbound_argument_reported() {
        let (ctx, queue) = setup();
        let program = Program::build(&ctx, ADD_SOURCE).unwrap();
        let a = Buffer::allocate_for::<i32>(&ctx, 4, AccessMode::ReadWrite).unwrap();
        let mut invocation = KernelInvocation::new(&program, ADD_ENTRY_POINT).unwrap();
        invocation.bind(0, &a).unwrap().bind(1, &a).unwrap().bind(3, 4i32).unwrap();
        let err = queue.enqueue_kernel(&invocation, 4).unwrap_err();
        assert!(matches!(err, DispatchError::UnboundArgument { index: 2, .. }));
    }

    #[test]
    fn read_only_buffers_are_not_written_back() {
        let (ctx, queue) = setup();
        let program = Program::build(&ctx, ADD_SOURCE).unwrap();
        let mut a = Buffer::allocate_for::<i32>(&ctx, 2, AccessMode::ReadWrite).unwrap();
        let out = Buffer::allocate_for::<i32>(&ctx, 2, AccessMode::ReadOnly).unwrap();
        queue.write_pod(&mut a, &[1i32, 2]).unwrap();
        let mut invocation = KernelInvocation::new(&program, ADD_ENTRY_POINT).unwrap();
        invocation.bind(0, &a).unwrap().bind(1, &a).unwrap().bind(2, &out).unwrap();
        invocation.bind(3, 2i32).unwrap();
        queue.enqueue_kernel(&invocation, 2).unwrap();
        let mut host = [9i32; 2];
        queue.read_pod(&out, &mut host).unwrap();
        assert_eq!(host, [0, 0]);
    }
}
