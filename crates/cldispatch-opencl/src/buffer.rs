//! Device-resident buffers.

use std::fmt;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{Context, ContextId, ContextInner};
use crate::error::{DispatchError, Result};
use crate::reference::RefBuffer;

/// How kernels may access a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read_only"),
            Self::WriteOnly => write!(f, "write_only"),
            Self::ReadWrite => write!(f, "read_write"),
        }
    }
}

pub(crate) enum BufferInner {
    Reference(RefBuffer),
    #[cfg(feature = "opencl")]
    OpenCl(opencl3::memory::Buffer<u8>),
}

/// A fixed-size region of device memory.
///
/// Buffers start zero-filled on the reference runtime and uninitialised on
/// OpenCL devices; contents are populated through a
/// [`CommandQueue`](crate::CommandQueue).
pub struct Buffer {
    context: ContextId,
    size: usize,
    access: AccessMode,
    pub(crate) inner: BufferInner,
}

impl Buffer {
    /// Reserve `size` bytes on the context's device.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidBufferSize`] for a zero size,
    /// [`DispatchError::OutOfDeviceMemory`] when the device cannot satisfy the
    /// whole request.
    pub fn allocate(context: &Context, size: usize, access: AccessMode) -> Result<Self> {
        if size == 0 {
            return Err(DispatchError::InvalidBufferSize { size });
        }
        let inner = match &context.inner {
            ContextInner::Reference { host, platform, index } => {
                BufferInner::Reference(host.allocate(*platform, *index, size)?)
            }
            #[cfg(feature = "opencl")]
            ContextInner::OpenCl(raw) => {
                BufferInner::OpenCl(crate::opencl::create_buffer(raw, size, access)?)
            }
        };
        debug!(context = %context.id(), size, %access, "allocated buffer");
        Ok(Self { context: context.id(), size, access, inner })
    }

    /// Reserve room for `count` elements of `T`.
    pub fn allocate_for<T: Pod>(context: &Context, count: usize, access: AccessMode) -> Result<Self> {
        let size = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(DispatchError::OutOfDeviceMemory { requested: usize::MAX, available: 0 })?;
        Self::allocate(context, size, access)
    }

    /// Capacity in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    /// Validate a transfer of `len` bytes at `offset`.
    pub(crate) fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        let fits = offset.checked_add(len).is_some_and(|end| end <= self.size);
        if len == 0 || !fits {
            return Err(DispatchError::Transfer { offset, len, capacity: self.size });
        }
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("context", &self.context)
            .field("size", &self.size)
            .field("access", &self.access)
            .finish()
    }
}
