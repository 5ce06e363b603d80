//! Execution context: the resource domain bound to one device.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::error::{DispatchError, Result};
use crate::platform::{Device, DeviceHandle};
use crate::reference::ReferenceHost;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Context`]. Every resource remembers the id
/// of the context it was created in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({})", self.0)
    }
}

#[derive(Clone)]
pub(crate) enum ContextInner {
    Reference { host: Arc<ReferenceHost>, platform: usize, index: usize },
    #[cfg(feature = "opencl")]
    OpenCl(Arc<opencl3::context::Context>),
}

/// An isolated compute context bound to exactly one device.
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct Context {
    id: ContextId,
    device: Device,
    pub(crate) inner: ContextInner,
}

impl Context {
    /// Create a context for `device`.
    pub fn new(device: &Device) -> Result<Self> {
        let inner = match &device.handle {
            DeviceHandle::Reference { host, platform, index } => {
                host.register_context();
                ContextInner::Reference { host: Arc::clone(host), platform: *platform, index: *index }
            }
            #[cfg(feature = "opencl")]
            DeviceHandle::OpenCl(id) => ContextInner::OpenCl(Arc::new(crate::opencl::create_context(*id)?)),
        };
        let id = ContextId::next();
        info!(context = %id, device = %device.name(), "created execution context");
        Ok(Self { id, device: device.clone(), inner })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The device this context is bound to.
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn check_device(&self, device: &Device) -> Result<()> {
        if self.device.same_as(device) {
            Ok(())
        } else {
            Err(DispatchError::DeviceNotInContext {
                device: device.name().to_string(),
                context: self.id,
            })
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.id).field("device", &self.device).finish()
    }
}
