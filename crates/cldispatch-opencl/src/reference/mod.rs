//! Host reference runtime (no OpenCL runtime required).
//!
//! Emulates the OpenCL object model in process memory: platforms expose
//! devices, devices get contexts, source text is "compiled" into kernel
//! signatures, buffers are zero-filled byte vectors with per-device memory
//! accounting, and kernel launches run registered [`HostKernel`]
//! implementations once per work-item.

mod compiler;
mod kernels;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{DispatchError, Result};
use crate::kernel::Scalar;
use crate::platform::{Device, DeviceFilter, DeviceHandle, DeviceType, Platform, PlatformHandle};

pub(crate) use compiler::{Compilation, KernelSignature, ParamKind};
use kernels::FrameArg;
pub use kernels::{simple_add, HostKernel, KernelFrame};

/// Global memory of a reference device unless configured otherwise.
pub const DEFAULT_GLOBAL_MEM_BYTES: u64 = 256 * 1024 * 1024;

const VENDOR: &str = "cldispatch";

/// Description of one emulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDevice {
    pub name: String,
    pub vendor: String,
    pub device_type: DeviceType,
    pub global_mem_bytes: u64,
    pub max_alloc_bytes: u64,
}

impl ReferenceDevice {
    /// A device with [`DEFAULT_GLOBAL_MEM_BYTES`] of memory, a quarter of
    /// which may be taken by a single allocation (the OpenCL minimum).
    pub fn new(name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            name: name.into(),
            vendor: VENDOR.to_string(),
            device_type,
            global_mem_bytes: DEFAULT_GLOBAL_MEM_BYTES,
            max_alloc_bytes: DEFAULT_GLOBAL_MEM_BYTES / 4,
        }
    }

    pub fn cpu(name: impl Into<String>) -> Self {
        Self::new(name, DeviceType::Cpu)
    }

    pub fn gpu(name: impl Into<String>) -> Self {
        Self::new(name, DeviceType::Gpu)
    }

    pub fn accelerator(name: impl Into<String>) -> Self {
        Self::new(name, DeviceType::Accelerator)
    }

    /// Override the memory limits. `max_alloc_bytes` is clamped to
    /// `global_mem_bytes`.
    pub fn with_memory(mut self, global_mem_bytes: u64, max_alloc_bytes: u64) -> Self {
        self.global_mem_bytes = global_mem_bytes;
        self.max_alloc_bytes = max_alloc_bytes.min(global_mem_bytes);
        self
    }
}

/// Description of one emulated platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePlatform {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub devices: Vec<ReferenceDevice>,
}

impl ReferencePlatform {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vendor: VENDOR.to_string(),
            version: "OpenCL 1.2 reference".to_string(),
            devices: Vec::new(),
        }
    }

    pub fn with_device(mut self, device: ReferenceDevice) -> Self {
        self.devices.push(device);
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    device_queries: Vec<String>,
    contexts_created: usize,
    allocated: HashMap<(usize, usize), u64>,
}

/// The emulated host: platforms, devices, and the registry of host kernel
/// implementations.
///
/// A host also records what the pipeline did to it (which platforms had
/// their devices enumerated, how many contexts were created, how many bytes
/// are allocated) so tests can assert on side effects.
pub struct ReferenceHost {
    platforms: Vec<ReferencePlatform>,
    kernels: HashMap<String, Arc<dyn HostKernel>>,
    counters: Mutex<Counters>,
}

impl ReferenceHost {
    /// A host with no platforms and the built-in kernels registered.
    pub fn empty() -> Self {
        let mut host =
            Self { platforms: Vec::new(), kernels: HashMap::new(), counters: Mutex::default() };
        host.kernels.insert(crate::kernels::ADD_ENTRY_POINT.to_string(), Arc::new(simple_add));
        host
    }

    pub fn with_platform(mut self, platform: ReferencePlatform) -> Self {
        self.platforms.push(platform);
        self
    }

    /// Register (or replace) the host implementation of kernel `name`.
    pub fn with_kernel(mut self, name: impl Into<String>, kernel: impl HostKernel + 'static) -> Self {
        self.kernels.insert(name.into(), Arc::new(kernel));
        self
    }

    pub fn platforms(&self) -> &[ReferencePlatform] {
        &self.platforms
    }

    /// Names of the platforms whose devices were enumerated, in query order.
    pub fn device_queries(&self) -> Vec<String> {
        self.counters().device_queries.clone()
    }

    pub fn contexts_created(&self) -> usize {
        self.counters().contexts_created
    }

    /// Bytes currently allocated across all devices.
    pub fn allocated_bytes(&self) -> u64 {
        self.counters().allocated.values().sum()
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device(&self, platform: usize, index: usize) -> Option<&ReferenceDevice> {
        self.platforms.get(platform)?.devices.get(index)
    }

    pub(crate) fn list_platforms(self: &Arc<Self>) -> Vec<Platform> {
        self.platforms
            .iter()
            .enumerate()
            .map(|(index, p)| {
                Platform::new(
                    p.name.clone(),
                    p.vendor.clone(),
                    p.version.clone(),
                    PlatformHandle::Reference { host: Arc::clone(self), index },
                )
            })
            .collect()
    }

    pub(crate) fn list_devices(
        self: &Arc<Self>,
        platform: usize,
        platform_name: &str,
        filter: DeviceFilter,
    ) -> Vec<Device> {
        self.counters().device_queries.push(platform_name.to_string());
        let Some(spec) = self.platforms.get(platform) else {
            return Vec::new();
        };
        spec.devices
            .iter()
            .enumerate()
            .filter(|(_, d)| filter.matches(d.device_type))
            .map(|(index, d)| Device {
                name: d.name.clone(),
                vendor: d.vendor.clone(),
                platform_name: platform_name.to_string(),
                device_type: d.device_type,
                global_mem_bytes: d.global_mem_bytes,
                max_alloc_bytes: d.max_alloc_bytes,
                handle: DeviceHandle::Reference { host: Arc::clone(self), platform, index },
            })
            .collect()
    }

    pub(crate) fn register_context(&self) {
        self.counters().contexts_created += 1;
    }

    /// Reserve `size` bytes on a device and return the zero-filled storage.
    pub(crate) fn allocate(
        self: &Arc<Self>,
        platform: usize,
        index: usize,
        size: usize,
    ) -> Result<RefBuffer> {
        let spec = self
            .device(platform, index)
            .ok_or(DispatchError::OutOfDeviceMemory { requested: size, available: 0 })?;
        let requested = size as u64;
        let key = (platform, index);
        {
            let mut counters = self.counters();
            let used = counters.allocated.get(&key).copied().unwrap_or(0);
            let remaining = spec.global_mem_bytes.saturating_sub(used);
            if requested > spec.max_alloc_bytes || requested > remaining {
                return Err(DispatchError::OutOfDeviceMemory {
                    requested: size,
                    available: remaining.min(spec.max_alloc_bytes),
                });
            }
            *counters.allocated.entry(key).or_insert(0) += requested;
        }
        debug!(device = %spec.name, bytes = size, "reference buffer allocated");
        Ok(RefBuffer { host: Arc::clone(self), key, data: Mutex::new(vec![0; size]) })
    }

    fn release(&self, key: (usize, usize), bytes: u64) {
        let mut counters = self.counters();
        if let Some(used) = counters.allocated.get_mut(&key) {
            *used = used.saturating_sub(bytes);
        }
    }

    pub(crate) fn compile(&self, source: &str) -> Compilation {
        compiler::compile(source, |name| self.kernels.contains_key(name))
    }

    /// Run `kernel` over `0..global_size`.
    ///
    /// Buffer arguments are snapshotted before the first work-item and only
    /// writable ones are stored back, after every work-item succeeded.
    pub(crate) fn launch(
        &self,
        kernel: &str,
        args: &[LaunchArg<'_>],
        global_size: usize,
    ) -> Result<()> {
        let implementation = self.kernels.get(kernel).ok_or_else(|| {
            DispatchError::KernelExecution {
                kernel: kernel.to_string(),
                work_item: 0,
                reason: "no host implementation registered".to_string(),
            }
        })?;

        // One storage slot per distinct buffer, so parameters aliasing the
        // same buffer observe each other's stores.
        let mut slots: Vec<(&RefBuffer, bool)> = Vec::new();
        let mut storage = Vec::new();
        let mut frame_args = Vec::with_capacity(args.len());
        for arg in args {
            frame_args.push(match arg {
                LaunchArg::Buffer { buffer, writable } => {
                    let slot = match slots.iter().position(|(b, _)| std::ptr::eq(*b, *buffer)) {
                        Some(slot) => {
                            slots[slot].1 |= *writable;
                            slot
                        }
                        None => {
                            slots.push((*buffer, *writable));
                            storage.push(buffer.snapshot());
                            slots.len() - 1
                        }
                    };
                    FrameArg::Buffer(slot)
                }
                LaunchArg::Scalar(value) => FrameArg::Scalar(*value),
            });
        }
        let mut frame = KernelFrame::new(frame_args, storage, global_size);

        for work_item in 0..global_size {
            implementation.execute(&mut frame, work_item).map_err(|reason| {
                DispatchError::KernelExecution { kernel: kernel.to_string(), work_item, reason }
            })?;
        }

        for ((buffer, writable), bytes) in slots.into_iter().zip(frame.into_buffers()) {
            if writable {
                buffer.store(bytes);
            }
        }
        debug!(kernel, global_size, "reference kernel completed");
        Ok(())
    }
}

impl Default for ReferenceHost {
    /// One platform with one CPU device.
    fn default() -> Self {
        Self::empty().with_platform(
            ReferencePlatform::new("Reference Host Platform")
                .with_device(ReferenceDevice::cpu("Reference Host Device")),
        )
    }
}

impl fmt::Debug for ReferenceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kernels: Vec<&str> = self.kernels.keys().map(String::as_str).collect();
        kernels.sort_unstable();
        f.debug_struct("ReferenceHost")
            .field("platforms", &self.platforms)
            .field("kernels", &kernels)
            .finish()
    }
}

/// Zero-filled device storage, released from the device's accounting on drop.
pub(crate) struct RefBuffer {
    host: Arc<ReferenceHost>,
    key: (usize, usize),
    data: Mutex<Vec<u8>>,
}

impl RefBuffer {
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Callers check the range against the buffer size first.
    pub(crate) fn write(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.lock();
        if let Some(dst) = data.get_mut(offset..offset + bytes.len()) {
            dst.copy_from_slice(bytes);
        }
    }

    pub(crate) fn read(&self, offset: usize, out: &mut [u8]) {
        let data = self.lock();
        if let Some(src) = data.get(offset..offset + out.len()) {
            out.copy_from_slice(src);
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    fn store(&self, bytes: Vec<u8>) {
        *self.lock() = bytes;
    }
}

impl fmt::Debug for RefBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefBuffer")
            .field("device", &self.key)
            .field("len", &self.lock().len())
            .finish()
    }
}

impl Drop for RefBuffer {
    fn drop(&mut self) {
        let bytes = self.lock().len() as u64;
        self.host.release(self.key, bytes);
    }
}

pub(crate) enum LaunchArg<'a> {
    Buffer { buffer: &'a RefBuffer, writable: bool },
    Scalar(Scalar),
}
