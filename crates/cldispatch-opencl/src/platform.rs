//! Platform and device enumeration.
//!
//! A [`Runtime`] is the entry point: it lists the compute platforms visible to
//! the process and, for a chosen platform, the devices it exposes. The real
//! OpenCL runtime (feature `opencl`) and the host reference runtime share this
//! surface.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DispatchError, Result};
use crate::reference::ReferenceHost;

/// Which runtime services the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The system OpenCL ICD loader.
    OpenCl,
    /// In-process host emulation of the OpenCL object model.
    Reference,
}

impl BackendKind {
    /// The backend used when nothing is configured: OpenCL when compiled in,
    /// otherwise the reference runtime.
    pub fn preferred() -> Self {
        if cfg!(feature = "opencl") {
            Self::OpenCl
        } else {
            Self::Reference
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenCl => write!(f, "opencl"),
            Self::Reference => write!(f, "reference"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opencl" => Ok(Self::OpenCl),
            "reference" | "ref" => Ok(Self::Reference),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Device type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Gpu,
    Cpu,
    Accelerator,
    Custom,
    Unknown,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => write!(f, "GPU"),
            Self::Cpu => write!(f, "CPU"),
            Self::Accelerator => write!(f, "Accelerator"),
            Self::Custom => write!(f, "Custom"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Device-type filter applied during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFilter {
    #[default]
    All,
    Gpu,
    Cpu,
    Accelerator,
}

impl DeviceFilter {
    /// Whether a device of type `ty` passes this filter.
    pub fn matches(self, ty: DeviceType) -> bool {
        match self {
            Self::All => true,
            Self::Gpu => ty == DeviceType::Gpu,
            Self::Cpu => ty == DeviceType::Cpu,
            Self::Accelerator => ty == DeviceType::Accelerator,
        }
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Gpu => write!(f, "gpu"),
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator => write!(f, "accelerator"),
        }
    }
}

impl std::str::FromStr for DeviceFilter {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "gpu" => Ok(Self::Gpu),
            "cpu" => Ok(Self::Cpu),
            "accelerator" | "accel" => Ok(Self::Accelerator),
            other => Err(format!("unknown device type: {other}")),
        }
    }
}

#[derive(Clone)]
pub(crate) enum PlatformHandle {
    Reference { host: Arc<ReferenceHost>, index: usize },
    #[cfg(feature = "opencl")]
    OpenCl(opencl3::platform::Platform),
}

#[derive(Clone)]
pub(crate) enum DeviceHandle {
    Reference { host: Arc<ReferenceHost>, platform: usize, index: usize },
    #[cfg(feature = "opencl")]
    OpenCl(opencl3::types::cl_device_id),
}

/// One accelerator runtime implementation available on the host.
#[derive(Clone)]
pub struct Platform {
    name: String,
    vendor: String,
    version: String,
    pub(crate) handle: PlatformHandle,
}

impl Platform {
    pub(crate) fn new(name: String, vendor: String, version: String, handle: PlatformHandle) -> Self {
        Self { name, vendor, version, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("name", &self.name)
            .field("vendor", &self.vendor)
            .field("version", &self.version)
            .finish()
    }
}

/// A concrete compute unit belonging to a platform.
#[derive(Clone)]
pub struct Device {
    pub(crate) name: String,
    pub(crate) vendor: String,
    pub(crate) platform_name: String,
    pub(crate) device_type: DeviceType,
    pub(crate) global_mem_bytes: u64,
    pub(crate) max_alloc_bytes: u64,
    pub(crate) handle: DeviceHandle,
}

impl Device {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Name of the platform this device was enumerated from.
    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Total global memory in bytes.
    pub fn global_mem_bytes(&self) -> u64 {
        self.global_mem_bytes
    }

    /// Largest single buffer the device accepts, in bytes.
    pub fn max_alloc_bytes(&self) -> u64 {
        self.max_alloc_bytes
    }

    /// Whether `self` and `other` refer to the same physical device.
    pub fn same_as(&self, other: &Device) -> bool {
        match (&self.handle, &other.handle) {
            (
                DeviceHandle::Reference { host: a, platform: pa, index: ia },
                DeviceHandle::Reference { host: b, platform: pb, index: ib },
            ) => Arc::ptr_eq(a, b) && pa == pb && ia == ib,
            #[cfg(feature = "opencl")]
            (DeviceHandle::OpenCl(a), DeviceHandle::OpenCl(b)) => a == b,
            #[cfg(feature = "opencl")]
            _ => false,
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("platform", &self.platform_name)
            .field("type", &self.device_type)
            .field("global_mem_bytes", &self.global_mem_bytes)
            .finish()
    }
}

#[derive(Clone)]
enum Backend {
    Reference(Arc<ReferenceHost>),
    #[cfg(feature = "opencl")]
    OpenCl,
}

/// Capability enumerator over one runtime.
#[derive(Clone)]
pub struct Runtime {
    backend: Backend,
}

impl Runtime {
    /// A runtime over the given host reference configuration.
    pub fn reference(host: ReferenceHost) -> Self {
        Self::reference_shared(Arc::new(host))
    }

    /// A runtime sharing an existing reference host, so callers can inspect
    /// its counters afterwards.
    pub fn reference_shared(host: Arc<ReferenceHost>) -> Self {
        Self { backend: Backend::Reference(host) }
    }

    /// The system OpenCL runtime.
    #[cfg(feature = "opencl")]
    pub fn opencl() -> Self {
        Self { backend: Backend::OpenCl }
    }

    /// Construct the runtime for `kind`, failing if it was not compiled in.
    pub fn for_backend(kind: BackendKind) -> Result<Self> {
        match kind {
            BackendKind::Reference => Ok(Self::reference(ReferenceHost::default())),
            #[cfg(feature = "opencl")]
            BackendKind::OpenCl => Ok(Self::opencl()),
            #[cfg(not(feature = "opencl"))]
            BackendKind::OpenCl => {
                Err(DispatchError::BackendUnavailable { backend: kind.to_string() })
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self.backend {
            Backend::Reference(_) => BackendKind::Reference,
            #[cfg(feature = "opencl")]
            Backend::OpenCl => BackendKind::OpenCl,
        }
    }

    /// List every platform. Fails with [`DispatchError::NoPlatform`] when the
    /// list is empty.
    pub fn list_platforms(&self) -> Result<Vec<Platform>> {
        let platforms = match &self.backend {
            Backend::Reference(host) => host.list_platforms(),
            #[cfg(feature = "opencl")]
            Backend::OpenCl => crate::opencl::list_platforms()?,
        };
        debug!(backend = %self.kind(), count = platforms.len(), "enumerated platforms");
        if platforms.is_empty() {
            return Err(DispatchError::NoPlatform);
        }
        Ok(platforms)
    }

    /// List the devices of `platform` matching `filter`. Fails with
    /// [`DispatchError::NoDevice`] when nothing matches.
    pub fn list_devices(&self, platform: &Platform, filter: DeviceFilter) -> Result<Vec<Device>> {
        let devices = match &platform.handle {
            PlatformHandle::Reference { host, index } => {
                host.list_devices(*index, &platform.name, filter)
            }
            #[cfg(feature = "opencl")]
            PlatformHandle::OpenCl(raw) => crate::opencl::list_devices(raw, &platform.name, filter)?,
        };
        debug!(platform = %platform.name, %filter, count = devices.len(), "enumerated devices");
        if devices.is_empty() {
            return Err(DispatchError::NoDevice { platform: platform.name.clone() });
        }
        Ok(devices)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").field("backend", &self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{ReferenceDevice, ReferencePlatform};

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!("OpenCL".parse::<BackendKind>().unwrap(), BackendKind::OpenCl);
        assert_eq!("reference".parse::<BackendKind>().unwrap(), BackendKind::Reference);
        assert!("cuda".parse::<BackendKind>().is_err());
    }

    #[test]
    fn device_filter_round_trips_through_display() {
        for filter in
            [DeviceFilter::All, DeviceFilter::Gpu, DeviceFilter::Cpu, DeviceFilter::Accelerator]
        {
            assert_eq!(filter.to_string().parse::<DeviceFilter>().unwrap(), filter);
        }
    }

    #[test]
    fn device_filter_matching() {
        assert!(DeviceFilter::All.matches(DeviceType::Custom));
        assert!(DeviceFilter::Gpu.matches(DeviceType::Gpu));
        assert!(!DeviceFilter::Gpu.matches(DeviceType::Cpu));
        assert!(DeviceFilter::Accelerator.matches(DeviceType::Accelerator));
    }

    #[test]
    fn default_reference_runtime_has_one_cpu_device() {
        let rt = Runtime::reference(ReferenceHost::default());
        let platforms = rt.list_platforms().unwrap();
        assert_eq!(platforms.len(), 1);
        let devices = rt.list_devices(&platforms[0], DeviceFilter::All).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_type(), DeviceType::Cpu);
        assert_eq!(devices[0].platform_name(), platforms[0].name());
    }

    #[test]
    fn filter_without_matches_is_no_device() {
        let rt = Runtime::reference(ReferenceHost::default());
        let platforms = rt.list_platforms().unwrap();
        let err = rt.list_devices(&platforms[0], DeviceFilter::Gpu).unwrap_err();
        assert!(matches!(err, DispatchError::NoDevice { .. }));
    }

    #[test]
    fn same_as_distinguishes_devices() {
        let host = ReferenceHost::empty().with_platform(
            ReferencePlatform::new("p")
                .with_device(ReferenceDevice::gpu("g0"))
                .with_device(ReferenceDevice::gpu("g1")),
        );
        let rt = Runtime::reference(host);
        let platforms = rt.list_platforms().unwrap();
        let a = rt.list_devices(&platforms[0], DeviceFilter::All).unwrap();
        let b = rt.list_devices(&platforms[0], DeviceFilter::All).unwrap();
        assert!(a[0].same_as(&b[0]));
        assert!(!a[0].same_as(&b[1]));
    }

    #[test]
    fn opencl_backend_availability_follows_feature() {
        let result = Runtime::for_backend(BackendKind::OpenCl);
        assert_eq!(result.is_ok(), cfg!(feature = "opencl"));
        assert_eq!(BackendKind::preferred() == BackendKind::OpenCl, cfg!(feature = "opencl"));
    }
}
