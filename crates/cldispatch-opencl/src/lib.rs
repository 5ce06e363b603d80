//! OpenCL dispatch pipeline.
//!
//! Discovers a compute platform and device, builds a kernel program for it,
//! stages operand buffers, launches a kernel over a 1-D range and reads the
//! results back. Every queue operation blocks until the device is done.
//!
//! Two runtimes implement the same object model:
//!
//! - the system OpenCL runtime via `opencl3` (feature `opencl`);
//! - a host reference runtime ([`reference`]) that emulates platforms,
//!   devices and kernels in process memory, used when no ICD loader is
//!   available and throughout the test suite.
//!
//! ```
//! use cldispatch_opencl::{kernels, vector_add, BuildConfig, ReferenceHost, Runtime, Session,
//!     SelectionConfig, VectorAddRequest};
//!
//! let runtime = Runtime::reference(ReferenceHost::default());
//! let session = Session::open(&runtime, &SelectionConfig::default())?;
//! let program = session.build_program(kernels::ADD_SOURCE, &BuildConfig::default())?;
//!
//! let mut sum = [0i32; 4];
//! vector_add(&session, &program, &VectorAddRequest::new(4), &[1, 2, 3, 4], &[4, 3, 2, 1], &mut sum)?;
//! assert_eq!(sum, [5, 5, 5, 5]);
//! # Ok::<(), cldispatch_opencl::DispatchError>(())
//! ```

pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod kernel;
pub mod kernels;
#[cfg(feature = "opencl")]
mod opencl;
pub mod pipeline;
pub mod platform;
pub mod program;
pub mod queue;
pub mod reference;
pub mod selector;

pub use buffer::{AccessMode, Buffer};
pub use config::{BuildConfig, ConfigError, DispatchConfig, LoggingConfig, RunConfig, SelectionConfig};
pub use context::{Context, ContextId};
pub use error::{DispatchError, ErrorKind, Result};
pub use kernel::{KernelArg, KernelInvocation, Scalar, ScalarType};
pub use pipeline::{vector_add, Session, VectorAddRequest};
pub use platform::{BackendKind, Device, DeviceFilter, DeviceType, Platform, Runtime};
pub use program::{BuildStatus, Program, ProgramBuilder};
pub use queue::CommandQueue;
pub use reference::{HostKernel, KernelFrame, ReferenceDevice, ReferenceHost, ReferencePlatform};
pub use selector::DeviceSelector;
