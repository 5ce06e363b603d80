//! Error taxonomy for the dispatch pipeline.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::context::ContextId;

/// Broad classification of a [`DispatchError`], used by callers to decide
/// how to report a failure (and by the CLI to pick an exit code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No platform/device could be found or selected.
    Discovery,
    /// The kernel source file could not be read.
    Source,
    /// Program compilation failed or the program is not executable.
    Build,
    /// The caller violated a dispatch-boundary contract.
    Contract,
    /// The device or runtime reported a failure.
    Device,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Source => write!(f, "source"),
            Self::Build => write!(f, "build"),
            Self::Contract => write!(f, "contract"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// Errors produced by the dispatch pipeline.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no compute platforms found")]
    NoPlatform,

    #[error("no devices found on platform '{platform}'")]
    NoDevice { platform: String },

    #[error("platform index {index} out of range ({available} platforms available)")]
    PlatformIndexOutOfRange { index: usize, available: usize },

    #[error("no device on platform '{platform}' satisfies the selection policy")]
    NoMatchingDevice { platform: String },

    #[error("{backend} runtime is not available in this build")]
    BackendUnavailable { backend: String },

    #[error("kernel source not found: {}", path.display())]
    SourceNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("program build failed:\n{log}")]
    Build { log: String },

    #[error("program is not executable: its build failed")]
    ProgramNotExecutable,

    #[error("entry point '{name}' not found in program (available: {})", available.join(", "))]
    EntryPointNotFound { name: String, available: Vec<String> },

    #[error("argument index {index} out of range for '{kernel}' ({arity} parameters)")]
    ArgumentIndex { kernel: String, index: u32, arity: u32 },

    #[error("argument {index} of '{kernel}' expects {expected}, got {actual}")]
    ArgumentType { kernel: String, index: u32, expected: String, actual: String },

    #[error("argument {index} of '{kernel}' is not bound")]
    UnboundArgument { kernel: String, index: u32 },

    #[error(
        "transfer of {len} bytes at offset {offset} does not fit buffer capacity of {capacity} bytes"
    )]
    Transfer { offset: usize, len: usize, capacity: usize },

    #[error("buffer size must be greater than zero (requested {size} bytes)")]
    InvalidBufferSize { size: usize },

    #[error("global work size must be greater than zero")]
    InvalidWorkSize,

    #[error("resource belongs to context {found}, expected context {expected}")]
    ContextMismatch { expected: ContextId, found: ContextId },

    #[error("device '{device}' is not bound to context {context}")]
    DeviceNotInContext { device: String, context: ContextId },

    #[error("operand lengths differ: left={left}, right={right}, output={output}")]
    OperandLengthMismatch { left: usize, right: usize, output: usize },

    #[error("element count {count} does not fit the kernel's int count parameter")]
    CountOutOfRange { count: usize },

    #[error("out of device memory: requested {requested} bytes, {available} bytes available")]
    OutOfDeviceMemory { requested: usize, available: u64 },

    #[error("kernel '{kernel}' failed at work-item {work_item}: {reason}")]
    KernelExecution { kernel: String, work_item: usize, reason: String },

    #[error("OpenCL error in {op}: {code}")]
    OpenCl { op: &'static str, code: i32 },
}

impl DispatchError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoPlatform
            | Self::NoDevice { .. }
            | Self::PlatformIndexOutOfRange { .. }
            | Self::NoMatchingDevice { .. }
            | Self::BackendUnavailable { .. } => ErrorKind::Discovery,
            Self::SourceNotFound { .. } => ErrorKind::Source,
            Self::Build { .. } | Self::ProgramNotExecutable => ErrorKind::Build,
            Self::EntryPointNotFound { .. }
            | Self::ArgumentIndex { .. }
            | Self::ArgumentType { .. }
            | Self::UnboundArgument { .. }
            | Self::Transfer { .. }
            | Self::InvalidBufferSize { .. }
            | Self::InvalidWorkSize
            | Self::ContextMismatch { .. }
            | Self::DeviceNotInContext { .. }
            | Self::OperandLengthMismatch { .. }
            | Self::CountOutOfRange { .. } => ErrorKind::Contract,
            Self::OutOfDeviceMemory { .. } | Self::KernelExecution { .. } | Self::OpenCl { .. } => {
                ErrorKind::Device
            }
        }
    }

    /// Whether this is a discovery failure (no platform, no device, …).
    pub fn is_discovery(&self) -> bool {
        self.kind() == ErrorKind::Discovery
    }

    pub(crate) fn check_context(expected: ContextId, found: ContextId) -> Result<()> {
        if expected == found {
            Ok(())
        } else {
            Err(Self::ContextMismatch { expected, found })
        }
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, DispatchError>;
