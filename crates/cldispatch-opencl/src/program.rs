//! Program construction: kernel source compiled for a context's device.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::{Context, ContextId, ContextInner};
use crate::error::{DispatchError, Result};
use crate::platform::Device;
use crate::reference::{KernelSignature, ReferenceHost};

/// Build-log line of every successful reference build.
pub const EMULATION_NOTE: &str =
    "note: kernel bodies are emulated by registered host implementations";

/// Outcome of a build attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Built,
    /// Terminal: the program can never produce kernel invocations.
    Failed,
}

pub(crate) enum ProgramInner {
    Reference { host: Arc<ReferenceHost>, kernels: Vec<KernelSignature> },
    #[cfg(feature = "opencl")]
    OpenCl(Arc<opencl3::program::Program>),
}

/// Compiled kernel code for one context.
pub struct Program {
    context: ContextId,
    device: Device,
    status: BuildStatus,
    log: String,
    entry_points: Vec<String>,
    pub(crate) inner: ProgramInner,
}

impl Program {
    /// Build `source` strictly: a compile error is returned as
    /// [`DispatchError::Build`].
    pub fn build(context: &Context, source: &str) -> Result<Self> {
        ProgramBuilder::new(context).build(source)
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn is_executable(&self) -> bool {
        self.status == BuildStatus::Built
    }

    /// Kernel names defined by the program, in source order.
    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    /// Whether the program runs on the reference runtime, where kernel
    /// bodies are not compiled and each entry point executes its registered
    /// [`HostKernel`](crate::HostKernel) instead.
    pub fn is_emulated(&self) -> bool {
        matches!(self.inner, ProgramInner::Reference { .. })
    }

    /// Compiler output for `device`, which must be the context's device.
    pub fn build_log(&self, device: &Device) -> Result<String> {
        if !self.device.same_as(device) {
            return Err(DispatchError::DeviceNotInContext {
                device: device.name().to_string(),
                context: self.context,
            });
        }
        Ok(self.log.clone())
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("context", &self.context)
            .field("status", &self.status)
            .field("entry_points", &self.entry_points)
            .finish()
    }
}

/// Raw result of compiling for one device, before the strict/lenient policy
/// is applied.
pub(crate) struct BuildOutcome {
    pub built: bool,
    pub log: String,
    pub entry_points: Vec<String>,
    pub inner: ProgramInner,
}

/// Configurable program build.
///
/// ```no_run
/// # fn demo(ctx: &cldispatch_opencl::Context) -> cldispatch_opencl::Result<()> {
/// use cldispatch_opencl::{ProgramBuilder, kernels};
///
/// let program = ProgramBuilder::new(ctx)
///     .options("-cl-std=CL1.2")
///     .build(kernels::ADD_SOURCE)?;
/// assert!(program.is_executable());
/// # Ok(())
/// # }
/// ```
pub struct ProgramBuilder<'c> {
    context: &'c Context,
    options: String,
    lenient: bool,
}

impl<'c> ProgramBuilder<'c> {
    pub fn new(context: &'c Context) -> Self {
        Self { context, options: String::new(), lenient: false }
    }

    /// Compiler options passed to the device compiler.
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    /// When set, a failed build yields a [`BuildStatus::Failed`] program
    /// instead of an error.
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    pub fn build(self, source: &str) -> Result<Program> {
        let device = self.context.device();
        debug!(
            context = %self.context.id(),
            device = %device.name(),
            options = %self.options,
            bytes = source.len(),
            "building program"
        );

        let outcome = match &self.context.inner {
            ContextInner::Reference { host, .. } => {
                let compilation = host.compile(source);
                let built = compilation.succeeded();
                let mut log = compilation.log();
                if built {
                    let names: Vec<&str> =
                        compilation.kernels.iter().map(|k| k.name.as_str()).collect();
                    warn!(
                        entry_points = ?names,
                        "reference runtime: kernel bodies are not compiled, entry points run their registered host implementations"
                    );
                    log = format!("{EMULATION_NOTE} ({})", names.join(", "));
                }
                BuildOutcome {
                    built,
                    log,
                    entry_points: compilation.kernels.iter().map(|k| k.name.clone()).collect(),
                    inner: ProgramInner::Reference {
                        host: Arc::clone(host),
                        kernels: compilation.kernels,
                    },
                }
            }
            #[cfg(feature = "opencl")]
            ContextInner::OpenCl(raw) => {
                crate::opencl::build_program(raw, device, source, &self.options)?
            }
        };

        if outcome.built {
            info!(entry_points = ?outcome.entry_points, "program built");
            return Ok(Program {
                context: self.context.id(),
                device: device.clone(),
                status: BuildStatus::Built,
                log: outcome.log,
                entry_points: outcome.entry_points,
                inner: outcome.inner,
            });
        }

        if !self.lenient {
            return Err(DispatchError::Build { log: outcome.log });
        }
        warn!(device = %device.name(), log = %outcome.log, "program build failed; continuing with a non-executable program");
        Ok(Program {
            context: self.context.id(),
            device: device.clone(),
            status: BuildStatus::Failed,
            log: outcome.log,
            entry_points: Vec::new(),
            inner: outcome.inner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::ADD_SOURCE;
    use crate::platform::{DeviceFilter, Runtime};
    use crate::reference::{ReferenceDevice, ReferencePlatform};

    fn devices() -> Vec<Device> {
        let host = ReferenceHost::empty().with_platform(
            ReferencePlatform::new("p")
                .with_device(ReferenceDevice::gpu("g0"))
                .with_device(ReferenceDevice::gpu("g1")),
        );
        let rt = Runtime::reference(host);
        let platform = rt.list_platforms().unwrap().remove(0);
        rt.list_devices(&platform, DeviceFilter::All).unwrap()
    }

    #[test]
    fn builds_add_source() {
        let devices = devices();
        let ctx = Context::new(&devices[0]).unwrap();
        let program = Program::build(&ctx, ADD_SOURCE).unwrap();
        assert_eq!(program.status(), BuildStatus::Built);
        assert_eq!(program.entry_points(), ["simple_add".to_string()]);
        assert!(program.is_emulated());
        assert_eq!(
            program.build_log(&devices[0]).unwrap(),
            format!("{EMULATION_NOTE} (simple_add)")
        );
        assert_eq!(program.context_id(), ctx.id());
    }

    #[test]
    fn strict_build_returns_log() {
        let devices = devices();
        let ctx = Context::new(&devices[0]).unwrap();
        let err = Program::build(&ctx, "kernel void simple_add(global int* a) {").unwrap_err();
        match err {
            DispatchError::Build { log } => assert!(log.contains("error:"), "{log}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn lenient_build_yields_failed_program() {
        let devices = devices();
        let ctx = Context::new(&devices[0]).unwrap();
        let program =
            ProgramBuilder::new(&ctx).lenient(true).build("kernel void nope() { }").unwrap();
        assert_eq!(program.status(), BuildStatus::Failed);
        assert!(!program.is_executable());
        assert!(program.entry_points().is_empty());
        assert!(program.build_log(&devices[0]).unwrap().contains("nope"));
    }

    #[test]
    fn build_log_requires_context_device() {
        let devices = devices();
        let ctx = Context::new(&devices[0]).unwrap();
        let program = Program::build(&ctx, ADD_SOURCE).unwrap();
        let err = program.build_log(&devices[1]).unwrap_err();
        assert!(matches!(err, DispatchError::DeviceNotInContext { .. }));
    }

    #[test]
    fn options_are_accepted() {
        let devices = devices();
        let ctx = Context::new(&devices[0]).unwrap();
        let program = ProgramBuilder::new(&ctx).options("-cl-fast-relaxed-math").build(ADD_SOURCE);
        assert!(program.is_ok());
    }
}
