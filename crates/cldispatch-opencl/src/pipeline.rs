//! End-to-end dispatch: session setup and the vector-addition run.
//!
//! A [`Session`] is the explicit (platform, device, context, queue) bundle
//! every dispatch call receives; nothing is kept in process-global state.

use std::fmt;

use tracing::{debug, info};

use crate::buffer::{AccessMode, Buffer};
use crate::config::{BuildConfig, RunConfig, SelectionConfig};
use crate::context::Context;
use crate::error::{DispatchError, Result};
use crate::kernel::KernelInvocation;
use crate::kernels::ADD_ENTRY_POINT;
use crate::platform::{Device, Platform, Runtime};
use crate::program::{Program, ProgramBuilder};
use crate::queue::CommandQueue;
use crate::selector::DeviceSelector;

/// The platform, device, context and queue a run dispatches to.
pub struct Session {
    platform: Platform,
    device: Device,
    context: Context,
    queue: CommandQueue,
}

impl Session {
    /// Enumerate, select and bind according to a `[selection]` section.
    pub fn open(runtime: &Runtime, selection: &SelectionConfig) -> Result<Self> {
        Self::open_with(runtime, selection.platform_index, &DeviceSelector::from_config(selection))
    }

    /// Enumerate platforms, pick `platform_index`, enumerate only that
    /// platform's devices, pick one with `selector`, then create the context
    /// and queue. No context exists unless every earlier step succeeded.
    pub fn open_with(
        runtime: &Runtime,
        platform_index: usize,
        selector: &DeviceSelector,
    ) -> Result<Self> {
        let platforms = runtime.list_platforms()?;
        let available = platforms.len();
        let platform = platforms
            .into_iter()
            .nth(platform_index)
            .ok_or(DispatchError::PlatformIndexOutOfRange { index: platform_index, available })?;
        info!(platform = %platform.name(), vendor = %platform.vendor(), "selected platform");

        let devices = runtime.list_devices(&platform, selector.filter())?;
        let device = selector.select(platform.name(), devices)?;

        let context = Context::new(&device)?;
        let queue = CommandQueue::new(&context, &device)?;
        Ok(Self { platform, device, context, queue })
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Build `source` for the session's device under `config`'s policy.
    pub fn build_program(&self, source: &str, config: &BuildConfig) -> Result<Program> {
        ProgramBuilder::new(&self.context)
            .options(config.options.clone())
            .lenient(!config.fail_on_error)
            .build(source)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("platform", &self.platform.name())
            .field("device", &self.device.name())
            .field("context", &self.context.id())
            .finish()
    }
}

/// Parameters of one [`vector_add`] dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorAddRequest {
    pub entry_point: String,
    /// Work-items launched. May be smaller than the operand length, in which
    /// case only the leading elements are computed.
    pub global_work_size: usize,
    /// Allocate inputs read-only and the output write-only instead of
    /// read-write everywhere.
    pub strict_access: bool,
}

impl VectorAddRequest {
    pub fn new(global_work_size: usize) -> Self {
        Self { entry_point: ADD_ENTRY_POINT.to_string(), global_work_size, strict_access: false }
    }

    pub fn from_config(run: &RunConfig) -> Self {
        Self {
            entry_point: run.entry_point.clone(),
            global_work_size: run.global_work_size,
            strict_access: run.strict_access,
        }
    }

    fn access_modes(&self) -> (AccessMode, AccessMode) {
        if self.strict_access {
            (AccessMode::ReadOnly, AccessMode::WriteOnly)
        } else {
            (AccessMode::ReadWrite, AccessMode::ReadWrite)
        }
    }
}

/// Compute `output[i] = left[i] + right[i]` on the session's device.
///
/// The current contents of `output` are uploaded first, so elements outside
/// the launched range come back unchanged. `left` and `right` are only read.
pub fn vector_add(
    session: &Session,
    program: &Program,
    request: &VectorAddRequest,
    left: &[i32],
    right: &[i32],
    output: &mut [i32],
) -> Result<()> {
    let n = left.len();
    if right.len() != n || output.len() != n {
        return Err(DispatchError::OperandLengthMismatch {
            left: n,
            right: right.len(),
            output: output.len(),
        });
    }
    let count = i32::try_from(n).map_err(|_| DispatchError::CountOutOfRange { count: n })?;

    let ctx = session.context();
    let queue = session.queue();
    let (input_mode, output_mode) = request.access_modes();

    let mut left_buf = Buffer::allocate_for::<i32>(ctx, n, input_mode)?;
    let mut right_buf = Buffer::allocate_for::<i32>(ctx, n, input_mode)?;
    let mut output_buf = Buffer::allocate_for::<i32>(ctx, n, output_mode)?;

    queue.write_pod(&mut left_buf, left)?;
    queue.write_pod(&mut right_buf, right)?;
    queue.write_pod(&mut output_buf, output)?;
    debug!(elements = n, "operands staged");

    let mut invocation = KernelInvocation::new(program, &request.entry_point)?;
    invocation.bind(0, &left_buf)?.bind(1, &right_buf)?.bind(2, &output_buf)?.bind(3, count)?;
    queue.enqueue_kernel(&invocation, request.global_work_size)?;

    queue.read_pod(&output_buf, output)?;
    info!(
        kernel = %request.entry_point,
        elements = n,
        global_work_size = request.global_work_size,
        "vector add complete"
    );
    Ok(())
}
