//! Kernel sources shipped with the crate and kernel-file loading.

use std::path::Path;

use tracing::debug;

use crate::error::{DispatchError, Result};

/// OpenCL C source of the elementwise integer addition kernel.
pub const ADD_SOURCE: &str = include_str!("../kernels/add.cl");

/// Entry point defined by [`ADD_SOURCE`].
pub const ADD_ENTRY_POINT: &str = "simple_add";

/// Read a kernel source file in full.
///
/// # Errors
///
/// [`DispatchError::SourceNotFound`] when the file is missing or unreadable.
pub fn load_source(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .map_err(|source| DispatchError::SourceNotFound { path: path.to_path_buf(), source })?;
    debug!(path = %path.display(), bytes = source.len(), "loaded kernel source");
    Ok(source)
}
