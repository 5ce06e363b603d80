//! Kernel invocation: an entry point plus its bound arguments.

use std::fmt;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::context::ContextId;
use crate::error::{DispatchError, Result};
use crate::program::{Program, ProgramInner};
use crate::reference::{ParamKind, ReferenceHost};

/// OpenCL C scalar parameter types the pipeline can pass by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl ScalarType {
    pub(crate) fn from_cl_name(name: &str) -> Option<Self> {
        match name {
            "int" | "signed int" => Some(Self::Int),
            "uint" | "unsigned int" | "unsigned" => Some(Self::UInt),
            "long" | "signed long" => Some(Self::Long),
            "ulong" | "unsigned long" => Some(Self::ULong),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            _ => None,
        }
    }

    /// The OpenCL C spelling of this type.
    pub fn cl_name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Long => "long",
            Self::ULong => "ulong",
            Self::Float => "float",
            Self::Double => "double",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cl_name())
    }
}

/// A by-value kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub fn ty(&self) -> ScalarType {
        match self {
            Self::I32(_) => ScalarType::Int,
            Self::U32(_) => ScalarType::UInt,
            Self::I64(_) => ScalarType::Long,
            Self::U64(_) => ScalarType::ULong,
            Self::F32(_) => ScalarType::Float,
            Self::F64(_) => ScalarType::Double,
        }
    }

    /// Integer value, if this is an integer that fits in `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I32(v) => Some(i64::from(v)),
            Self::U32(v) => Some(i64::from(v)),
            Self::I64(v) => Some(v),
            Self::U64(v) => i64::try_from(v).ok(),
            Self::F32(_) | Self::F64(_) => None,
        }
    }
}

macro_rules! scalar_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for Scalar {
            fn from(value: $t) -> Self {
                Self::$variant(value)
            }
        }

        impl From<$t> for KernelArg<'_> {
            fn from(value: $t) -> Self {
                Self::Scalar(Scalar::$variant(value))
            }
        })*
    };
}

scalar_from!(i32 => I32, u32 => U32, i64 => I64, u64 => U64, f32 => F32, f64 => F64);

/// One argument bound to a kernel parameter.
#[derive(Clone, Copy)]
pub enum KernelArg<'a> {
    Buffer(&'a Buffer),
    Scalar(Scalar),
}

impl KernelArg<'_> {
    fn describe(&self) -> String {
        match self {
            Self::Buffer(_) => "buffer".to_string(),
            Self::Scalar(s) => s.ty().to_string(),
        }
    }
}

impl fmt::Debug for KernelArg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(b) => f.debug_tuple("Buffer").field(&b.size()).finish(),
            Self::Scalar(s) => f.debug_tuple("Scalar").field(s).finish(),
        }
    }
}

impl<'a> From<&'a Buffer> for KernelArg<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<Scalar> for KernelArg<'_> {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

pub(crate) enum InvocationInner {
    Reference { host: Arc<ReferenceHost>, params: Vec<ParamKind> },
    #[cfg(feature = "opencl")]
    OpenCl(opencl3::kernel::Kernel),
}

/// A named entry point of a built [`Program`] with its argument slots.
///
/// Bound buffers are borrowed for `'a`, so they cannot be dropped while the
/// invocation can still be launched.
pub struct KernelInvocation<'a> {
    name: String,
    context: ContextId,
    args: Vec<Option<KernelArg<'a>>>,
    pub(crate) inner: InvocationInner,
}

impl<'a> KernelInvocation<'a> {
    /// Look up `entry_point` in `program`.
    pub fn new(program: &Program, entry_point: &str) -> Result<Self> {
        if !program.is_executable() {
            return Err(DispatchError::ProgramNotExecutable);
        }
        if !program.entry_points().iter().any(|e| e == entry_point) {
            return Err(DispatchError::EntryPointNotFound {
                name: entry_point.to_string(),
                available: program.entry_points().to_vec(),
            });
        }

        let inner = match &program.inner {
            ProgramInner::Reference { host, kernels } => {
                let signature = kernels.iter().find(|k| k.name == entry_point).ok_or_else(|| {
                    DispatchError::EntryPointNotFound {
                        name: entry_point.to_string(),
                        available: program.entry_points().to_vec(),
                    }
                })?;
                InvocationInner::Reference {
                    host: Arc::clone(host),
                    params: signature.params.iter().map(|p| p.kind).collect(),
                }
            }
            #[cfg(feature = "opencl")]
            ProgramInner::OpenCl(raw) => {
                InvocationInner::OpenCl(crate::opencl::create_kernel(raw, entry_point)?)
            }
        };
        let arity = match &inner {
            InvocationInner::Reference { params, .. } => params.len() as u32,
            #[cfg(feature = "opencl")]
            InvocationInner::OpenCl(kernel) => crate::opencl::kernel_arity(kernel)?,
        };

        Ok(Self {
            name: entry_point.to_string(),
            context: program.context_id(),
            args: vec![None; arity as usize],
            inner,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of declared parameters.
    pub fn arity(&self) -> u32 {
        self.args.len() as u32
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    /// Bind `arg` to parameter `index`, replacing any previous binding.
    pub fn bind(&mut self, index: u32, arg: impl Into<KernelArg<'a>>) -> Result<&mut Self> {
        let arg = arg.into();
        let arity = self.arity();
        if index >= arity {
            return Err(DispatchError::ArgumentIndex { kernel: self.name.clone(), index, arity });
        }
        if let KernelArg::Buffer(buffer) = arg {
            DispatchError::check_context(self.context, buffer.context_id())?;
        }

        match &self.inner {
            InvocationInner::Reference { params, .. } => {
                let expected = params[index as usize];
                let compatible = match (expected, &arg) {
                    (ParamKind::Buffer { .. }, KernelArg::Buffer(_)) => true,
                    (ParamKind::Scalar(ty), KernelArg::Scalar(s)) => s.ty() == ty,
                    _ => false,
                };
                if !compatible {
                    return Err(DispatchError::ArgumentType {
                        kernel: self.name.clone(),
                        index,
                        expected: match expected {
                            ParamKind::Buffer { .. } => "buffer".to_string(),
                            ParamKind::Scalar(ty) => ty.to_string(),
                        },
                        actual: arg.describe(),
                    });
                }
            }
            // The driver checks argument sizes when the kernel is enqueued.
            #[cfg(feature = "opencl")]
            InvocationInner::OpenCl(_) => {}
        }

        self.args[index as usize] = Some(arg);
        Ok(self)
    }

    /// All arguments, or the index of the first unbound one.
    pub(crate) fn bound_args(&self) -> Result<Vec<KernelArg<'a>>> {
        self.args
            .iter()
            .enumerate()
            .map(|(index, arg)| {
                arg.ok_or_else(|| DispatchError::UnboundArgument {
                    kernel: self.name.clone(),
                    index: index as u32,
                })
            })
            .collect()
    }

    /// Whether parameter `index` is declared read-only by the kernel source.
    pub(crate) fn param_read_only(&self, index: usize) -> bool {
        match &self.inner {
            InvocationInner::Reference { params, .. } => {
                matches!(params.get(index), Some(ParamKind::Buffer { read_only: true }))
            }
            #[cfg(feature = "opencl")]
            InvocationInner::OpenCl(_) => false,
        }
    }
}

impl fmt::Debug for KernelInvocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelInvocation")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("args", &self.args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_types() {
        assert_eq!(Scalar::from(3i32).ty(), ScalarType::Int);
        assert_eq!(Scalar::from(3u64).ty(), ScalarType::ULong);
        assert_eq!(Scalar::F64(1.0).ty(), ScalarType::Double);
    }

    #[test]
    fn as_i64_only_for_integers() {
        assert_eq!(Scalar::I32(-5).as_i64(), Some(-5));
        assert_eq!(Scalar::U32(u32::MAX).as_i64(), Some(i64::from(u32::MAX)));
        assert_eq!(Scalar::U64(u64::MAX).as_i64(), None);
        assert_eq!(Scalar::F32(1.0).as_i64(), None);
    }

    #[test]
    fn cl_names_round_trip() {
        for ty in [
            ScalarType::Int,
            ScalarType::UInt,
            ScalarType::Long,
            ScalarType::ULong,
            ScalarType::Float,
            ScalarType::Double,
        ] {
            assert_eq!(ScalarType::from_cl_name(ty.cl_name()), Some(ty));
        }
        assert_eq!(ScalarType::from_cl_name("unsigned int"), Some(ScalarType::UInt));
        assert_eq!(ScalarType::from_cl_name("half"), None);
    }

    #[test]
    fn kernel_arg_from_primitives() {
        assert!(matches!(KernelArg::from(7i32), KernelArg::Scalar(Scalar::I32(7))));
        assert_eq!(KernelArg::from(2.5f32).describe(), "float");
    }
}
