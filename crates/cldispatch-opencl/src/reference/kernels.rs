//! Host implementations of kernel entry points for the reference runtime.

use bytemuck::Pod;

use crate::kernel::Scalar;

/// A host-side implementation of one kernel entry point.
///
/// `execute` runs a single work-item. The reference queue calls it once per
/// index in `0..global_size`, in order.
pub trait HostKernel: Send + Sync {
    fn execute(&self, frame: &mut KernelFrame, work_item: usize) -> Result<(), String>;
}

impl<F> HostKernel for F
where
    F: Fn(&mut KernelFrame, usize) -> Result<(), String> + Send + Sync,
{
    fn execute(&self, frame: &mut KernelFrame, work_item: usize) -> Result<(), String> {
        self(frame, work_item)
    }
}

pub(crate) enum FrameArg {
    /// Index into the frame's buffer storage. Parameters bound to the same
    /// device buffer share one slot.
    Buffer(usize),
    Scalar(Scalar),
}

/// The argument view a [`HostKernel`] sees during one launch.
///
/// Buffer accesses are bounds-checked: an out-of-range index is reported as a
/// kernel failure rather than corrupting neighbouring memory.
pub struct KernelFrame {
    args: Vec<FrameArg>,
    buffers: Vec<Vec<u8>>,
    global_size: usize,
}

impl KernelFrame {
    pub(crate) fn new(args: Vec<FrameArg>, buffers: Vec<Vec<u8>>, global_size: usize) -> Self {
        Self { args, buffers, global_size }
    }

    /// Buffer storage after the launch, indexed by slot.
    pub(crate) fn into_buffers(self) -> Vec<Vec<u8>> {
        self.buffers
    }

    /// Number of work-items in this launch.
    pub fn global_size(&self) -> usize {
        self.global_size
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    fn slot(&self, arg: usize) -> Result<usize, String> {
        match self.args.get(arg) {
            Some(FrameArg::Buffer(slot)) => Ok(*slot),
            Some(FrameArg::Scalar(_)) => Err(format!("argument {arg} is a scalar, not a buffer")),
            None => Err(format!("argument {arg} does not exist")),
        }
    }

    fn buffer(&self, arg: usize) -> Result<&[u8], String> {
        let slot = self.slot(arg)?;
        self.buffers
            .get(slot)
            .map(Vec::as_slice)
            .ok_or_else(|| format!("argument {arg} has no storage"))
    }

    /// Element capacity of buffer argument `arg` when viewed as `T`.
    pub fn len<T: Pod>(&self, arg: usize) -> Result<usize, String> {
        Ok(self.buffer(arg)?.len() / std::mem::size_of::<T>())
    }

    /// Read element `index` of buffer argument `arg`.
    pub fn load<T: Pod>(&self, arg: usize, index: usize) -> Result<T, String> {
        let bytes = self.buffer(arg)?;
        let size = std::mem::size_of::<T>();
        let start = index.checked_mul(size).filter(|s| s + size <= bytes.len()).ok_or_else(|| {
            format!("read of element {index} is out of bounds for argument {arg}")
        })?;
        Ok(bytemuck::pod_read_unaligned(&bytes[start..start + size]))
    }

    /// Write element `index` of buffer argument `arg`.
    pub fn store<T: Pod>(&mut self, arg: usize, index: usize, value: T) -> Result<(), String> {
        let slot = self.slot(arg)?;
        let bytes = self
            .buffers
            .get_mut(slot)
            .ok_or_else(|| format!("argument {arg} has no storage"))?;
        let size = std::mem::size_of::<T>();
        let start = index.checked_mul(size).filter(|s| s + size <= bytes.len()).ok_or_else(|| {
            format!("write of element {index} is out of bounds for argument {arg}")
        })?;
        bytes[start..start + size].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Value of scalar argument `arg`.
    pub fn scalar(&self, arg: usize) -> Result<Scalar, String> {
        match self.args.get(arg) {
            Some(FrameArg::Scalar(value)) => Ok(*value),
            Some(FrameArg::Buffer(_)) => Err(format!("argument {arg} is a buffer, not a scalar")),
            None => Err(format!("argument {arg} does not exist")),
        }
    }
}

/// `simple_add(left, right, output, count)`: `output[i] = left[i] + right[i]`
/// for `i < count`.
pub fn simple_add(frame: &mut KernelFrame, i: usize) -> Result<(), String> {
    let count = frame
        .scalar(3)?
        .as_i64()
        .ok_or_else(|| "count must be an integer".to_string())?;
    if i as i64 >= count {
        return Ok(());
    }
    let left: i32 = frame.load(0, i)?;
    let right: i32 = frame.load(1, i)?;
    frame.store(2, i, left.wrapping_add(right))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_for(left: &[i32], right: &[i32], count: i32) -> KernelFrame {
        KernelFrame::new(
            vec![
                FrameArg::Buffer(0),
                FrameArg::Buffer(1),
                FrameArg::Buffer(2),
                FrameArg::Scalar(Scalar::I32(count)),
            ],
            vec![
                bytemuck::cast_slice(left).to_vec(),
                bytemuck::cast_slice(right).to_vec(),
                vec![0; left.len() * 4],
            ],
            left.len(),
        )
    }

    #[test]
    fn simple_add_writes_sum() {
        let mut frame = frame_for(&[1, 2, 3], &[10, 20, 30], 3);
        for i in 0..3 {
            simple_add(&mut frame, i).unwrap();
        }
        let out: Vec<i32> = (0..3).map(|i| frame.load(2, i).unwrap()).collect();
        assert_eq!(out, vec![11, 22, 33]);
    }

    #[test]
    fn simple_add_respects_count_guard() {
        let mut frame = frame_for(&[1, 2, 3], &[1, 1, 1], 2);
        for i in 0..3 {
            simple_add(&mut frame, i).unwrap();
        }
        assert_eq!(frame.load::<i32>(2, 2).unwrap(), 0);
    }

    #[test]
    fn simple_add_wraps_on_overflow() {
        let mut frame = frame_for(&[i32::MAX], &[1], 1);
        simple_add(&mut frame, 0).unwrap();
        assert_eq!(frame.load::<i32>(2, 0).unwrap(), i32::MIN);
    }

    #[test]
    fn out_of_bounds_access_is_an_error() {
        let frame = frame_for(&[1], &[1], 4);
        let err = frame.load::<i32>(0, 1).unwrap_err();
        assert!(err.contains("out of bounds"));
    }

    #[test]
    fn argument_kind_mismatch() {
        let mut frame = frame_for(&[1], &[1], 1);
        assert!(frame.scalar(0).is_err());
        assert!(frame.load::<i32>(3, 0).is_err());
        assert!(frame.store(3, 0, 1i32).is_err());
        assert!(frame.load::<i32>(9, 0).unwrap_err().contains("does not exist"));
    }

    #[test]
    fn len_counts_elements() {
        let frame = frame_for(&[1, 2, 3, 4], &[0; 4], 4);
        assert_eq!(frame.len::<i32>(0).unwrap(), 4);
        assert_eq!(frame.len::<u8>(0).unwrap(), 16);
        assert_eq!(frame.arg_count(), 4);
        assert_eq!(frame.global_size(), 4);
    }

    #[test]
    fn closures_are_host_kernels() {
        let double = |frame: &mut KernelFrame, i: usize| -> Result<(), String> {
            let v: i32 = frame.load(0, i)?;
            frame.store(0, i, v * 2)
        };
        let mut frame = KernelFrame::new(
            vec![FrameArg::Buffer(0)],
            vec![bytemuck::cast_slice(&[4i32]).to_vec()],
            1,
        );
        double.execute(&mut frame, 0).unwrap();
        assert_eq!(frame.load::<i32>(0, 0).unwrap(), 8);
    }

    #[test]
    fn shared_slot_sees_every_store() {
        let mut frame = KernelFrame::new(
            vec![FrameArg::Buffer(0), FrameArg::Buffer(0)],
            vec![bytemuck::cast_slice(&[0i32]).to_vec()],
            1,
        );
        let a: i32 = frame.load(0, 0).unwrap();
        frame.store(0, 0, a + 1).unwrap();
        let b: i32 = frame.load(1, 0).unwrap();
        frame.store(1, 0, b + 10).unwrap();
        assert_eq!(frame.into_buffers(), vec![bytemuck::cast_slice(&[11i32]).to_vec()]);
    }
}
