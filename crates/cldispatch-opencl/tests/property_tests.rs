//! Property-based tests for the vector-add pipeline and buffer transfers.

use cldispatch_opencl::{
    kernels, vector_add, AccessMode, Buffer, BuildConfig, DispatchError, ReferenceHost, Runtime,
    SelectionConfig, Session, VectorAddRequest,
};
use proptest::prelude::*;

fn session() -> Session {
    Session::open(&Runtime::reference(ReferenceHost::default()), &SelectionConfig::default())
        .expect("reference session")
}

fn operands() -> impl Strategy<Value = (Vec<i32>, Vec<i32>, Vec<i32>)> {
    (1usize..96).prop_flat_map(|n| {
        (
            prop::collection::vec(any::<i32>(), n),
            prop::collection::vec(any::<i32>(), n),
            prop::collection::vec(any::<i32>(), n),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Work-items below both the global size and the element count write
    /// the wrapped sum; every other output element keeps its prior value.
    #[test]
    fn add_touches_only_launched_range(
        (a, b, initial) in operands(),
        global in 1usize..128,
    ) {
        let session = session();
        let program = session.build_program(kernels::ADD_SOURCE, &BuildConfig::default()).unwrap();
        let mut c = initial.clone();

        vector_add(&session, &program, &VectorAddRequest::new(global), &a, &b, &mut c).unwrap();

        for i in 0..a.len() {
            if i < global {
                prop_assert_eq!(c[i], a[i].wrapping_add(b[i]), "element {}", i);
            } else {
                prop_assert_eq!(c[i], initial[i], "element {}", i);
            }
        }
    }

    /// Bytes written at an offset are read back unchanged.
    #[test]
    fn transfer_round_trip(
        data in prop::collection::vec(any::<u8>(), 1..512),
        pad in 0usize..64,
    ) {
        let session = session();
        let mut buf = Buffer::allocate(session.context(), data.len() + pad, AccessMode::ReadWrite)
            .unwrap();
        session.queue().write_buffer(&mut buf, pad, &data).unwrap();
        let mut back = vec![0u8; data.len()];
        session.queue().read_buffer(&buf, pad, &mut back).unwrap();
        prop_assert_eq!(back, data);
    }

    /// A transfer succeeds exactly when it is non-empty and fits.
    #[test]
    fn transfer_bounds_are_exact(
        size in 1usize..256,
        offset in 0usize..300,
        len in 0usize..300,
    ) {
        let session = session();
        let buf = Buffer::allocate(session.context(), size, AccessMode::ReadWrite).unwrap();
        let mut out = vec![0u8; len];
        let result = session.queue().read_buffer(&buf, offset, &mut out);
        let fits = len > 0 && offset + len <= size;
        prop_assert_eq!(result.is_ok(), fits);
        if let Err(err) = result {
            let is_transfer = matches!(err, DispatchError::Transfer { .. });
            prop_assert!(is_transfer, "unexpected error: {}", err);
        }
    }
}
