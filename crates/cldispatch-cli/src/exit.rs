// Exit codes for scripted triage of dispatch failures
use cldispatch_opencl::{DispatchError, ErrorKind};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERIC_FAIL: i32 = 1;
pub const EXIT_DISCOVERY: i32 = 2;
pub const EXIT_SOURCE_NOT_FOUND: i32 = 3;
pub const EXIT_BUILD_FAIL: i32 = 4;
pub const EXIT_DISPATCH_FAIL: i32 = 5;

/// Exit code for a failed command, taken from the first [`DispatchError`]
/// in the error chain.
pub fn code_for(err: &anyhow::Error) -> i32 {
    let Some(dispatch) = err.chain().find_map(|e| e.downcast_ref::<DispatchError>()) else {
        return EXIT_GENERIC_FAIL;
    };
    match dispatch.kind() {
        ErrorKind::Discovery => EXIT_DISCOVERY,
        ErrorKind::Source => EXIT_SOURCE_NOT_FOUND,
        ErrorKind::Build => EXIT_BUILD_FAIL,
        ErrorKind::Contract | ErrorKind::Device => EXIT_DISPATCH_FAIL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kinds_map_to_codes() {
        let err = anyhow::Error::new(DispatchError::NoPlatform);
        assert_eq!(code_for(&err), EXIT_DISCOVERY);
        let err = anyhow::Error::new(DispatchError::Build { log: "1:1: error: x".into() });
        assert_eq!(code_for(&err), EXIT_BUILD_FAIL);
        let err = anyhow::Error::new(DispatchError::InvalidWorkSize);
        assert_eq!(code_for(&err), EXIT_DISPATCH_FAIL);
    }

    #[test]
    fn context_does_not_hide_kind() {
        let result: Result<(), DispatchError> = Err(DispatchError::NoPlatform);
        let err = result.context("failed to open session").unwrap_err();
        assert_eq!(code_for(&err), EXIT_DISCOVERY);
    }

    #[test]
    fn other_errors_are_generic() {
        assert_eq!(code_for(&anyhow::anyhow!("bad flag")), EXIT_GENERIC_FAIL);
    }
}
