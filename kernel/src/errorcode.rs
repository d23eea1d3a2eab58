// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Standard error enum for invoking operations

/// Standard errors.
///
/// Success is expressed with `Ok(())` in a `Result<(), ErrorCode>`; this enum
/// only carries the failure cases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorCode {
    /// Generic failure condition
    FAIL = 1,
    /// Underlying system is busy; retry
    BUSY = 2,
    /// An invalid parameter was passed
    INVAL = 6,
    /// Parameter passed was too large
    SIZE = 7,
    /// Operation canceled by a call
    CANCEL = 8,
    /// Memory required not available
    NOMEM = 9,
    /// Operation or command is unsupported
    NOSUPPORT = 10,
    /// Device does not exist
    NODEVICE = 11,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}

#[cfg(test)]
mod test {
    use super::ErrorCode;

    #[test]
    fn numeric_values_are_stable() {
        assert_eq!(usize::from(ErrorCode::FAIL), 1);
        assert_eq!(usize::from(ErrorCode::BUSY), 2);
        assert_eq!(usize::from(ErrorCode::INVAL), 6);
        assert_eq!(usize::from(ErrorCode::NOSUPPORT), 10);
    }
}
