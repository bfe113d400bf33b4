/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Programming-error taxonomy. These are never returned to the caller as
//! `Result`s that propagate through normal control flow; they are raised at
//! the point of a genuine misuse (classification abuse, unsupported level)
//! and the caller is expected to treat `abort()` as unconditionally fatal.

use crate::platform::{TTGranule, TTLevel};
use snafu::Snafu;

#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionViolation {
    #[snafu(display("level {level:?} is not defined under granule {granule:?}"))]
    UnsupportedLevel { granule: TTGranule, level: TTLevel },

    #[snafu(display("region size offset {offset} is out of the supported range"))]
    RegionSizeOffsetOutOfRange { offset: u32 },

    #[snafu(display("attribute accessor for {expected:?} descriptors used on a {actual:?} descriptor"))]
    DescriptorKindMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

impl PreconditionViolation {
    /// Logs the violation at `error!` and aborts, per the "programming
    /// errors abort immediately" propagation policy.
    pub fn abort(self) -> ! {
        log::error!("precondition violation: {self}");
        panic!("precondition violation: {self}");
    }
}
