//! Targets without `cpuid`.

use crate::invoke::RawRegisters;

/// Always false: the instruction does not exist here.
#[inline]
pub fn has_cpuid() -> bool {
    false
}

/// All-zero registers, which the classifier reads as "cpuid unsupported".
#[inline]
pub(crate) fn cpuid(_leaf: u32) -> RawRegisters {
    RawRegisters::default()
}
