//! `cpuid` through the compiler intrinsic on x86 and x86_64.

#[cfg(target_arch = "x86")]
use core::arch::x86 as cpu;
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64 as cpu;

use crate::invoke::RawRegisters;

/// Whether the processor implements `cpuid`.
///
/// Always true on x86_64. Some pre-Pentium 32-bit parts lack it.
#[inline]
pub fn has_cpuid() -> bool {
    #[cfg(target_arch = "x86")]
    {
        cpu::has_cpuid()
    }
    #[cfg(target_arch = "x86_64")]
    {
        true
    }
}

/// Run `cpuid` with `eax = leaf`.
///
/// Only reachable through `Invoker`, which checks `has_cpuid` first.
#[inline]
#[allow(unused_unsafe)]
pub(crate) fn cpuid(leaf: u32) -> RawRegisters {
    let res = unsafe { cpu::__cpuid(leaf) };
    RawRegisters::new(res.eax, res.ebx, res.ecx, res.edx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_zero() {
        assert!(has_cpuid());
        let res = cpuid(0);
        assert!(res.eax >= 1);
        assert_ne!(res.ebx | res.ecx | res.edx, 0);
    }
}
