//! Machine code templates for calling `cpuid` under each supported calling convention.
//!
//! Every template implements `void cpuid(uint32_t out[4], uint32_t leaf)` and writes
//! `eax`, `ebx`, `ecx`, `edx` into `out` in that order. `rbx`/`ebx` is callee saved in all
//! three conventions so it is pushed around the instruction.

use derive_more::Display;

/// System V x86_64: `out` in `rdi`, `leaf` in `rsi`.
const POSIX_64: [u8; 19] = [
    0x53, // push   %rbx
    0x48, 0x89, 0xf0, // mov    %rsi,%rax
    0x0f, 0xa2, // cpuid
    0x89, 0x07, // mov    %eax,(%rdi)
    0x89, 0x5f, 0x04, // mov    %ebx,0x4(%rdi)
    0x89, 0x4f, 0x08, // mov    %ecx,0x8(%rdi)
    0x89, 0x57, 0x0c, // mov    %edx,0xc(%rdi)
    0x5b, // pop    %rbx
    0xc3, // retq
];

/// Microsoft x64: `out` in `rcx`, `leaf` in `rdx`. `rcx` is clobbered by `cpuid` so the
/// pointer is parked in `r8` first.
const WINDOWS_64: [u8; 26] = [
    0x53, // push   %rbx
    0x48, 0x89, 0xd0, // mov    %rdx,%rax
    0x49, 0x89, 0xc8, // mov    %rcx,%r8
    0x0f, 0xa2, // cpuid
    0x41, 0x89, 0x00, // mov    %eax,(%r8)
    0x41, 0x89, 0x58, 0x04, // mov    %ebx,0x4(%r8)
    0x41, 0x89, 0x48, 0x08, // mov    %ecx,0x8(%r8)
    0x41, 0x89, 0x50, 0x0c, // mov    %edx,0xc(%r8)
    0x5b, // pop    %rbx
    0xc3, // retq
];

/// cdecl: both arguments on the stack, above the return address and the two saved registers.
const CDECL_32: [u8; 26] = [
    0x53, // push   %ebx
    0x57, // push   %edi
    0x8b, 0x7c, 0x24, 0x0c, // mov    0xc(%esp),%edi
    0x8b, 0x44, 0x24, 0x10, // mov    0x10(%esp),%eax
    0x0f, 0xa2, // cpuid
    0x89, 0x07, // mov    %eax,(%edi)
    0x89, 0x5f, 0x04, // mov    %ebx,0x4(%edi)
    0x89, 0x4f, 0x08, // mov    %ecx,0x8(%edi)
    0x89, 0x57, 0x0c, // mov    %edx,0xc(%edi)
    0x5f, // pop    %edi
    0x5b, // pop    %ebx
    0xc3, // ret
];

/// Calling conventions a generated `cpuid` stub can be built for.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// 64-bit System V (Linux, macOS, BSDs).
    #[display(fmt = "posix64")]
    Posix64,
    /// 64-bit Microsoft x64.
    #[display(fmt = "windows64")]
    Windows64,
    /// 32-bit stack based cdecl.
    #[display(fmt = "cdecl32")]
    Cdecl32,
}

impl CallingConvention {
    /// Calling convention of the running target, or `None` when it is not x86.
    pub fn detect() -> Option<Self> {
        if cfg!(target_arch = "x86_64") {
            if cfg!(windows) {
                Some(CallingConvention::Windows64)
            } else {
                Some(CallingConvention::Posix64)
            }
        } else if cfg!(target_arch = "x86") {
            Some(CallingConvention::Cdecl32)
        } else {
            None
        }
    }

    /// The machine code implementing the stub for this convention.
    pub fn template(self) -> &'static [u8] {
        match self {
            CallingConvention::Posix64 => &POSIX_64,
            CallingConvention::Windows64 => &WINDOWS_64,
            CallingConvention::Cdecl32 => &CDECL_32,
        }
    }

    /// Width in bytes of a pointer under this convention.
    #[inline]
    pub fn pointer_width(self) -> usize {
        match self {
            CallingConvention::Posix64 | CallingConvention::Windows64 => 8,
            CallingConvention::Cdecl32 => 4,
        }
    }
}
