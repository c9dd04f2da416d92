//! Issuing the `cpuid` instruction.
//!
//! Two backends exist. The intrinsic backend uses `core::arch` and is the default. The
//! generated backend writes a small stub for the running calling convention into executable
//! memory and calls it, for when the instruction has to be reached without compiler support.

use crate::arch;
use crate::{Error, Result};
use log::debug;
use std::str::FromStr;

mod abi;
pub use abi::CallingConvention;

mod buffer;
pub use buffer::{CodeBuffer, ExecutableCode};

/// The four registers filled by one `cpuid` invocation.
///
/// The layout is the one the generated stubs write: `eax`, `ebx`, `ecx`, `edx`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RawRegisters {
    /// First output word.
    pub eax: u32,
    /// Second output word.
    pub ebx: u32,
    /// Third output word.
    pub ecx: u32,
    /// Fourth output word.
    pub edx: u32,
}

impl RawRegisters {
    /// Build a register sample from its four words.
    #[inline]
    pub const fn new(eax: u32, ebx: u32, ecx: u32, edx: u32) -> Self {
        RawRegisters { eax, ebx, ecx, edx }
    }

    /// Output word by position (0 = `eax` .. 3 = `edx`).
    pub fn word(&self, index: usize) -> Option<u32> {
        match index {
            0 => Some(self.eax),
            1 => Some(self.ebx),
            2 => Some(self.ecx),
            3 => Some(self.edx),
            _ => None,
        }
    }
}

/// Anything that can answer a `cpuid` query.
pub trait CpuidSource: std::fmt::Debug {
    /// Run `cpuid` with `eax = leaf`.
    fn cpuid(&self, leaf: u32) -> RawRegisters;
}

/// How the invoker reaches the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Compiler intrinsic from `core::arch`.
    Intrinsic,
    /// Hand-assembled stub in executable memory.
    Generated,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Intrinsic
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "intrinsic" => Ok(Strategy::Intrinsic),
            "generated" => Ok(Strategy::Generated),
            _ => Err(Error::UnknownStrategy(s.to_owned())),
        }
    }
}

type CpuidFn = unsafe extern "C" fn(*mut RawRegisters, u32);

/// A `cpuid` stub assembled for the calling convention of the running target.
#[derive(Debug)]
pub struct GeneratedCpuid {
    abi: CallingConvention,
    code: ExecutableCode,
}

impl GeneratedCpuid {
    /// Write the template of the native calling convention into a fresh code buffer.
    pub fn new() -> Result<Self> {
        let abi = CallingConvention::detect().ok_or(Error::UnsupportedPlatform)?;
        let template = abi.template();
        let mut buffer = CodeBuffer::acquire(template.len())?;
        buffer.write(template)?;
        let code = buffer.make_executable()?;
        debug!(
            "Assembled {} byte cpuid stub for {} at {:?}",
            code.len(),
            abi,
            code.as_ptr()
        );
        Ok(GeneratedCpuid { abi, code })
    }

    /// Calling convention the stub was built for.
    #[inline]
    pub fn abi(&self) -> CallingConvention {
        self.abi
    }

    /// Call the stub.
    pub fn call(&self, leaf: u32) -> RawRegisters {
        let mut regs = RawRegisters::default();
        unsafe {
            let func: CpuidFn = std::mem::transmute(self.code.as_ptr());
            func(&mut regs, leaf);
        }
        regs
    }
}

#[derive(Debug)]
enum Backend {
    Intrinsic,
    Generated(GeneratedCpuid),
}

/// Issues `cpuid` on the running processor.
///
/// Construction fails with `Error::UnsupportedPlatform` on targets without the instruction,
/// so an `Invoker` that exists can always be called.
#[derive(Debug)]
pub struct Invoker {
    backend: Backend,
}

impl Invoker {
    /// Probe the platform and set up the requested backend.
    pub fn new(strategy: Strategy) -> Result<Self> {
        if !arch::has_cpuid() {
            return Err(Error::UnsupportedPlatform);
        }
        let backend = match strategy {
            Strategy::Intrinsic => Backend::Intrinsic,
            Strategy::Generated => Backend::Generated(GeneratedCpuid::new()?),
        };
        debug!("cpuid invoker ready - {:?}", strategy);
        Ok(Invoker { backend })
    }

    /// The backend in use.
    pub fn strategy(&self) -> Strategy {
        match self.backend {
            Backend::Intrinsic => Strategy::Intrinsic,
            Backend::Generated(_) => Strategy::Generated,
        }
    }

    /// Run `cpuid` with `eax = leaf`.
    #[inline]
    pub fn invoke(&self, leaf: u32) -> RawRegisters {
        match self.backend {
            Backend::Intrinsic => arch::cpuid(leaf),
            Backend::Generated(ref stub) => stub.call(leaf),
        }
    }
}

impl CpuidSource for Invoker {
    fn cpuid(&self, leaf: u32) -> RawRegisters {
        self.invoke(leaf)
    }
}
