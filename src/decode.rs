//! Decoding vendor, signature and feature bits out of raw `cpuid` words.
//!
//! More information at https://en.wikipedia.org/wiki/CPUID.

use crate::invoke::RawRegisters;
use byteorder::{ByteOrder, LittleEndian};
use derive_more::Display;

/// Vendor string reported by Intel processors.
pub const INTEL_VENDOR_ID: &str = "GenuineIntel";
/// Vendor string reported by AMD processors.
pub const AMD_VENDOR_ID: &str = "AuthenticAMD";

/// Processor vendor.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    /// Intel.
    #[display(fmt = "intel")]
    Intel,
    /// AMD.
    #[display(fmt = "amd")]
    Amd,
    /// Anything else.
    #[display(fmt = "unknown")]
    Unknown,
}

/// Recover the 12 character vendor string from leaf 0.
///
/// The string is laid out in `ebx`, `edx`, `ecx` order, not register order.
pub fn vendor_string(leaf0: &RawRegisters) -> String {
    let mut vendor = [0u8; 12];
    LittleEndian::write_u32(&mut vendor[0..4], leaf0.ebx);
    LittleEndian::write_u32(&mut vendor[4..8], leaf0.edx);
    LittleEndian::write_u32(&mut vendor[8..12], leaf0.ecx);
    String::from_utf8_lossy(&vendor).into_owned()
}

/// Map leaf 0 onto a vendor.
///
/// Unrecognised vendor strings are still treated as Intel when `eax` is zero or has bit 8 or
/// bit 10 set. This is a long standing heuristic for virtualised and emulated CPUs whose
/// vendor string is rewritten; it is kept as is.
pub fn decode_vendor(leaf0: &RawRegisters) -> Vendor {
    match vendor_string(leaf0).as_str() {
        INTEL_VENDOR_ID => Vendor::Intel,
        AMD_VENDOR_ID => Vendor::Amd,
        _ if leaf0.eax == 0 || leaf0.eax & 0x500 != 0 => Vendor::Intel,
        _ => Vendor::Unknown,
    }
}

/// Fields packed into the leaf 1 `eax` signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Bits 20..=27.
    ExtendedFamily,
    /// Bits 16..=19.
    ExtendedModel,
    /// Bits 8..=11.
    Family,
    /// Bits 4..=7.
    Model,
    /// Bits 0..=3.
    Stepping,
}

/// Position of one field inside a register word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    /// Which field this is.
    pub field: Field,
    /// Right shift applied before masking.
    pub shift: u32,
    /// Mask applied after shifting.
    pub mask: u32,
}

impl BitField {
    /// Pull the field out of `word`.
    #[inline]
    pub fn extract(&self, word: u32) -> u32 {
        word.checked_shr(self.shift).unwrap_or(0) & self.mask
    }
}

/// Layout of the processor signature in leaf 1 `eax`.
pub const SIGNATURE_LAYOUT: [BitField; 5] = [
    BitField {
        field: Field::ExtendedFamily,
        shift: 20,
        mask: 0xff,
    },
    BitField {
        field: Field::ExtendedModel,
        shift: 16,
        mask: 0x0f,
    },
    BitField {
        field: Field::Family,
        shift: 8,
        mask: 0x0f,
    },
    BitField {
        field: Field::Model,
        shift: 4,
        mask: 0x0f,
    },
    BitField {
        field: Field::Stepping,
        shift: 0,
        mask: 0x0f,
    },
];

/// Processor signature decoded from leaf 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuIdentity {
    /// Vendor tag taken from leaf 0.
    pub vendor: Vendor,
    /// Base family.
    pub family: u32,
    /// Base model.
    pub model: u32,
    /// Extended family.
    pub extended_family: u32,
    /// Extended model.
    pub extended_model: u32,
    /// Stepping.
    pub stepping: u32,
}

impl CpuIdentity {
    /// Decode the signature in leaf 1 `eax`.
    pub fn decode(vendor: Vendor, leaf1: &RawRegisters) -> Self {
        let mut id = CpuIdentity {
            vendor,
            family: 0,
            model: 0,
            extended_family: 0,
            extended_model: 0,
            stepping: 0,
        };
        for bits in SIGNATURE_LAYOUT.iter() {
            let value = bits.extract(leaf1.eax);
            match bits.field {
                Field::ExtendedFamily => id.extended_family = value,
                Field::ExtendedModel => id.extended_model = value,
                Field::Family => id.family = value,
                Field::Model => id.model = value,
                Field::Stepping => id.stepping = value,
            }
        }
        id
    }

    /// Family number as printed by the OS (extended family added for family 0xF).
    pub fn display_family(&self) -> u32 {
        if self.family == 0xf {
            self.family + self.extended_family
        } else {
            self.family
        }
    }

    /// Model number as printed by the OS (extended model prepended from family 6 on).
    pub fn display_model(&self) -> u32 {
        if self.family >= 0x6 {
            self.model + (self.extended_model << 4)
        } else {
            self.model
        }
    }
}

impl std::fmt::Display for CpuIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}-{:X}-{:X}-{:X}",
            self.vendor,
            self.display_family(),
            self.display_model(),
            self.stepping
        )
    }
}

/// Shorthand for `CpuIdentity::decode`.
#[inline]
pub fn decode_identity(vendor: Vendor, leaf1: &RawRegisters) -> CpuIdentity {
    CpuIdentity::decode(vendor, leaf1)
}

/// True only if every bit in `bits` is set in output word `word`.
///
/// Unknown words and bit positions past 31 count as clear.
pub fn has_feature(regs: &RawRegisters, word: usize, bits: &[u32]) -> bool {
    match regs.word(word) {
        Some(value) => bits
            .iter()
            .all(|&bit| bit < 32 && value & (1u32 << bit) != 0),
        None => false,
    }
}

/// A named capability made of one or more `cpuid` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureGate {
    /// Short name of the capability.
    pub name: &'static str,
    /// Leaf reporting it.
    pub leaf: u32,
    /// Output word (0 = `eax` .. 3 = `edx`).
    pub word: usize,
    /// Bits that must all be set.
    pub bits: &'static [u32],
}

impl FeatureGate {
    /// Check the gate against a sample of `self.leaf`.
    #[inline]
    pub fn evaluate(&self, regs: &RawRegisters) -> bool {
        has_feature(regs, self.word, self.bits)
    }
}

/// AVX usable: XSAVE (26), OSXSAVE (27) and AVX (28) in leaf 1 `ecx`.
pub const AVX: FeatureGate = FeatureGate {
    name: "avx",
    leaf: 1,
    word: 2,
    bits: &[26, 27, 28],
};

/// Leaf reporting the highest extended leaf.
pub const EXTENDED_MAX_LEAF: u32 = 0x8000_0000;
/// Leaves carrying the 48 byte brand string.
pub const BRAND_LEAVES: [u32; 3] = [0x8000_0002, 0x8000_0003, 0x8000_0004];

/// Assemble the processor brand string from the three brand leaves.
pub fn brand_string(leaves: &[RawRegisters; 3]) -> String {
    let mut brand = [0u8; 48];
    for (chunk, regs) in brand.chunks_mut(16).zip(leaves.iter()) {
        LittleEndian::write_u32_into(&[regs.eax, regs.ebx, regs.ecx, regs.edx], chunk);
    }
    String::from_utf8_lossy(&brand)
        .trim_matches(char::from(0))
        .trim()
        .to_owned()
}
