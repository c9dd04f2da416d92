//! Mapping a processor onto the codename of the kernels best suited to it.

use crate::decode::{self, CpuIdentity, Vendor};
use crate::invoke::CpuidSource;
use log::debug;

mod tables;
pub use tables::{
    requires_wide_vector, resolve_alias, table_for, Codename, ExtendedKey, Signature,
    SignatureTable, ALIASES, AMD, GENERIC, INTEL, REQUIRES_WIDE_VECTOR,
};

/// Outcome of classifying one processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Vendor, `Unknown` when `cpuid` was not available.
    pub vendor: Vendor,
    /// Decoded leaf 1 signature, if the vendor was recognised.
    pub identity: Option<CpuIdentity>,
    /// Codename straight from the signature tables, before aliasing and gating.
    pub signature: Option<Codename>,
    /// Whether the AVX gate passed.
    pub wide_vector: bool,
    /// Processor brand string, when the processor reports one.
    pub brand: Option<String>,
    /// Final codename.
    pub codename: Codename,
}

impl Detection {
    /// Detection for a processor that could not be queried at all.
    pub fn unsupported() -> Self {
        Detection {
            vendor: Vendor::Unknown,
            identity: None,
            signature: None,
            wide_vector: false,
            brand: None,
            codename: GENERIC,
        }
    }

    /// Whether the result is the generic codename.
    #[inline]
    pub fn is_generic(&self) -> bool {
        self.codename == GENERIC
    }
}

/// Table driven classifier over a `cpuid` source.
///
/// Without a source (the invoker could not be built) every query classifies as generic.
#[derive(Debug)]
pub struct Classifier<'a> {
    source: Option<&'a dyn CpuidSource>,
}

impl<'a> Classifier<'a> {
    /// Classifier reading from `source`.
    pub fn new(source: Option<&'a dyn CpuidSource>) -> Self {
        Classifier { source }
    }

    /// Run the classification.
    ///
    /// Vendor is resolved before the signature lookup: Intel rows key on extended model and
    /// AMD rows on extended family, so the two tables can not be searched together.
    pub fn classify(&self) -> Detection {
        let source = match self.source {
            Some(s) => s,
            None => return Detection::unsupported(),
        };

        let leaf0 = source.cpuid(0);
        if leaf0.eax == 0 {
            debug!("cpuid reports no standard leaves");
            return Detection::unsupported();
        }

        let vendor = decode::decode_vendor(&leaf0);
        let mut detection = Detection {
            vendor,
            brand: brand(source),
            ..Detection::unsupported()
        };
        let table = match table_for(vendor) {
            Some(t) => t,
            None => {
                debug!("Unrecognised vendor '{}'", decode::vendor_string(&leaf0));
                return detection;
            }
        };

        let identity = CpuIdentity::decode(vendor, &source.cpuid(1));
        detection.identity = Some(identity);
        detection.wide_vector = decode::AVX.evaluate(&source.cpuid(decode::AVX.leaf));
        debug!("Detected x86 processor - {}", identity);

        detection.signature = table.lookup(&identity);
        let resolved = match detection.signature {
            Some(c) => resolve_alias(c),
            None => return detection,
        };
        detection.codename = if requires_wide_vector(resolved) && !detection.wide_vector {
            debug!("{} needs {} which is not available", resolved, decode::AVX.name);
            GENERIC
        } else {
            resolved
        };
        detection
    }
}

/// Brand string, if the extended leaves reach that far.
fn brand(source: &dyn CpuidSource) -> Option<String> {
    let max = source.cpuid(decode::EXTENDED_MAX_LEAF).eax;
    if max < decode::BRAND_LEAVES[2] {
        return None;
    }
    let leaves = [
        source.cpuid(decode::BRAND_LEAVES[0]),
        source.cpuid(decode::BRAND_LEAVES[1]),
        source.cpuid(decode::BRAND_LEAVES[2]),
    ];
    Some(decode::brand_string(&leaves)).filter(|b| !b.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::RawRegisters;
    use std::collections::HashMap;

    const INTEL_LEAF0: RawRegisters = RawRegisters::new(0xd, 0x756e_6547, 0x6c65_746e, 0x4965_6e69);
    const AMD_LEAF0: RawRegisters = RawRegisters::new(0xd, 0x6874_7541, 0x444d_4163, 0x6974_6e65);
    const AVX_BITS: u32 = (1 << 26) | (1 << 27) | (1 << 28);

    /// `cpuid` answering from a fixed set of leaves, zero everywhere else.
    #[derive(Debug, Default)]
    struct FakeCpu {
        leaves: HashMap<u32, RawRegisters>,
    }

    impl FakeCpu {
        fn new(leaf0: RawRegisters, signature: u32, avx: bool) -> Self {
            let mut leaves = HashMap::new();
            leaves.insert(0, leaf0);
            leaves.insert(
                1,
                RawRegisters::new(signature, 0, if avx { AVX_BITS } else { 0 }, 0),
            );
            FakeCpu { leaves }
        }

        fn intel(extended_model: u32, family: u32, model: u32, avx: bool) -> Self {
            FakeCpu::new(INTEL_LEAF0, pack(0, extended_model, family, model), avx)
        }

        fn amd(extended_family: u32, family: u32, model: u32, avx: bool) -> Self {
            FakeCpu::new(AMD_LEAF0, pack(extended_family, 0, family, model), avx)
        }
    }

    impl CpuidSource for FakeCpu {
        fn cpuid(&self, leaf: u32) -> RawRegisters {
            self.leaves.get(&leaf).copied().unwrap_or_default()
        }
    }

    fn pack(extended_family: u32, extended_model: u32, family: u32, model: u32) -> u32 {
        (extended_family << 20) | (extended_model << 16) | (family << 8) | (model << 4) | 0x3
    }

    fn classify(cpu: &FakeCpu) -> Detection {
        Classifier::new(Some(cpu)).classify()
    }

    fn cpu_for(table: &SignatureTable, s: &Signature, avx: bool) -> FakeCpu {
        match table.vendor {
            Vendor::Intel => FakeCpu::intel(s.extended, s.family, s.model, avx),
            _ => FakeCpu::amd(s.extended, s.family, s.model, avx),
        }
    }

    #[test]
    fn test_every_signature_with_avx() {
        for table in [&INTEL, &AMD].iter() {
            for s in table.entries {
                let det = classify(&cpu_for(table, s, true));
                assert_eq!(det.vendor, table.vendor);
                assert_eq!(det.signature, Some(s.codename));
                assert_eq!(det.codename, resolve_alias(s.codename), "{:?}", s);
                assert!(det.wide_vector);
            }
        }
    }

    #[test]
    fn test_every_signature_without_avx() {
        for table in [&INTEL, &AMD].iter() {
            for s in table.entries {
                let det = classify(&cpu_for(table, s, false));
                let resolved = resolve_alias(s.codename);
                let expected = if requires_wide_vector(resolved) {
                    GENERIC
                } else {
                    resolved
                };
                assert_eq!(det.codename, expected, "{:?}", s);
            }
        }
    }

    #[test]
    fn test_known_examples() {
        assert_eq!(classify(&FakeCpu::intel(2, 6, 10, true)).codename, Codename::SandyBridge);
        assert_eq!(classify(&FakeCpu::intel(3, 6, 14, true)).codename, Codename::SandyBridge);
        assert_eq!(classify(&FakeCpu::intel(5, 6, 6, true)).codename, Codename::Haswell);
        assert_eq!(classify(&FakeCpu::intel(1, 6, 7, false)).codename, Codename::Dunnington);
        assert_eq!(classify(&FakeCpu::amd(6, 0xf, 0, true)).codename, Codename::Piledriver);
    }

    #[test]
    fn test_gate_downgrades_signature_match() {
        let det = classify(&FakeCpu::intel(2, 6, 10, false));
        assert_eq!(det.signature, Some(Codename::SandyBridge));
        assert!(!det.wide_vector);
        assert!(det.is_generic());
    }

    #[test]
    fn test_unknown_signature_is_generic() {
        let det = classify(&FakeCpu::intel(9, 6, 99, true));
        assert_eq!(det.vendor, Vendor::Intel);
        assert_eq!(det.signature, None);
        assert!(det.is_generic());

        // AMD numbers under an Intel vendor string.
        let det = classify(&FakeCpu::new(INTEL_LEAF0, pack(6, 0, 0xf, 1), true));
        assert!(det.is_generic());
    }

    #[test]
    fn test_no_standard_leaves() {
        let leaf0 = RawRegisters { eax: 0, ..INTEL_LEAF0 };
        let det = classify(&FakeCpu::new(leaf0, pack(0, 2, 6, 10), true));
        assert_eq!(det, Detection::unsupported());
    }

    #[test]
    fn test_without_source() {
        assert_eq!(Classifier::new(None).classify(), Detection::unsupported());
    }

    #[test]
    fn test_unknown_vendor() {
        // "HygonGenuine"
        let leaf0 = RawRegisters::new(0xd, 0x6f67_7948, 0x656e_6975, 0x6e65_476e);
        let det = classify(&FakeCpu::new(leaf0, pack(0, 2, 6, 10), true));
        assert_eq!(det.vendor, Vendor::Unknown);
        assert_eq!(det.identity, None);
        assert!(det.is_generic());

        // Same string, but leaf 0 eax carries bit 8: treated as Intel.
        let leaf0 = RawRegisters { eax: 0x10d, ..leaf0 };
        let det = classify(&FakeCpu::new(leaf0, pack(0, 2, 6, 10), true));
        assert_eq!(det.vendor, Vendor::Intel);
        assert_eq!(det.codename, Codename::SandyBridge);
    }

    #[test]
    fn test_brand_string_reported() {
        let mut cpu = FakeCpu::intel(4, 6, 5, true);
        cpu.leaves
            .insert(decode::EXTENDED_MAX_LEAF, RawRegisters::new(0x8000_0008, 0, 0, 0));
        // "Fake" " CPU" then NULs.
        cpu.leaves
            .insert(0x8000_0002, RawRegisters::new(0x656b_6146, 0x5550_4320, 0, 0));
        let det = classify(&cpu);
        assert_eq!(det.brand.as_deref(), Some("Fake CPU"));
        assert_eq!(det.codename, Codename::Haswell);

        assert_eq!(classify(&FakeCpu::intel(4, 6, 5, true)).brand, None);
    }

    #[test]
    fn test_idempotent() {
        let cpu = FakeCpu::amd(6, 0xf, 2, true);
        let classifier = Classifier::new(Some(&cpu));
        assert_eq!(classifier.classify(), classifier.classify());
    }
}
