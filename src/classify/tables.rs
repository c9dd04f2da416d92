//! Static signature, alias and feature requirement tables.

use crate::decode::{CpuIdentity, Vendor};
use crate::{Error, Result};
use std::str::FromStr;

/// Microarchitecture codenames this crate can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codename {
    /// Generic code path, no microarchitecture specific tuning.
    Reference,
    /// Intel Core 2, 45nm.
    Penryn,
    /// Intel Xeon 7400.
    Dunnington,
    /// Intel 2nd generation Core.
    SandyBridge,
    /// Intel 3rd generation Core.
    IvyBridge,
    /// Intel 4th generation Core.
    Haswell,
    /// Intel 5th generation Core.
    Broadwell,
    /// AMD family 15h, first generation.
    Bulldozer,
    /// AMD family 15h, second generation.
    Piledriver,
    /// AMD family 15h, third generation.
    Steamroller,
}

impl Codename {
    /// Every codename, generic first.
    pub const ALL: [Codename; 10] = [
        Codename::Reference,
        Codename::Penryn,
        Codename::Dunnington,
        Codename::SandyBridge,
        Codename::IvyBridge,
        Codename::Haswell,
        Codename::Broadwell,
        Codename::Bulldozer,
        Codename::Piledriver,
        Codename::Steamroller,
    ];

    /// Lowercase name used by kernel selection.
    pub fn as_str(self) -> &'static str {
        match self {
            Codename::Reference => "reference",
            Codename::Penryn => "penryn",
            Codename::Dunnington => "dunnington",
            Codename::SandyBridge => "sandybridge",
            Codename::IvyBridge => "ivybridge",
            Codename::Haswell => "haswell",
            Codename::Broadwell => "broadwell",
            Codename::Bulldozer => "bulldozer",
            Codename::Piledriver => "piledriver",
            Codename::Steamroller => "steamroller",
        }
    }
}

impl std::fmt::Display for Codename {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codename {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Codename::ALL
            .iter()
            .find(|c| c.as_str() == name)
            .copied()
            .ok_or_else(|| Error::UnknownCodename(s.to_owned()))
    }
}

/// Codename reported when nothing more specific applies.
pub const GENERIC: Codename = Codename::Reference;

/// Which extended signature field a vendor table keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedKey {
    /// Extended model (Intel).
    Model,
    /// Extended family (AMD).
    Family,
}

/// One (family, model, extended field) → codename row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Base family.
    pub family: u32,
    /// Base model.
    pub model: u32,
    /// Extended model or family, per the owning table's `ExtendedKey`.
    pub extended: u32,
    /// Codename before alias resolution.
    pub codename: Codename,
}

const fn sig(family: u32, extended: u32, model: u32, codename: Codename) -> Signature {
    Signature {
        family,
        model,
        extended,
        codename,
    }
}

/// Signature rows of a single vendor.
#[derive(Debug)]
pub struct SignatureTable {
    /// Vendor the rows belong to.
    pub vendor: Vendor,
    /// Extended field the rows are keyed on.
    pub key: ExtendedKey,
    /// The rows.
    pub entries: &'static [Signature],
}

impl SignatureTable {
    /// Find the base codename for `id`.
    pub fn lookup(&self, id: &CpuIdentity) -> Option<Codename> {
        let extended = match self.key {
            ExtendedKey::Model => id.extended_model,
            ExtendedKey::Family => id.extended_family,
        };
        self.entries
            .iter()
            .find(|s| s.family == id.family && s.model == id.model && s.extended == extended)
            .map(|s| s.codename)
    }
}

/// Intel rows, family 6 keyed on extended model.
pub static INTEL: SignatureTable = SignatureTable {
    vendor: Vendor::Intel,
    key: ExtendedKey::Model,
    entries: &[
        sig(6, 1, 7, Codename::Penryn),
        sig(6, 1, 13, Codename::Dunnington),
        sig(6, 2, 10, Codename::SandyBridge),
        sig(6, 2, 13, Codename::SandyBridge),
        sig(6, 3, 10, Codename::IvyBridge),
        sig(6, 3, 14, Codename::IvyBridge),
        sig(6, 3, 12, Codename::Haswell),
        sig(6, 3, 15, Codename::Haswell),
        sig(6, 3, 13, Codename::Broadwell),
        sig(6, 4, 5, Codename::Haswell),
        sig(6, 4, 6, Codename::Haswell),
        sig(6, 4, 7, Codename::Broadwell),
        sig(6, 4, 15, Codename::Broadwell),
        sig(6, 5, 6, Codename::Broadwell),
    ],
};

/// AMD rows, family 0xF keyed on extended family.
pub static AMD: SignatureTable = SignatureTable {
    vendor: Vendor::Amd,
    key: ExtendedKey::Family,
    entries: &[
        sig(0xf, 6, 1, Codename::Bulldozer),
        sig(0xf, 6, 2, Codename::Piledriver),
        sig(0xf, 6, 0, Codename::Steamroller),
    ],
};

/// Table for `vendor`, if it has one.
pub fn table_for(vendor: Vendor) -> Option<&'static SignatureTable> {
    match vendor {
        Vendor::Intel => Some(&INTEL),
        Vendor::Amd => Some(&AMD),
        Vendor::Unknown => None,
    }
}

/// Generations without their own kernels, mapped onto the closest one that has them.
pub static ALIASES: &[(Codename, Codename)] = &[
    (Codename::Penryn, Codename::Dunnington),
    (Codename::IvyBridge, Codename::SandyBridge),
    (Codename::Broadwell, Codename::Haswell),
    (Codename::Steamroller, Codename::Piledriver),
];

/// Template codename for `codename`. Templates map to themselves.
pub fn resolve_alias(codename: Codename) -> Codename {
    ALIASES
        .iter()
        .find(|(from, _)| *from == codename)
        .map(|(_, to)| *to)
        .unwrap_or(codename)
}

/// Codenames whose kernels use AVX.
pub static REQUIRES_WIDE_VECTOR: &[Codename] = &[
    Codename::SandyBridge,
    Codename::Haswell,
    Codename::Bulldozer,
    Codename::Piledriver,
];

/// Whether `codename` may only be reported when AVX is usable.
#[inline]
pub fn requires_wide_vector(codename: Codename) -> bool {
    REQUIRES_WIDE_VECTOR.contains(&codename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codename_round_trip_names() {
        for c in Codename::ALL.iter() {
            assert_eq!(c.as_str().parse::<Codename>().unwrap(), *c);
        }
        assert_eq!("SandyBridge".parse::<Codename>().unwrap(), Codename::SandyBridge);
        match "skylake".parse::<Codename>() {
            Err(Error::UnknownCodename(name)) => assert_eq!(name, "skylake"),
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn test_tables_have_no_duplicate_keys() {
        for table in [&INTEL, &AMD].iter() {
            for (i, a) in table.entries.iter().enumerate() {
                for b in &table.entries[i + 1..] {
                    assert!(
                        (a.family, a.model, a.extended) != (b.family, b.model, b.extended),
                        "{:?} and {:?} collide",
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn test_aliases_land_on_templates() {
        for (_, to) in ALIASES.iter() {
            assert_eq!(resolve_alias(*to), *to);
        }
        assert_eq!(resolve_alias(Codename::Broadwell), Codename::Haswell);
        assert_eq!(resolve_alias(Codename::Haswell), Codename::Haswell);
        assert_eq!(resolve_alias(GENERIC), GENERIC);
    }

    #[test]
    fn test_keys_differ_per_vendor() {
        // Same family/model numbers, different extended field.
        let id = CpuIdentity {
            vendor: Vendor::Amd,
            family: 0xf,
            model: 1,
            extended_family: 6,
            extended_model: 0,
            stepping: 0,
        };
        assert_eq!(AMD.lookup(&id), Some(Codename::Bulldozer));
        assert_eq!(INTEL.lookup(&id), None);

        let id = CpuIdentity {
            extended_family: 0,
            extended_model: 6,
            ..id
        };
        assert_eq!(AMD.lookup(&id), None);
    }

    #[test]
    fn test_table_for() {
        assert_eq!(table_for(Vendor::Intel).unwrap().vendor, Vendor::Intel);
        assert_eq!(table_for(Vendor::Amd).unwrap().key, ExtendedKey::Family);
        assert!(table_for(Vendor::Unknown).is_none());
    }
}
