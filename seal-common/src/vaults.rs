//! Vault typing: the 3-character vault type codes, per-vault-type containers,
//! sequence numbers, and the derivation-index process groups.
//!
//! A vault type is `{service}{network}{purpose}`, e.g. `sma` is
//! seal-mainnet-api. Every per-vault-type column in the data model is
//! materialized for all variants via [`PerVault`], and the mapping from a
//! mutation's (service, network) to its vault stream is kept exhaustive
//! over both enums (see the tests below).

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::VariantArray;

use crate::ids::{Network, ServiceType};

/// A vault type code. One versioned vault stream exists per variant.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
    Deserialize, VariantArray,
)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub enum VaultType {
    /// seal-mainnet-api
    Sma,
    /// seal-testnet-api
    Sta,
}

impl VaultType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sma => "sma",
            Self::Sta => "sta",
        }
    }

    /// The vault type a gateway config mutation for `(service, network)`
    /// propagates through.
    pub fn for_mutation(service: ServiceType, network: Network) -> Self {
        match (service, network) {
            (ServiceType::Seal, Network::Mainnet) => Self::Sma,
            (ServiceType::Seal, Network::Testnet) => Self::Sta,
        }
    }

    /// The process group whose derivation indices back this vault type.
    pub fn process_group(self) -> ProcessGroup {
        match self {
            Self::Sma => ProcessGroup::Pg1,
            Self::Sta => ProcessGroup::Pg2,
        }
    }
}

impl fmt::Display for VaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VaultType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sma" => Ok(Self::Sma),
            "sta" => Ok(Self::Sta),
            _ => Err(anyhow::anyhow!("Unknown vault type: '{s}'")),
        }
    }
}

/// A strictly monotonic vault sequence number.
///
/// Used both for vault file versions and for API-recorded pending-change
/// tracking. A reader encountering a file with `seq <= active` ignores it.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd,
    Serialize, Deserialize,
)]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub struct VaultSeq(pub u64);

impl VaultSeq {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// `self + n`. Seqs are far from u64::MAX; overflow is a bug.
    #[inline]
    pub const fn plus(self, n: u64) -> Self {
        Self(self.0 + n)
    }
}

impl fmt::Display for VaultSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for VaultSeq {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str(s).map(Self)
    }
}

/// Cryptographic isolation namespace for derivation indices. Two master
/// seeds today. The same integer index may appear in both namespaces; the
/// derived keys live in disjoint key spaces.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
    Deserialize, VariantArray,
)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub enum ProcessGroup {
    Pg1,
    Pg2,
}

impl ProcessGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pg1 => "pg1",
            Self::Pg2 => "pg2",
        }
    }
}

impl fmt::Display for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value of type `T` for every [`ProcessGroup`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PerPg<T> {
    pub pg1: T,
    pub pg2: T,
}

impl<T> PerPg<T> {
    pub fn get(&self, pg: ProcessGroup) -> &T {
        match pg {
            ProcessGroup::Pg1 => &self.pg1,
            ProcessGroup::Pg2 => &self.pg2,
        }
    }

    pub fn get_mut(&mut self, pg: ProcessGroup) -> &mut T {
        match pg {
            ProcessGroup::Pg1 => &mut self.pg1,
            ProcessGroup::Pg2 => &mut self.pg2,
        }
    }
}

/// A value of type `T` for every [`VaultType`], materialized uniformly.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PerVault<T> {
    pub sma: T,
    pub sta: T,
}

impl<T> PerVault<T> {
    pub fn get(&self, vault_type: VaultType) -> &T {
        match vault_type {
            VaultType::Sma => &self.sma,
            VaultType::Sta => &self.sta,
        }
    }

    pub fn get_mut(&mut self, vault_type: VaultType) -> &mut T {
        match vault_type {
            VaultType::Sma => &mut self.sma,
            VaultType::Sta => &mut self.sta,
        }
    }

    /// Iterate over all (vault type, value) pairs in variant order.
    pub fn iter(&self) -> impl Iterator<Item = (VaultType, &T)> {
        VaultType::VARIANTS.iter().map(move |vt| (*vt, self.get(*vt)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vault_type_str_roundtrip() {
        for vt in VaultType::VARIANTS {
            assert_eq!(VaultType::from_str(vt.as_str()).unwrap(), *vt);
        }
        assert!(VaultType::from_str("smx").is_err());
    }

    #[test]
    fn per_vault_covers_all_variants() {
        let mut pv = PerVault::<u64>::default();
        *pv.get_mut(VaultType::Sma) = 7;
        assert_eq!(pv.iter().count(), VaultType::VARIANTS.len());
        assert_eq!(*pv.get(VaultType::Sma), 7);
        assert_eq!(*pv.get(VaultType::Sta), 0);
    }

    #[test]
    fn mutation_vault_mapping() {
        assert_eq!(
            VaultType::for_mutation(ServiceType::Seal, Network::Mainnet),
            VaultType::Sma,
        );
        assert_eq!(
            VaultType::for_mutation(ServiceType::Seal, Network::Testnet),
            VaultType::Sta,
        );
    }

    /// Every (service, network) combination must land on its own vault
    /// stream, in the process group of its network. Adding a variant to
    /// either enum without extending the mapping fails here (after the
    /// `for_mutation` match stops compiling).
    #[test]
    fn mutation_mapping_is_exhaustive_and_injective() {
        let mut seen = std::collections::BTreeSet::new();
        for service in ServiceType::VARIANTS {
            for network in Network::VARIANTS {
                let vault_type = VaultType::for_mutation(*service, *network);
                assert!(
                    seen.insert(vault_type),
                    "({service}, {network}) shares a vault stream",
                );
                let expected_pg = match network {
                    Network::Mainnet => ProcessGroup::Pg1,
                    Network::Testnet => ProcessGroup::Pg2,
                };
                assert_eq!(vault_type.process_group(), expected_pg);
            }
        }
        assert_eq!(
            seen.len(),
            ServiceType::VARIANTS.len() * Network::VARIANTS.len(),
        );
    }
}
