//! Integer id newtypes for the control-plane data model, plus the small
//! closed enums (tier, service type, network) that key it.
//!
//! All entities are stored arena-and-index style: flat tables keyed by these
//! ids, never a graph of shared owners.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::VariantArray;

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd,
            Serialize, Deserialize,
        )]
        #[cfg_attr(
            any(test, feature = "test-utils"),
            derive(proptest_derive::Arbitrary)
        )]
        pub struct $name(pub i64);

        impl $name {
            #[inline]
            pub const fn to_i64(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                i64::from_str(s).map(Self)
            }
        }
    };
}

integer_id!(
    /// Identifies a [Customer]. Assigned on first authenticated contact and
    /// never reused (customers are soft-deleted only).
    CustomerId
);
integer_id!(
    /// Identifies a [ServiceInstance]; stable across unpaid-cancellation
    /// deletes and later re-subscription.
    ServiceId
);
integer_id!(InvoiceId);
integer_id!(LineItemId);
integer_id!(CreditId);
integer_id!(
    /// Identifies an invoice payment attribution row.
    PaymentRowId
);
integer_id!(EscrowTxId);
integer_id!(SealKeyId);

/// Identifies a Local Manager instance, e.g. `"lm-eu-1"`. Comes from config.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[derive(Serialize, Deserialize)]
pub struct LmId(pub String);

impl fmt::Display for LmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a queued GM task.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
    Deserialize,
)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Subscription tier of a [ServiceInstance].
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
    Deserialize, VariantArray,
)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub enum ServiceTier {
    Starter,
    Pro,
    Enterprise,
}

impl ServiceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for ServiceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceTier {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(anyhow::anyhow!("Unsupported tier: '{s}'")),
        }
    }
}

/// The service a [ServiceInstance] subscribes to. Only the Seal gateway
/// exists today.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
    Deserialize, VariantArray,
)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub enum ServiceType {
    Seal,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seal => "seal",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment provider. Providers are tried in the customer's priority order;
/// credits are not a provider and are always applied first.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
    Deserialize, VariantArray,
)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub enum ProviderKind {
    Escrow,
    Stripe,
    Paypal,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Escrow => "escrow",
            Self::Stripe => "stripe",
            Self::Paypal => "paypal",
        }
    }

    /// The default provider chain order for new customers.
    pub const DEFAULT_PRIORITY: [Self; 3] =
        [Self::Escrow, Self::Stripe, Self::Paypal];
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which chain network a gateway mutation targets. Determines the vault type
/// the change propagates through and the process group keys derive in.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
    Deserialize, VariantArray,
)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
