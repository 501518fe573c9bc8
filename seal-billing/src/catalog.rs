//! The tier catalog.

use seal_common::{amount::UsdCents, ids::ServiceTier};

/// Monthly subscription price for a tier.
pub fn monthly_price(tier: ServiceTier) -> UsdCents {
    match tier {
        ServiceTier::Starter => UsdCents::from_cents_u32(900),
        ServiceTier::Pro => UsdCents::from_cents_u32(2900),
        ServiceTier::Enterprise => UsdCents::from_cents_u32(18_500),
    }
}

/// Whether moving `from -> to` is an upgrade (charges a prorated delta
/// immediately) as opposed to a downgrade (scheduled for the next period).
pub fn is_upgrade(from: ServiceTier, to: ServiceTier) -> bool {
    monthly_price(to) > monthly_price(from)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn catalog_prices() {
        assert_eq!(monthly_price(ServiceTier::Starter).cents(), 900);
        assert_eq!(monthly_price(ServiceTier::Pro).cents(), 2900);
        assert_eq!(monthly_price(ServiceTier::Enterprise).cents(), 18_500);
    }

    #[test]
    fn upgrade_direction() {
        assert!(is_upgrade(ServiceTier::Starter, ServiceTier::Pro));
        assert!(is_upgrade(ServiceTier::Pro, ServiceTier::Enterprise));
        assert!(!is_upgrade(ServiceTier::Pro, ServiceTier::Starter));
        assert!(!is_upgrade(ServiceTier::Pro, ServiceTier::Pro));
    }
}
