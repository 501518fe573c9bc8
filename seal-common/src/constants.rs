//! Workspace-wide constants.

use std::time::Duration;

/// Default port the Global Manager binds its internal API to.
pub const DEFAULT_GM_PORT: u16 = 4070;
/// Default port a Local Manager binds its health API to.
pub const DEFAULT_LM_PORT: u16 = 4071;

/// An LMStatus row is live if its `last_seen_at` is within this window and
/// its last poll produced no error.
pub const LM_FRESHNESS_WINDOW: Duration = Duration::from_secs(30);
/// Per-endpoint timeout when the GM polls LM health.
pub const LM_POLL_TIMEOUT: Duration = Duration::from_secs(5);
/// How often the GM polls LMs and re-checks for pending vault changes.
pub const GM_PERIODIC_INTERVAL: Duration = Duration::from_secs(10);
/// How often an LM re-scans its receive directory.
pub const LM_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Days a paid service lingers in `cancellation_pending` before its row is
/// reset to `not_provisioned`.
pub const CANCELLATION_GRACE_DAYS: u32 = 7;
/// Days after an unpaid-cancellation delete before the same (customer,
/// service type) may re-subscribe.
pub const RESUBSCRIBE_COOLDOWN_DAYS: u32 = 7;
/// Length of the escrow rolling spending-limit period.
pub const SPENDING_PERIOD_DAYS: u32 = 28;

/// Stripe secret keys with this prefix select sandbox mode.
pub const STRIPE_SANDBOX_KEY_PREFIX: &str = "sk_test_";
/// Timeout for Stripe sandbox API calls.
pub const STRIPE_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for mock provider calls (artificial latency is injected below it).
pub const MOCK_PROVIDER_TIMEOUT: Duration = Duration::from_secs(2);
