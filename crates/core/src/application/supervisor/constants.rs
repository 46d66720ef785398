// Supervision constants (ADR: No magic values)
use std::time::Duration;

/// How long `stop` waits for a supervision loop to notice the shutdown signal
pub const SUPERVISION_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Relaunches allowed when office exits asking for a restart during start
/// (first run against a fresh user profile)
pub const MAX_RESTART_REQUIRED_RELAUNCHES: u32 = 1;
