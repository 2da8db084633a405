//! Shared constants for the orchestration tests

use std::time::Duration;

/// One scheduling unit. Intervals in the tests are multiples of this.
pub const UNIT: Duration = Duration::from_secs(60);

/// Grace period used by shutdown tests.
pub const TEST_GRACE: Duration = Duration::from_secs(5);

/// Number of handles a `Resources` owns.
pub const HANDLE_COUNT: usize = 2;

pub fn units(n: u32) -> Duration {
    UNIT * n
}
