//! Stable exit codes for `pilot` commands.

use crate::core::types::Disposition;

/// Command succeeded (including an operator-rejected plan).
pub const OK: i32 = 0;
/// Invalid spec, config or state, or any other error.
pub const INVALID: i32 = 1;
/// Run stopped in `NeedsInput`; `pilot resume` continues it.
pub const BLOCKED: i32 = 3;
/// Operator aborted the run.
pub const ABORTED: i32 = 4;

pub fn for_disposition(disposition: Disposition) -> i32 {
    match disposition {
        Disposition::Finished | Disposition::Rejected => OK,
        Disposition::Blocked => BLOCKED,
        Disposition::Aborted => ABORTED,
    }
}
