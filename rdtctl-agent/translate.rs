//! Bandwidth percent <-> native register value
//!
//! Callers speak in "percent of bandwidth available" (1..=100, 100 meaning
//! unthrottled). Hardware speaks in throttle: Intel stores the throttle
//! percent directly, AMD stores it scaled to `0..=mba_max`. Both vendors go
//! through the throttle `t = 100 - p`, which is rounded to the profile's
//! granularity and clamped to its throttle maximum before encoding.
//!
//! Rounding picks the nearest legal step. A tie goes to the smaller
//! throttle, i.e. the less restrictive setting.

use rdtctl_raw::rdt::mba::MbaEncoding;
use rdtctl_raw::RegisterError;

use crate::error::{RdtError, Result};
use crate::vendor::VendorProfile;

/// Round `value` to the nearest multiple of `granularity`, ties downward
pub fn round_to_granularity(value: u32, granularity: u32) -> u32 {
    let step = granularity.max(1);
    let down = value / step * step;
    if (value - down) * 2 > step {
        down + step
    } else {
        down
    }
}

/// `n / d` rounded to nearest, ties downward
fn div_round_half_down(n: u64, d: u64) -> u64 {
    let q = n / d;
    if (n % d) * 2 > d {
        q + 1
    } else {
        q
    }
}

fn check_percent(percent: u32) -> Result<()> {
    if !(1..=100).contains(&percent) {
        return Err(RdtError::InvalidPercentage(percent));
    }
    Ok(())
}

fn throttle(profile: &VendorProfile, percent: u32) -> u32 {
    let step = profile.mba_granularity.max(1);
    // Largest legal step not above the throttle maximum
    let max = profile.mba_throttle_max / step * step;
    round_to_granularity(100 - percent, step).min(max)
}

pub fn to_native(profile: &VendorProfile, percent: u32) -> Result<u64> {
    check_percent(percent)?;
    let t = throttle(profile, percent) as u64;

    let native = match profile.encoding() {
        MbaEncoding::Linear => t.min(profile.mba_max),
        MbaEncoding::Delay => div_round_half_down(t * profile.mba_max, 100),
    };
    Ok(native)
}

/// Inverse of [`to_native`]; may return 0 for a register throttled fully
pub fn from_native(profile: &VendorProfile, native: u64) -> Result<u32> {
    if native > profile.mba_max {
        return Err(RegisterError::out_of_range(
            profile.mba_register().field.name,
            native,
            profile.mba_max,
        )
        .into());
    }

    let t = match profile.encoding() {
        MbaEncoding::Linear => native,
        MbaEncoding::Delay => div_round_half_down(native * 100, profile.mba_max),
    };
    Ok(100 - t as u32)
}
