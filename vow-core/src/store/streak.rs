use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};

/// How far back a streak walk looks before giving up.
pub const STREAK_LOOKBACK_DAYS: u32 = 365;

/// Consecutive active days ending at `today`, stopping at the first gap.
///
/// A `today` with no activity yields 0.
pub fn streak(active_days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut count = 0;
    for offset in 0..STREAK_LOOKBACK_DAYS {
        let Some(day) = today.checked_sub_days(Days::new(u64::from(offset))) else {
            break;
        };
        if !active_days.contains(&day) {
            break;
        }
        count += 1;
    }
    count
}
