/// Format a number of seconds the way password expiration warnings are shown:
/// `45 seconds`, `2 minutes, 5 seconds`, `1 hours, 0 minutes, 0 seconds`,
/// `3 days, 4 hours, 0 minutes, 12 seconds`.
///
/// Zero components are kept once a larger unit is present, so that the output
/// always reads as a countdown.
pub fn seconds_to_time_string(total: u64) -> String {
    let (days, rest) = (total / 86_400, total % 86_400);
    let (hours, rest) = (rest / 3_600, rest % 3_600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if total < 60 {
        format!("{} seconds", seconds)
    } else if total < 3_600 {
        format!("{} minutes, {} seconds", minutes, seconds)
    } else if total < 86_400 {
        format!("{} hours, {} minutes, {} seconds", hours, minutes, seconds)
    } else {
        format!(
            "{} days, {} hours, {} minutes, {} seconds",
            days, hours, minutes, seconds
        )
    }
}
