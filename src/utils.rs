//! Small formatting helpers

/// Unit lengths in seconds, largest first. Months are 28 days, years 12 months.
const UNITS: [(u64, &str, &str); 7] = [
    (29_030_400, "year", "years"),
    (2_419_200, "month", "months"),
    (604_800, "week", "weeks"),
    (86_400, "day", "days"),
    (3_600, "hour", "hours"),
    (60, "minute", "minutes"),
    (1, "second", "seconds"),
];

/// Render a second count as `"1 hour, 2 minutes & 3 seconds"`
pub fn human_time(seconds: u64) -> String {
    let mut remaining = seconds;
    let mut parts = Vec::new();

    for (length, singular, plural) in UNITS {
        let count = remaining / length;
        if count > 0 {
            let name = if count == 1 { singular } else { plural };
            parts.push(format!("{} {}", count, name));
            remaining -= count * length;
        }
    }

    match parts.split_last() {
        None => "0 seconds".to_string(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} & {}", rest.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_time() {
        assert_eq!(human_time(0), "0 seconds");
        assert_eq!(human_time(1), "1 second");
        assert_eq!(human_time(90), "1 minute & 30 seconds");
        assert_eq!(human_time(3_600), "1 hour");
        assert_eq!(
            human_time(3 * 86_400 + 4 * 3_600 + 5 * 60 + 6),
            "3 days, 4 hours, 5 minutes & 6 seconds"
        );
        assert_eq!(human_time(604_800 + 2), "1 week & 2 seconds");
    }
}
