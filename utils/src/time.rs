//! Time formatting helpers.

/// Format a duration in milliseconds to a human-readable string.
pub fn format_duration(millis: u64) -> String {
    let secs = millis / 1000;
    if millis < 1000 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{}.{}s", secs, (millis % 1000) / 100)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_each_range() {
        assert_eq!(format_duration(1_400), "1.4s");
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(30_000), "30.0s");
        assert_eq!(format_duration(3_600_000), "1h 0m");
        assert_eq!(format_duration(90_061_000), "1d 1h");
        assert_eq!(format_duration(125_000), "2m 5s");
    }
}
