/// Render a duration in whole seconds as `H:MM:SS`, or `M:SS` under an hour.
///
/// Negative inputs clamp to zero; this feeds display strings only.
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::format_duration;

    #[test]
    fn under_an_hour() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(61), "1:01");
        assert_eq!(format_duration(3599), "59:59");
    }

    #[test]
    fn over_an_hour() {
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(3661), "1:01:01");
        assert_eq!(format_duration(86400 + 61), "24:01:01");
    }

    #[test]
    fn negative_clamps() {
        assert_eq!(format_duration(-5), "0:00");
    }
}
