use quiz_core::model::percentage;

/// Aggregated view of session progress, useful for UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProgress {
    pub total: usize,
    pub answered: usize,
    pub remaining: usize,
    pub current_index: usize,
    /// Share of questions answered, 0..=100.
    pub percent: u32,
    pub is_complete: bool,
}

impl SessionProgress {
    pub(crate) fn new(total: usize, answered: usize, current_index: usize, is_complete: bool) -> Self {
        Self {
            total,
            answered,
            remaining: total.saturating_sub(answered),
            current_index,
            percent: percentage(answered as u64, total as u64),
            is_complete,
        }
    }
}

/// Formats seconds as `mm:ss`; minutes keep counting past an hour.
#[must_use]
pub fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(65), "01:05");
        assert_eq!(format_elapsed(3_725), "62:05");
    }

    #[test]
    fn progress_percent_rounds() {
        let p = SessionProgress::new(3, 1, 1, false);
        assert_eq!(p.percent, 33);
        assert_eq!(p.remaining, 2);
    }
}
