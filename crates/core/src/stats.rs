//! Derived-value arithmetic shared by progress, sessions and dashboards.

/// Integer percentage of `part` over `whole`, capped at 100.
///
/// An empty `whole` yields 0 rather than dividing by zero.
#[must_use]
pub fn capped_percent(part: u64, whole: u64) -> u8 {
    if whole == 0 {
        return 0;
    }
    let pct = part.saturating_mul(100) / whole;
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Arithmetic mean, `None` for an empty input.
#[must_use]
pub fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let len = values.len() as f64;
    Some(values.iter().sum::<f64>() / len)
}

/// Mean of percentages, rounded down; 0 for an empty input.
#[must_use]
pub fn average_percent(values: &[u8]) -> u8 {
    if values.is_empty() {
        return 0;
    }
    let sum: u64 = values.iter().map(|v| u64::from(*v)).sum();
    let len = u64::try_from(values.len()).unwrap_or(u64::MAX);
    u8::try_from((sum / len).min(100)).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_capped_at_100() {
        assert_eq!(capped_percent(3, 4), 75);
        assert_eq!(capped_percent(9, 4), 100);
        assert_eq!(capped_percent(1, 3), 33);
    }

    #[test]
    fn percent_of_empty_whole_is_zero() {
        assert_eq!(capped_percent(5, 0), 0);
    }

    #[test]
    fn averages() {
        assert_eq!(average(&[]), None);
        assert_eq!(average(&[1.0, 2.0, 6.0]), Some(3.0));
        assert_eq!(average_percent(&[]), 0);
        assert_eq!(average_percent(&[50, 75, 100]), 75);
        assert_eq!(average_percent(&[33, 34]), 33);
    }
}
