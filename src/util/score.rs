//! Score normalisation shared by the index and the stores.
//!
//! Scores are rounded to [`SCORE_DECIMAL_PLACES`] before any interval lookup
//! and compared as fixed-point integers, so a score inserted today maps to
//! the same interval when it is removed later.

use std::cmp::Ordering;

/// Number of decimal places kept for every score.
pub const SCORE_DECIMAL_PLACES: u32 = 4;

/// Fixed-point scale matching [`SCORE_DECIMAL_PLACES`].
pub const SCORE_SCALE: i64 = 10_000;

/// Largest fixed-point magnitude; stays inside i64 and exact in f64.
pub const MAX_FIXED_MAGNITUDE: i64 = 9_000_000_000_000_000;

/// Largest score whose fixed-point form is representable.
pub const MAX_SCORE: i64 = MAX_FIXED_MAGNITUDE / SCORE_SCALE;

/// Round a score to the fixed decimal precision (half away from zero).
pub fn round_score(score: f64) -> f64 {
    (score * SCORE_SCALE as f64).round() / SCORE_SCALE as f64
}

/// Convert a score to fixed-point ten-thousandths.
///
/// Returns `None` for NaN, infinities, and magnitudes the fixed-point form
/// cannot represent exactly.
pub fn to_fixed(score: f64) -> Option<i64> {
    if !score.is_finite() {
        return None;
    }
    let scaled = (score * SCORE_SCALE as f64).round();
    if scaled.abs() > MAX_FIXED_MAGNITUDE as f64 {
        return None;
    }
    Some(scaled as i64)
}

/// Format an integer bound with the fixed decimal precision, e.g. `100.0000`.
pub fn format_bound(bound: i64) -> String {
    format!("{bound}.{:0width$}", 0, width = SCORE_DECIMAL_PLACES as usize)
}

/// A score with a total order, usable as an ordered map key.
#[derive(Debug, Clone, Copy)]
pub struct OrderedScore(pub f64);

impl PartialEq for OrderedScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedScore {}

impl PartialOrd for OrderedScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(150.0), 150.0);
        assert_eq!(round_score(12.34567), 12.3457);
        assert_eq!(round_score(12.34561), 12.3456);
        assert_eq!(round_score(-0.00004), -0.0);
    }

    #[test]
    fn test_fixed_point_conversion() {
        assert_eq!(to_fixed(150.0), Some(1_500_000));
        assert_eq!(to_fixed(0.0001), Some(1));
        assert_eq!(to_fixed(100.00004), Some(1_000_000));
        assert_eq!(to_fixed(f64::NAN), None);
        assert_eq!(to_fixed(f64::INFINITY), None);
        assert_eq!(to_fixed(1.0e300), None);
        assert_eq!(to_fixed(MAX_SCORE as f64), Some(MAX_FIXED_MAGNITUDE));
        assert_eq!(to_fixed(MAX_SCORE as f64 + 1.0), None);
    }

    #[test]
    fn test_format_bound() {
        assert_eq!(format_bound(0), "0.0000");
        assert_eq!(format_bound(1000), "1000.0000");
    }

    #[test]
    fn test_ordered_score_total_order() {
        let mut scores = vec![OrderedScore(3.5), OrderedScore(-1.0), OrderedScore(10.0)];
        scores.sort();
        let raw: Vec<f64> = scores.iter().map(|s| s.0).collect();
        assert_eq!(raw, vec![-1.0, 3.5, 10.0]);
        assert_eq!(OrderedScore(2.0), OrderedScore(2.0));
    }
}
