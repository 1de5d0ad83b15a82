//! Signal level → distance, log-distance path-loss model
//!
//! distance = 10 ^ ((reference_at_one_meter - level) / (10 * n))

/// Estimate distance in meters.
///
/// `environmental_factor` is the path-loss exponent `n`: 2.0 in free space,
/// typically 2.5-4.0 indoors.
pub fn estimate_distance(reference_at_one_meter: f64, environmental_factor: f64, level: f64) -> f64 {
    10f64.powf((reference_at_one_meter - level) / (10.0 * environmental_factor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_level_is_one_meter() {
        assert!((estimate_distance(-59.0, 2.0, -59.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_twenty_db_weaker_is_ten_meters_in_free_space() {
        assert!((estimate_distance(-59.0, 2.0, -79.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_environmental_factor_shortens_estimate() {
        let free = estimate_distance(-59.0, 2.0, -75.0);
        let indoor = estimate_distance(-59.0, 3.0, -75.0);
        assert!(indoor < free);
    }

    #[test]
    fn test_stronger_than_reference_is_closer() {
        assert!(estimate_distance(-59.0, 2.0, -50.0) < 1.0);
    }
}
