//! Time helpers
//!
//! Durations cross the public API as `f32` seconds; anything `<= 0`, NaN
//! or infinite means "no wait". Values past `Duration::MAX` saturate.

use std::time::Duration;

/// Convert seconds to a positive duration, `None` for "instant"
#[inline]
pub fn positive_duration(secs: f32) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::try_from_secs_f32(secs).unwrap_or(Duration::MAX))
    } else {
        None
    }
}

/// Clamp a configured duration to `>= 0` (NaN becomes 0)
#[inline]
pub fn non_negative_secs(secs: f32) -> f32 {
    if secs.is_nan() { 0.0 } else { secs.max(0.0) }
}

/// Clamp a caller-visible volume to `[0, 1]` (NaN becomes 0)
#[inline]
pub fn unit_volume(volume: f32) -> f32 {
    if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_duration() {
        assert_eq!(positive_duration(0.0), None);
        assert_eq!(positive_duration(-1.0), None);
        assert_eq!(positive_duration(f32::NAN), None);
        assert_eq!(positive_duration(f32::INFINITY), None);
        assert_eq!(positive_duration(0.5), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_huge_duration_saturates() {
        assert_eq!(positive_duration(1e30), Some(Duration::MAX));
        assert_eq!(positive_duration(f32::MAX), Some(Duration::MAX));
    }

    #[test]
    fn test_clamps() {
        assert_eq!(non_negative_secs(-3.0), 0.0);
        assert_eq!(non_negative_secs(f32::NAN), 0.0);
        assert_eq!(non_negative_secs(2.5), 2.5);
        assert_eq!(unit_volume(1.7), 1.0);
        assert_eq!(unit_volume(-0.2), 0.0);
        assert_eq!(unit_volume(0.4), 0.4);
    }
}
