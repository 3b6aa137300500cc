//! Frame, rate, and time-window value types.

use crate::foundation::error::{WeftError, WeftResult};

/// Absolute 0-based frame index.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> WeftResult<Self> {
        if num == 0 || den == 0 {
            return Err(WeftError::validation("Fps num and den must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }

    /// Timestamp in seconds of frame `f`.
    pub fn frame_to_secs(self, f: FrameIndex) -> f64 {
        (f.0 as f64) * self.frame_duration_secs()
    }
}

/// Half-open time window `[start_s, start_s + duration_s)` in seconds.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeRange {
    /// Window start in seconds.
    pub start_s: f64,
    /// Window duration in seconds, non-negative.
    pub duration_s: f64,
}

impl TimeRange {
    /// Create a validated window (`duration_s >= 0`, both finite).
    pub fn new(start_s: f64, duration_s: f64) -> WeftResult<Self> {
        if !start_s.is_finite() || !duration_s.is_finite() {
            return Err(WeftError::validation("TimeRange bounds must be finite"));
        }
        if duration_s < 0.0 {
            return Err(WeftError::validation("TimeRange duration must be >= 0"));
        }
        Ok(Self {
            start_s,
            duration_s,
        })
    }

    /// Exclusive end of the window in seconds.
    pub fn end_s(self) -> f64 {
        self.start_s + self.duration_s
    }

    /// Return `true` when `t` is inside `[start, end)`.
    pub fn contains(self, t: f64) -> bool {
        self.start_s <= t && t < self.end_s()
    }

    /// Return `true` when the two windows share any time span.
    pub fn overlaps(self, other: TimeRange) -> bool {
        self.start_s < other.end_s() && other.start_s < self.end_s()
    }

    /// Intersection of two windows, `None` when disjoint.
    pub fn intersection(self, other: TimeRange) -> Option<TimeRange> {
        let start = self.start_s.max(other.start_s);
        let end = self.end_s().min(other.end_s());
        if start < end {
            Some(TimeRange {
                start_s: start,
                duration_s: end - start,
            })
        } else {
            None
        }
    }

    /// Midpoint of the window in seconds.
    pub fn midpoint_s(self) -> f64 {
        self.start_s + self.duration_s * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_rejects_zero() {
        assert!(Fps::new(0, 1).is_err());
        assert!(Fps::new(30, 0).is_err());
        assert_eq!(Fps::new(24, 1).unwrap().frame_duration_secs(), 1.0 / 24.0);
    }

    #[test]
    fn range_is_half_open() {
        let r = TimeRange::new(1.0, 2.0).unwrap();
        assert!(r.contains(1.0));
        assert!(r.contains(2.999));
        assert!(!r.contains(3.0));
    }

    #[test]
    fn range_overlap_and_intersection() {
        let a = TimeRange::new(0.0, 2.0).unwrap();
        let b = TimeRange::new(1.5, 2.0).unwrap();
        let c = TimeRange::new(2.0, 1.0).unwrap();
        assert!(a.overlaps(b));
        assert!(!a.overlaps(c));
        let i = a.intersection(b).unwrap();
        assert_eq!(i.start_s, 1.5);
        assert_eq!(i.duration_s, 0.5);
    }

    #[test]
    fn range_rejects_negative_duration() {
        assert!(TimeRange::new(0.0, -1.0).is_err());
        assert!(TimeRange::new(f64::NAN, 1.0).is_err());
    }
}
