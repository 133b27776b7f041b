use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// One authoritative simulation tick.
pub type NetworkFrame = i64;

/// Signed distance `a - b` between two frames, tolerant of wrap-around.
#[inline]
pub fn frame_delta(a: NetworkFrame, b: NetworkFrame) -> i64 {
    a.wrapping_sub(b)
}

/// A point on the network timeline: whole frame plus fraction in `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetworkTime {
    frame: NetworkFrame,
    fraction: f64,
}

impl NetworkTime {
    pub fn new(frame: NetworkFrame, fraction: f64) -> Self {
        let mut time = Self { frame, fraction };
        time.normalize();
        time
    }

    pub fn from_frame(frame: NetworkFrame) -> Self {
        Self {
            frame,
            fraction: 0.0,
        }
    }

    pub fn frame(&self) -> NetworkFrame {
        self.frame
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Frame the time rounds to.
    pub fn rounded_frame(&self) -> NetworkFrame {
        if self.fraction >= 0.5 {
            self.frame.wrapping_add(1)
        } else {
            self.frame
        }
    }

    /// Signed distance in frames from `other` to `self`.
    pub fn frames_since(&self, other: NetworkTime) -> f64 {
        frame_delta(self.frame, other.frame) as f64 + (self.fraction - other.fraction)
    }

    fn normalize(&mut self) {
        if !self.fraction.is_finite() {
            self.fraction = 0.0;
            return;
        }
        let whole = self.fraction.floor();
        self.frame = self.frame.wrapping_add(whole as i64);
        self.fraction -= whole;
        if self.fraction >= 1.0 {
            self.frame = self.frame.wrapping_add(1);
            self.fraction = 0.0;
        }
    }
}

impl AddAssign<f64> for NetworkTime {
    fn add_assign(&mut self, frames: f64) {
        self.fraction += frames;
        self.normalize();
    }
}

impl SubAssign<f64> for NetworkTime {
    fn sub_assign(&mut self, frames: f64) {
        self.fraction -= frames;
        self.normalize();
    }
}

impl Add<f64> for NetworkTime {
    type Output = NetworkTime;

    fn add(mut self, frames: f64) -> NetworkTime {
        self += frames;
        self
    }
}

impl Sub<f64> for NetworkTime {
    type Output = NetworkTime;

    fn sub(mut self, frames: f64) -> NetworkTime {
        self -= frames;
        self
    }
}

impl Sub<NetworkTime> for NetworkTime {
    type Output = f64;

    fn sub(self, other: NetworkTime) -> f64 {
        self.frames_since(other)
    }
}

impl fmt::Display for NetworkTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:.3}", self.frame, self.fraction)
    }
}
