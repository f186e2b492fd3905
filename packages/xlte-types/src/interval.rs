use serde::{Deserialize, Serialize};

/// Inclusive confidence bound, `lo <= hi`. Used for KPI results and for
/// `DRB.IPTime*` uncertainty accounting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lo: f64,
    pub hi: f64,
}

impl Interval {
    pub fn new(lo: f64, hi: f64) -> Self {
        debug_assert!(lo <= hi || (lo.is_nan() && hi.is_nan()), "Interval::new: lo > hi");
        Self { lo, hi }
    }

    pub fn point(v: f64) -> Self {
        Self { lo: v, hi: v }
    }

    /// Full uncertainty over `[0, 1]` — used when a KPI has no information.
    pub fn unit() -> Self {
        Self { lo: 0.0, hi: 1.0 }
    }

    pub fn mul(self, other: Self) -> Self {
        Self {
            lo: self.lo * other.lo,
            hi: self.hi * other.hi,
        }
    }

    pub fn scale(self, k: f64) -> Self {
        Self {
            lo: self.lo * k,
            hi: self.hi * k,
        }
    }
}
