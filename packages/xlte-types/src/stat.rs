use serde::{Deserialize, Serialize};

use crate::na::Na;

/// Arbitrary-sampling statistic: (min, avg, max, n). Grounded on `kpi.py`'s
/// `Stat` NumPy dtype.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Stat<T> {
    pub avg: f64,
    pub min: T,
    pub max: T,
    pub n: i64,
}

impl<T: Na> Na for Stat<T> {
    fn na() -> Self {
        Stat {
            avg: f64::NAN,
            min: T::na(),
            max: T::na(),
            n: i64::MIN,
        }
    }
    fn is_na(&self) -> bool {
        self.avg.is_nan()
    }
}

/// Time-sampled statistic: (min, avg, max). No `n` — the containing
/// record's `X.δT` gives the collection period. Grounded on `kpi.py`'s
/// `StatT` dtype.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatT<T> {
    pub avg: f64,
    pub min: T,
    pub max: T,
}

impl<T: Na> Na for StatT<T> {
    fn na() -> Self {
        StatT {
            avg: f64::NAN,
            min: T::na(),
            max: T::na(),
        }
    }
    fn is_na(&self) -> bool {
        self.avg.is_nan()
    }
}

/// A fixed 256-entry array indexed by QCI (or cause code), each entry
/// carrying its own NA sentinel. Exposes `.sum()` per spec.md §3's
/// `X.sum` alias: NA if any contributing entry is NA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QciArray<T>(pub Vec<T>);

pub const QCI_ARRAY_LEN: usize = 256;

impl<T: Na> Default for QciArray<T> {
    fn default() -> Self {
        QciArray((0..QCI_ARRAY_LEN).map(|_| T::na()).collect())
    }
}

impl<T> std::ops::Index<u8> for QciArray<T> {
    type Output = T;
    fn index(&self, i: u8) -> &T {
        &self.0[i as usize]
    }
}

impl<T> std::ops::IndexMut<u8> for QciArray<T> {
    fn index_mut(&mut self, i: u8) -> &mut T {
        &mut self.0[i as usize]
    }
}

impl QciArray<f64> {
    pub fn sum(&self) -> f64 {
        if self.0.iter().any(Na::is_na) {
            f64::NAN
        } else {
            self.0.iter().sum()
        }
    }
}

impl QciArray<i64> {
    pub fn sum(&self) -> i64 {
        if self.0.iter().any(Na::is_na) {
            i64::MIN
        } else {
            self.0.iter().sum()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_array_is_all_na() {
        let a: QciArray<f64> = QciArray::default();
        assert!(a.0.iter().all(Na::is_na));
        assert!(a.sum().is_na());
    }

    #[test]
    fn sum_propagates_na() {
        let mut a: QciArray<i64> = QciArray::default();
        a[5] = 10;
        assert!(a.sum().is_na());
        a[6] = 20;
        for i in 0..QCI_ARRAY_LEN as u8 {
            if i != 5 && i != 6 {
                a[i] = 0;
            }
        }
        assert_eq!(a.sum(), 30);
    }
}
