use std::collections::{HashMap, VecDeque};

/// Splits a UE's total per-tick `tx_bytes` across the cells it transmitted
/// on, proportional to each cell's two-frame bitrate weight. Grounded
/// exactly on `amari/drb.py`'s `_CTXBytesSplitter`.
#[derive(Debug, Default)]
pub struct CtxBytesSplitter {
    txq: VecDeque<(f64, f64, HashMap<u32, f64>)>,
}

impl CtxBytesSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, dt: f64, tx_bytes: f64, cell_bitrate: HashMap<u32, f64>) -> Vec<(f64, HashMap<u32, f64>)> {
        assert!(self.txq.len() < 2);
        self.txq.push_back((dt, tx_bytes, cell_bitrate));

        let mut vtx = Vec::new();
        while self.txq.len() >= 2 {
            let (dt1, tx_bytes1, bitrate1) = self.txq.pop_front().unwrap();
            let bitrate2 = &self.txq[0].2;

            let sigma_b12: f64 = bitrate1
                .iter()
                .map(|(cid, &b1)| b1 + bitrate2.get(cid).copied().unwrap_or(0.0))
                .sum();

            let mut split = HashMap::new();
            for (&cid, &b1) in bitrate1.iter() {
                let b12 = b1 + bitrate2.get(&cid).copied().unwrap_or(0.0);
                let bytes = if sigma_b12 != 0.0 {
                    tx_bytes1 * b12 / sigma_b12
                } else {
                    // should not happen, but divide equally just in case
                    tx_bytes1 / bitrate1.len() as f64
                };
                split.insert(cid, bytes);
            }
            vtx.push((dt1, split));
        }
        vtx
    }

    pub fn finish(&mut self) -> Vec<(f64, HashMap<u32, f64>)> {
        assert!(self.txq.len() < 2);
        if self.txq.is_empty() {
            return Vec::new();
        }
        let dt = self.txq[0].0;
        let vtx = self.next(dt, 0.0, HashMap::new());
        assert_eq!(vtx.len(), 1);
        vtx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_cell_passthrough() {
        let mut s = CtxBytesSplitter::new();
        let mut b = HashMap::new();
        b.insert(1u32, 1000.0);
        let out = s.next(1.0, 5000.0, b);
        assert!(out.is_empty());
        let mut b2 = HashMap::new();
        b2.insert(1u32, 1000.0);
        let out = s.next(1.0, 5000.0, b2);
        assert_eq!(out.len(), 1);
        let (_, split) = &out[0];
        assert!((split[&1] - 5000.0).abs() < 1e-9);
    }

    #[test]
    fn splits_proportional_to_bitrate() {
        let mut s = CtxBytesSplitter::new();
        let mut b1 = HashMap::new();
        b1.insert(1u32, 1000.0);
        b1.insert(2u32, 3000.0);
        let out = s.next(1.0, 4000.0, b1);
        assert!(out.is_empty());
        let out = s.finish();
        assert_eq!(out.len(), 1);
        let (_, split) = &out[0];
        assert!((split[&1] - 1000.0).abs() < 1e-6);
        assert!((split[&2] - 3000.0).abs() < 1e-6);
    }

    #[test]
    fn zero_bitrate_falls_back_to_equal_split() {
        let mut s = CtxBytesSplitter::new();
        let mut b1 = HashMap::new();
        b1.insert(1u32, 0.0);
        b1.insert(2u32, 0.0);
        s.next(1.0, 100.0, b1);
        let out = s.finish();
        let (_, split) = &out[0];
        assert!((split[&1] - 50.0).abs() < 1e-9);
        assert!((split[&2] - 50.0).abs() < 1e-9);
    }
}
