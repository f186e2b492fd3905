use std::collections::{HashMap, VecDeque};

/// Which HARQ timing model a `BitSync1` instance is aligning for.
///
/// Only `Fdd`'s one-frame shift is implemented — see SPEC_FULL.md §9 open
/// question #1. `Tdd` is accepted so callers can express intent, but
/// construction fails rather than silently mishandling multi-tti shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqMode {
    Fdd,
    Tdd,
}

#[derive(Debug)]
pub struct Unimplemented;

/// Per-cell byte/transport-block counter realigner. Grounded exactly on
/// `amari/drb.py`'s `_BitSync1` (one-frame-shift algorithm).
#[derive(Debug, Default, Clone)]
pub struct BitSync1 {
    txq: VecDeque<(f64, f64)>,
    i_txq: u64,
    i_lshift: u64,
}

impl BitSync1 {
    pub fn new(mode: HarqMode) -> Result<Self, Unimplemented> {
        match mode {
            HarqMode::Fdd => Ok(Self::default()),
            HarqMode::Tdd => Err(Unimplemented),
        }
    }

    fn lshift(&mut self, rel: usize) {
        let (b1, mut t1) = self.txq[rel];
        let (b2, mut t2) = self.txq[rel + 1];
        let t22 = if b1 != 0.0 { b2 * t1 / b1 } else { t2 };
        let t21 = t2 - t22;
        if t21 > 0.0 {
            t1 += t21;
            t2 -= t21;
        }
        self.txq[rel] = (b1, t1);
        self.txq[rel + 1] = (b2, t2);
    }

    fn rebalance(&mut self, l: usize) {
        let sigma_b: f64 = self.txq.iter().take(l).map(|(b, _)| *b).sum();
        let sigma_t: f64 = self.txq.iter().take(l).map(|(_, t)| *t).sum();
        if sigma_b != 0.0 {
            for i in 0..l {
                let (b, _) = self.txq[i];
                self.txq[i] = (b, b * sigma_t / sigma_b);
            }
        }
    }

    /// Feed one more `(tx_bytes, tx)` frame; returns any frames now ready
    /// to emit in adjusted form.
    pub fn next(&mut self, tx_bytes: f64, tx: f64) -> Vec<(f64, f64)> {
        self.txq.push_back((tx_bytes, tx));

        while self.i_lshift + 1 < self.i_txq + self.txq.len() as u64 {
            let rel = (self.i_lshift - self.i_txq) as usize;
            self.lshift(rel);
            self.i_lshift += 1;
        }

        let mut vout = Vec::new();
        while self.txq.len() >= 3 {
            self.rebalance(2);
            let popped = self.txq.pop_front().unwrap();
            self.i_txq += 1;
            vout.push(popped);
        }
        vout
    }

    /// Flush whatever remains (fewer than 3 frames); resets state.
    pub fn finish(&mut self) -> Vec<(f64, f64)> {
        assert!(self.txq.len() < 3);
        self.rebalance(self.txq.len());
        let vout: Vec<_> = self.txq.drain(..).collect();
        self.i_txq += vout.len() as u64;
        self.i_lshift = self.i_txq;
        vout
    }

    pub fn queue_len(&self) -> usize {
        self.txq.len()
    }
}

/// Per-cell wrapper: one `BitSync1` per cell id, kept in lock-step so a
/// cell that appears mid-stream is pre-fed zero frames to match the
/// others' queue depth (§4.4.4 of SPEC_FULL.md).
#[derive(Debug, Default)]
pub struct BitSync {
    cells: HashMap<u32, BitSync1>,
    frames_seen: u64,
    mode: Option<HarqMode>,
}

impl BitSync {
    pub fn new(mode: HarqMode) -> Self {
        BitSync { cells: HashMap::new(), frames_seen: 0, mode: Some(mode) }
    }

    /// Feed one frame's per-cell `(tx_bytes, tx)` map. Returns, per cell,
    /// any now-ready adjusted frames.
    pub fn next(&mut self, per_cell: &HashMap<u32, (f64, f64)>) -> Result<HashMap<u32, Vec<(f64, f64)>>, Unimplemented> {
        let mode = self.mode.expect("BitSync used after finish");
        for &cell_id in per_cell.keys() {
            self.cells.entry(cell_id).or_insert({
                let mut s = BitSync1::new(mode)?;
                for _ in 0..self.frames_seen {
                    s.next(0.0, 0.0);
                }
                s
            });
        }
        self.frames_seen += 1;

        let mut out = HashMap::new();
        for (&cell_id, s) in self.cells.iter_mut() {
            let (b, t) = per_cell.get(&cell_id).copied().unwrap_or((0.0, 0.0));
            out.insert(cell_id, s.next(b, t));
        }
        Ok(out)
    }

    pub fn finish(&mut self) -> HashMap<u32, Vec<(f64, f64)>> {
        self.cells.iter_mut().map(|(&id, s)| (id, s.finish())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(frames: &[(f64, f64)]) -> Vec<(f64, f64)> {
        let mut bs = BitSync1::new(HarqMode::Fdd).unwrap();
        let mut out = Vec::new();
        for &(b, t) in frames {
            out.extend(bs.next(b, t));
        }
        out.extend(bs.finish());
        out
    }

    #[test]
    fn one_frame_shift_example_1() {
        let out = run(&[(1000.0, 0.0), (0.0, 10.0), (0.0, 0.0)]);
        assert_eq!(out, vec![(1000.0, 10.0), (0.0, 0.0), (0.0, 0.0)]);
    }

    #[test]
    fn one_frame_shift_example_2() {
        let out = run(&[(1000.0, 4.0), (1000.0, 10.0), (500.0, 8.0), (0.0, 3.0), (0.0, 0.0)]);
        assert_eq!(
            out,
            vec![(1000.0, 10.0), (1000.0, 10.0), (500.0, 5.0), (0.0, 0.0), (0.0, 0.0)]
        );
    }

    #[test]
    fn idempotent_on_trailing_zero_padding() {
        let base = [(1000.0, 4.0), (1000.0, 10.0), (500.0, 8.0)];
        let mut padded: Vec<(f64, f64)> = base.to_vec();
        padded.extend(std::iter::repeat((0.0, 0.0)).take(10));

        let plain = run(&base);
        let with_padding = run(&padded);

        assert_eq!(&with_padding[..plain.len()], &plain[..]);
        assert!(with_padding[plain.len()..].iter().all(|&(b, t)| b == 0.0 && t == 0.0));
    }

    #[test]
    fn tdd_is_unimplemented() {
        assert!(BitSync1::new(HarqMode::Tdd).is_err());
    }
}
