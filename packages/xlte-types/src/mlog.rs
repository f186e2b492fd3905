use std::fmt;

use crate::measurement::Measurement;
use crate::na::Na;

/// Why an append to a `MeasurementLog` was rejected.
#[derive(Debug)]
pub enum AppendError {
    NaStart,
    NaDuration,
    NegativeDuration,
    NotMonotonic { prev_end: f64, tstart: f64 },
    Overlapping { prev_end: f64, tstart: f64 },
    NegativeCounter { field: &'static str },
    CounterPairInverted { field: &'static str, att: i64, succ: i64 },
}

impl fmt::Display for AppendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppendError::NaStart => write!(f, "Measurement.tstart is NA"),
            AppendError::NaDuration => write!(f, "Measurement.dt is NA"),
            AppendError::NegativeDuration => write!(f, "Measurement.dt is negative"),
            AppendError::NotMonotonic { prev_end, tstart } => write!(
                f,
                "tstart {tstart} does not strictly follow previous record's Tstart (previous ends {prev_end})"
            ),
            AppendError::Overlapping { prev_end, tstart } => {
                write!(f, "record starting at {tstart} overlaps previous record ending at {prev_end}")
            }
            AppendError::NegativeCounter { field } => write!(f, "field {field} holds a negative counter"),
            AppendError::CounterPairInverted { field, att, succ } => {
                write!(f, "field {field}: succ ({succ}) > att ({att})")
            }
        }
    }
}

impl std::error::Error for AppendError {}

/// Ordered, append-only sequence of `Measurement`s with strict monotonicity
/// and non-overlap invariants (spec.md §4.6). Gaps are allowed — they are
/// equivalent to an implicit NA-only record spanning the hole.
#[derive(Debug, Default)]
pub struct MeasurementLog {
    data: Vec<Measurement>,
}

fn check_counter_pair(field: &'static str, att: i64, succ: i64) -> Result<(), AppendError> {
    if att.is_na() || succ.is_na() {
        return Ok(());
    }
    if att < 0 || succ < 0 {
        return Err(AppendError::NegativeCounter { field });
    }
    if succ > att {
        return Err(AppendError::CounterPairInverted { field, att, succ });
    }
    Ok(())
}

impl MeasurementLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &[Measurement] {
        &self.data
    }

    pub fn append(&mut self, m: Measurement) -> Result<(), AppendError> {
        if m.tstart.is_na() {
            return Err(AppendError::NaStart);
        }
        if m.dt.is_na() {
            return Err(AppendError::NaDuration);
        }
        if m.dt < 0.0 {
            return Err(AppendError::NegativeDuration);
        }
        if let Some(prev) = self.data.last() {
            let prev_end = prev.end();
            if m.tstart <= prev.tstart {
                return Err(AppendError::NotMonotonic { prev_end, tstart: m.tstart });
            }
            if m.tstart < prev_end {
                return Err(AppendError::Overlapping { prev_end, tstart: m.tstart });
            }
        }

        for qci in 0..256u16 {
            let qci = qci as u8;
            check_counter_pair(
                "ERAB.EstabInitNbr.QCI",
                m.erab_estab_init_att[qci],
                m.erab_estab_init_succ[qci],
            )?;
            check_counter_pair(
                "ERAB.EstabAddNbr.QCI",
                m.erab_estab_add_att[qci],
                m.erab_estab_add_succ[qci],
            )?;
            check_counter_pair(
                "RRC.ConnEstab.CAUSE",
                m.rrc_conn_estab_att[qci],
                m.rrc_conn_estab_succ[qci],
            )?;
        }
        check_counter_pair(
            "S1SIG.ConnEstab",
            m.s1sig_conn_estab_att,
            m.s1sig_conn_estab_succ,
        )?;

        self.data.push(m);
        Ok(())
    }

    /// Drop every record ending at or before `tcut` (spec's `forget_past`).
    pub fn forget_past(&mut self, tcut: f64) {
        self.data.retain(|m| m.end() > tcut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(tstart: f64, dt: f64) -> Measurement {
        Measurement::na_gap(tstart, dt)
    }

    #[test]
    fn appends_non_overlapping() {
        let mut log = MeasurementLog::new();
        log.append(rec(0.0, 10.0)).unwrap();
        log.append(rec(10.0, 10.0)).unwrap();
        assert_eq!(log.data().len(), 2);
    }

    #[test]
    fn rejects_overlap() {
        let mut log = MeasurementLog::new();
        log.append(rec(0.0, 10.0)).unwrap();
        assert!(log.append(rec(5.0, 10.0)).is_err());
    }

    #[test]
    fn rejects_non_monotonic() {
        let mut log = MeasurementLog::new();
        log.append(rec(10.0, 10.0)).unwrap();
        assert!(log.append(rec(10.0, 10.0)).is_err());
    }

    #[test]
    fn rejects_succ_greater_than_att() {
        let mut log = MeasurementLog::new();
        let mut m = rec(0.0, 10.0);
        m.s1sig_conn_estab_att = 5;
        m.s1sig_conn_estab_succ = 6;
        assert!(log.append(m).is_err());
    }
}
