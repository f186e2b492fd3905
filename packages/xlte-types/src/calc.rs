use std::collections::HashMap;

use crate::aggregate::{AggField, AggStat, AggStatT, Aggregate};
use crate::interval::Interval;
use crate::measurement::Measurement;
use crate::mlog::MeasurementLog;
use crate::na::Na;
use crate::stat::QciArray;

/// A windowed view over a `MeasurementLog`, widened to cover every record
/// it overlaps in full and gap-filled with NA-only records so the whole
/// `[τ_lo, τ_hi)` span is a contiguous partition (spec.md §4.6).
pub struct Calc {
    pub tau_lo: f64,
    pub tau_hi: f64,
    records: Vec<Measurement>,
}

impl Calc {
    pub fn new(mlog: &MeasurementLog, tau_lo: f64, tau_hi: f64) -> Self {
        let overlapping: Vec<&Measurement> = mlog
            .data()
            .iter()
            .filter(|m| m.tstart < tau_hi && m.end() > tau_lo)
            .collect();

        let (lo, hi) = match (overlapping.first(), overlapping.last()) {
            (Some(first), Some(last)) => (tau_lo.min(first.tstart), tau_hi.max(last.end())),
            _ => (tau_lo, tau_hi),
        };

        let mut records = Vec::new();
        let mut cursor = lo;
        for m in &overlapping {
            if m.tstart > cursor {
                records.push(Measurement::na_gap(cursor, m.tstart - cursor));
            }
            records.push((*m).clone());
            cursor = m.end();
        }
        if cursor < hi {
            records.push(Measurement::na_gap(cursor, hi - cursor));
        }

        Calc { tau_lo: lo, tau_hi: hi, records }
    }

    pub fn records(&self) -> &[Measurement] {
        &self.records
    }

    /// Generic success-rate KPI (spec.md §4.6): returns the confidence
    /// interval `[lo, hi]` given per-record accessors for the attempt and
    /// success counters (each of which may itself be a QCI/cause sum).
    pub fn success_rate(&self, att: impl Fn(&Measurement) -> i64, succ: impl Fn(&Measurement) -> i64) -> Interval {
        let mut sigma_t = 0.0; // time with known init
        let mut t_plus = 0.0; // time with unknown init
        let mut sigma_init = 0i64;
        let mut sigma_fini = 0i64;
        let mut sigma_ufini = 0i64; // init known, fini unknown

        for m in &self.records {
            let a = att(m);
            let s = succ(m);
            if a.is_na() {
                t_plus += m.dt;
                continue;
            }
            sigma_t += m.dt;
            sigma_init += a;
            if s.is_na() {
                sigma_ufini += a;
            } else {
                sigma_fini += s;
            }
        }

        if sigma_init == 0 || sigma_t == 0.0 {
            return Interval::unit();
        }

        let init_plus = t_plus * sigma_init as f64 / sigma_t;
        let denom = sigma_init as f64 + init_plus;
        Interval::new(
            sigma_fini as f64 / denom,
            (sigma_fini + sigma_ufini) as f64 / denom + init_plus / denom,
        )
    }

    fn success_rate_qci(&self, att: impl Fn(&Measurement) -> &QciArray<i64>, succ: impl Fn(&Measurement) -> &QciArray<i64>) -> Interval {
        self.success_rate(|m| att(m).sum(), |m| succ(m).sum())
    }

    /// E-RAB accessibility KPI pair: `(InitialEPSBEstabSR, AddedEPSBEstabSR)`, each ×100.
    pub fn erab_accessibility(&self) -> (Interval, Interval) {
        let x = self.success_rate_qci(|m| &m.rrc_conn_estab_att, |m| &m.rrc_conn_estab_succ);
        let y = self.success_rate(|m| m.s1sig_conn_estab_att, |m| m.s1sig_conn_estab_succ);
        let z = self.success_rate_qci(|m| &m.erab_estab_init_att, |m| &m.erab_estab_init_succ);
        let initial = x.mul(y).mul(z).scale(100.0);

        let added = self
            .success_rate_qci(|m| &m.erab_estab_add_att, |m| &m.erab_estab_add_succ)
            .scale(100.0);

        (initial, added)
    }

    /// E-UTRAN IP throughput KPI, per QCI and direction (spec.md §4.6). NA
    /// records contribute nothing and are skipped outright — no
    /// uncertainty is added for missing data here (open question #3).
    pub fn eutran_ip_throughput(&self) -> HashMap<u8, (Option<Interval>, Option<Interval>)> {
        let mut out = HashMap::new();
        for qci in 0..=255u8 {
            let dl = self.throughput_one(qci, |m| &m.drb_ip_vol_dl, |m| &m.drb_ip_time_dl, |m| &m.drb_ip_time_dl_err);
            let ul = self.throughput_one(qci, |m| &m.drb_ip_vol_ul, |m| &m.drb_ip_time_ul, |m| &m.drb_ip_time_ul_err);
            if dl.is_some() || ul.is_some() {
                out.insert(qci, (dl, ul));
            }
        }
        out
    }

    fn throughput_one(
        &self,
        qci: u8,
        vol: impl Fn(&Measurement) -> &QciArray<i64>,
        time: impl Fn(&Measurement) -> &QciArray<f64>,
        err: impl Fn(&Measurement) -> &QciArray<f64>,
    ) -> Option<Interval> {
        let mut sigma_vol = 0i64;
        let mut sigma_time = 0.0;
        let mut sigma_err = 0.0;
        let mut any = false;
        for m in &self.records {
            let v = vol(m)[qci];
            let t = time(m)[qci];
            let e = err(m)[qci];
            if v.is_na() || t.is_na() || e.is_na() {
                continue;
            }
            sigma_vol += v;
            sigma_time += t;
            sigma_err += e;
            any = true;
        }
        if !any || sigma_time + sigma_err <= 0.0 {
            return None;
        }
        Some(Interval::new(
            sigma_vol as f64 / (sigma_time + sigma_err),
            sigma_vol as f64 / (sigma_time - sigma_err).max(1e-12),
        ))
    }

    /// Fold the window into a `ΣMeasurement`-shaped `Aggregate`.
    pub fn aggregate(&self) -> Aggregate {
        let mut agg = Aggregate {
            tau_lo: self.tau_lo,
            tau_hi: self.tau_hi,
            rrc_conn_estab_att: AggField::default(),
            rrc_conn_estab_succ: AggField::default(),
            s1sig_conn_estab_att: AggField::default(),
            s1sig_conn_estab_succ: AggField::default(),
            erab_estab_init_att: AggField::default(),
            erab_estab_init_succ: AggField::default(),
            erab_estab_add_att: AggField::default(),
            erab_estab_add_succ: AggField::default(),
            erab_rel_act: AggField::default(),
            erab_session_time_ue: AggField::default(),
            drb_ue_active: AggStatT { avg: 0.0, min: i32::MAX, max: i32::MIN, tau_na: 0.0 },
            drb_ip_lat_dl_avg: AggField::default(),
            drb_ip_vol_dl: AggField::default(),
            drb_ip_vol_ul: AggField::default(),
            drb_ip_time_dl: AggField::default(),
            drb_ip_time_ul: AggField::default(),
            drb_ip_time_dl_err: AggField::default(),
            drb_ip_time_ul_err: AggField::default(),
            rru_cell_unavailable_time: AggField::default(),
            pee_energy: AggField::default(),
        };
        agg.rrc_conn_estab_att.value = QciArray::default();
        agg.rrc_conn_estab_succ.value = QciArray::default();
        agg.erab_estab_init_att.value = QciArray::default();
        agg.erab_estab_init_succ.value = QciArray::default();
        agg.erab_estab_add_att.value = QciArray::default();
        agg.erab_estab_add_succ.value = QciArray::default();
        agg.erab_rel_act.value = QciArray::default();
        agg.drb_ip_lat_dl_avg.value = QciArray::default();
        agg.drb_ip_vol_dl.value = QciArray::default();
        agg.drb_ip_vol_ul.value = QciArray::default();
        agg.drb_ip_time_dl.value = QciArray::default();
        agg.drb_ip_time_ul.value = QciArray::default();
        agg.drb_ip_time_dl_err.value = QciArray::default();
        agg.drb_ip_time_ul_err.value = QciArray::default();
        agg.rru_cell_unavailable_time.value = QciArray::default();

        let mut ue_active_weight = 0.0;
        let mut lat_weight = [0i64; 256];
        let mut lat_sum = [0.0f64; 256];

        for m in &self.records {
            accum_qci_i64(&mut agg.rrc_conn_estab_att, &m.rrc_conn_estab_att, m.dt);
            accum_qci_i64(&mut agg.rrc_conn_estab_succ, &m.rrc_conn_estab_succ, m.dt);
            accum_qci_i64(&mut agg.erab_estab_init_att, &m.erab_estab_init_att, m.dt);
            accum_qci_i64(&mut agg.erab_estab_init_succ, &m.erab_estab_init_succ, m.dt);
            accum_qci_i64(&mut agg.erab_estab_add_att, &m.erab_estab_add_att, m.dt);
            accum_qci_i64(&mut agg.erab_estab_add_succ, &m.erab_estab_add_succ, m.dt);
            accum_qci_i64(&mut agg.erab_rel_act, &m.erab_rel_act, m.dt);
            accum_qci_i64(&mut agg.drb_ip_vol_dl, &m.drb_ip_vol_dl, m.dt);
            accum_qci_i64(&mut agg.drb_ip_vol_ul, &m.drb_ip_vol_ul, m.dt);
            accum_qci_f64(&mut agg.drb_ip_time_dl, &m.drb_ip_time_dl, m.dt);
            accum_qci_f64(&mut agg.drb_ip_time_ul, &m.drb_ip_time_ul, m.dt);
            accum_qci_f64(&mut agg.drb_ip_time_dl_err, &m.drb_ip_time_dl_err, m.dt);
            accum_qci_f64(&mut agg.drb_ip_time_ul_err, &m.drb_ip_time_ul_err, m.dt);
            accum_qci_f64(&mut agg.rru_cell_unavailable_time, &m.rru_cell_unavailable_time, m.dt);
            accum_scalar_i64(&mut agg.s1sig_conn_estab_att, m.s1sig_conn_estab_att, m.dt);
            accum_scalar_i64(&mut agg.s1sig_conn_estab_succ, m.s1sig_conn_estab_succ, m.dt);
            accum_scalar_f64(&mut agg.erab_session_time_ue, m.erab_session_time_ue, m.dt);
            accum_scalar_f64(&mut agg.pee_energy, m.pee_energy, m.dt);

            if m.drb_ue_active.is_na() {
                agg.drb_ue_active.tau_na += m.dt;
            } else {
                agg.drb_ue_active.avg += m.drb_ue_active.avg * m.dt;
                ue_active_weight += m.dt;
                agg.drb_ue_active.min = agg.drb_ue_active.min.min(m.drb_ue_active.min);
                agg.drb_ue_active.max = agg.drb_ue_active.max.max(m.drb_ue_active.max);
            }

            for qci in 0..256usize {
                let s = m.drb_ip_lat_dl[qci as u8];
                if !s.is_na() && s.n > 0 {
                    lat_sum[qci] += s.avg * s.n as f64;
                    lat_weight[qci] += s.n;
                }
            }
        }

        if ue_active_weight > 0.0 {
            agg.drb_ue_active.avg /= ue_active_weight;
        } else {
            agg.drb_ue_active.avg = f64::NAN;
        }

        for qci in 0..256usize {
            if lat_weight[qci] > 0 {
                agg.drb_ip_lat_dl_avg.value[qci as u8] = lat_sum[qci] / lat_weight[qci] as f64;
            }
        }

        agg
    }
}

fn accum_scalar_i64(field: &mut AggField<i64>, v: i64, dt: f64) {
    if v.is_na() {
        field.tau_na += dt;
    } else {
        field.value += v;
    }
}

fn accum_scalar_f64(field: &mut AggField<f64>, v: f64, dt: f64) {
    if v.is_na() {
        field.tau_na += dt;
    } else {
        field.value += v;
    }
}

fn accum_qci_i64(field: &mut AggField<QciArray<i64>>, src: &QciArray<i64>, dt: f64) {
    if src.sum().is_na() {
        field.tau_na += dt;
    }
    for qci in 0..=255u8 {
        let v = src[qci];
        if !v.is_na() {
            if field.value[qci].is_na() {
                field.value[qci] = 0;
            }
            field.value[qci] += v;
        }
    }
}

fn accum_qci_f64(field: &mut AggField<QciArray<f64>>, src: &QciArray<f64>, dt: f64) {
    if src.sum().is_na() {
        field.tau_na += dt;
    }
    for qci in 0..=255u8 {
        let v = src[qci];
        if !v.is_na() {
            if field.value[qci].is_na() {
                field.value[qci] = 0.0;
            }
            field.value[qci] += v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(tstart: f64, dt: f64) -> Measurement {
        Measurement::na_gap(tstart, dt)
    }

    #[test]
    fn widens_to_cover_full_overlapping_records() {
        let mut log = MeasurementLog::new();
        log.append(base(10.0, 10.0)).unwrap();
        let calc = Calc::new(&log, 12.0, 15.0);
        assert!(calc.tau_lo <= 10.0);
        assert!(calc.tau_hi >= 20.0);
    }

    #[test]
    fn success_rate_single_record() {
        let mut log = MeasurementLog::new();
        let mut m = base(10.0, 10.0);
        m.s1sig_conn_estab_att = 8;
        m.s1sig_conn_estab_succ = 4;
        log.append(m).unwrap();
        let calc = Calc::new(&log, 10.0, 20.0);
        let r = calc.success_rate(|m| m.s1sig_conn_estab_att, |m| m.s1sig_conn_estab_succ);
        assert!((r.lo - 0.5).abs() < 1e-9);
        assert!((r.hi - 0.5).abs() < 1e-9);
    }

    #[test]
    fn success_rate_widened_window() {
        let mut log = MeasurementLog::new();
        let mut m = base(10.0, 10.0);
        m.s1sig_conn_estab_att = 8;
        m.s1sig_conn_estab_succ = 4;
        log.append(m).unwrap();
        let calc = Calc::new(&log, 7.0, 20.0);
        let r = calc.success_rate(|m| m.s1sig_conn_estab_att, |m| m.s1sig_conn_estab_succ);
        assert!((r.lo - 0.3846153846).abs() < 1e-6);
        assert!((r.hi - 0.6153846154).abs() < 1e-6);
    }

    #[test]
    fn eutran_ip_throughput_single_qci() {
        let mut log = MeasurementLog::new();
        let mut m = base(0.0, 100.0);
        m.drb_ip_vol_dl[5] = 55_000_000;
        m.drb_ip_time_dl[5] = 100.0;
        m.drb_ip_time_dl_err[5] = 0.0;
        log.append(m).unwrap();
        let calc = Calc::new(&log, 0.0, 100.0);
        let thp = calc.eutran_ip_throughput();
        let (dl, _ul) = thp.get(&5).unwrap();
        let dl = dl.unwrap();
        assert!((dl.lo - 5.5e5).abs() < 1.0);
        assert!((dl.hi - 5.5e5).abs() < 1.0);
    }
}
