//! Driver — folds a Reader's entries into `Measurement`s appended to a
//! `MeasurementLog` (§4.7). Grounded on `amari/drb.py`'s `_ERAB_Flow`
//! cumulative-counter-delta handling, generalized to every cumulative
//! counter family the driver tracks.

use std::collections::HashMap;

use serde_json::Value;

use xlte_types::{Measurement, MeasurementLog, Na, QciArray};

use crate::error::LogError;
use crate::reader::Entry;

/// Tracks last-seen cumulative values per key; a decrease is treated as a
/// restart (zero delta, new baseline), never as an error (§4.7, §8.1).
#[derive(Default)]
struct DeltaTracker {
    last: HashMap<String, u64>,
}

impl DeltaTracker {
    fn delta(&mut self, key: &str, cumulative: u64) -> u64 {
        let delta = match self.last.get(key) {
            Some(&prev) if cumulative >= prev => cumulative - prev,
            _ => 0,
        };
        self.last.insert(key.to_string(), cumulative);
        delta
    }
}

pub struct Driver {
    log: MeasurementLog,
    current: Measurement,
    period_start: Option<f64>,
    rrc_tracker: DeltaTracker,
    s1_tracker: DeltaTracker,
    erab_tracker: DeltaTracker,
    pub errors: Vec<LogError>,
}

impl Default for Driver {
    fn default() -> Self {
        Driver {
            log: MeasurementLog::new(),
            current: Measurement::default(),
            period_start: None,
            rrc_tracker: DeltaTracker::default(),
            s1_tracker: DeltaTracker::default(),
            erab_tracker: DeltaTracker::default(),
            errors: Vec::new(),
        }
    }
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_log(self) -> MeasurementLog {
        self.log
    }

    pub fn feed(&mut self, entry: &Entry) {
        match entry {
            Entry::Sync { utc, .. } => self.on_sync(*utc),
            Entry::Message { raw, utc } => self.on_message(raw, *utc),
            Entry::Los(n) => self.errors.push(LogError::new(None, format!("loss of sync: {n} entries without a sync"))),
            Entry::ParseError(reason) => self.errors.push(LogError::new(None, reason.clone())),
            Entry::Event { .. } | Entry::Eof => {}
        }
    }

    fn on_sync(&mut self, utc: f64) {
        if let Some(start) = self.period_start {
            self.current.tstart = start;
            self.current.dt = (utc - start).max(0.0);
            let finished = std::mem::take(&mut self.current);
            if let Err(e) = self.log.append(finished) {
                self.errors.push(LogError::new(Some(utc), format!("append rejected: {e}")));
            }
        }
        self.period_start = Some(utc);
    }

    fn on_message(&mut self, raw: &Value, utc: f64) {
        let message = raw.get("message").and_then(Value::as_str).unwrap_or("");
        match message {
            "stats" => self.on_stats(raw),
            "erab_get" => self.on_erab_get(raw),
            "x.drb_stats" => self.on_drb_stats(raw),
            _ => {}
        }
        let _ = utc;
    }

    fn on_stats(&mut self, raw: &Value) {
        if let Some(cells) = raw.get("cells").and_then(Value::as_object) {
            for (cell_id, cell) in cells {
                if let Some(counters) = cell.get("counters").and_then(Value::as_object) {
                    for (cause, v) in counters {
                        let Ok(cause_code) = cause.parse::<u8>() else { continue };
                        if let Some(att) = v.get("rrc_conn_estab_att").and_then(Value::as_u64) {
                            let key = format!("rrc_att:{cell_id}:{cause}");
                            let d = self.rrc_tracker.delta(&key, att) as i64;
                            add_qci(&mut self.current.rrc_conn_estab_att, cause_code, d);
                        }
                        if let Some(succ) = v.get("rrc_conn_estab_succ").and_then(Value::as_u64) {
                            let key = format!("rrc_succ:{cell_id}:{cause}");
                            let d = self.rrc_tracker.delta(&key, succ) as i64;
                            add_qci(&mut self.current.rrc_conn_estab_succ, cause_code, d);
                        }
                        if let Some(unavail) = v.get("cell_unavailable_time").and_then(Value::as_f64) {
                            add_qci_f64(&mut self.current.rru_cell_unavailable_time, cause_code, unavail);
                        }
                    }
                }
            }
        }
        if let Some(att) = raw.get("s1sig_conn_estab_att").and_then(Value::as_u64) {
            let d = self.s1_tracker.delta("s1_att", att) as i64;
            set_i64(&mut self.current.s1sig_conn_estab_att, d);
        }
        if let Some(succ) = raw.get("s1sig_conn_estab_succ").and_then(Value::as_u64) {
            let d = self.s1_tracker.delta("s1_succ", succ) as i64;
            set_i64(&mut self.current.s1sig_conn_estab_succ, d);
        }
        if let Some(energy) = raw.get("pee_energy").and_then(Value::as_f64) {
            set_f64(&mut self.current.pee_energy, energy);
        }
    }

    fn on_erab_get(&mut self, raw: &Value) {
        let Some(erabs) = raw.get("erabs").and_then(Value::as_array) else { return };
        for e in erabs {
            let Some(qci) = e.get("qci").and_then(Value::as_u64) else { continue };
            let qci = qci as u8;
            if let Some(v) = e.get("estab_init_att").and_then(Value::as_u64) {
                let d = self.erab_tracker.delta(&format!("init_att:{qci}"), v) as i64;
                add_qci(&mut self.current.erab_estab_init_att, qci, d);
            }
            if let Some(v) = e.get("estab_init_succ").and_then(Value::as_u64) {
                let d = self.erab_tracker.delta(&format!("init_succ:{qci}"), v) as i64;
                add_qci(&mut self.current.erab_estab_init_succ, qci, d);
            }
            if let Some(v) = e.get("estab_add_att").and_then(Value::as_u64) {
                let d = self.erab_tracker.delta(&format!("add_att:{qci}"), v) as i64;
                add_qci(&mut self.current.erab_estab_add_att, qci, d);
            }
            if let Some(v) = e.get("estab_add_succ").and_then(Value::as_u64) {
                let d = self.erab_tracker.delta(&format!("add_succ:{qci}"), v) as i64;
                add_qci(&mut self.current.erab_estab_add_succ, qci, d);
            }
            if let Some(v) = e.get("rel_act").and_then(Value::as_u64) {
                let d = self.erab_tracker.delta(&format!("rel_act:{qci}"), v) as i64;
                add_qci(&mut self.current.erab_rel_act, qci, d);
            }
            if let Some(v) = e.get("session_time").and_then(Value::as_f64) {
                add_qci_f64(&mut self.current.erab_session_time_qci, qci, v);
                set_f64(&mut self.current.erab_session_time_ue, v);
            }
        }
    }

    fn on_drb_stats(&mut self, raw: &Value) {
        self.apply_direction(raw.get("dl"), true);
        self.apply_direction(raw.get("ul"), false);
    }

    fn apply_direction(&mut self, side: Option<&Value>, downlink: bool) {
        let Some(Value::Object(per_qci)) = side else { return };
        for (qci_str, v) in per_qci {
            let Ok(qci) = qci_str.parse::<u8>() else { continue };
            let vol = v.get("tx_bytes").and_then(Value::as_f64).unwrap_or(0.0) as i64;
            let time = v.get("tx_time_notailtti").and_then(Value::as_f64).unwrap_or(0.0);
            let time_err = v.get("tx_time_notailtti_err").and_then(Value::as_f64).unwrap_or(0.0);
            if downlink {
                add_qci(&mut self.current.drb_ip_vol_dl, qci, vol);
                add_qci_f64(&mut self.current.drb_ip_time_dl, qci, time);
                add_qci_f64(&mut self.current.drb_ip_time_dl_err, qci, time_err);
            } else {
                add_qci(&mut self.current.drb_ip_vol_ul, qci, vol);
                add_qci_f64(&mut self.current.drb_ip_time_ul, qci, time);
                add_qci_f64(&mut self.current.drb_ip_time_ul_err, qci, time_err);
            }
        }
    }
}

fn add_qci(arr: &mut QciArray<i64>, qci: u8, v: i64) {
    let cur = arr[qci];
    arr[qci] = if cur.is_na() { v } else { cur + v };
}

fn add_qci_f64(arr: &mut QciArray<f64>, qci: u8, v: f64) {
    let cur = arr[qci];
    arr[qci] = if cur.is_na() { v } else { cur + v };
}

fn set_i64(field: &mut i64, v: i64) {
    *field = if field.is_na() { v } else { *field + v };
}

fn set_f64(field: &mut f64, v: f64) {
    *field = if field.is_na() { v } else { *field + v };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cumulative_counter_decrease_is_a_restart_not_an_error() {
        let mut t = DeltaTracker::default();
        let deltas: Vec<u64> = [100, 150, 40, 90].iter().map(|&v| t.delta("k", v)).collect();
        assert_eq!(deltas, vec![0, 50, 0, 50]);
    }

    #[test]
    fn sync_without_prior_period_does_not_append() {
        let mut d = Driver::new();
        d.feed(&Entry::Sync { utc: 10.0, srv_time: 1.0, srv_utc: 10.0, state: "attached".into(), generator: vec![], flags: None });
        assert_eq!(d.into_log().data().len(), 0);
    }

    #[test]
    fn two_syncs_close_out_one_measurement() {
        let mut d = Driver::new();
        d.feed(&Entry::Sync { utc: 0.0, srv_time: 0.0, srv_utc: 0.0, state: "attached".into(), generator: vec![], flags: None });
        d.feed(&Entry::Message { raw: serde_json::json!({"message":"stats","s1sig_conn_estab_att":5,"s1sig_conn_estab_succ":3}), utc: 1.0 });
        d.feed(&Entry::Sync { utc: 10.0, srv_time: 10.0, srv_utc: 10.0, state: "attached".into(), generator: vec![], flags: None });
        let log = d.into_log();
        assert_eq!(log.data().len(), 1);
    }
}
