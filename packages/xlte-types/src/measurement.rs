use serde::{Deserialize, Serialize};

use crate::na::Na;
use crate::stat::{QciArray, Stat, StatT};

/// One accounting-period snapshot of 3GPP-style counters, grounded on
/// `kpi.py`'s `Measurement` dtype (field list and units per TS 32.425 /
/// TS 32.450 references noted alongside each field).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    /// Seconds since epoch, start of this accounting period. Never NA.
    pub tstart: f64,
    /// Duration of this accounting period, seconds. Never NA.
    pub dt: f64,

    /// RRC.ConnEstabAtt.CAUSE, §4.1.1.1 — indexed by establishment cause.
    pub rrc_conn_estab_att: QciArray<i64>,
    /// RRC.ConnEstabSucc.CAUSE, §4.1.1.2
    pub rrc_conn_estab_succ: QciArray<i64>,

    /// S1SIG.ConnEstabAtt, §4.6.1.1 — scalar, per-cell.
    pub s1sig_conn_estab_att: i64,
    /// S1SIG.ConnEstabSucc, §4.6.1.2
    pub s1sig_conn_estab_succ: i64,

    /// ERAB.EstabInitAttNbr.QCI, §4.2.1.1
    pub erab_estab_init_att: QciArray<i64>,
    /// ERAB.EstabInitSuccNbr.QCI, §4.2.1.2
    pub erab_estab_init_succ: QciArray<i64>,
    /// ERAB.EstabAddAttNbr.QCI, §4.2.1.4
    pub erab_estab_add_att: QciArray<i64>,
    /// ERAB.EstabAddSuccNbr.QCI, §4.2.1.5
    pub erab_estab_add_succ: QciArray<i64>,
    /// ERAB.RelActNbr.QCI, §4.2.2.6
    pub erab_rel_act: QciArray<i64>,
    /// ERAB.SessionTimeUE, §4.2.4.1 — seconds
    pub erab_session_time_ue: f64,
    /// ERAB.SessionTimeQCI.QCI, §4.2.4.2 — seconds
    pub erab_session_time_qci: QciArray<f64>,

    /// DRB.PdcpSduBitrateDl.QCI, §4.4.1.1 — bit/s (not kbit/s)
    pub drb_pdcp_sdu_bitrate_dl: QciArray<f64>,
    /// DRB.PdcpSduBitrateUl.QCI, §4.4.1.2 — bit/s
    pub drb_pdcp_sdu_bitrate_ul: QciArray<f64>,
    /// DRB.UEActive, §4.4.2.4
    pub drb_ue_active: StatT<i32>,
    /// DRB.IPLatDl.QCI, §4.4.5.1 / TS 32.450:6.3.2 — seconds (not ms)
    pub drb_ip_lat_dl: QciArray<Stat<f64>>,

    /// DRB.IPVolDl.QCI, §4.4.6.3 — bit (not kbit)
    pub drb_ip_vol_dl: QciArray<i64>,
    /// DRB.IPVolUl.QCI, §4.4.6.4 — bit
    pub drb_ip_vol_ul: QciArray<i64>,
    /// DRB.IPTimeDl.QCI, §4.4.6.5 — seconds (not ms)
    pub drb_ip_time_dl: QciArray<f64>,
    /// DRB.IPTimeUl.QCI, §4.4.6.6 — seconds
    pub drb_ip_time_ul: QciArray<f64>,
    /// XXX.DRB.IPTimeDl_err.QCI — half-width uncertainty companion to
    /// `drb_ip_time_dl`. Flagged "will be removed" in the original source,
    /// kept here because the IP-throughput KPI still needs it.
    pub drb_ip_time_dl_err: QciArray<f64>,
    /// XXX.DRB.IPTimeUl_err.QCI
    pub drb_ip_time_ul_err: QciArray<f64>,

    /// RRU.CellUnavailableTime.CAUSE, §4.5.6 — seconds, indexed by cause.
    pub rru_cell_unavailable_time: QciArray<f64>,

    /// PEE.Energy, §4.12.2 — joules (not kWh)
    pub pee_energy: f64,
}

impl Default for Measurement {
    fn default() -> Self {
        Measurement {
            tstart: f64::NAN,
            dt: f64::NAN,
            rrc_conn_estab_att: QciArray::default(),
            rrc_conn_estab_succ: QciArray::default(),
            s1sig_conn_estab_att: i64::na(),
            s1sig_conn_estab_succ: i64::na(),
            erab_estab_init_att: QciArray::default(),
            erab_estab_init_succ: QciArray::default(),
            erab_estab_add_att: QciArray::default(),
            erab_estab_add_succ: QciArray::default(),
            erab_rel_act: QciArray::default(),
            erab_session_time_ue: f64::na(),
            erab_session_time_qci: QciArray::default(),
            drb_pdcp_sdu_bitrate_dl: QciArray::default(),
            drb_pdcp_sdu_bitrate_ul: QciArray::default(),
            drb_ue_active: StatT::na(),
            drb_ip_lat_dl: QciArray::default(),
            drb_ip_vol_dl: QciArray::default(),
            drb_ip_vol_ul: QciArray::default(),
            drb_ip_time_dl: QciArray::default(),
            drb_ip_time_ul: QciArray::default(),
            drb_ip_time_dl_err: QciArray::default(),
            drb_ip_time_ul_err: QciArray::default(),
            rru_cell_unavailable_time: QciArray::default(),
            pee_energy: f64::na(),
        }
    }
}

impl Measurement {
    /// A record covering `[tstart, tstart+dt)` with every other field NA —
    /// used by `Calc` to fill gaps in the log (spec.md §4.6).
    pub fn na_gap(tstart: f64, dt: f64) -> Self {
        Measurement {
            tstart,
            dt,
            ..Measurement::default()
        }
    }

    pub fn end(&self) -> f64 {
        self.tstart + self.dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_measurement_is_all_na_except_time() {
        let m = Measurement::default();
        assert!(m.s1sig_conn_estab_att.is_na());
        assert!(m.erab_session_time_ue.is_na());
        assert!(m.drb_ue_active.is_na());
        assert!(m.rrc_conn_estab_att.sum().is_na());
    }
}
