use serde::{Deserialize, Serialize};

use crate::stat::QciArray;

/// An accumulated scalar or whole-array field: the summed/weighted value,
/// plus the total time within the aggregation window that contributed no
/// data to it (spec.md §3's `ΣMeasurement` pairing).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct AggField<T> {
    pub value: T,
    pub tau_na: f64,
}

/// Accumulated `Stat<T>`: n-weighted average, extremal min/max, plus NA time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AggStat<T> {
    pub avg: f64,
    pub min: T,
    pub max: T,
    pub n: i64,
    pub tau_na: f64,
}

/// Accumulated `StatT<T>`: δT-weighted average, extremal min/max, NA time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AggStatT<T> {
    pub avg: f64,
    pub min: T,
    pub max: T,
    pub tau_na: f64,
}

/// Aggregate of a `MeasurementLog` window — same schema as `Measurement`,
/// but every field carries its NA-time budget alongside its value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub tau_lo: f64,
    pub tau_hi: f64,

    pub rrc_conn_estab_att: AggField<QciArray<i64>>,
    pub rrc_conn_estab_succ: AggField<QciArray<i64>>,
    pub s1sig_conn_estab_att: AggField<i64>,
    pub s1sig_conn_estab_succ: AggField<i64>,
    pub erab_estab_init_att: AggField<QciArray<i64>>,
    pub erab_estab_init_succ: AggField<QciArray<i64>>,
    pub erab_estab_add_att: AggField<QciArray<i64>>,
    pub erab_estab_add_succ: AggField<QciArray<i64>>,
    pub erab_rel_act: AggField<QciArray<i64>>,
    pub erab_session_time_ue: AggField<f64>,

    pub drb_ue_active: AggStatT<i32>,
    pub drb_ip_lat_dl_avg: AggField<QciArray<f64>>,

    pub drb_ip_vol_dl: AggField<QciArray<i64>>,
    pub drb_ip_vol_ul: AggField<QciArray<i64>>,
    pub drb_ip_time_dl: AggField<QciArray<f64>>,
    pub drb_ip_time_ul: AggField<QciArray<f64>>,
    pub drb_ip_time_dl_err: AggField<QciArray<f64>>,
    pub drb_ip_time_ul_err: AggField<QciArray<f64>>,

    pub rru_cell_unavailable_time: AggField<QciArray<f64>>,
    pub pee_energy: AggField<f64>,
}
