//! Synthetic-query host: `x.drb_stats` (§4.3, §4.3.1). Polls the base
//! station at 100 Hz on a private Conn, feeds DL/UL DRB `Sampler`s, and
//! answers client requests with per-QCI aggregates plus the poller's own
//! round-trip/skew statistics. Grounded on `amari/drb.py`'s
//! `_x_stats_srv`/`_IncStats`, adapted to `tokio::sync::mpsc` channels
//! per the teacher's goroutine-over-channels idiom (`uwb_hub.rs`).

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use xlte_drb::{CellObs, ErabObs, Sampler, UeTick};

use crate::config::TTI as CFG_TTI;
use crate::conn::Conn;

const POLL_PERIOD: Duration = Duration::from_millis(10);

/// Incremental mean/variance/min/max accumulator (Welford's algorithm).
/// Grounded on `amari/drb.py`'s `_IncStats`.
#[derive(Debug, Clone, Copy)]
pub struct IncStats {
    n: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for IncStats {
    fn default() -> Self {
        IncStats { n: 0, mean: 0.0, m2: 0.0, min: f64::INFINITY, max: f64::NEG_INFINITY }
    }
}

impl IncStats {
    pub fn add(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    pub fn avg(&self) -> f64 {
        if self.n == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    pub fn std(&self) -> f64 {
        if self.n < 2 {
            0.0
        } else {
            (self.m2 / self.n as f64).sqrt()
        }
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn to_json(&self) -> Value {
        json!({
            "min": if self.n == 0 { Value::Null } else { json!(self.min) },
            "avg": if self.n == 0 { Value::Null } else { json!(self.avg()) },
            "max": if self.n == 0 { Value::Null } else { json!(self.max) },
            "std": self.std(),
        })
    }
}

#[derive(Default)]
struct QciAccum {
    tx_bytes: f64,
    tx_time: f64,
    tx_time_err: f64,
    tx_time_notailtti: f64,
    tx_time_notailtti_err: f64,
}

struct Accumulators {
    dl: HashMap<u8, QciAccum>,
    ul: HashMap<u8, QciAccum>,
    rtt_ue_stats: IncStats,
    rtt_stats: IncStats,
    dt_ue_stats: IncStats,
    dt_stats: IncStats,
    skew_ueget_vs_stats: IncStats,
}

impl Default for Accumulators {
    fn default() -> Self {
        Accumulators {
            dl: HashMap::new(),
            ul: HashMap::new(),
            rtt_ue_stats: IncStats::default(),
            rtt_stats: IncStats::default(),
            dt_ue_stats: IncStats::default(),
            dt_stats: IncStats::default(),
            skew_ueget_vs_stats: IncStats::default(),
        }
    }
}

fn accumulate_sample(acc: &mut HashMap<u8, QciAccum>, qci: u8, tx_bytes: f64, tx_time: f64, tx_time_err: f64) {
    let lo = tx_time - tx_time_err;
    let hi = tx_time + tx_time_err;
    if hi <= CFG_TTI {
        return;
    }
    if hi <= 2.0 * CFG_TTI && tx_bytes < 1000.0 {
        return;
    }

    let entry = acc.entry(qci).or_default();
    entry.tx_bytes += tx_bytes;
    entry.tx_time += tx_time;
    entry.tx_time_err += tx_time_err;

    let mut tt_hi = ((hi) / CFG_TTI).ceil() - 1.0;
    let mut tt_lo = lo / CFG_TTI;
    if tt_lo > 1.0 {
        tt_lo = (tt_lo - 1.0).ceil();
    }
    if tt_hi < tt_lo {
        tt_hi = tt_lo;
    }
    entry.tx_time_notailtti += (tt_lo + tt_hi) / 2.0 * CFG_TTI;
    entry.tx_time_notailtti_err += (tt_hi - tt_lo) / 2.0 * CFG_TTI;
}

fn qci_map_to_json(acc: &HashMap<u8, QciAccum>) -> Value {
    let mut out = serde_json::Map::new();
    for (qci, a) in acc {
        out.insert(
            qci.to_string(),
            json!({
                "tx_bytes": a.tx_bytes,
                "tx_time": a.tx_time,
                "tx_time_err": a.tx_time_err,
                "tx_time_notailtti": a.tx_time_notailtti,
                "tx_time_notailtti_err": a.tx_time_notailtti_err,
            }),
        );
    }
    Value::Object(out)
}

pub struct Request {
    pub options: Value,
    pub reply: oneshot::Sender<Value>,
}

/// Spawn the `x.drb_stats` sub-server on its own Conn. Returns a channel
/// the scheduler sends `Request`s on.
pub async fn spawn(uri: String, password: Option<String>, token: CancellationToken) -> mpsc::Sender<Request> {
    let (tx, rx) = mpsc::channel::<Request>(8);
    tokio::spawn(run(uri, password, rx, token));
    tx
}

async fn run(uri: String, password: Option<String>, mut requests: mpsc::Receiver<Request>, token: CancellationToken) {
    let mut dl = Sampler::downlink();
    let mut ul = Sampler::uplink();
    let mut acc = Accumulators::default();

    let conn = match Conn::connect(&uri, password.as_deref()).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("x.drb_stats: initial connect failed: {e}");
            return;
        }
    };

    // Initial dummy `stats` request so the base station's internal
    // accumulation delay doesn't stall the first real sample (§4.3.1).
    let _ = conn.req("stats", json!({"initial_delay": 0}), Duration::from_secs(1)).await;

    let mut ticker = tokio::time::interval(POLL_PERIOD);
    let mut last_ue_ts: Option<f64> = None;
    let mut last_stats_ts: Option<f64> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                let t0 = now();
                let ue_reply = conn.req("ue_get", json!({"stats": true}), Duration::from_millis(200)).await;
                let t1 = now();
                let stats_reply = conn.req("stats", json!({}), Duration::from_millis(200)).await;
                let t2 = now();

                acc.rtt_ue_stats.add(t1 - t0);
                acc.rtt_stats.add(t2 - t1);
                if let Some(last) = last_ue_ts { acc.dt_ue_stats.add(t0 - last); }
                if let Some(last) = last_stats_ts { acc.dt_stats.add(t1 - last); }
                last_ue_ts = Some(t0);
                last_stats_ts = Some(t1);
                acc.skew_ueget_vs_stats.add(t1 - t0);

                if let (Ok(ue), Ok(_stats)) = (ue_reply, stats_reply) {
                    feed_samplers(&ue, &mut dl, &mut ul, &mut acc);
                }
            }
            Some(req) = requests.recv() => {
                let _ = req.options;
                let reply = json!({
                    "dl": qci_map_to_json(&acc.dl),
                    "ul": qci_map_to_json(&acc.ul),
                    "δt_ueget": acc.dt_ue_stats.to_json(),
                    "δ_ueget_vs_stats": acc.skew_ueget_vs_stats.to_json(),
                    "rtt_ue_stats": acc.rtt_ue_stats.to_json(),
                    "rtt_stats": acc.rtt_stats.to_json(),
                });
                acc = Accumulators::default();
                let _ = req.reply.send(reply);
            }
        }
    }
}

fn now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Parse one `ue_get[stats]` reply into per-UE ticks and feed both
/// direction Samplers, then fold emitted Samples into the per-QCI
/// accumulators.
fn feed_samplers(ue_reply: &Value, dl: &mut Sampler, ul: &mut Sampler, acc: &mut Accumulators) {
    let Some(ues) = ue_reply.get("ues").and_then(Value::as_array) else { return };

    let mut dl_ticks_owned: Vec<(u32, Vec<CellObs>, Vec<ErabObs>)> = Vec::new();
    let mut ul_ticks_owned: Vec<(u32, Vec<CellObs>, Vec<ErabObs>)> = Vec::new();

    for ue in ues {
        let Some(ue_id) = ue.get("ue_id").and_then(Value::as_u64) else { continue };
        let ue_id = ue_id as u32;

        let mut dl_cells = Vec::new();
        let mut ul_cells = Vec::new();
        if let Some(cells) = ue.get("cells").and_then(Value::as_array) {
            for c in cells {
                let cell_id = c.get("cell_id").and_then(Value::as_u64).unwrap_or(0) as u32;
                let rank = c.get("ri").and_then(Value::as_u64).unwrap_or(1) as u8;
                dl_cells.push(CellObs {
                    cell_id,
                    tx: c.get("dl_tx").and_then(Value::as_u64).unwrap_or(0) as u32,
                    retx: c.get("dl_retx").and_then(Value::as_u64).unwrap_or(0) as u32,
                    bitrate: c.get("dl_bitrate").and_then(Value::as_f64).unwrap_or(0.0),
                    rank,
                    use_avg: c.get("dl_use_avg").and_then(Value::as_f64).unwrap_or(0.0),
                });
                ul_cells.push(CellObs {
                    cell_id,
                    tx: c.get("ul_tx").and_then(Value::as_u64).unwrap_or(0) as u32,
                    retx: c.get("ul_retx").and_then(Value::as_u64).unwrap_or(0) as u32,
                    bitrate: c.get("ul_bitrate").and_then(Value::as_f64).unwrap_or(0.0),
                    rank: 1,
                    use_avg: c.get("ul_use_avg").and_then(Value::as_f64).unwrap_or(0.0),
                });
            }
        }

        let mut dl_erabs = Vec::new();
        let mut ul_erabs = Vec::new();
        if let Some(erabs) = ue.get("erabs").and_then(Value::as_array) {
            for e in erabs {
                let erab_id = e.get("erab_id").and_then(Value::as_u64).unwrap_or(0) as u32;
                let qci = e.get("qci").and_then(Value::as_u64).unwrap_or(0) as u8;
                dl_erabs.push(ErabObs { erab_id, qci, total_bytes: e.get("dl_total_bytes").and_then(Value::as_u64).unwrap_or(0) });
                ul_erabs.push(ErabObs { erab_id, qci, total_bytes: e.get("ul_total_bytes").and_then(Value::as_u64).unwrap_or(0) });
            }
        }

        dl_ticks_owned.push((ue_id, dl_cells, dl_erabs));
        ul_ticks_owned.push((ue_id, ul_cells, ul_erabs));
    }

    let dl_ticks: Vec<UeTick> = dl_ticks_owned
        .iter()
        .map(|(ue_id, cells, erabs)| UeTick { ue_id: *ue_id, cells, erabs })
        .collect();
    let ul_ticks: Vec<UeTick> = ul_ticks_owned
        .iter()
        .map(|(ue_id, cells, erabs)| UeTick { ue_id: *ue_id, cells, erabs })
        .collect();

    let dt = POLL_PERIOD.as_secs_f64();
    for (_, qci, s) in dl.add(dt, &dl_ticks) {
        accumulate_sample(&mut acc.dl, qci, s.tx_bytes, s.tx_time, s.tx_time_err);
    }
    for (_, qci, s) in ul.add(dt, &ul_ticks) {
        accumulate_sample(&mut acc.ul, qci, s.tx_bytes, s.tx_time, s.tx_time_err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inc_stats_matches_known_values() {
        let mut s = IncStats::default();
        for x in [1.0, 2.0, 3.0] {
            s.add(x);
        }
        assert_eq!(s.avg(), 2.0);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 3.0);
        assert_eq!(s.n(), 3);
    }

    #[test]
    fn inc_stats_empty_is_nan_and_infinities() {
        let s = IncStats::default();
        assert!(s.avg().is_nan());
        assert_eq!(s.min, f64::INFINITY);
        assert_eq!(s.max, f64::NEG_INFINITY);
    }

    #[test]
    fn small_icmp_like_sample_is_filtered() {
        let mut acc = HashMap::new();
        accumulate_sample(&mut acc, 5, 500.0, CFG_TTI * 1.5, 0.0);
        assert!(acc.is_empty());
    }

    #[test]
    fn normal_sample_is_accumulated() {
        let mut acc = HashMap::new();
        accumulate_sample(&mut acc, 5, 5000.0, CFG_TTI * 10.0, 0.0);
        assert_eq!(acc.len(), 1);
    }
}
