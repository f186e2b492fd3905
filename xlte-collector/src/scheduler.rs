//! Scheduler + Writer wiring (§4.2, §5, §5.1). Drives the periodic
//! multi-spec poll loop, owns the xlog `Writer`, and reconnects on
//! failure. Grounded on `main.rs`'s `tokio::time::interval` tick-loop
//! shape, generalized to a heap of next-fire times.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CollectorConfig;
use crate::conn::Conn;
use crate::error::ConfigError;
use crate::logspec::LogSpec;
use crate::synth::{self, Request as SynthRequest};
use crate::xlog::{sync_event, RotateSpec, SyncFlags, Writer};

const LOS_WINDOW: usize = crate::config::LOS_WINDOW;
const SYNTHETIC_NAMES: &[&str] = &["x.drb_stats"];

fn now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Ensure a `meta.sync` spec (longest period, or 10x the longest other
/// period) and a `config_get` spec at the same period, then reject the
/// list if it would overrun `LOS_WINDOW` entries per sync period (§4.2).
pub fn normalize_specs(mut specs: Vec<LogSpec>) -> Result<Vec<LogSpec>, ConfigError> {
    let longest_other = specs.iter().map(|s| s.period).fold(0.0_f64, f64::max);
    let sync_period = if longest_other > 0.0 { (longest_other * 10.0).max(longest_other) } else { 600.0 };

    if !specs.iter().any(|s| s.query == "meta.sync") {
        specs.push(LogSpec::new("meta.sync", Vec::new(), sync_period));
    }
    let actual_sync_period = specs.iter().find(|s| s.query == "meta.sync").map(|s| s.period).unwrap_or(sync_period);
    if !specs.iter().any(|s| s.query == "config_get") {
        specs.push(LogSpec::new("config_get", Vec::new(), actual_sync_period));
    }

    let non_sync: f64 = specs
        .iter()
        .filter(|s| s.query != "meta.sync")
        .map(|s| actual_sync_period / s.period)
        .sum();
    if non_sync as usize > LOS_WINDOW {
        return Err(ConfigError::TooManySpecsPerSyncPeriod { got: non_sync as usize, limit: LOS_WINDOW });
    }

    Ok(specs)
}

pub struct Scheduler {
    config: CollectorConfig,
    specs: Vec<LogSpec>,
    token: CancellationToken,
}

impl Scheduler {
    pub fn new(config: CollectorConfig, token: CancellationToken) -> Result<Self, ConfigError> {
        let specs = config
            .log_specs
            .iter()
            .map(|s| LogSpec::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        let specs = normalize_specs(specs)?;
        Ok(Scheduler { config, specs, token })
    }

    pub async fn run(mut self) -> std::io::Result<()> {
        let mut writer = self.open_writer().await?;
        writer.write(&json!({"event": "start", "utc": now()})).await?;

        loop {
            if self.token.is_cancelled() {
                return Ok(());
            }
            match self.run_attached(&mut writer).await {
                Ok(()) => return Ok(()),
                Err(cause) => {
                    writer.write(&json!({"event": "service detach", "utc": now(), "cause": cause})).await?;
                    let sync_period = self.specs.iter().find(|s| s.query == "meta.sync").map(|s| s.period).unwrap_or(60.0);
                    let wait = Duration::from_secs_f64(3.0_f64.min(sync_period));
                    tokio::select! {
                        _ = self.token.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    async fn open_writer(&self) -> std::io::Result<Writer> {
        match &self.config.rotate_spec {
            Some(spec_str) => {
                let spec = RotateSpec::parse(spec_str).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
                Writer::open_rotating(&self.config.output_path, spec, now() as u64).await
            }
            None => Writer::open_plain(&self.config.output_path).await,
        }
    }

    /// One connect-and-poll session; returns an error describing the
    /// detach cause on any connection failure.
    async fn run_attached(&mut self, writer: &mut Writer) -> Result<(), String> {
        let conn = Conn::connect(&self.config.ws_uri, self.config.password.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        writer.write(&json!({"event": "service attach", "utc": now()})).await.map_err(|e| e.to_string())?;

        let mut synth_channels: std::collections::HashMap<&'static str, mpsc::Sender<SynthRequest>> = std::collections::HashMap::new();
        for &name in SYNTHETIC_NAMES {
            if self.specs.iter().any(|s| s.query == name) {
                let tx = synth::spawn(self.config.ws_uri.clone(), self.config.password.clone(), self.token.clone()).await;
                synth_channels.insert(name, tx);
            }
        }

        let mut next_fire = vec![0.0_f64; self.specs.len()];

        loop {
            let (idx, fire_at) = next_fire
                .iter()
                .enumerate()
                .min_by(|(ia, a), (ib, b)| a.partial_cmp(b).unwrap().then(ia.cmp(ib)))
                .map(|(i, &t)| (i, t))
                .expect("specs is non-empty after normalization");

            let wait = (fire_at - now()).max(0.0);
            tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(Duration::from_secs_f64(wait)) => {}
            }

            let spec = self.specs[idx].clone();
            let result = self.execute_spec(&conn, &spec, &synth_channels, writer).await;
            if let Err(e) = result {
                return Err(e);
            }
            next_fire[idx] = now() + spec.period;
        }
    }

    async fn execute_spec(
        &self,
        conn: &Conn,
        spec: &LogSpec,
        synth_channels: &std::collections::HashMap<&'static str, mpsc::Sender<SynthRequest>>,
        writer: &mut Writer,
    ) -> Result<(), String> {
        if spec.query == "meta.sync" {
            let utc = now();
            let srv_time = conn.welcome.srv_time + (utc - conn.welcome.received_at_unix);
            let srv_utc = conn.welcome.srv_utc.map(|u| u + (utc - conn.welcome.received_at_unix)).unwrap_or(srv_time);
            let event = sync_event(utc, srv_time, srv_utc, "attached", &self.specs, SyncFlags::None);
            let value = serde_json::to_value(&event).map_err(|e| e.to_string())?;
            writer.write(&value).await.map_err(|e| e.to_string())?;
            self.maybe_rotate(writer, srv_time, srv_utc).await?;
            return Ok(());
        }

        if let Some(tx) = synth_channels.get(spec.query.as_str()) {
            let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
            tx.send(SynthRequest { options: json!({}), reply: reply_tx })
                .await
                .map_err(|_| "synthetic query host gone".to_string())?;
            let reply = reply_rx.await.map_err(|_| "synthetic query host dropped reply".to_string())?;
            let mut value = reply;
            if let Value::Object(obj) = &mut value {
                obj.insert("message".to_string(), json!(spec.query));
            }
            writer.write(&value).await.map_err(|e| e.to_string())?;
            return Ok(());
        }

        let mut options = serde_json::Map::new();
        for opt in &spec.optv {
            options.insert(opt.clone(), Value::Bool(true));
        }
        let reply = conn.req(&spec.query, Value::Object(options), Duration::from_secs(5)).await.map_err(|e| e.to_string())?;
        writer.write(&reply).await.map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn maybe_rotate(&self, writer: &mut Writer, srv_time: f64, srv_utc: f64) -> Result<(), String> {
        if !writer.due_for_rotation(now() as u64) {
            return Ok(());
        }
        let pre = sync_event(now(), srv_time, srv_utc, "attached", &self.specs, SyncFlags::PreLogrotate);
        writer.write(&serde_json::to_value(&pre).unwrap()).await.map_err(|e| e.to_string())?;
        writer.rotate(now() as u64).await.map_err(|e| e.to_string())?;
        let post = sync_event(now(), srv_time, srv_utc, "attached", &self.specs, SyncFlags::PostLogrotate);
        writer.write(&serde_json::to_value(&post).unwrap()).await.map_err(|e| e.to_string())?;
        info!("xlog rotated");
        Ok(())
    }
}

pub fn log_unexpected(cause: impl std::fmt::Display) {
    warn!("scheduler: unexpected error: {cause}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_adds_sync_and_config_get() {
        let specs = vec![LogSpec::parse("stats/10s").unwrap()];
        let normalized = normalize_specs(specs).unwrap();
        assert!(normalized.iter().any(|s| s.query == "meta.sync"));
        assert!(normalized.iter().any(|s| s.query == "config_get"));
    }

    #[test]
    fn rejects_too_many_specs_per_sync_period() {
        let mut specs = Vec::new();
        for i in 0..2000 {
            specs.push(LogSpec::new(format!("q{i}"), Vec::new(), 0.001));
        }
        assert!(normalize_specs(specs).is_err());
    }
}
