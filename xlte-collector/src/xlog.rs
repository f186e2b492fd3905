//! xlog JSON-Lines writer (§4.2 Writer, §4.2.1, §6). Grounded on
//! `audit.rs`'s append-only JSON-lines pattern, generalized from a
//! hash-chained single file into a plain-or-rotating line writer.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::ConfigError;
use crate::logspec::LogSpec;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncFlags {
    None,
    PreLogrotate,
    PostLogrotate,
}

impl SyncFlags {
    fn as_str(&self) -> Option<&'static str> {
        match self {
            SyncFlags::None => None,
            SyncFlags::PreLogrotate => Some("pre-logrotate"),
            SyncFlags::PostLogrotate => Some("post-logrotate"),
        }
    }
}

/// One size/time unit of the rotate-spec grammar `<N>(KB|MB|GB|sec|min|hour|day).<nbackup>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RotateTrigger {
    Bytes(u64),
    Seconds(u64),
}

#[derive(Debug, Clone, Copy)]
pub struct RotateSpec {
    pub trigger: RotateTrigger,
    pub backup_count: u32,
}

impl RotateSpec {
    /// Parse `"10MB.5"` or `"1day.7"` (§4.2.1, §8.1). Binary size units.
    pub fn parse(s: &str) -> Result<RotateSpec, ConfigError> {
        let bad = |reason: &str| ConfigError::BadRotateSpec(s.to_string(), reason.to_string());

        let (amount_unit, backup) = s.split_once('.').ok_or_else(|| bad("missing .<nbackup> suffix"))?;
        let backup_count: u32 = backup.parse().map_err(|_| bad("backup count is not a number"))?;

        const UNITS: &[(&str, u64)] = &[
            ("KB", 1 << 10),
            ("MB", 1 << 20),
            ("GB", 1 << 30),
        ];
        const TIME_UNITS: &[(&str, u64)] = &[
            ("sec", 1),
            ("min", 60),
            ("hour", 3600),
            ("day", 86400),
        ];

        for (suffix, mul) in UNITS {
            if let Some(n) = amount_unit.strip_suffix(suffix) {
                let n: u64 = n.parse().map_err(|_| bad("amount is not a number"))?;
                return Ok(RotateSpec { trigger: RotateTrigger::Bytes(n * mul), backup_count });
            }
        }
        for (suffix, mul) in TIME_UNITS {
            if let Some(n) = amount_unit.strip_suffix(suffix) {
                let n: u64 = n.parse().map_err(|_| bad("amount is not a number"))?;
                return Ok(RotateSpec { trigger: RotateTrigger::Seconds(n * mul), backup_count });
            }
        }
        Err(bad("unrecognized unit (want KB|MB|GB|sec|min|hour|day)"))
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event")]
pub enum XlogEvent {
    #[serde(rename = "start")]
    Start { utc: f64 },
    #[serde(rename = "service attach")]
    ServiceAttach { utc: f64 },
    #[serde(rename = "service detach")]
    ServiceDetach { utc: f64, cause: String },
    #[serde(rename = "service connect failure")]
    ServiceConnectFailure { utc: f64, cause: String },
    #[serde(rename = "sync")]
    Sync {
        utc: f64,
        srv_time: f64,
        srv_utc: f64,
        state: String,
        generator: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        flags: Option<&'static str>,
    },
    #[serde(rename = "xlog failure")]
    XlogFailure { utc: f64, cause: String },
}

pub fn sync_event(
    utc: f64,
    srv_time: f64,
    srv_utc: f64,
    state: &str,
    specs: &[LogSpec],
    flags: SyncFlags,
) -> XlogEvent {
    XlogEvent::Sync {
        utc,
        srv_time,
        srv_utc,
        state: state.to_string(),
        generator: specs.iter().map(|s| s.format()).collect(),
        flags: flags.as_str(),
    }
}

enum Rotation {
    None,
    Size { threshold: u64, backup_count: u32, written: u64 },
    Time { interval: u64, backup_count: u32, last_rotate: u64 },
}

/// Line-buffered, flushed-per-emission xlog writer. Plain or rotating;
/// rotation only ever happens at a sync-emission boundary (§4.2).
pub struct Writer {
    path: PathBuf,
    file: File,
    rotation: Rotation,
}

impl Writer {
    pub async fn open_plain(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Writer { path, file, rotation: Rotation::None })
    }

    pub async fn open_rotating(path: impl AsRef<Path>, spec: RotateSpec, now_unix: u64) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        let rotation = match spec.trigger {
            RotateTrigger::Bytes(threshold) => Rotation::Size { threshold, backup_count: spec.backup_count, written: 0 },
            RotateTrigger::Seconds(interval) => Rotation::Time { interval, backup_count: spec.backup_count, last_rotate: now_unix },
        };
        Ok(Writer { path, file, rotation })
    }

    /// Write one entry (event or raw server reply), flushing immediately.
    pub async fn write(&mut self, value: &Value) -> std::io::Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        if let Rotation::Size { written, .. } = &mut self.rotation {
            *written += line.len() as u64;
        }
        Ok(())
    }

    pub fn due_for_rotation(&self, now_unix: u64) -> bool {
        match &self.rotation {
            Rotation::None => false,
            Rotation::Size { threshold, written, .. } => *written >= *threshold,
            Rotation::Time { interval, last_rotate, .. } => now_unix.saturating_sub(*last_rotate) >= *interval,
        }
    }

    /// Shift `path.1..backup_count-1` up one slot, drop anything beyond
    /// `backup_count`, move the current file to `path.1`, reopen fresh.
    pub async fn rotate(&mut self, now_unix: u64) -> std::io::Result<()> {
        let backup_count = match &self.rotation {
            Rotation::None => {
                warn!("xlog: rotate() called on a non-rotating writer, ignoring");
                return Ok(());
            }
            Rotation::Size { backup_count, .. } | Rotation::Time { backup_count, .. } => *backup_count,
        };

        if backup_count > 0 {
            let oldest = self.path.with_extension(format!("{}", backup_count));
            let _ = tokio::fs::remove_file(&oldest).await;
            for i in (1..backup_count).rev() {
                let src = self.path.with_extension(format!("{}", i));
                let dst = self.path.with_extension(format!("{}", i + 1));
                if tokio::fs::metadata(&src).await.is_ok() {
                    let _ = tokio::fs::rename(&src, &dst).await;
                }
            }
            let dst1 = self.path.with_extension("1");
            tokio::fs::rename(&self.path, &dst1).await?;
        } else {
            tokio::fs::remove_file(&self.path).await.ok();
        }

        self.file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        match &mut self.rotation {
            Rotation::Size { written, .. } => *written = 0,
            Rotation::Time { last_rotate, .. } => *last_rotate = now_unix,
            Rotation::None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_rotate_spec_uses_binary_units() {
        let spec = RotateSpec::parse("10MB.5").unwrap();
        assert_eq!(spec.trigger, RotateTrigger::Bytes(10 * (1 << 20)));
        assert_eq!(spec.backup_count, 5);
    }

    #[test]
    fn time_rotate_spec_parses_days() {
        let spec = RotateSpec::parse("1day.7").unwrap();
        assert_eq!(spec.trigger, RotateTrigger::Seconds(86400));
        assert_eq!(spec.backup_count, 7);
    }

    #[test]
    fn invalid_unit_rejected() {
        assert!(RotateSpec::parse("10XB.5").is_err());
    }

    #[tokio::test]
    async fn rotation_moves_current_file_to_backup_slot_and_resets_counter() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("xlte-xlog-test-{}.jsonl", std::process::id()));
        let _ = tokio::fs::remove_file(&path).await;
        let backup1 = path.with_extension("1");
        let _ = tokio::fs::remove_file(&backup1).await;

        let spec = RotateSpec { trigger: RotateTrigger::Bytes(1), backup_count: 2 };
        let mut w = Writer::open_rotating(&path, spec, 0).await.unwrap();

        w.write(&serde_json::json!({"event": "pre-logrotate", "seq": 1})).await.unwrap();
        assert!(w.due_for_rotation(0));
        w.rotate(1).await.unwrap();
        w.write(&serde_json::json!({"event": "post-logrotate", "seq": 2})).await.unwrap();

        let backed_up = tokio::fs::read_to_string(&backup1).await.unwrap();
        assert!(backed_up.contains("pre-logrotate"));

        let current = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(current.contains("post-logrotate"));
        assert!(!current.contains("pre-logrotate"));

        tokio::fs::remove_file(&path).await.ok();
        tokio::fs::remove_file(&backup1).await.ok();
    }
}
