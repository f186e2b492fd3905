//! Reader — JSON-Lines parser with sync recovery, forward or reverse
//! (§4.5). The reverse line reader is a byte-level backward scanner
//! independent of any JSON semantics; the Reader itself is symmetric in
//! forward/reverse mode modulo line-number sign.

use std::io::SeekFrom;

use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};

use crate::config::LOS_WINDOW;
use crate::error::ReaderError;

#[derive(Debug, Clone)]
pub enum Entry {
    Event { name: String, raw: Value },
    Sync { utc: f64, srv_time: f64, srv_utc: f64, state: String, generator: Vec<String>, flags: Option<String> },
    Message { raw: Value, utc: f64 },
    ParseError(String),
    Los(usize),
    Eof,
}

/// Forward line source: reads a file top to bottom, line numbers from 1.
pub struct ForwardLines {
    lines: tokio::io::Lines<BufReader<File>>,
    line_no: i64,
}

impl ForwardLines {
    pub async fn open(path: &str) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        Ok(ForwardLines { lines: BufReader::new(file).lines(), line_no: 0 })
    }

    pub async fn next(&mut self) -> std::io::Result<Option<(i64, String)>> {
        match self.lines.next_line().await? {
            Some(line) => {
                self.line_no += 1;
                Ok(Some((self.line_no, line)))
            }
            None => Ok(None),
        }
    }
}

/// Reverse line source: scans a file from end to start for `\n`, yielding
/// lines (trailing `\n` intact) in reverse order. Line numbers are
/// negative, -1 = last line. Works for any internal chunk size from 1
/// byte up to the whole file.
pub struct ReverseLines {
    file: File,
    /// File offset that `buf`'s first byte corresponds to.
    pos: u64,
    /// Bytes from `pos` to the right edge already consumed by `ready`.
    buf: Vec<u8>,
    /// Complete lines (trailing `\n` intact) waiting to be emitted,
    /// right-to-left (front = next to emit).
    ready: std::collections::VecDeque<Vec<u8>>,
    chunk_size: usize,
    line_no: i64,
}

impl ReverseLines {
    pub async fn open(path: &str) -> std::io::Result<Self> {
        Self::open_with_chunk_size(path, 64 * 1024).await
    }

    pub async fn open_with_chunk_size(path: &str, chunk_size: usize) -> std::io::Result<Self> {
        let mut file = File::open(path).await?;
        let len = file.seek(SeekFrom::End(0)).await?;
        Ok(ReverseLines {
            file,
            pos: len,
            buf: Vec::new(),
            ready: std::collections::VecDeque::new(),
            chunk_size: chunk_size.max(1),
            line_no: 0,
        })
    }

    /// Returns the next line reading backward, or `None` at start of file.
    pub async fn next(&mut self) -> std::io::Result<Option<(i64, String)>> {
        loop {
            if let Some(bytes) = self.ready.pop_front() {
                self.line_no -= 1;
                return Ok(Some((self.line_no, String::from_utf8_lossy(&bytes).to_string())));
            }

            if self.buf.contains(&b'\n') {
                // Only the leftmost split piece may be incomplete (it may
                // continue further left); every piece after it is bounded
                // by `\n` on the right and is complete.
                let pieces: Vec<Vec<u8>> = self.buf.split_inclusive(|&b| b == b'\n').map(Vec::from).collect();
                if self.pos == 0 {
                    for p in pieces.into_iter().rev() {
                        self.ready.push_back(p);
                    }
                    self.buf.clear();
                } else {
                    let mut iter = pieces.into_iter();
                    let remainder = iter.next().unwrap_or_default();
                    for p in iter.rev() {
                        self.ready.push_back(p);
                    }
                    self.buf = remainder;
                }
                continue;
            }

            if self.pos == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buf);
                self.line_no -= 1;
                return Ok(Some((self.line_no, String::from_utf8_lossy(&line).to_string())));
            }

            let read_len = self.chunk_size.min(self.pos as usize);
            self.pos -= read_len as u64;
            self.file.seek(SeekFrom::Start(self.pos)).await?;
            let mut chunk = vec![0u8; read_len];
            self.file.read_exact(&mut chunk).await?;
            chunk.extend_from_slice(&self.buf);
            self.buf = chunk;
        }
    }
}

/// The forward/reverse-agnostic JSON-Lines decoder with readahead for
/// sync coverage and loss-of-sync detection (§4.5).
pub struct Reader {
    pending: Vec<(i64, Value)>,
    covering_sync: Option<(f64, f64)>, // (utc, srv_time) of the last "attached" sync
    since_sync: usize,
    emit_queue: std::collections::VecDeque<Entry>,
}

impl Default for Reader {
    fn default() -> Self {
        Reader { pending: Vec::new(), covering_sync: None, since_sync: 0, emit_queue: std::collections::VecDeque::new() }
    }
}

impl Reader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded line; returns entries now ready to yield (may be
    /// more than one — a covering sync flushes the whole pending queue).
    pub fn feed(&mut self, line_no: i64, line: &str) -> Vec<Entry> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                self.flush_pending_as_parse_error();
                return vec![Entry::ParseError(format!("line {line_no}: {e}"))];
            }
        };

        let message = value.get("event").and_then(Value::as_str).or_else(|| value.get("message").and_then(Value::as_str));

        if message == Some("sync") {
            self.since_sync = 0;
            let state = value.get("state").and_then(Value::as_str).unwrap_or("").to_string();
            let utc = value.get("utc").and_then(Value::as_f64).unwrap_or(f64::NAN);
            let srv_time = value.get("srv_time").and_then(Value::as_f64).unwrap_or(f64::NAN);
            let srv_utc = value.get("srv_utc").and_then(Value::as_f64).unwrap_or(f64::NAN);
            let generator = value
                .get("generator")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            let flags = value.get("flags").and_then(Value::as_str).map(str::to_string);

            let mut out = self.drain_pending_with_covering_sync();
            if state == "attached" {
                self.covering_sync = Some((utc, srv_utc));
            }
            out.push(Entry::Sync { utc, srv_time, srv_utc, state, generator, flags });
            return self.check_los(out);
        }

        if let Some(name) = message {
            self.since_sync += 1;
            let mut out = self.drain_pending_with_covering_sync();
            out.push(Entry::Event { name: name.to_string(), raw: value });
            return self.check_los(out);
        }

        // A plain message (raw server reply): queue until the next sync.
        self.since_sync += 1;
        self.pending.push((line_no, value));
        self.check_los(Vec::new())
    }

    pub fn eof(&mut self) -> Vec<Entry> {
        let mut out = self.drain_pending_with_covering_sync();
        out.push(Entry::Eof);
        out
    }

    fn flush_pending_as_parse_error(&mut self) {
        self.pending.clear();
    }

    fn drain_pending_with_covering_sync(&mut self) -> Vec<Entry> {
        let mut out = Vec::with_capacity(self.pending.len());
        for (_, raw) in self.pending.drain(..) {
            let utc = match raw.get("utc").and_then(Value::as_f64) {
                Some(utc) => utc,
                None => match (&self.covering_sync, raw.get("time").and_then(Value::as_f64)) {
                    (Some((cov_utc, cov_srv)), Some(time_field)) => time_field + (cov_utc - cov_srv),
                    _ => {
                        out.push(Entry::ParseError("message without utc and no covering sync available".into()));
                        continue;
                    }
                },
            };
            out.push(Entry::Message { raw, utc });
        }
        out
    }

    fn check_los(&mut self, mut out: Vec<Entry>) -> Vec<Entry> {
        if self.since_sync > LOS_WINDOW {
            out.push(Entry::Los(self.since_sync));
            self.since_sync = 0;
        }
        out
    }
}

pub fn reader_error_from_entry(entry: &Entry) -> Option<ReaderError> {
    match entry {
        Entry::ParseError(reason) => Some(ReaderError::Parse { line: 0, reason: reason.clone() }),
        Entry::Los(n) => Some(ReaderError::Los(*n)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_without_utc_gets_reconstructed_timestamp() {
        let mut r = Reader::new();
        let sync_line = r#"{"event":"sync","state":"attached","utc":100.0,"srv_time":10.0,"srv_utc":100.0,"generator":[]}"#;
        let out = r.feed(1, sync_line);
        assert!(matches!(out.last(), Some(Entry::Sync { .. })));

        let msg_line = r#"{"message":"stats","time":15.0}"#;
        let out = r.feed(2, msg_line);
        let Entry::Message { utc, .. } = &out[0] else { panic!("expected message") };
        assert!((*utc - 105.0).abs() < 1e-9);
    }

    #[test]
    fn message_without_covering_sync_is_a_parse_error() {
        let mut r = Reader::new();
        let msg_line = r#"{"message":"stats"}"#;
        r.feed(1, msg_line);
        let out = r.eof();
        assert!(out.iter().any(|e| matches!(e, Entry::ParseError(_))));
    }

    #[test]
    fn loss_of_sync_detected_after_window() {
        let mut r = Reader::new();
        let sync_line = r#"{"event":"sync","state":"attached","utc":0.0,"srv_time":0.0,"srv_utc":0.0,"generator":[]}"#;
        r.feed(1, sync_line);
        let mut saw_los = false;
        for i in 0..(LOS_WINDOW + 2) {
            let line = format!(r#"{{"event":"service attach","utc":{i}.0}}"#);
            if r.feed(2 + i as i64, &line).iter().any(|e| matches!(e, Entry::Los(_))) {
                saw_los = true;
            }
        }
        assert!(saw_los);
    }

    #[tokio::test]
    async fn reverse_reader_matches_forward_reversed_for_various_chunk_sizes() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("xlte-reader-test-{}.jsonl", std::process::id()));
        let content = "{\"a\":1}\n{\"b\":2}\n{\"c\":3}\n";
        tokio::fs::write(&path, content).await.unwrap();

        let mut fwd = ForwardLines::open(path.to_str().unwrap()).await.unwrap();
        let mut forward_lines = Vec::new();
        while let Some((_, line)) = fwd.next().await.unwrap() {
            forward_lines.push(line);
        }

        for chunk_size in [1usize, 2, 3, 7, 64, 4096] {
            let mut rev = ReverseLines::open_with_chunk_size(path.to_str().unwrap(), chunk_size).await.unwrap();
            let mut reverse_lines = Vec::new();
            while let Some((_, line)) = rev.next().await.unwrap() {
                reverse_lines.push(line.trim_end_matches('\n').to_string());
            }
            reverse_lines.reverse();
            assert_eq!(reverse_lines, forward_lines, "mismatch at chunk_size={chunk_size}");
        }

        tokio::fs::remove_file(&path).await.ok();
    }
}
