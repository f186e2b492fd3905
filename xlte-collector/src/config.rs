//! Runtime configuration, read from the environment. Grounded on
//! `uwb_hub.rs`'s `UwbHubConfig::default()` pattern — out-of-scope CLI
//! front-end (§6) is replaced by env vars here.

/// Fixed upper bound between successive sync events a Reader will tolerate
/// before raising a loss-of-sync error (§4.2, §4.5, Glossary).
pub const LOS_WINDOW: usize = 1000;

/// 1 TTI in seconds.
pub const TTI: f64 = 0.001;

pub struct CollectorConfig {
    /// Base station WebSocket URI, e.g. "ws://10.0.0.1:9001".
    pub ws_uri: String,
    /// Optional authentication password (§4.1).
    pub password: Option<String>,
    /// xlog output path.
    pub output_path: String,
    /// Optional rotate-spec, parsed by `xlog::RotateSpec::parse` (§4.2.1).
    pub rotate_spec: Option<String>,
    /// Raw log-spec strings, parsed by `logspec::LogSpec::parse` (§4.2.1, §6).
    pub log_specs: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            ws_uri: std::env::var("XLTE_WS_URI").unwrap_or_else(|_| "ws://127.0.0.1:9001".to_string()),
            password: std::env::var("XLTE_PASSWORD").ok(),
            output_path: std::env::var("XLTE_OUTPUT").unwrap_or_else(|_| "xlte.log".to_string()),
            rotate_spec: std::env::var("XLTE_ROTATE").ok(),
            log_specs: std::env::var("XLTE_SPECS")
                .unwrap_or_else(|_| "stats/10s,ue_get/10s,erab_get/30s,x.drb_stats/10s".to_string())
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_string())
                .collect(),
        }
    }
}
