//! `LogSpec` grammar: `<query>[<opt,opt,…>]/<period>s` (§6, §8.1).

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub struct LogSpec {
    pub query: String,
    pub optv: Vec<String>,
    pub period: f64,
}

const DEFAULT_PERIOD: f64 = 60.0;

impl LogSpec {
    pub fn new(query: impl Into<String>, optv: Vec<String>, period: f64) -> Self {
        LogSpec { query: query.into(), optv, period }
    }

    /// Parse `"stats[rf,samples]/30s"` or a bare `"ue_get"` (period defaults
    /// to 60s, options default to empty). A period fragment missing the `s`
    /// suffix is rejected.
    pub fn parse(s: &str) -> Result<LogSpec, ConfigError> {
        let bad = |reason: &str| ConfigError::BadLogSpec(s.to_string(), reason.to_string());

        let (body, period) = match s.split_once('/') {
            Some((body, period_str)) => {
                let stripped = period_str
                    .strip_suffix('s')
                    .ok_or_else(|| bad("period must end in 's'"))?;
                let period: f64 = stripped.parse().map_err(|_| bad("period is not a number"))?;
                if period <= 0.0 {
                    return Err(bad("period must be positive"));
                }
                (body, period)
            }
            None => (s, DEFAULT_PERIOD),
        };

        let (query, optv) = match body.split_once('[') {
            Some((query, rest)) => {
                let opts = rest.strip_suffix(']').ok_or_else(|| bad("unterminated option list"))?;
                let optv: Vec<String> = if opts.is_empty() {
                    Vec::new()
                } else {
                    opts.split(',').map(|o| o.trim().to_string()).collect()
                };
                (query, optv)
            }
            None => (body, Vec::new()),
        };

        if query.is_empty() {
            return Err(bad("query name is empty"));
        }

        Ok(LogSpec { query: query.to_string(), optv, period })
    }

    pub fn format(&self) -> String {
        let opts = if self.optv.is_empty() {
            String::new()
        } else {
            format!("[{}]", self.optv.join(","))
        };
        format!("{}{}/{}s", self.query, opts, self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_with_options_and_period() {
        let spec = LogSpec::parse("stats[rf,samples]/30s").unwrap();
        assert_eq!(spec.query, "stats");
        assert_eq!(spec.optv, vec!["rf".to_string(), "samples".to_string()]);
        assert_eq!(spec.period, 30.0);
    }

    #[test]
    fn bare_query_defaults_period_and_options() {
        let spec = LogSpec::parse("ue_get").unwrap();
        assert_eq!(spec.query, "ue_get");
        assert!(spec.optv.is_empty());
        assert_eq!(spec.period, DEFAULT_PERIOD);
    }

    #[test]
    fn missing_s_suffix_is_rejected() {
        assert!(LogSpec::parse("stats/30").is_err());
    }

    #[test]
    fn round_trips_through_format() {
        let spec = LogSpec::parse("stats[rf,samples]/30s").unwrap();
        assert_eq!(spec.format(), "stats[rf,samples]/30s");
    }
}
