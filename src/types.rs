use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One backend's entry in a metric snapshot.
///
/// Snapshots are ordered by backend id and immutable once produced; every
/// consumer (selection, admin API, WebSocket stream, advisory pipeline) works
/// on its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendMetrics {
    pub id: usize,
    pub url: String,
    pub alive: bool,
    pub ema_ms: f64,
    pub error_rate: f64,
    /// ISO-8601 timestamp of the most recent probe, empty before the first.
    pub last_checked: String,
}

/// Severity attached to a decision record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Advisory record emitted by the breaker fleet and the weight optimizer.
///
/// Decisions are surfaced to logs and the admin API; they never gate routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub url: String,
    pub severity: Severity,
    pub reason: String,
    pub time: DateTime<Utc>,
}

impl Decision {
    pub fn new<S: Into<String>>(severity: Severity, reason: S) -> Self {
        Self {
            url: String::new(),
            severity,
            reason: reason.into(),
            time: Utc::now(),
        }
    }

    /// Stamp the backend URL onto a decision produced without one.
    pub fn for_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_serialization() {
        let m = BackendMetrics {
            id: 0,
            url: "http://localhost:8080".to_string(),
            alive: true,
            ema_ms: 12.5,
            error_rate: 0.0,
            last_checked: "2024-01-01T00:00:00+00:00".to_string(),
        };

        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"ema_ms\":12.5"));
        assert!(json.contains("\"alive\":true"));

        let back: BackendMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_severity_is_lowercase_on_the_wire() {
        let d = Decision::new(Severity::Critical, "circuit opened").for_url("http://a:1");
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"severity\":\"critical\""));
        assert!(json.contains("\"url\":\"http://a:1\""));
    }
}
