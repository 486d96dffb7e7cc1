//! Asset and vulnerability records plus risk scoring.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk level derived purely from the CVSS-style risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Threshold ladder: >=9.0 critical, >=7.0 high, >=4.0 medium, >0 low,
    /// else info.
    pub fn from_score(score: f64) -> Self {
        if score >= 9.0 {
            RiskLevel::Critical
        } else if score >= 7.0 {
            RiskLevel::High
        } else if score >= 4.0 {
            RiskLevel::Medium
        } else if score > 0.0 {
            RiskLevel::Low
        } else {
            RiskLevel::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Info => "info",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Stable asset record keyed by (workspace, host, port).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub workspace_id: String,
    pub host: String,
    pub port: u16,
    /// Canonical `host:port` key.
    pub authority: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub title: String,
    /// Technology fingerprints.
    #[serde(default)]
    pub technologies: Vec<String>,
    /// Labels are a set: no duplicates.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub icon_hash: Option<Vec<u8>>,
    /// Monotonically non-decreasing over the asset lifetime.
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub last_scan_time: Option<DateTime<Utc>>,
}

impl Asset {
    pub fn new(workspace_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let now = Utc::now();
        Asset {
            id: format!("{host}:{port}"),
            workspace_id: workspace_id.into(),
            authority: format!("{host}:{port}"),
            host,
            port,
            service: String::new(),
            title: String::new(),
            technologies: Vec::new(),
            labels: BTreeSet::new(),
            source: String::new(),
            http_status: None,
            icon_hash: None,
            risk_score: 0.0,
            risk_level: RiskLevel::Info,
            first_seen: now,
            last_seen: now,
            last_scan_time: None,
        }
    }

    /// Raise the risk score if `score` exceeds the current value; the level
    /// follows the score. A lower score never lowers it.
    pub fn raise_risk(&mut self, score: f64) -> bool {
        if score > self.risk_score {
            self.risk_score = score;
            self.risk_level = RiskLevel::from_score(score);
            true
        } else {
            false
        }
    }
}

/// Semantic dedup key for a vulnerability within one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VulnKey {
    pub host: String,
    pub port: u16,
    pub poc_file: String,
    pub url: String,
}

/// Deduplicated vulnerability finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub workspace_id: String,
    pub host: String,
    pub port: u16,
    pub authority: String,
    pub url: String,
    pub poc_file: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub cvss_score: f64,
    #[serde(default)]
    pub cve_id: String,
    #[serde(default)]
    pub cwe_id: String,
    /// Name of the matcher that fired.
    #[serde(default)]
    pub matcher_name: String,
    /// Extracted indicators.
    #[serde(default)]
    pub extracted_results: Vec<String>,
    #[serde(default)]
    pub curl_command: String,
    #[serde(default)]
    pub request: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub remediation: String,
    #[serde(default)]
    pub references: Vec<String>,
    /// Main task that last reported this finding.
    #[serde(default)]
    pub task_id: String,
    pub scan_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Vulnerability {
    pub fn key(&self) -> VulnKey {
        VulnKey {
            host: self.host.clone(),
            port: self.port,
            poc_file: self.poc_file.clone(),
            url: self.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(9.8), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(9.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(8.5), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(7.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(5.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(4.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.1), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Info);
    }

    #[test]
    fn risk_score_is_monotone() {
        let mut asset = Asset::new("w1", "10.0.0.1", 80);
        assert!(asset.raise_risk(6.5));
        assert_eq!(asset.risk_level, RiskLevel::Medium);

        // A lower follow-up finding never lowers the score.
        assert!(!asset.raise_risk(2.0));
        assert_eq!(asset.risk_score, 6.5);
        assert_eq!(asset.risk_level, RiskLevel::Medium);

        assert!(asset.raise_risk(9.1));
        assert_eq!(asset.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn labels_behave_as_a_set() {
        let mut asset = Asset::new("w1", "10.0.0.1", 443);
        asset.labels.insert("cdn".to_string());
        asset.labels.insert("cdn".to_string());
        asset.labels.insert("login".to_string());
        assert_eq!(asset.labels.len(), 2);
    }
}
