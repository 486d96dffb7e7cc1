//! Vulnerability batch ingestion: dedup upsert plus asset risk roll-up.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use dragnet_core::wire::{SaveVulnBatchRequest, SaveVulnBatchResponse, VulnReport, CODE_OK};
use dragnet_core::{format_authority, Vulnerability};
use dragnet_state::ScanStore;

/// Workspace used when a batch does not name one.
const DEFAULT_WORKSPACE: &str = "default";

pub struct ResultIngestor {
    scan: Arc<dyn ScanStore>,
}

impl ResultIngestor {
    pub fn new(scan: Arc<dyn ScanStore>) -> Self {
        ResultIngestor { scan }
    }

    /// Ingest one batch. Replaying the same batch is safe: dedup keys keep
    /// one row per finding and only `scan_count`/`last_seen` move. A single
    /// failed upsert is logged and skipped; the response carries the count
    /// of successful writes.
    pub async fn save(&self, request: &SaveVulnBatchRequest) -> SaveVulnBatchResponse {
        if request.vulnerabilities.is_empty() {
            return SaveVulnBatchResponse {
                code: CODE_OK,
                success: true,
                msg: "no vulnerabilities to save".to_string(),
                total: 0,
            };
        }

        let workspace_id = if request.workspace_id.is_empty() {
            DEFAULT_WORKSPACE
        } else {
            &request.workspace_id
        };

        let mut saved = 0u32;
        for report in &request.vulnerabilities {
            let vuln = to_vulnerability(workspace_id, &request.main_task_id, report);
            match self.scan.upsert_vuln(&vuln).await {
                Ok(_) => saved += 1,
                Err(e) => {
                    error!(
                        host = %report.host,
                        poc = %report.poc_file,
                        error = %e,
                        "failed to upsert vulnerability"
                    );
                }
            }
        }

        // Aggregate the highest CVSS per authority before touching assets.
        let mut max_score: HashMap<(String, u16), f64> = HashMap::new();
        for report in &request.vulnerabilities {
            let score = report.cvss_score.unwrap_or(0.0);
            let entry = max_score
                .entry((report.host.clone(), report.port))
                .or_insert(score);
            if score > *entry {
                *entry = score;
            }
        }

        self.roll_up_assets(workspace_id, &max_score).await;

        info!(workspace_id, saved, "vulnerability batch ingested");

        SaveVulnBatchResponse {
            code: CODE_OK,
            success: true,
            msg: "vulnerabilities saved".to_string(),
            total: saved,
        }
    }

    /// Raise `risk_score`/`risk_level` on each touched asset when the batch
    /// observed something worse; always bump `last_scan_time`. Assets not
    /// yet discovered are skipped silently.
    async fn roll_up_assets(&self, workspace_id: &str, max_score: &HashMap<(String, u16), f64>) {
        let now = Utc::now();
        for ((host, port), score) in max_score {
            let asset = match self.scan.find_asset(workspace_id, host, *port).await {
                Ok(Some(asset)) => asset,
                Ok(None) => continue,
                Err(e) => {
                    error!(host = %host, port, error = %e, "asset lookup failed");
                    continue;
                }
            };

            let mut asset = asset;
            asset.raise_risk(*score);
            asset.last_scan_time = Some(now);

            if let Err(e) = self.scan.update_asset(&asset).await {
                error!(host = %host, port, error = %e, "failed to update asset risk");
            }
        }
    }
}

fn to_vulnerability(workspace_id: &str, main_task_id: &str, report: &VulnReport) -> Vulnerability {
    let now = Utc::now();
    Vulnerability {
        workspace_id: workspace_id.to_string(),
        host: report.host.clone(),
        port: report.port,
        authority: format_authority(&report.host, report.port),
        url: report.url.clone(),
        poc_file: report.poc_file.clone(),
        source: report.source.clone(),
        severity: report.severity.clone(),
        cvss_score: report.cvss_score.unwrap_or(0.0),
        cve_id: report.cve_id.clone(),
        cwe_id: report.cwe_id.clone(),
        matcher_name: report.matcher_name.clone(),
        extracted_results: report.extracted_results.clone(),
        curl_command: report.curl_command.clone(),
        request: report.request.clone(),
        response: report.response.clone(),
        remediation: report.remediation.clone(),
        references: report.references.clone(),
        task_id: main_task_id.to_string(),
        scan_count: 1,
        first_seen: now,
        last_seen: now,
    }
}
