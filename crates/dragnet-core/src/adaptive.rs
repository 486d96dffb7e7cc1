//! Adaptive resource profile.
//!
//! On worker start-up the core count and total RAM are sampled once and the
//! host is classified into a profile that selects fixed engine tuning
//! tuples. The profile is immutable for the process lifetime.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

/// Hardware class of the host running a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemProfile {
    /// <=4 cores or <=4 GB.
    Low,
    /// <=8 cores and <=16 GB.
    Medium,
    High,
}

impl SystemProfile {
    pub fn classify(cpu_cores: usize, total_mem_mb: u64) -> Self {
        if cpu_cores <= 4 || total_mem_mb <= 4096 {
            SystemProfile::Low
        } else if cpu_cores <= 8 && total_mem_mb <= 16384 {
            SystemProfile::Medium
        } else {
            SystemProfile::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SystemProfile::Low => "low",
            SystemProfile::Medium => "medium",
            SystemProfile::High => "high",
        }
    }
}

/// Engine tuning derived from the system profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveScanConfig {
    pub profile: SystemProfile,
    pub cpu_cores: usize,
    pub total_mem_mb: u64,

    // Port scanner (naabu)
    pub naabu_rate: u32,
    pub naabu_workers: u32,
    pub naabu_retries: u32,

    // POC engine (nuclei)
    pub nuclei_concurrency: u32,
    pub nuclei_rate_limit: u32,
    pub nuclei_retries: u32,

    // Fingerprint engine
    pub fingerprint_concurrency: u32,
    pub fingerprint_timeout_secs: u32,
    pub fingerprint_target_timeout_secs: u32,
}

impl AdaptiveScanConfig {
    pub fn for_host(cpu_cores: usize, total_mem_mb: u64) -> Self {
        let profile = SystemProfile::classify(cpu_cores, total_mem_mb);
        let mut config = AdaptiveScanConfig {
            profile,
            cpu_cores,
            total_mem_mb,
            naabu_rate: 0,
            naabu_workers: 0,
            naabu_retries: 0,
            nuclei_concurrency: 0,
            nuclei_rate_limit: 0,
            nuclei_retries: 0,
            fingerprint_concurrency: 0,
            fingerprint_timeout_secs: 0,
            fingerprint_target_timeout_secs: 0,
        };

        match profile {
            SystemProfile::Low => {
                config.naabu_rate = 500;
                config.naabu_workers = 10;
                config.naabu_retries = 1;
                config.nuclei_concurrency = 5;
                config.nuclei_rate_limit = 50;
                config.nuclei_retries = 1;
                config.fingerprint_concurrency = 3;
                config.fingerprint_timeout_secs = 600;
                config.fingerprint_target_timeout_secs = 20;
            }
            SystemProfile::Medium => {
                config.naabu_rate = 1500;
                config.naabu_workers = 25;
                config.naabu_retries = 2;
                config.nuclei_concurrency = 15;
                config.nuclei_rate_limit = 100;
                config.nuclei_retries = 1;
                config.fingerprint_concurrency = 5;
                config.fingerprint_timeout_secs = 300;
                config.fingerprint_target_timeout_secs = 30;
            }
            SystemProfile::High => {
                config.naabu_rate = 3000;
                config.naabu_workers = 50;
                config.naabu_retries = 2;
                config.nuclei_concurrency = 25;
                config.nuclei_rate_limit = 150;
                config.nuclei_retries = 1;
                config.fingerprint_concurrency = 5;
                config.fingerprint_timeout_secs = 300;
                config.fingerprint_target_timeout_secs = 30;
            }
        }

        config
    }

    fn sample() -> Self {
        let cpu_cores = num_cpus::get();
        let mut sys = System::new();
        sys.refresh_memory();
        let total_mem_mb = sys.total_memory() / 1024 / 1024;

        let config = Self::for_host(cpu_cores, total_mem_mb);
        info!(
            profile = config.profile.as_str(),
            cpu_cores, total_mem_mb, "adaptive scan profile selected"
        );
        info!(
            rate = config.naabu_rate,
            workers = config.naabu_workers,
            retries = config.naabu_retries,
            "naabu tuning"
        );
        info!(
            concurrency = config.nuclei_concurrency,
            rate_limit = config.nuclei_rate_limit,
            retries = config.nuclei_retries,
            "nuclei tuning"
        );
        info!(
            concurrency = config.fingerprint_concurrency,
            timeout_secs = config.fingerprint_timeout_secs,
            target_timeout_secs = config.fingerprint_target_timeout_secs,
            "fingerprint tuning"
        );
        config
    }
}

static GLOBAL: OnceLock<AdaptiveScanConfig> = OnceLock::new();

/// Process-wide adaptive config, sampled on first access and never mutated.
pub fn adaptive_config() -> &'static AdaptiveScanConfig {
    GLOBAL.get_or_init(AdaptiveScanConfig::sample)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_classification() {
        assert_eq!(SystemProfile::classify(4, 32768), SystemProfile::Low);
        assert_eq!(SystemProfile::classify(16, 4096), SystemProfile::Low);
        assert_eq!(SystemProfile::classify(8, 16384), SystemProfile::Medium);
        assert_eq!(SystemProfile::classify(6, 8192), SystemProfile::Medium);
        assert_eq!(SystemProfile::classify(16, 65536), SystemProfile::High);
        assert_eq!(SystemProfile::classify(9, 16384), SystemProfile::High);
    }

    #[test]
    fn tuning_tuples_per_profile() {
        let low = AdaptiveScanConfig::for_host(2, 2048);
        assert_eq!(
            (low.naabu_rate, low.naabu_workers, low.naabu_retries),
            (500, 10, 1)
        );
        assert_eq!(low.fingerprint_timeout_secs, 600);

        let medium = AdaptiveScanConfig::for_host(8, 8192);
        assert_eq!(medium.naabu_rate, 1500);
        assert_eq!(medium.nuclei_concurrency, 15);

        let high = AdaptiveScanConfig::for_host(32, 131072);
        assert_eq!(
            (high.naabu_rate, high.naabu_workers, high.naabu_retries),
            (3000, 50, 2)
        );
        assert_eq!(high.nuclei_rate_limit, 150);
    }
}
