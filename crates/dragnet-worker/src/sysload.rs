//! Host load sampling reported beside the worker heartbeat.

use dragnet_core::wire::LoadAvg;

/// 1/5/15-minute load averages. Platforms without the concept report
/// zeroes.
pub fn sample_load() -> LoadAvg {
    #[cfg(unix)]
    {
        let avg = sysinfo::System::load_average();
        LoadAvg {
            load1: avg.one,
            load5: avg.five,
            load15: avg.fifteen,
        }
    }

    #[cfg(not(unix))]
    {
        LoadAvg::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_never_panics() {
        let load = sample_load();
        assert!(load.load1 >= 0.0);
        assert!(load.load5 >= 0.0);
        assert!(load.load15 >= 0.0);
    }
}
