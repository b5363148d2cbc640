//! Host load sampling for server-role heartbeats.

use systemstat::{Platform, System};
use tracing::warn;

/// Host load at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostLoad {
    /// One-minute load average.
    pub cpu: f64,
    /// Memory in use, in percent of total.
    pub memory: f64,
}

/// Sample the host. Figures the platform cannot report are `0.0`.
pub fn sample() -> HostLoad {
    let sys = System::new();
    let cpu = match sys.load_average() {
        Ok(load) => f64::from(load.one),
        Err(e) => {
            warn!(error = %e, "Load average unavailable");
            0.0
        }
    };
    let memory = match sys.memory() {
        Ok(mem) => memory_percent(mem.total.as_u64(), mem.free.as_u64()),
        Err(e) => {
            warn!(error = %e, "Memory usage unavailable");
            0.0
        }
    };
    HostLoad { cpu, memory }
}

fn memory_percent(total: u64, free: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    total.saturating_sub(free) as f64 / total as f64 * 100.0
}
