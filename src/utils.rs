use std::time::Duration;

use tracing::{info, warn};

/// Pin the calling thread to the `index`-th available core
pub fn pin_current_thread(index: usize) -> bool {
    let Some(cores) = core_affinity::get_core_ids() else {
        warn!("Could not enumerate CPU cores, worker left unpinned");
        return false;
    };
    match cores.get(index) {
        Some(core) if core_affinity::set_for_current(*core) => {
            info!("Pinned thread to core {}", core.id);
            true
        }
        Some(_) => {
            warn!("Failed to pin thread to core {}", index);
            false
        }
        None => {
            warn!("Core {} out of range ({} available)", index, cores.len());
            false
        }
    }
}

/// Fractional milliseconds, for logs
pub fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}
