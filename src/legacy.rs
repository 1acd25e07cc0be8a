// Downstream legacy jobs (RRD update, period rollover), launched after each complete cycle.
// Fire-and-forget: spawned in order, never awaited or retried.

use tokio::process::Command;
use tracing::{info, warn};

/// Spawns each job (`program [args...]`) in order. Returns how many started.
pub fn launch_jobs(jobs: &[String]) -> usize {
    let mut started = 0;
    for job in jobs {
        let mut parts = job.split_whitespace();
        let Some(program) = parts.next() else {
            continue;
        };
        match Command::new(program).args(parts).spawn() {
            Ok(child) => {
                info!(job = %job, pid = ?child.id(), "legacy job started");
                started += 1;
            }
            Err(e) => warn!(job = %job, error = %e, "legacy job failed to start"),
        }
    }
    started
}
