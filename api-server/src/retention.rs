use std::time::Duration;

use crate::config::AppState;
use crate::now_unix_s;
use crate::store::SweepReport;

/// One retention pass. Also drops idle per-key lock slots left behind by
/// ingestion.
pub(crate) fn run_sweep(state: &AppState, now: i64) -> Result<SweepReport, String> {
    let horizon = now.saturating_sub(state.retention_secs);
    let report = state.store.sweep(horizon)?;
    state.ingestor.prune_locks();
    Ok(report)
}

pub(crate) fn spawn_retention_task(state: AppState, sweep_secs: u64) {
    tokio::spawn(async move {
        let sweep = Duration::from_secs(sweep_secs);
        loop {
            tokio::time::sleep(sweep).await;

            let pass_state = state.clone();
            let outcome =
                tokio::task::spawn_blocking(move || run_sweep(&pass_state, now_unix_s())).await;
            match outcome {
                Ok(Ok(report)) if report.total() == 0 => {}
                Ok(Ok(report)) => tracing::info!(
                    spawnpoints = report.spawnpoints,
                    sightings = report.sightings,
                    "retention sweep removed stale rows"
                ),
                Ok(Err(e)) => tracing::error!("retention sweep failed: {e}"),
                Err(e) => tracing::error!("retention sweep worker join failure: {e}"),
            }
        }
    });
}
