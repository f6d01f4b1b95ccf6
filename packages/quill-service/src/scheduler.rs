//! The periodic indexing loop.

use std::{sync::Arc, time::Duration};

use tokio::time::{self, MissedTickBehavior};

use crate::CompanionService;

/// Drives indexing cycles forever; the first runs immediately, the rest on
/// the configured interval. Meant to be spawned once at startup.
///
/// A configured forced rebuild stays in effect until a cycle completes, so a
/// crash mid-rebuild repeats the full scan on the next start.
pub async fn run_scheduler(service: Arc<CompanionService>) {
	let mut interval =
		time::interval(Duration::from_secs(service.cfg.index.refresh_interval_secs.max(1)));

	interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

	let mut force_full = service.cfg.index.force_rebuild;

	loop {
		interval.tick().await;

		match service.try_index_cycle(force_full).await {
			Ok(Some(_)) => force_full = false,
			Ok(None) =>
				tracing::debug!("An indexing cycle is still running; skipping this tick."),
			Err(err) =>
				tracing::warn!(error = %err, "Indexing cycle failed; retrying on the next tick."),
		}
	}
}
