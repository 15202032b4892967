use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::pipeline::FetchPipeline;
use crate::store::ArchiveDao;

use super::window::FetchWindow;

/// One supervised worker per season.
///
/// The worker owns its timer and cancellation scope. Ticks run inline in
/// the loop, so a tick that outlives its interval makes the timer skip
/// the missed firing instead of queueing it: ticks of one job never overlap.
pub(crate) struct JobRuntime {
    season_id: Uuid,
    interval: Duration,
    dao: Arc<ArchiveDao>,
    pipeline: Arc<FetchPipeline>,
    cancel: CancellationToken,
}

impl JobRuntime {
    pub(crate) fn spawn(
        season_id: Uuid,
        interval: Duration,
        dao: Arc<ArchiveDao>,
        pipeline: Arc<FetchPipeline>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let runtime = Self {
            season_id,
            interval,
            dao,
            pipeline,
            cancel,
        };
        tokio::spawn(async move {
            runtime.run().await;
        })
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // interval's first firing resolves immediately; consume it so the
        // first real tick lands one full interval after start.
        tokio::select! {
            () = self.cancel.cancelled() => {
                info!(season_id = %self.season_id, "season worker cancelled before first tick");
                return;
            }
            _ = ticker.tick() => {}
        }

        info!(
            season_id = %self.season_id,
            interval_secs = self.interval.as_secs(),
            "season worker started"
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick_once().await;
        }

        info!(season_id = %self.season_id, "season worker stopped");
    }

    /// One timer firing. Never panics the worker: a failed tick is logged
    /// and the next tick still fires.
    async fn tick_once(&self) {
        // configsテーブルが常に正。ティックごとに読み直す。
        let config = match self.dao.config_by_season(self.season_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                warn!(season_id = %self.season_id, "config vanished, skipping tick");
                return;
            }
            Err(error) => {
                error!(season_id = %self.season_id, error = %format!("{error:#}"), "failed to load config for tick");
                return;
            }
        };

        if !config.is_active {
            // 停止操作との競合。ワーカー側の解体は間もなく追いつく。
            debug!(season_id = %self.season_id, "config inactive, skipping tick");
            return;
        }

        if config.is_paused {
            debug!(season_id = %self.season_id, "scheduler paused, skipping tick");
            return;
        }

        let window = FetchWindow::from_config(&config);
        if !window.admits(Utc::now()) {
            debug!(season_id = %self.season_id, "outside fetch window, skipping tick");
            return;
        }

        match self.pipeline.run_tick(&config, &self.cancel).await {
            Ok(outcome) => {
                debug!(
                    season_id = %self.season_id,
                    run_id = %outcome.run_id,
                    status = %outcome.status,
                    "tick completed"
                );
            }
            Err(error) => {
                error!(
                    season_id = %self.season_id,
                    error = %format!("{error:#}"),
                    "tick crashed"
                );
            }
        }
    }
}
