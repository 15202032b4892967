use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::FetchPipeline;
use crate::store::ArchiveDao;
use crate::store::models::{
    SchedulerConfig, SchedulerConfigDraft, SchedulerConfigPatch,
};

use super::job::JobRuntime;

/// ライフサイクル操作の失敗。APIレイヤはこれをHTTPステータスに写像する。
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("scheduler config not found")]
    NotFound,
    #[error("season not found")]
    SeasonNotFound,
    #[error("scheduler already exists for this season")]
    AlreadyExists,
    #[error("{0}")]
    InvalidTransition(&'static str),
    #[error("{0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// プロセス唯一のジョブ管理者。
///
/// 設定の永続化とワーカーの生成・解体を同じ操作の中で行う。永続化が先、
/// ワーカーはそれに追従するベストエフォート。登録簿の変更はすべて
/// ひとつのミューテックスで直列化される。
pub struct SchedulerManager {
    dao: Arc<ArchiveDao>,
    pipeline: Arc<FetchPipeline>,
    workers: Mutex<HashMap<Uuid, WorkerHandle>>,
    root: CancellationToken,
    shutdown_grace: Duration,
}

impl SchedulerManager {
    pub(crate) fn new(
        dao: Arc<ArchiveDao>,
        pipeline: Arc<FetchPipeline>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            dao,
            pipeline,
            workers: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
            shutdown_grace,
        }
    }

    /// 設定を新規作成する。ワーカーは `start` されるまで存在しない。
    pub(crate) async fn create(
        &self,
        season_id: Uuid,
        draft: &SchedulerConfigDraft,
    ) -> Result<SchedulerConfig, LifecycleError> {
        draft.validate().map_err(LifecycleError::InvalidConfig)?;
        if !self.dao.season_exists(season_id).await? {
            return Err(LifecycleError::SeasonNotFound);
        }
        match self.dao.create_config(season_id, draft).await? {
            Some(config) => Ok(config),
            None => Err(LifecycleError::AlreadyExists),
        }
    }

    /// 設定フィールドを更新する。稼働中ならワーカーを作り直して
    /// 新しいタイミングを反映させる。
    pub(crate) async fn update(
        &self,
        season_id: Uuid,
        patch: &SchedulerConfigPatch,
    ) -> Result<SchedulerConfig, LifecycleError> {
        let mut workers = self.workers.lock().await;

        let current = self
            .dao
            .config_by_season(season_id)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        let draft = SchedulerConfigDraft::merged(&current, patch);
        draft.validate().map_err(LifecycleError::InvalidConfig)?;

        let updated = self
            .dao
            .update_config_fields(season_id, &draft)
            .await?
            .ok_or(LifecycleError::NotFound)?;

        if updated.is_active {
            stop_worker(&mut workers, season_id);
            self.spawn_worker(&mut workers, &updated);
        }

        Ok(updated)
    }

    /// inactiveからの開始。
    pub(crate) async fn start(&self, season_id: Uuid) -> Result<SchedulerConfig, LifecycleError> {
        let mut workers = self.workers.lock().await;

        let config = self
            .dao
            .config_by_season(season_id)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        if config.is_active {
            return Err(LifecycleError::InvalidTransition(
                "scheduler is already active",
            ));
        }

        let updated = self
            .dao
            .set_config_flags(season_id, true, false)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        self.spawn_worker(&mut workers, &updated);
        Ok(updated)
    }

    /// runningからの一時停止。ワーカーは残り、以後のティックはゲートで
    /// 弾かれる。
    pub(crate) async fn pause(&self, season_id: Uuid) -> Result<SchedulerConfig, LifecycleError> {
        let mut workers = self.workers.lock().await;

        let config = self
            .dao
            .config_by_season(season_id)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        if !config.is_active || config.is_paused {
            return Err(LifecycleError::InvalidTransition("scheduler is not running"));
        }

        let updated = self
            .dao
            .set_config_flags(season_id, true, true)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        self.reconcile_worker_presence(&mut workers, &updated);
        Ok(updated)
    }

    /// pausedからの再開。
    pub(crate) async fn resume(&self, season_id: Uuid) -> Result<SchedulerConfig, LifecycleError> {
        let mut workers = self.workers.lock().await;

        let config = self
            .dao
            .config_by_season(season_id)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        if !config.is_active || !config.is_paused {
            return Err(LifecycleError::InvalidTransition("scheduler is not paused"));
        }

        let updated = self
            .dao
            .set_config_flags(season_id, true, false)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        self.reconcile_worker_presence(&mut workers, &updated);
        Ok(updated)
    }

    /// running/pausedからの停止。実行中のティックは完走が許される。
    pub(crate) async fn stop(&self, season_id: Uuid) -> Result<SchedulerConfig, LifecycleError> {
        let mut workers = self.workers.lock().await;

        let config = self
            .dao
            .config_by_season(season_id)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        if !config.is_active {
            return Err(LifecycleError::InvalidTransition("scheduler is not active"));
        }

        let updated = self
            .dao
            .set_config_flags(season_id, false, false)
            .await?
            .ok_or(LifecycleError::NotFound)?;
        stop_worker(&mut workers, season_id);
        Ok(updated)
    }

    /// 任意の状態からの削除。設定とrunsが消える。
    pub(crate) async fn delete(&self, season_id: Uuid) -> Result<(), LifecycleError> {
        let mut workers = self.workers.lock().await;

        stop_worker(&mut workers, season_id);
        if self.dao.delete_config(season_id).await? {
            Ok(())
        } else {
            Err(LifecycleError::NotFound)
        }
    }

    /// 起動時の復元。is_activeな設定すべてにワーカーを立てる。
    /// paused状態のワーカーはゲートで止まったまま待機する。
    ///
    /// # Errors
    /// 設定の読み出しに失敗した場合はエラーを返す。
    pub async fn restore_active(&self) -> anyhow::Result<usize> {
        let mut workers = self.workers.lock().await;

        let configs = self.dao.active_configs().await?;
        for config in &configs {
            self.spawn_worker(&mut workers, config);
        }
        info!(count = configs.len(), "restored active schedulers");
        Ok(configs.len())
    }

    /// ワーカーが存在するか（ダッシュボードの is_running 表示用）。
    pub(crate) async fn is_running(&self, season_id: Uuid) -> bool {
        self.workers.lock().await.contains_key(&season_id)
    }

    /// 全ワーカーを解体する。猶予時間内に実行中のティックがキャンセルを
    /// 観測するのを待ち、超過した分は強制終了する。
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            return;
        }

        info!(count = workers.len(), "shutting down season workers");
        self.root.cancel();

        let deadline = Instant::now() + self.shutdown_grace;
        for (season_id, handle) in workers.drain() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let abort = handle.task.abort_handle();
            if tokio::time::timeout(remaining, handle.task).await.is_err() {
                warn!(%season_id, "worker did not stop within grace period, aborting");
                abort.abort();
            }
        }
        info!("scheduler shutdown complete");
    }

    fn spawn_worker(&self, workers: &mut HashMap<Uuid, WorkerHandle>, config: &SchedulerConfig) {
        if let Some(existing) = workers.remove(&config.season_id) {
            existing.cancel.cancel();
        }

        let cancel = self.root.child_token();
        let task = JobRuntime::spawn(
            config.season_id,
            config.interval(),
            Arc::clone(&self.dao),
            Arc::clone(&self.pipeline),
            cancel.clone(),
        );
        workers.insert(config.season_id, WorkerHandle { cancel, task });
        info!(
            season_id = %config.season_id,
            interval_secs = config.interval().as_secs(),
            "season worker scheduled"
        );
    }

    /// activeな設定にワーカーがいないのは設定とワーカーの乖離。
    /// 警告を出してその場で立て直す。
    fn reconcile_worker_presence(
        &self,
        workers: &mut HashMap<Uuid, WorkerHandle>,
        config: &SchedulerConfig,
    ) {
        if config.is_active && !workers.contains_key(&config.season_id) {
            warn!(
                season_id = %config.season_id,
                "active config had no worker, reconciling"
            );
            self.spawn_worker(workers, config);
        }
    }
}

fn stop_worker(workers: &mut HashMap<Uuid, WorkerHandle>, season_id: Uuid) -> bool {
    if let Some(handle) = workers.remove(&season_id) {
        // 実行中のティックはマッチ境界でキャンセルを観測して自走停止する
        handle.cancel.cancel();
        true
    } else {
        false
    }
}

// ライフサイクル状態遷移のDBテスト。DATABASE_URL未設定ならスキップ。
#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use sqlx::PgPool;
    use sqlx::postgres::PgPoolOptions;
    use uuid::Uuid;

    use crate::clients::{EaClient, EaClientConfig};
    use crate::pipeline::FetchPipeline;
    use crate::store::models::{SchedulerConfigDraft, SchedulerConfigPatch};
    use crate::store::{ArchiveDao, schema};

    use super::{LifecycleError, SchedulerManager};

    async fn connect() -> anyhow::Result<Option<PgPool>> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            return Ok(None);
        };
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await?;
        schema::ensure_schema(&pool).await?;
        Ok(Some(pool))
    }

    async fn seed_season(pool: &PgPool) -> anyhow::Result<Uuid> {
        let season_id = Uuid::new_v4();
        sqlx::query(r"INSERT INTO season (id, name) VALUES ($1, $2)")
            .bind(season_id)
            .bind(format!("Season {season_id}"))
            .execute(pool)
            .await?;
        Ok(season_id)
    }

    fn manager_for(pool: PgPool) -> (SchedulerManager, Arc<ArchiveDao>) {
        let dao = Arc::new(ArchiveDao::new(pool));
        // ワーカーの初回ティックは interval 後なので、テスト中にEAへは届かない
        let ea = Arc::new(
            EaClient::new(EaClientConfig {
                base_url: "http://127.0.0.1:9/".to_string(),
                platform: "common-gen5".to_string(),
                connect_timeout: Duration::from_secs(1),
                request_timeout: Duration::from_secs(1),
                max_attempts: 1,
            })
            .expect("client should build"),
        );
        let pipeline = Arc::new(FetchPipeline::new(Arc::clone(&dao), ea));
        (
            SchedulerManager::new(Arc::clone(&dao), pipeline, Duration::from_secs(5)),
            dao,
        )
    }

    #[tokio::test]
    async fn lifecycle_flags_and_worker_presence_agree() -> anyhow::Result<()> {
        let Some(pool) = connect().await? else {
            return Ok(());
        };
        let season_id = seed_season(&pool).await?;
        let (manager, _dao) = manager_for(pool);

        let draft = SchedulerConfigDraft::default();
        let created = manager.create(season_id, &draft).await.expect("create");
        assert!(!created.is_active);
        assert!(!created.is_paused);
        assert!(!manager.is_running(season_id).await);

        let started = manager.start(season_id).await.expect("start");
        assert!(started.is_active);
        assert!(!started.is_paused);
        assert!(manager.is_running(season_id).await);

        let paused = manager.pause(season_id).await.expect("pause");
        assert!(paused.is_active);
        assert!(paused.is_paused);
        // paused worker stays alive, its ticks are rejected at the gate
        assert!(manager.is_running(season_id).await);

        let resumed = manager.resume(season_id).await.expect("resume");
        assert!(resumed.is_active);
        assert!(!resumed.is_paused);
        assert!(manager.is_running(season_id).await);

        let stopped = manager.stop(season_id).await.expect("stop");
        assert!(!stopped.is_active);
        assert!(!stopped.is_paused);
        assert!(!manager.is_running(season_id).await);

        manager.delete(season_id).await.expect("delete");
        manager.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn invalid_transitions_are_conflicts() -> anyhow::Result<()> {
        let Some(pool) = connect().await? else {
            return Ok(());
        };
        let season_id = seed_season(&pool).await?;
        let (manager, _dao) = manager_for(pool);

        let missing = manager.start(season_id).await;
        assert!(matches!(missing, Err(LifecycleError::NotFound)));

        manager
            .create(season_id, &SchedulerConfigDraft::default())
            .await
            .expect("create");

        let duplicate = manager
            .create(season_id, &SchedulerConfigDraft::default())
            .await;
        assert!(matches!(duplicate, Err(LifecycleError::AlreadyExists)));

        let pause_inactive = manager.pause(season_id).await;
        assert!(matches!(
            pause_inactive,
            Err(LifecycleError::InvalidTransition(_))
        ));

        let resume_inactive = manager.resume(season_id).await;
        assert!(matches!(
            resume_inactive,
            Err(LifecycleError::InvalidTransition(_))
        ));

        let stop_inactive = manager.stop(season_id).await;
        assert!(matches!(
            stop_inactive,
            Err(LifecycleError::InvalidTransition(_))
        ));

        manager.start(season_id).await.expect("start");
        let double_start = manager.start(season_id).await;
        assert!(matches!(
            double_start,
            Err(LifecycleError::InvalidTransition(_))
        ));

        let bad_patch = SchedulerConfigPatch {
            end_hour: Some(25),
            ..SchedulerConfigPatch::default()
        };
        let invalid = manager.update(season_id, &bad_patch).await;
        assert!(matches!(invalid, Err(LifecycleError::InvalidConfig(_))));

        manager.delete(season_id).await.expect("delete");
        let delete_again = manager.delete(season_id).await;
        assert!(matches!(delete_again, Err(LifecycleError::NotFound)));

        manager.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn restore_places_jobs_in_prior_state() -> anyhow::Result<()> {
        let Some(pool) = connect().await? else {
            return Ok(());
        };
        let paused_season = seed_season(&pool).await?;
        let running_season = seed_season(&pool).await?;

        {
            let (manager, dao) = manager_for(pool.clone());
            manager
                .create(paused_season, &SchedulerConfigDraft::default())
                .await
                .expect("create paused");
            manager
                .create(running_season, &SchedulerConfigDraft::default())
                .await
                .expect("create running");
            manager.start(paused_season).await.expect("start");
            manager.pause(paused_season).await.expect("pause");
            manager.start(running_season).await.expect("start");
            // 旧プロセスの終了に相当。フラグはDBに残る。
            manager.shutdown().await;
            drop(dao);
        }

        let (restored, dao) = manager_for(pool);
        assert!(!restored.is_running(paused_season).await);
        assert!(!restored.is_running(running_season).await);

        let count = restored.restore_active().await.expect("restore");
        assert!(count >= 2, "both seasons should be restored, got {count}");
        assert!(restored.is_running(paused_season).await);
        assert!(restored.is_running(running_season).await);

        let paused_config = dao
            .config_by_season(paused_season)
            .await?
            .expect("paused config");
        assert!(paused_config.is_active && paused_config.is_paused);

        let running_config = dao
            .config_by_season(running_season)
            .await?
            .expect("running config");
        assert!(running_config.is_active && !running_config.is_paused);

        restored.delete(paused_season).await.expect("cleanup");
        restored.delete(running_season).await.expect("cleanup");
        restored.shutdown().await;
        Ok(())
    }
}
