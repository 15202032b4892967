// モジュールの公開と型の再エクスポート
pub(crate) mod club;
pub(crate) mod config;
pub(crate) mod run;

use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    RunStatus, SchedulerConfig, SchedulerConfigDraft, SchedulerRun, SeasonClub,
};

/// アーカイブDBへのデータアクセス層。
///
/// 取り込みパイプラインの試合単位トランザクションは
/// [`crate::pipeline::persist`] 側が直接プールから開く。
#[derive(Debug, Clone)]
pub(crate) struct ArchiveDao {
    pool: PgPool,
}

impl ArchiveDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    // --- scheduler_config ---

    pub(crate) async fn create_config(
        &self,
        season_id: Uuid,
        draft: &SchedulerConfigDraft,
    ) -> anyhow::Result<Option<SchedulerConfig>> {
        config::create_config(&self.pool, season_id, draft).await
    }

    pub(crate) async fn config_by_season(
        &self,
        season_id: Uuid,
    ) -> anyhow::Result<Option<SchedulerConfig>> {
        config::config_by_season(&self.pool, season_id).await
    }

    pub(crate) async fn list_configs(&self) -> anyhow::Result<Vec<SchedulerConfig>> {
        config::list_configs(&self.pool).await
    }

    pub(crate) async fn active_configs(&self) -> anyhow::Result<Vec<SchedulerConfig>> {
        config::active_configs(&self.pool).await
    }

    pub(crate) async fn update_config_fields(
        &self,
        season_id: Uuid,
        draft: &SchedulerConfigDraft,
    ) -> anyhow::Result<Option<SchedulerConfig>> {
        config::update_config_fields(&self.pool, season_id, draft).await
    }

    pub(crate) async fn set_config_flags(
        &self,
        season_id: Uuid,
        is_active: bool,
        is_paused: bool,
    ) -> anyhow::Result<Option<SchedulerConfig>> {
        config::set_config_flags(&self.pool, season_id, is_active, is_paused).await
    }

    pub(crate) async fn delete_config(&self, season_id: Uuid) -> anyhow::Result<bool> {
        config::delete_config(&self.pool, season_id).await
    }

    pub(crate) async fn update_last_run(
        &self,
        config_id: Uuid,
        last_run_at: chrono::DateTime<chrono::Utc>,
        status: RunStatus,
    ) -> anyhow::Result<()> {
        config::update_last_run(&self.pool, config_id, last_run_at, status).await
    }

    // --- scheduler_run ---

    pub(crate) async fn open_run(
        &self,
        config_id: Uuid,
        season_id: Uuid,
    ) -> anyhow::Result<SchedulerRun> {
        run::open_run(&self.pool, config_id, season_id).await
    }

    pub(crate) async fn close_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        matches_fetched: i32,
        matches_new: i32,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        run::close_run(
            &self.pool,
            run_id,
            status,
            matches_fetched,
            matches_new,
            error_message,
        )
        .await
    }

    pub(crate) async fn runs_for_config(
        &self,
        config_id: Uuid,
        skip: i64,
        limit: i64,
    ) -> anyhow::Result<(Vec<SchedulerRun>, i64)> {
        run::runs_for_config(&self.pool, config_id, skip, limit).await
    }

    pub(crate) async fn sweep_lingering_runs(&self) -> anyhow::Result<u64> {
        run::sweep_lingering_runs(&self.pool).await
    }

    // --- season / club context ---

    pub(crate) async fn season_exists(&self, season_id: Uuid) -> anyhow::Result<bool> {
        club::season_exists(&self.pool, season_id).await
    }

    pub(crate) async fn season_name(&self, season_id: Uuid) -> anyhow::Result<Option<String>> {
        club::season_name(&self.pool, season_id).await
    }

    pub(crate) async fn season_clubs(&self, season_id: Uuid) -> anyhow::Result<Vec<SeasonClub>> {
        club::season_clubs(&self.pool, season_id).await
    }

    pub(crate) async fn update_club_ea_id(
        &self,
        club_id: Uuid,
        ea_id: &str,
    ) -> anyhow::Result<()> {
        club::update_club_ea_id(&self.pool, club_id, ea_id).await
    }

    pub(crate) async fn season_match_count(&self, season_id: Uuid) -> anyhow::Result<i64> {
        club::season_match_count(&self.pool, season_id).await
    }
}
