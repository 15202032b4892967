use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::{
    api,
    clients::{EaClient, EaClientConfig},
    config::Config,
    pipeline::FetchPipeline,
    scheduler::SchedulerManager,
    store::{ArchiveDao, schema},
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    dao: Arc<ArchiveDao>,
    manager: Arc<SchedulerManager>,
}

impl AppState {
    pub(crate) fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }

    pub(crate) fn dao(&self) -> &ArchiveDao {
        &self.registry.dao
    }

    pub(crate) fn manager(&self) -> &SchedulerManager {
        &self.registry.manager
    }
}

impl ComponentRegistry {
    /// 接続プール・EAクライアント・マネージャをこの順で組み上げる。
    ///
    /// DB接続は遅延確立なので、この時点ではデータベースに到達しない。
    ///
    /// # Errors
    /// HTTPクライアントや接続プールの構築が失敗した場合はエラーを返す。
    pub fn build(config: Config) -> Result<Arc<Self>> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections())
            .acquire_timeout(config.db_acquire_timeout())
            .test_before_acquire(true)
            .connect_lazy(config.archive_db_dsn())
            .context("failed to configure archive_db connection pool")?;
        let dao = Arc::new(ArchiveDao::new(pool));

        let ea = Arc::new(
            EaClient::new(EaClientConfig {
                base_url: config.ea_base_url().to_string(),
                platform: config.ea_platform().to_string(),
                connect_timeout: config.ea_connect_timeout(),
                request_timeout: config.ea_request_timeout(),
                max_attempts: config.ea_max_attempts(),
            })
            .context("failed to build EA client")?,
        );

        let pipeline = Arc::new(FetchPipeline::new(Arc::clone(&dao), ea));
        let manager = Arc::new(SchedulerManager::new(
            Arc::clone(&dao),
            pipeline,
            config.shutdown_grace(),
        ));

        Ok(Arc::new(Self { dao, manager }))
    }

    /// 起動シーケンス: スキーマ保証 → 残骸runの掃除 → activeジョブの復元。
    ///
    /// # Errors
    /// いずれかの段階でデータベース操作が失敗した場合はエラーを返す。
    pub async fn bootstrap(&self) -> Result<()> {
        schema::ensure_schema(self.dao.pool())
            .await
            .context("failed to ensure database schema")?;

        let swept = self
            .dao
            .sweep_lingering_runs()
            .await
            .context("failed to sweep lingering runs")?;
        if swept > 0 {
            info!(count = swept, "closed lingering runs from previous process");
        }

        self.manager
            .restore_active()
            .await
            .context("failed to restore active schedulers")?;

        Ok(())
    }

    #[must_use]
    pub fn manager(&self) -> Arc<SchedulerManager> {
        Arc::clone(&self.manager)
    }
}

#[must_use]
pub fn build_router(registry: Arc<ComponentRegistry>) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}
