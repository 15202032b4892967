use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::{RunStatus, SchedulerConfig, SchedulerConfigDraft};

const CONFIG_COLUMNS: &str = "id, season_id, is_active, is_paused, days_of_week, start_hour, \
     end_hour, interval_minutes, interval_seconds, last_run_at, last_run_status, created_at, \
     updated_at";

pub(crate) fn config_from_row(row: &PgRow) -> Result<SchedulerConfig> {
    Ok(SchedulerConfig {
        id: row.try_get("id")?,
        season_id: row.try_get("season_id")?,
        is_active: row.try_get("is_active")?,
        is_paused: row.try_get("is_paused")?,
        days_of_week: row.try_get("days_of_week")?,
        start_hour: row.try_get("start_hour")?,
        end_hour: row.try_get("end_hour")?,
        interval_minutes: row.try_get("interval_minutes")?,
        interval_seconds: row.try_get("interval_seconds")?,
        last_run_at: row.try_get("last_run_at")?,
        last_run_status: row.try_get("last_run_status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// シーズンに対する設定を新規作成する。
///
/// 既に存在する場合（season_idの一意制約）には `Ok(None)` を返す。
pub(crate) async fn create_config(
    pool: &PgPool,
    season_id: Uuid,
    draft: &SchedulerConfigDraft,
) -> Result<Option<SchedulerConfig>> {
    let row = sqlx::query(&format!(
        r"
        INSERT INTO scheduler_config
            (season_id, days_of_week, start_hour, end_hour, interval_minutes, interval_seconds)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (season_id) DO NOTHING
        RETURNING {CONFIG_COLUMNS}
        ",
    ))
    .bind(season_id)
    .bind(&draft.days_of_week)
    .bind(draft.start_hour)
    .bind(draft.end_hour)
    .bind(draft.interval_minutes)
    .bind(draft.interval_seconds)
    .fetch_optional(pool)
    .await
    .context("failed to insert scheduler_config")?;

    row.as_ref().map(config_from_row).transpose()
}

pub(crate) async fn config_by_season(
    pool: &PgPool,
    season_id: Uuid,
) -> Result<Option<SchedulerConfig>> {
    let row = sqlx::query(&format!(
        r"SELECT {CONFIG_COLUMNS} FROM scheduler_config WHERE season_id = $1"
    ))
    .bind(season_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch scheduler_config")?;

    row.as_ref().map(config_from_row).transpose()
}

pub(crate) async fn list_configs(pool: &PgPool) -> Result<Vec<SchedulerConfig>> {
    let rows = sqlx::query(&format!(
        r"SELECT {CONFIG_COLUMNS} FROM scheduler_config ORDER BY created_at"
    ))
    .fetch_all(pool)
    .await
    .context("failed to list scheduler_configs")?;

    rows.iter().map(config_from_row).collect()
}

/// 起動時の復元対象: is_activeな設定すべて（paused含む）。
pub(crate) async fn active_configs(pool: &PgPool) -> Result<Vec<SchedulerConfig>> {
    let rows = sqlx::query(&format!(
        r"SELECT {CONFIG_COLUMNS} FROM scheduler_config WHERE is_active ORDER BY created_at"
    ))
    .fetch_all(pool)
    .await
    .context("failed to fetch active scheduler_configs")?;

    rows.iter().map(config_from_row).collect()
}

pub(crate) async fn update_config_fields(
    pool: &PgPool,
    season_id: Uuid,
    draft: &SchedulerConfigDraft,
) -> Result<Option<SchedulerConfig>> {
    let row = sqlx::query(&format!(
        r"
        UPDATE scheduler_config
        SET days_of_week = $2,
            start_hour = $3,
            end_hour = $4,
            interval_minutes = $5,
            interval_seconds = $6,
            updated_at = NOW()
        WHERE season_id = $1
        RETURNING {CONFIG_COLUMNS}
        ",
    ))
    .bind(season_id)
    .bind(&draft.days_of_week)
    .bind(draft.start_hour)
    .bind(draft.end_hour)
    .bind(draft.interval_minutes)
    .bind(draft.interval_seconds)
    .fetch_optional(pool)
    .await
    .context("failed to update scheduler_config")?;

    row.as_ref().map(config_from_row).transpose()
}

/// ライフサイクルフラグを永続化する。設定が先、ワーカーはその後に追従する。
pub(crate) async fn set_config_flags(
    pool: &PgPool,
    season_id: Uuid,
    is_active: bool,
    is_paused: bool,
) -> Result<Option<SchedulerConfig>> {
    let row = sqlx::query(&format!(
        r"
        UPDATE scheduler_config
        SET is_active = $2, is_paused = $3, updated_at = NOW()
        WHERE season_id = $1
        RETURNING {CONFIG_COLUMNS}
        ",
    ))
    .bind(season_id)
    .bind(is_active)
    .bind(is_paused)
    .fetch_optional(pool)
    .await
    .context("failed to update scheduler_config flags")?;

    row.as_ref().map(config_from_row).transpose()
}

/// 設定を削除する。runsはCASCADEで道連れになる。
pub(crate) async fn delete_config(pool: &PgPool, season_id: Uuid) -> Result<bool> {
    let result = sqlx::query(r"DELETE FROM scheduler_config WHERE season_id = $1")
        .bind(season_id)
        .execute(pool)
        .await
        .context("failed to delete scheduler_config")?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn update_last_run(
    pool: &PgPool,
    config_id: Uuid,
    last_run_at: DateTime<Utc>,
    status: RunStatus,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE scheduler_config
        SET last_run_at = $2, last_run_status = $3, updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(config_id)
    .bind(last_run_at)
    .bind(status.as_str())
    .execute(pool)
    .await
    .context("failed to update scheduler_config last run")?;

    Ok(())
}
