use anyhow::{Context, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::{RunStatus, SchedulerRun};

const RUN_COLUMNS: &str = "id, scheduler_config_id, season_id, started_at, finished_at, status, \
     matches_fetched, matches_new, error_message";

fn run_from_row(row: &PgRow) -> Result<SchedulerRun> {
    let status_raw: String = row.try_get("status")?;
    let status = RunStatus::parse(&status_raw)
        .with_context(|| format!("unknown scheduler_run status: {status_raw}"))?;

    Ok(SchedulerRun {
        id: row.try_get("id")?,
        scheduler_config_id: row.try_get("scheduler_config_id")?,
        season_id: row.try_get("season_id")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        status,
        matches_fetched: row.try_get("matches_fetched")?,
        matches_new: row.try_get("matches_new")?,
        error_message: row.try_get("error_message")?,
    })
}

/// ティック開始時に監査レコードをrunning状態で作成する。
pub(crate) async fn open_run(
    pool: &PgPool,
    config_id: Uuid,
    season_id: Uuid,
) -> Result<SchedulerRun> {
    let row = sqlx::query(&format!(
        r"
        INSERT INTO scheduler_run (scheduler_config_id, season_id, status)
        VALUES ($1, $2, 'running')
        RETURNING {RUN_COLUMNS}
        ",
    ))
    .bind(config_id)
    .bind(season_id)
    .fetch_one(pool)
    .await
    .context("failed to insert scheduler_run")?;

    run_from_row(&row)
}

/// ティック終了時にレコードを確定させる。以後このレコードは更新しない。
pub(crate) async fn close_run(
    pool: &PgPool,
    run_id: Uuid,
    status: RunStatus,
    matches_fetched: i32,
    matches_new: i32,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE scheduler_run
        SET finished_at = NOW(),
            status = $2,
            matches_fetched = $3,
            matches_new = $4,
            error_message = $5
        WHERE id = $1
        ",
    )
    .bind(run_id)
    .bind(status.as_str())
    .bind(matches_fetched)
    .bind(matches_new)
    .bind(error_message)
    .execute(pool)
    .await
    .context("failed to close scheduler_run")?;

    Ok(())
}

/// 新しい順にrunsを返す。countはページングのための総数。
pub(crate) async fn runs_for_config(
    pool: &PgPool,
    config_id: Uuid,
    skip: i64,
    limit: i64,
) -> Result<(Vec<SchedulerRun>, i64)> {
    let count_row = sqlx::query(
        r"SELECT COUNT(*) AS count FROM scheduler_run WHERE scheduler_config_id = $1",
    )
    .bind(config_id)
    .fetch_one(pool)
    .await
    .context("failed to count scheduler_runs")?;
    let count: i64 = count_row.try_get("count")?;

    let rows = sqlx::query(&format!(
        r"
        SELECT {RUN_COLUMNS}
        FROM scheduler_run
        WHERE scheduler_config_id = $1
        ORDER BY started_at DESC
        OFFSET $2
        LIMIT $3
        ",
    ))
    .bind(config_id)
    .bind(skip)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch scheduler_runs")?;

    let runs = rows.iter().map(run_from_row).collect::<Result<Vec<_>>>()?;
    Ok((runs, count))
}

/// クラッシュや強制終了でrunningのまま残ったレコードを失敗として閉じる。
///
/// 起動時に一度だけ呼ばれる。閉じた件数を返す。
pub(crate) async fn sweep_lingering_runs(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        r"
        UPDATE scheduler_run
        SET finished_at = NOW(),
            status = 'failed',
            error_message = 'interrupted by shutdown'
        WHERE status = 'running'
        ",
    )
    .execute(pool)
    .await
    .context("failed to sweep lingering scheduler_runs")?;

    Ok(result.rows_affected())
}
