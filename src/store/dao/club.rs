use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::SeasonClub;

pub(crate) async fn season_exists(pool: &PgPool, season_id: Uuid) -> Result<bool> {
    let row = sqlx::query(r"SELECT EXISTS(SELECT 1 FROM season WHERE id = $1) AS present")
        .bind(season_id)
        .fetch_one(pool)
        .await
        .context("failed to check season existence")?;

    row.try_get("present").context("failed to read presence")
}

pub(crate) async fn season_name(pool: &PgPool, season_id: Uuid) -> Result<Option<String>> {
    let row = sqlx::query(r"SELECT name FROM season WHERE id = $1")
        .bind(season_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch season name")?;

    row.map(|r| r.try_get("name").context("failed to read season name"))
        .transpose()
}

/// シーズンに参加しているクラブの一覧（取得順は名前順で安定させる）。
pub(crate) async fn season_clubs(pool: &PgPool, season_id: Uuid) -> Result<Vec<SeasonClub>> {
    let rows = sqlx::query(
        r"
        SELECT c.id AS club_id, c.name, c.ea_id
        FROM club c
        JOIN club_season cs ON cs.club_id = c.id
        WHERE cs.season_id = $1
        ORDER BY c.name
        ",
    )
    .bind(season_id)
    .fetch_all(pool)
    .await
    .context("failed to fetch season clubs")?;

    rows.into_iter()
        .map(|row| {
            Ok(SeasonClub {
                club_id: row.try_get("club_id")?,
                name: row.try_get("name")?,
                ea_id: row.try_get("ea_id")?,
            })
        })
        .collect()
}

/// 解決済みのEA clubIdをキャッシュとして書き戻す。
pub(crate) async fn update_club_ea_id(pool: &PgPool, club_id: Uuid, ea_id: &str) -> Result<()> {
    sqlx::query(r"UPDATE club SET ea_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(club_id)
        .bind(ea_id)
        .execute(pool)
        .await
        .context("failed to update club ea_id")?;

    Ok(())
}

pub(crate) async fn season_match_count(pool: &PgPool, season_id: Uuid) -> Result<i64> {
    let row = sqlx::query(r"SELECT COUNT(*) AS count FROM match WHERE season_id = $1")
        .bind(season_id)
        .fetch_one(pool)
        .await
        .context("failed to count season matches")?;

    row.try_get("count").context("failed to read match count")
}
