/// 試合1件ぶんの冪等な書き込みパイプライン。
///
/// 試合本体・プレイヤー・統計行を1トランザクションで書き、一意インデックスの
/// 衝突を重複検出として扱う。事前の存在確認クエリは行わない。
use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::SeasonClub;
use crate::util::coerce;

use super::payload::MatchPayload;

/// 1件の試合に対する永続化の結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PersistOutcome {
    /// 新規に保存した
    Inserted,
    /// 既知の試合（重複キー）
    Duplicate,
    /// 識別子が欠けていて保存できない
    Skipped,
}

pub(crate) struct MatchPersister {
    pool: PgPool,
}

impl MatchPersister {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 試合とその派生エンティティを保存する。
    ///
    /// 試合行は (ea_match_id, ea_timestamp) の一意制約で重複排除され、
    /// 重複時はプレイヤー抽出もスキップする。対戦相手側からの再取得で
    /// 同じ試合が流れてきても、最初に観測した視点の行だけが残る。
    pub(crate) async fn persist_match(
        &self,
        season_id: Uuid,
        club: &SeasonClub,
        club_ea_id: &str,
        payload: &MatchPayload,
    ) -> Result<PersistOutcome> {
        let Some(ea_match_id) = payload.ea_match_id() else {
            return Ok(PersistOutcome::Skipped);
        };
        let Some(ea_timestamp) = payload.ea_timestamp() else {
            return Ok(PersistOutcome::Skipped);
        };

        let home = payload.home_side();
        let away = payload.away_side();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin match transaction")?;

        let inserted = sqlx::query(
            r"
            INSERT INTO match
                (ea_match_id, ea_timestamp, season_id, club_id, is_home,
                 home_club_ea_id, away_club_ea_id, home_score, away_score,
                 winning_club_ea_id, raw_json)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (ea_match_id, ea_timestamp) DO NOTHING
            RETURNING id
            ",
        )
        .bind(&ea_match_id)
        .bind(ea_timestamp)
        .bind(season_id)
        .bind(club.club_id)
        .bind(payload.is_home_for(club_ea_id))
        .bind(home.as_ref().map(|s| s.club_ea_id.clone()))
        .bind(away.as_ref().map(|s| s.club_ea_id.clone()))
        .bind(home.as_ref().and_then(|s| s.score))
        .bind(away.as_ref().and_then(|s| s.score))
        .bind(payload.winning_club_ea_id())
        .bind(payload.raw().clone())
        .fetch_optional(&mut *tx)
        .await
        .context("failed to insert match")?;

        let Some(row) = inserted else {
            tx.commit()
                .await
                .context("failed to commit duplicate match transaction")?;
            return Ok(PersistOutcome::Duplicate);
        };
        let match_id: Uuid = row.try_get("id").context("failed to read match id")?;

        for entry in payload.player_entries() {
            let gamertag = coerce::as_string(entry.stats.get("playername"))
                .unwrap_or_else(|| entry.ea_player_id.to_string());

            let player_row = sqlx::query(
                r"
                INSERT INTO player (ea_player_id, gamertag)
                VALUES ($1, $2)
                ON CONFLICT (ea_player_id)
                    DO UPDATE SET gamertag = EXCLUDED.gamertag, updated_at = NOW()
                RETURNING id
                ",
            )
            .bind(entry.ea_player_id)
            .bind(&gamertag)
            .fetch_one(&mut *tx)
            .await
            .context("failed to upsert player")?;
            let player_id: Uuid = player_row
                .try_get("id")
                .context("failed to read player id")?;

            let stats = PlayerStatsRow::from_raw(entry.stats);
            insert_stats_row(
                &mut tx,
                player_id,
                entry.ea_player_id,
                &ea_match_id,
                ea_timestamp,
                match_id,
                &stats,
            )
            .await?;
        }

        tx.commit()
            .await
            .context("failed to commit match transaction")?;
        Ok(PersistOutcome::Inserted)
    }
}

/// プレイヤー統計1行ぶんの型強制済みフィールド。
///
/// EAのキー名はキャメルケースと小文字詰めが混在している。対応はオリジナルの
/// 上流ペイロードそのまま。数値のパースに失敗した値はNULLで保存される。
#[derive(Debug, Clone, Default)]
pub(crate) struct PlayerStatsRow {
    pub(crate) stat_class: Option<i32>,
    pub(crate) glbrksavepct: Option<f32>,
    pub(crate) glbrksaves: Option<i32>,
    pub(crate) glbrkshots: Option<i32>,
    pub(crate) gldsaves: Option<i32>,
    pub(crate) glga: Option<i32>,
    pub(crate) glgaa: Option<f32>,
    pub(crate) glpensavepct: Option<f32>,
    pub(crate) glpensaves: Option<i32>,
    pub(crate) glpenshots: Option<i32>,
    pub(crate) glpkclearzone: Option<i32>,
    pub(crate) glpokechecks: Option<i32>,
    pub(crate) glsavepct: Option<f32>,
    pub(crate) glsaves: Option<i32>,
    pub(crate) glshots: Option<i32>,
    pub(crate) glsoperiods: Option<i32>,
    pub(crate) is_guest: Option<i32>,
    pub(crate) opponent_club_id: Option<String>,
    pub(crate) opponent_score: Option<i32>,
    pub(crate) opponent_team_id: Option<String>,
    pub(crate) player_dnf: Option<i32>,
    pub(crate) player_level: Option<i32>,
    pub(crate) p_nhl_online_game_type: Option<String>,
    pub(crate) position: Option<String>,
    pub(crate) pos_sorted: Option<i32>,
    pub(crate) rating_defense: Option<f32>,
    pub(crate) rating_offense: Option<f32>,
    pub(crate) rating_teamplay: Option<f32>,
    pub(crate) score: Option<i32>,
    pub(crate) skassists: Option<i32>,
    pub(crate) skbs: Option<i32>,
    pub(crate) skdeflections: Option<i32>,
    pub(crate) skfol: Option<i32>,
    pub(crate) skfopct: Option<f32>,
    pub(crate) skfow: Option<i32>,
    pub(crate) skgiveaways: Option<i32>,
    pub(crate) skgoals: Option<i32>,
    pub(crate) skgwg: Option<i32>,
    pub(crate) skhits: Option<i32>,
    pub(crate) skinterceptions: Option<i32>,
    pub(crate) skpassattempts: Option<i32>,
    pub(crate) skpasses: Option<i32>,
    pub(crate) skpasspct: Option<f32>,
    pub(crate) skpenaltiesdrawn: Option<i32>,
    pub(crate) skpim: Option<i32>,
    pub(crate) skpkclearzone: Option<i32>,
    pub(crate) skplusmin: Option<i32>,
    pub(crate) skpossession: Option<i32>,
    pub(crate) skppg: Option<i32>,
    pub(crate) sksaucerpasses: Option<i32>,
    pub(crate) skshg: Option<i32>,
    pub(crate) skshotattempts: Option<i32>,
    pub(crate) skshotonnetpct: Option<f32>,
    pub(crate) skshotpct: Option<f32>,
    pub(crate) skshots: Option<i32>,
    pub(crate) sktakeaways: Option<i32>,
    pub(crate) team_id: Option<String>,
    pub(crate) team_side: Option<i32>,
    pub(crate) toi: Option<i32>,
    pub(crate) toiseconds: Option<i32>,
    pub(crate) client_platform: Option<String>,
}

impl PlayerStatsRow {
    pub(crate) fn from_raw(stats: &Value) -> Self {
        let i = |key: &str| coerce::as_i32(stats.get(key));
        let f = |key: &str| coerce::as_f32(stats.get(key));
        let s = |key: &str| coerce::as_string(stats.get(key));

        Self {
            stat_class: i("class"),
            glbrksavepct: f("glbrksavepct"),
            glbrksaves: i("glbrksaves"),
            glbrkshots: i("glbrkshots"),
            gldsaves: i("gldsaves"),
            glga: i("glga"),
            glgaa: f("glgaa"),
            glpensavepct: f("glpensavepct"),
            glpensaves: i("glpensaves"),
            glpenshots: i("glpenshots"),
            glpkclearzone: i("glpkclearzone"),
            glpokechecks: i("glpokechecks"),
            glsavepct: f("glsavepct"),
            glsaves: i("glsaves"),
            glshots: i("glshots"),
            glsoperiods: i("glsoperiods"),
            is_guest: i("isGuest"),
            opponent_club_id: s("opponentClubId"),
            opponent_score: i("opponentScore"),
            opponent_team_id: s("opponentTeamId"),
            player_dnf: i("player_dnf"),
            player_level: i("playerLevel"),
            p_nhl_online_game_type: s("pNhlOnlineGameType"),
            position: s("position"),
            pos_sorted: i("posSorted"),
            rating_defense: f("ratingDefense"),
            rating_offense: f("ratingOffense"),
            rating_teamplay: f("ratingTeamplay"),
            score: i("score"),
            skassists: i("skassists"),
            skbs: i("skbs"),
            skdeflections: i("skdeflections"),
            skfol: i("skfol"),
            skfopct: f("skfopct"),
            skfow: i("skfow"),
            skgiveaways: i("skgiveaways"),
            skgoals: i("skgoals"),
            skgwg: i("skgwg"),
            skhits: i("skhits"),
            skinterceptions: i("skinterceptions"),
            skpassattempts: i("skpassattempts"),
            skpasses: i("skpasses"),
            skpasspct: f("skpasspct"),
            skpenaltiesdrawn: i("skpenaltiesdrawn"),
            skpim: i("skpim"),
            skpkclearzone: i("skpkclearzone"),
            skplusmin: i("skplusmin"),
            skpossession: i("skpossession"),
            skppg: i("skppg"),
            sksaucerpasses: i("sksaucerpasses"),
            skshg: i("skshg"),
            skshotattempts: i("skshotattempts"),
            skshotonnetpct: f("skshotonnetpct"),
            skshotpct: f("skshotpct"),
            skshots: i("skshots"),
            sktakeaways: i("sktakeaways"),
            team_id: s("teamId"),
            team_side: i("teamSide"),
            toi: i("toi"),
            toiseconds: i("toiseconds"),
            client_platform: s("clientPlatform"),
        }
    }
}

async fn insert_stats_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    player_id: Uuid,
    ea_player_id: &str,
    ea_match_id: &str,
    ea_timestamp: i64,
    match_id: Uuid,
    stats: &PlayerStatsRow,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO player_match_stats
            (player_id, ea_player_id, ea_match_id, ea_timestamp, match_id,
             stat_class,
             glbrksavepct, glbrksaves, glbrkshots, gldsaves, glga, glgaa,
             glpensavepct, glpensaves, glpenshots, glpkclearzone, glpokechecks,
             glsavepct, glsaves, glshots, glsoperiods,
             is_guest, opponent_club_id, opponent_score, opponent_team_id,
             player_dnf, player_level, p_nhl_online_game_type, position, pos_sorted,
             rating_defense, rating_offense, rating_teamplay, score,
             skassists, skbs, skdeflections, skfol, skfopct, skfow,
             skgiveaways, skgoals, skgwg, skhits, skinterceptions,
             skpassattempts, skpasses, skpasspct, skpenaltiesdrawn, skpim,
             skpkclearzone, skplusmin, skpossession, skppg, sksaucerpasses,
             skshg, skshotattempts, skshotonnetpct, skshotpct, skshots,
             sktakeaways, team_id, team_side, toi, toiseconds, client_platform)
        VALUES
            ($1, $2, $3, $4, $5,
             $6,
             $7, $8, $9, $10, $11, $12,
             $13, $14, $15, $16, $17,
             $18, $19, $20, $21,
             $22, $23, $24, $25,
             $26, $27, $28, $29, $30,
             $31, $32, $33, $34,
             $35, $36, $37, $38, $39, $40,
             $41, $42, $43, $44, $45,
             $46, $47, $48, $49, $50,
             $51, $52, $53, $54, $55,
             $56, $57, $58, $59, $60,
             $61, $62, $63, $64, $65, $66)
        ON CONFLICT (ea_player_id, ea_match_id) DO NOTHING
        ",
    )
    .bind(player_id)
    .bind(ea_player_id)
    .bind(ea_match_id)
    .bind(ea_timestamp)
    .bind(match_id)
    .bind(stats.stat_class)
    .bind(stats.glbrksavepct)
    .bind(stats.glbrksaves)
    .bind(stats.glbrkshots)
    .bind(stats.gldsaves)
    .bind(stats.glga)
    .bind(stats.glgaa)
    .bind(stats.glpensavepct)
    .bind(stats.glpensaves)
    .bind(stats.glpenshots)
    .bind(stats.glpkclearzone)
    .bind(stats.glpokechecks)
    .bind(stats.glsavepct)
    .bind(stats.glsaves)
    .bind(stats.glshots)
    .bind(stats.glsoperiods)
    .bind(stats.is_guest)
    .bind(stats.opponent_club_id.as_deref())
    .bind(stats.opponent_score)
    .bind(stats.opponent_team_id.as_deref())
    .bind(stats.player_dnf)
    .bind(stats.player_level)
    .bind(stats.p_nhl_online_game_type.as_deref())
    .bind(stats.position.as_deref())
    .bind(stats.pos_sorted)
    .bind(stats.rating_defense)
    .bind(stats.rating_offense)
    .bind(stats.rating_teamplay)
    .bind(stats.score)
    .bind(stats.skassists)
    .bind(stats.skbs)
    .bind(stats.skdeflections)
    .bind(stats.skfol)
    .bind(stats.skfopct)
    .bind(stats.skfow)
    .bind(stats.skgiveaways)
    .bind(stats.skgoals)
    .bind(stats.skgwg)
    .bind(stats.skhits)
    .bind(stats.skinterceptions)
    .bind(stats.skpassattempts)
    .bind(stats.skpasses)
    .bind(stats.skpasspct)
    .bind(stats.skpenaltiesdrawn)
    .bind(stats.skpim)
    .bind(stats.skpkclearzone)
    .bind(stats.skplusmin)
    .bind(stats.skpossession)
    .bind(stats.skppg)
    .bind(stats.sksaucerpasses)
    .bind(stats.skshg)
    .bind(stats.skshotattempts)
    .bind(stats.skshotonnetpct)
    .bind(stats.skshotpct)
    .bind(stats.skshots)
    .bind(stats.sktakeaways)
    .bind(stats.team_id.as_deref())
    .bind(stats.team_side)
    .bind(stats.toi)
    .bind(stats.toiseconds)
    .bind(stats.client_platform.as_deref())
    .execute(&mut **tx)
    .await
    .context("failed to insert player_match_stats")?;

    Ok(())
}
