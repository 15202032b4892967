/// 起動時のスキーマ保証。
///
/// すべて `IF NOT EXISTS` で冪等。重複排除キーは一意インデックスとして
/// ここで張られ、取り込み側はその制約違反に乗る形で冪等性を得る。
use anyhow::{Context, Result};
use sqlx::{Executor, PgPool};

pub(crate) async fn ensure_schema(pool: &PgPool) -> Result<()> {
    ensure_context_tables(pool).await?;
    ensure_scheduler_tables(pool).await?;
    ensure_archive_tables(pool).await?;
    Ok(())
}

/// シーズン・クラブはこのサービスの管理外（CRUDは別コンポーネント）だが、
/// 外部キーの参照先として存在は保証する。
async fn ensure_context_tables(pool: &PgPool) -> Result<()> {
    pool.execute(
        r"
        CREATE TABLE IF NOT EXISTS season (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );

        CREATE TABLE IF NOT EXISTS club (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL UNIQUE,
            ea_id TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );

        CREATE TABLE IF NOT EXISTS club_season (
            club_id UUID NOT NULL REFERENCES club(id) ON DELETE CASCADE,
            season_id UUID NOT NULL REFERENCES season(id) ON DELETE CASCADE,
            PRIMARY KEY (club_id, season_id)
        );
        ",
    )
    .await
    .context("failed to ensure context tables")?;
    Ok(())
}

async fn ensure_scheduler_tables(pool: &PgPool) -> Result<()> {
    pool.execute(
        r"
        CREATE TABLE IF NOT EXISTS scheduler_config (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            season_id UUID NOT NULL UNIQUE REFERENCES season(id) ON DELETE CASCADE,
            is_active BOOLEAN NOT NULL DEFAULT FALSE,
            is_paused BOOLEAN NOT NULL DEFAULT FALSE,
            days_of_week INTEGER[] NOT NULL DEFAULT '{}',
            start_hour INTEGER NOT NULL DEFAULT 18,
            end_hour INTEGER NOT NULL DEFAULT 23,
            interval_minutes INTEGER NOT NULL DEFAULT 30,
            interval_seconds INTEGER NOT NULL DEFAULT 0,
            last_run_at TIMESTAMPTZ,
            last_run_status TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );

        CREATE TABLE IF NOT EXISTS scheduler_run (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            scheduler_config_id UUID NOT NULL REFERENCES scheduler_config(id) ON DELETE CASCADE,
            season_id UUID NOT NULL REFERENCES season(id) ON DELETE CASCADE,
            started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            finished_at TIMESTAMPTZ,
            status TEXT NOT NULL DEFAULT 'running',
            matches_fetched INTEGER NOT NULL DEFAULT 0,
            matches_new INTEGER NOT NULL DEFAULT 0,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS ix_scheduler_run_config_started
            ON scheduler_run (scheduler_config_id, started_at DESC);
        ",
    )
    .await
    .context("failed to ensure scheduler tables")?;
    Ok(())
}

async fn ensure_archive_tables(pool: &PgPool) -> Result<()> {
    pool.execute(
        r"
        CREATE TABLE IF NOT EXISTS match (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            ea_match_id TEXT NOT NULL,
            ea_timestamp BIGINT NOT NULL,
            season_id UUID REFERENCES season(id) ON DELETE SET NULL,
            club_id UUID REFERENCES club(id) ON DELETE SET NULL,
            is_home BOOLEAN,
            home_club_ea_id TEXT,
            away_club_ea_id TEXT,
            home_score INTEGER,
            away_score INTEGER,
            winning_club_ea_id TEXT,
            raw_json JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT uq_match_ea_match_id_timestamp UNIQUE (ea_match_id, ea_timestamp)
        );

        CREATE INDEX IF NOT EXISTS ix_match_season_id ON match (season_id);
        CREATE INDEX IF NOT EXISTS ix_match_ea_match_id ON match (ea_match_id);

        CREATE TABLE IF NOT EXISTS player (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            ea_player_id TEXT NOT NULL UNIQUE,
            gamertag TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );

        CREATE INDEX IF NOT EXISTS ix_player_gamertag ON player (gamertag);
        ",
    )
    .await
    .context("failed to ensure match/player tables")?;

    pool.execute(
        r"
        CREATE TABLE IF NOT EXISTS player_match_stats (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            player_id UUID NOT NULL REFERENCES player(id) ON DELETE CASCADE,
            ea_player_id TEXT NOT NULL,
            ea_match_id TEXT NOT NULL,
            ea_timestamp BIGINT,
            match_id UUID REFERENCES match(id) ON DELETE CASCADE,
            stat_class INTEGER,
            glbrksavepct REAL,
            glbrksaves INTEGER,
            glbrkshots INTEGER,
            gldsaves INTEGER,
            glga INTEGER,
            glgaa REAL,
            glpensavepct REAL,
            glpensaves INTEGER,
            glpenshots INTEGER,
            glpkclearzone INTEGER,
            glpokechecks INTEGER,
            glsavepct REAL,
            glsaves INTEGER,
            glshots INTEGER,
            glsoperiods INTEGER,
            is_guest INTEGER,
            opponent_club_id TEXT,
            opponent_score INTEGER,
            opponent_team_id TEXT,
            player_dnf INTEGER,
            player_level INTEGER,
            p_nhl_online_game_type TEXT,
            position TEXT,
            pos_sorted INTEGER,
            rating_defense REAL,
            rating_offense REAL,
            rating_teamplay REAL,
            score INTEGER,
            skassists INTEGER,
            skbs INTEGER,
            skdeflections INTEGER,
            skfol INTEGER,
            skfopct REAL,
            skfow INTEGER,
            skgiveaways INTEGER,
            skgoals INTEGER,
            skgwg INTEGER,
            skhits INTEGER,
            skinterceptions INTEGER,
            skpassattempts INTEGER,
            skpasses INTEGER,
            skpasspct REAL,
            skpenaltiesdrawn INTEGER,
            skpim INTEGER,
            skpkclearzone INTEGER,
            skplusmin INTEGER,
            skpossession INTEGER,
            skppg INTEGER,
            sksaucerpasses INTEGER,
            skshg INTEGER,
            skshotattempts INTEGER,
            skshotonnetpct REAL,
            skshotpct REAL,
            skshots INTEGER,
            sktakeaways INTEGER,
            team_id TEXT,
            team_side INTEGER,
            toi INTEGER,
            toiseconds INTEGER,
            client_platform TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT uq_player_match_stats_player_match UNIQUE (ea_player_id, ea_match_id)
        );

        CREATE INDEX IF NOT EXISTS ix_player_match_stats_ea_match_id
            ON player_match_stats (ea_match_id);
        CREATE INDEX IF NOT EXISTS ix_player_match_stats_match_id
            ON player_match_stats (match_id);
        ",
    )
    .await
    .context("failed to ensure player_match_stats table")?;
    Ok(())
}
