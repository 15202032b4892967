use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::EaClient;
use crate::store::ArchiveDao;
use crate::store::models::{RunStatus, SchedulerConfig, SeasonClub};

use super::payload::MatchPayload;
use super::persist::{MatchPersister, PersistOutcome};

/// ティック1回の実行結果。監査レコードに書いた内容の写し。
#[derive(Debug, Clone)]
pub(crate) struct TickOutcome {
    pub(crate) run_id: Uuid,
    pub(crate) status: RunStatus,
    #[allow(dead_code)]
    pub(crate) matches_fetched: i32,
    #[allow(dead_code)]
    pub(crate) matches_new: i32,
}

#[derive(Debug, Default)]
struct TickCounters {
    matches_fetched: i32,
    matches_new: i32,
    errors: Vec<String>,
    /// キャンセルで未処理の作業を残したまま打ち切ったか
    cut_short: bool,
}

impl TickCounters {
    /// 実行結果の確定ルール:
    /// エラーなしなら success（打ち切りがあれば partial）、
    /// エラーありで何か取れていれば partial、何も取れていなければ failed。
    fn status(&self) -> RunStatus {
        if self.errors.is_empty() {
            if self.cut_short {
                RunStatus::Partial
            } else {
                RunStatus::Success
            }
        } else if self.matches_fetched > 0 || self.matches_new > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }

    fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}

/// シーズン1つぶんのフェッチパイプライン。
///
/// runの開閉・クラブ列挙・上流呼び出し・試合ごとの永続化をつなぐ。
/// クラブ1件の失敗も試合1件の失敗もティック全体を止めない。
pub(crate) struct FetchPipeline {
    dao: Arc<ArchiveDao>,
    ea: Arc<EaClient>,
    persister: MatchPersister,
}

impl FetchPipeline {
    pub(crate) fn new(dao: Arc<ArchiveDao>, ea: Arc<EaClient>) -> Self {
        let persister = MatchPersister::new(dao.pool().clone());
        Self { dao, ea, persister }
    }

    /// ティック本体。必ずrunを1件開き、必ず閉じる。
    ///
    /// # Errors
    /// runの開閉そのものに失敗した場合のみエラーを返す。クラブ取得や
    /// 試合永続化の失敗はrunのステータスとerror_messageに畳み込まれる。
    pub(crate) async fn run_tick(
        &self,
        config: &SchedulerConfig,
        cancel: &CancellationToken,
    ) -> Result<TickOutcome> {
        let run = self
            .dao
            .open_run(config.id, config.season_id)
            .await
            .context("failed to open scheduler run")?;

        let counters = match self.execute(config, cancel).await {
            Ok(counters) => counters,
            Err(error) => {
                // パイプライン内部の想定外エラー。runをfailedで確定して伝播させる。
                let message = format!("{error:#}");
                self.dao
                    .close_run(run.id, RunStatus::Failed, 0, 0, Some(&message))
                    .await
                    .context("failed to close crashed scheduler run")?;
                self.dao
                    .update_last_run(config.id, run.started_at, RunStatus::Failed)
                    .await?;
                return Err(error);
            }
        };

        let status = counters.status();
        self.dao
            .close_run(
                run.id,
                status,
                counters.matches_fetched,
                counters.matches_new,
                counters.error_message().as_deref(),
            )
            .await
            .context("failed to close scheduler run")?;
        self.dao
            .update_last_run(config.id, run.started_at, status)
            .await?;

        info!(
            season_id = %config.season_id,
            run_id = %run.id,
            status = %status,
            matches_fetched = counters.matches_fetched,
            matches_new = counters.matches_new,
            "tick finished"
        );

        Ok(TickOutcome {
            run_id: run.id,
            status,
            matches_fetched: counters.matches_fetched,
            matches_new: counters.matches_new,
        })
    }

    async fn execute(
        &self,
        config: &SchedulerConfig,
        cancel: &CancellationToken,
    ) -> Result<TickCounters> {
        let mut counters = TickCounters::default();

        let clubs = self
            .dao
            .season_clubs(config.season_id)
            .await
            .context("failed to enumerate season clubs")?;

        if clubs.is_empty() {
            info!(season_id = %config.season_id, "no clubs attached to season");
            return Ok(counters);
        }

        for club in &clubs {
            if cancel.is_cancelled() {
                counters.cut_short = true;
                break;
            }

            let Some(club_ea_id) = self.resolve_club(club, &mut counters).await else {
                continue;
            };

            let matches = match self.ea.fetch_matches(&club_ea_id).await {
                Ok(matches) => matches,
                Err(error) => {
                    warn!(club = %club.name, error = %error, "match fetch failed");
                    counters
                        .errors
                        .push(format!("club {}: {}", club.name, error));
                    continue;
                }
            };

            counters.matches_fetched += matches.len() as i32;

            for raw in matches {
                if cancel.is_cancelled() {
                    counters.cut_short = true;
                    break;
                }

                let payload = MatchPayload::new(raw);
                match self
                    .persister
                    .persist_match(config.season_id, club, &club_ea_id, &payload)
                    .await
                {
                    Ok(PersistOutcome::Inserted) => counters.matches_new += 1,
                    Ok(PersistOutcome::Duplicate | PersistOutcome::Skipped) => {}
                    Err(error) => {
                        warn!(
                            club = %club.name,
                            ea_match_id = payload.ea_match_id().as_deref().unwrap_or("unknown"),
                            error = %format!("{error:#}"),
                            "match persist failed"
                        );
                        counters
                            .errors
                            .push(format!("club {}: {:#}", club.name, error));
                    }
                }
            }

            if counters.cut_short {
                break;
            }
        }

        Ok(counters)
    }

    /// クラブのEA clubIdを決める。
    ///
    /// 名前解決が保存済みのidと食い違えば書き戻す。解決に失敗しても
    /// 保存済みidがあればそれで続行し、どちらも無ければこのクラブの
    /// フェッチ失敗としてエラーに計上する。
    async fn resolve_club(&self, club: &SeasonClub, counters: &mut TickCounters) -> Option<String> {
        match self.ea.search_club(&club.name).await {
            Ok(Some(resolved)) => {
                if club.ea_id.as_deref() != Some(resolved.as_str()) {
                    if let Err(error) = self.dao.update_club_ea_id(club.club_id, &resolved).await {
                        warn!(club = %club.name, error = %error, "failed to store resolved ea_id");
                    } else {
                        info!(club = %club.name, ea_id = %resolved, "updated club ea_id");
                    }
                }
                Some(resolved)
            }
            Ok(None) => {
                if let Some(known) = &club.ea_id {
                    Some(known.clone())
                } else {
                    warn!(club = %club.name, "no EA id found for club, skipping");
                    counters
                        .errors
                        .push(format!("club {}: could not resolve EA id", club.name));
                    None
                }
            }
            Err(error) => {
                if let Some(known) = &club.ea_id {
                    warn!(club = %club.name, error = %error, "club resolve failed, using stored id");
                    Some(known.clone())
                } else {
                    warn!(club = %club.name, error = %error, "club resolve failed");
                    counters
                        .errors
                        .push(format!("club {}: resolve failed: {}", club.name, error));
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(fetched: i32, new: i32, errors: Vec<String>, cut_short: bool) -> TickCounters {
        TickCounters {
            matches_fetched: fetched,
            matches_new: new,
            errors,
            cut_short,
        }
    }

    #[test]
    fn clean_tick_is_success() {
        assert_eq!(counters(3, 3, vec![], false).status(), RunStatus::Success);
        assert_eq!(counters(0, 0, vec![], false).status(), RunStatus::Success);
    }

    #[test]
    fn errors_with_progress_are_partial() {
        let c = counters(2, 2, vec!["club B: HTTP 403".into()], false);
        assert_eq!(c.status(), RunStatus::Partial);
    }

    #[test]
    fn errors_without_progress_are_failed() {
        let c = counters(0, 0, vec!["club A: HTTP 500".into()], false);
        assert_eq!(c.status(), RunStatus::Failed);
    }

    #[test]
    fn cancellation_mid_work_is_partial() {
        assert_eq!(counters(10, 4, vec![], true).status(), RunStatus::Partial);
    }

    #[test]
    fn error_message_joins_all_failures() {
        let c = counters(
            1,
            0,
            vec!["club A: x".into(), "club B: y".into()],
            false,
        );
        assert_eq!(c.error_message().as_deref(), Some("club A: x; club B: y"));
        assert!(counters(1, 1, vec![], false).error_message().is_none());
    }
}

// Postgres + モックEAサーバーでの一気通貫テスト。DATABASE_URL未設定ならスキップ。
#[cfg(test)]
mod db_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{Value, json};
    use sqlx::postgres::PgPoolOptions;
    use sqlx::{PgPool, Row};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::clients::{EaClient, EaClientConfig};
    use crate::store::models::{RunStatus, SchedulerConfig, SchedulerConfigDraft};
    use crate::store::{ArchiveDao, schema};

    use super::FetchPipeline;

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

    async fn seed_season_with_club(
        pool: &PgPool,
        club_name: &str,
    ) -> anyhow::Result<(Uuid, Uuid)> {
        let season_id = Uuid::new_v4();
        sqlx::query(r"INSERT INTO season (id, name) VALUES ($1, $2)")
            .bind(season_id)
            .bind(format!("Season {season_id}"))
            .execute(pool)
            .await?;

        let club_id = Uuid::new_v4();
        sqlx::query(r"INSERT INTO club (id, name) VALUES ($1, $2)")
            .bind(club_id)
            .bind(club_name)
            .execute(pool)
            .await?;
        sqlx::query(r"INSERT INTO club_season (club_id, season_id) VALUES ($1, $2)")
            .bind(club_id)
            .bind(season_id)
            .execute(pool)
            .await?;

        Ok((season_id, club_id))
    }

    async fn open_config(dao: &ArchiveDao, season_id: Uuid) -> anyhow::Result<SchedulerConfig> {
        let draft = SchedulerConfigDraft {
            days_of_week: (0..7).collect(),
            start_hour: 0,
            end_hour: 24,
            interval_minutes: 1,
            interval_seconds: 0,
        };
        let config = dao
            .create_config(season_id, &draft)
            .await?
            .expect("config should be new");
        Ok(config)
    }

    fn pipeline_against(pool: PgPool, server: &MockServer) -> (FetchPipeline, Arc<ArchiveDao>) {
        let dao = Arc::new(ArchiveDao::new(pool));
        let ea = Arc::new(
            EaClient::new(EaClientConfig {
                base_url: server.uri(),
                platform: "common-gen5".to_string(),
                connect_timeout: Duration::from_secs(2),
                request_timeout: Duration::from_secs(5),
                max_attempts: 2,
            })
            .expect("client should build"),
        );
        (FetchPipeline::new(Arc::clone(&dao), ea), dao)
    }

    fn ea_match(match_id: &str, ts: i64, home_club: &str, away_club: &str) -> Value {
        json!({
            "matchId": match_id,
            "timestamp": ts,
            "clubs": {
                (home_club): {"teamSide": "0", "score": "3"},
                (away_club): {"teamSide": "1", "score": "2"}
            },
            "players": {
                (home_club): {
                    (format!("{match_id}-h1")): {
                        "playername": "home-one", "skgoals": "2", "position": "center",
                        "toiseconds": "3600", "class": "1"
                    },
                    (format!("{match_id}-h2")): {
                        "playername": "home-tendy", "glsaves": "28", "glsavepct": "0.93",
                        "position": "goalie"
                    }
                },
                (away_club): {
                    (format!("{match_id}-a1")): {
                        "playername": "away-one", "skgoals": "1", "skshotpct": "50.0"
                    }
                }
            }
        })
    }

    async fn mount_search(server: &MockServer, club_name: &str, ea_club_id: &str) {
        Mock::given(method("GET"))
            .and(path("/clubs/search"))
            .and(query_param("clubName", club_name))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({(ea_club_id): {"clubId": ea_club_id}})),
            )
            .mount(server)
            .await;
    }

    async fn count_rows(pool: &PgPool, sql: &str, season_id: Uuid) -> anyhow::Result<i64> {
        let row = sqlx::query(sql).bind(season_id).fetch_one(pool).await?;
        Ok(row.try_get("count")?)
    }

    #[tokio::test]
    async fn fresh_tick_ingests_matches_players_and_stats() -> anyhow::Result<()> {
        let Some(pool) = connect().await? else {
            return Ok(());
        };
        let server = MockServer::start().await;

        let tag = Uuid::new_v4().simple().to_string();
        let club_name = format!("Fresh Club {tag}");
        let home = format!("h{tag}");
        let away = format!("a{tag}");
        let (season_id, _club_id) = seed_season_with_club(&pool, &club_name).await?;

        mount_search(&server, &club_name, &home).await;
        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .and(query_param("clubIds", home.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                ea_match(&format!("m1-{tag}"), 1_700_000_000, &home, &away),
                ea_match(&format!("m2-{tag}"), 1_700_000_300, &home, &away),
                ea_match(&format!("m3-{tag}"), 1_700_000_600, &home, &away),
            ])))
            .mount(&server)
            .await;

        let (pipeline, dao) = pipeline_against(pool.clone(), &server);
        let config = open_config(&dao, season_id).await?;

        let outcome = pipeline
            .run_tick(&config, &CancellationToken::new())
            .await?;

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.matches_fetched, 3);
        assert_eq!(outcome.matches_new, 3);

        let matches = count_rows(
            &pool,
            r"SELECT COUNT(*) AS count FROM match WHERE season_id = $1",
            season_id,
        )
        .await?;
        assert_eq!(matches, 3);

        // 3 players per match, shared across matches -> 9 unique ids here
        let stats = count_rows(
            &pool,
            r"SELECT COUNT(*) AS count FROM player_match_stats
              WHERE match_id IN (SELECT id FROM match WHERE season_id = $1)",
            season_id,
        )
        .await?;
        assert_eq!(stats, 9);

        let config = dao
            .config_by_season(season_id)
            .await?
            .expect("config exists");
        assert_eq!(config.last_run_status.as_deref(), Some("success"));
        assert!(config.last_run_at.is_some());

        let (runs, count) = dao.runs_for_config(config.id, 0, 10).await?;
        assert_eq!(count, 1);
        assert_eq!(runs[0].status, RunStatus::Success);
        assert!(runs[0].finished_at.is_some());
        assert!(runs[0].error_message.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn replayed_tick_stores_nothing_new() -> anyhow::Result<()> {
        let Some(pool) = connect().await? else {
            return Ok(());
        };
        let server = MockServer::start().await;

        let tag = Uuid::new_v4().simple().to_string();
        let club_name = format!("Replay Club {tag}");
        let home = format!("h{tag}");
        let away = format!("a{tag}");
        let (season_id, _club_id) = seed_season_with_club(&pool, &club_name).await?;

        mount_search(&server, &club_name, &home).await;
        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .and(query_param("clubIds", home.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                ea_match(&format!("r1-{tag}"), 1_700_100_000, &home, &away),
                ea_match(&format!("r2-{tag}"), 1_700_100_300, &home, &away),
            ])))
            .mount(&server)
            .await;

        let (pipeline, dao) = pipeline_against(pool.clone(), &server);
        let config = open_config(&dao, season_id).await?;
        let cancel = CancellationToken::new();

        let first = pipeline.run_tick(&config, &cancel).await?;
        assert_eq!(first.matches_new, 2);

        let second = pipeline.run_tick(&config, &cancel).await?;
        assert_eq!(second.status, RunStatus::Success);
        assert_eq!(second.matches_fetched, 2);
        assert_eq!(second.matches_new, 0);

        let matches = count_rows(
            &pool,
            r"SELECT COUNT(*) AS count FROM match WHERE season_id = $1",
            season_id,
        )
        .await?;
        assert_eq!(matches, 2);

        let stats = count_rows(
            &pool,
            r"SELECT COUNT(*) AS count FROM player_match_stats
              WHERE match_id IN (SELECT id FROM match WHERE season_id = $1)",
            season_id,
        )
        .await?;
        assert_eq!(stats, 6);
        Ok(())
    }

    #[tokio::test]
    async fn total_upstream_failure_closes_run_as_failed() -> anyhow::Result<()> {
        let Some(pool) = connect().await? else {
            return Ok(());
        };
        let server = MockServer::start().await;

        let tag = Uuid::new_v4().simple().to_string();
        let club_name = format!("Outage Club {tag}");
        let home = format!("h{tag}");
        let (season_id, _club_id) = seed_season_with_club(&pool, &club_name).await?;

        mount_search(&server, &club_name, &home).await;
        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (pipeline, dao) = pipeline_against(pool.clone(), &server);
        let config = open_config(&dao, season_id).await?;

        let outcome = pipeline
            .run_tick(&config, &CancellationToken::new())
            .await?;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.matches_fetched, 0);
        assert_eq!(outcome.matches_new, 0);

        let config = dao
            .config_by_season(season_id)
            .await?
            .expect("config exists");
        assert_eq!(config.last_run_status.as_deref(), Some("failed"));

        let (runs, _) = dao.runs_for_config(config.id, 0, 10).await?;
        assert_eq!(runs[0].status, RunStatus::Failed);
        let message = runs[0].error_message.as_deref().expect("error recorded");
        assert!(message.contains(&club_name));
        Ok(())
    }

    #[tokio::test]
    async fn one_failing_club_yields_partial_run() -> anyhow::Result<()> {
        let Some(pool) = connect().await? else {
            return Ok(());
        };
        let server = MockServer::start().await;

        let tag = Uuid::new_v4().simple().to_string();
        // ORDER BY name: "A ..." fetches before "B ..."
        let club_a = format!("A Club {tag}");
        let club_b = format!("B Club {tag}");
        let ea_a = format!("ca{tag}");
        let ea_b = format!("cb{tag}");
        let away = format!("x{tag}");

        let (season_id, _club_id) = seed_season_with_club(&pool, &club_a).await?;
        let club_b_id = Uuid::new_v4();
        sqlx::query(r"INSERT INTO club (id, name) VALUES ($1, $2)")
            .bind(club_b_id)
            .bind(&club_b)
            .execute(&pool)
            .await?;
        sqlx::query(r"INSERT INTO club_season (club_id, season_id) VALUES ($1, $2)")
            .bind(club_b_id)
            .bind(season_id)
            .execute(&pool)
            .await?;

        mount_search(&server, &club_a, &ea_a).await;
        mount_search(&server, &club_b, &ea_b).await;
        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .and(query_param("clubIds", ea_a.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                ea_match(&format!("p1-{tag}"), 1_700_200_000, &ea_a, &away),
                ea_match(&format!("p2-{tag}"), 1_700_200_300, &ea_a, &away),
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .and(query_param("clubIds", ea_b.as_str()))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let (pipeline, dao) = pipeline_against(pool.clone(), &server);
        let config = open_config(&dao, season_id).await?;

        let outcome = pipeline
            .run_tick(&config, &CancellationToken::new())
            .await?;

        assert_eq!(outcome.status, RunStatus::Partial);
        assert_eq!(outcome.matches_fetched, 2);
        assert_eq!(outcome.matches_new, 2);

        let (runs, _) = dao.runs_for_config(config.id, 0, 10).await?;
        let message = runs[0].error_message.as_deref().expect("error recorded");
        assert!(message.contains(&club_b));
        assert!(!message.contains(&club_a));
        Ok(())
    }

    #[tokio::test]
    async fn perspective_swap_keeps_first_row() -> anyhow::Result<()> {
        let Some(pool) = connect().await? else {
            return Ok(());
        };
        let server = MockServer::start().await;

        let tag = Uuid::new_v4().simple().to_string();
        let club_a = format!("A Swap {tag}");
        let club_b = format!("B Swap {tag}");
        let ea_a = format!("sa{tag}");
        let ea_b = format!("sb{tag}");

        let (season_id, _club_id) = seed_season_with_club(&pool, &club_a).await?;
        let club_b_id = Uuid::new_v4();
        sqlx::query(r"INSERT INTO club (id, name) VALUES ($1, $2)")
            .bind(club_b_id)
            .bind(&club_b)
            .execute(&pool)
            .await?;
        sqlx::query(r"INSERT INTO club_season (club_id, season_id) VALUES ($1, $2)")
            .bind(club_b_id)
            .bind(season_id)
            .execute(&pool)
            .await?;

        // 同じ試合が両クラブの取得結果に1回ずつ現れる
        let shared = ea_match(&format!("s1-{tag}"), 1_700_300_000, &ea_a, &ea_b);
        mount_search(&server, &club_a, &ea_a).await;
        mount_search(&server, &club_b, &ea_b).await;
        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .and(query_param("clubIds", ea_a.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([shared.clone()])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .and(query_param("clubIds", ea_b.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([shared])))
            .mount(&server)
            .await;

        let (pipeline, dao) = pipeline_against(pool.clone(), &server);
        let config = open_config(&dao, season_id).await?;

        let outcome = pipeline
            .run_tick(&config, &CancellationToken::new())
            .await?;

        // 2クラブ分フェッチされるが、保存される試合行は1つだけ
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.matches_fetched, 2);
        assert_eq!(outcome.matches_new, 1);

        let row = sqlx::query(
            r"SELECT is_home, winning_club_ea_id FROM match WHERE season_id = $1",
        )
        .bind(season_id)
        .fetch_one(&pool)
        .await?;
        // 先に取得したAクラブ（ホーム側）の視点が残る
        let is_home: Option<bool> = row.try_get("is_home")?;
        let winner: Option<String> = row.try_get("winning_club_ea_id")?;
        assert_eq!(is_home, Some(true));
        assert_eq!(winner.as_deref(), Some(ea_a.as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn gamertag_refreshes_on_later_match() -> anyhow::Result<()> {
        let Some(pool) = connect().await? else {
            return Ok(());
        };

        let tag = Uuid::new_v4().simple().to_string();
        let club_name = format!("Rename Club {tag}");
        let home = format!("h{tag}");
        let away = format!("a{tag}");
        let player_id = format!("pp-{tag}");
        let (season_id, _club_id) = seed_season_with_club(&pool, &club_name).await?;

        let match_with_name = |match_id: &str, ts: i64, gamertag: &str| {
            json!({
                "matchId": match_id,
                "timestamp": ts,
                "clubs": {
                    (home.as_str()): {"teamSide": "0", "score": "1"},
                    (away.as_str()): {"teamSide": "1", "score": "0"}
                },
                "players": {
                    (home.as_str()): {
                        (player_id.as_str()): {"playername": gamertag, "skgoals": "1"}
                    }
                }
            })
        };

        // 1ティック目: 旧ゲーマータグ
        let server1 = MockServer::start().await;
        mount_search(&server1, &club_name, &home).await;
        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                match_with_name(&format!("g1-{tag}"), 1_700_400_000, "old-name"),
            ])))
            .mount(&server1)
            .await;
        let (pipeline, dao) = pipeline_against(pool.clone(), &server1);
        let config = open_config(&dao, season_id).await?;
        pipeline
            .run_tick(&config, &CancellationToken::new())
            .await?;

        // 2ティック目: 別の試合で新しいゲーマータグ
        let server2 = MockServer::start().await;
        mount_search(&server2, &club_name, &home).await;
        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                match_with_name(&format!("g2-{tag}"), 1_700_400_600, "new-name"),
            ])))
            .mount(&server2)
            .await;
        let (pipeline2, _dao2) = pipeline_against(pool.clone(), &server2);
        pipeline2
            .run_tick(&config, &CancellationToken::new())
            .await?;

        let row = sqlx::query(r"SELECT gamertag FROM player WHERE ea_player_id = $1")
            .bind(&player_id)
            .fetch_one(&pool)
            .await?;
        let gamertag: String = row.try_get("gamertag")?;
        assert_eq!(gamertag, "new-name");

        let stats = count_rows(
            &pool,
            r"SELECT COUNT(*) AS count FROM player_match_stats
              WHERE match_id IN (SELECT id FROM match WHERE season_id = $1)",
            season_id,
        )
        .await?;
        assert_eq!(stats, 2, "one stats row per match for the same player");
        Ok(())
    }
}
