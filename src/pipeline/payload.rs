/// EAの試合ペイロードへの型付きアクセサ。
///
/// 上流のJSONは保全のためそのままJSONBに保存し、正規化に必要な値だけを
/// ここで取り出す。欠けている・壊れているフィールドはすべてNoneになる。
use serde_json::{Map, Value};

use crate::util::coerce;

/// `clubs` マップの teamSide 値。0=ホーム、1=アウェイ。
const TEAM_SIDE_HOME: i64 = 0;
const TEAM_SIDE_AWAY: i64 = 1;

#[derive(Debug, Clone)]
pub(crate) struct MatchPayload {
    raw: Value,
}

/// 片側チームの情報。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SideInfo {
    pub(crate) club_ea_id: String,
    pub(crate) score: Option<i32>,
}

/// 1人分のプレイヤー統計エントリ。
#[derive(Debug, Clone)]
pub(crate) struct PlayerEntry<'a> {
    pub(crate) ea_player_id: &'a str,
    pub(crate) stats: &'a Value,
}

impl MatchPayload {
    pub(crate) fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub(crate) fn raw(&self) -> &Value {
        &self.raw
    }

    pub(crate) fn ea_match_id(&self) -> Option<String> {
        coerce::as_string(self.raw.get("matchId"))
    }

    pub(crate) fn ea_timestamp(&self) -> Option<i64> {
        coerce::as_i64(self.raw.get("timestamp"))
    }

    fn clubs(&self) -> Option<&Map<String, Value>> {
        self.raw.get("clubs")?.as_object()
    }

    fn side_with(&self, wanted: i64) -> Option<SideInfo> {
        let clubs = self.clubs()?;
        for (club_ea_id, data) in clubs {
            if coerce::as_i64(data.get("teamSide")) == Some(wanted) {
                return Some(SideInfo {
                    club_ea_id: club_ea_id.clone(),
                    score: coerce::as_i32(data.get("score")),
                });
            }
        }
        None
    }

    pub(crate) fn home_side(&self) -> Option<SideInfo> {
        self.side_with(TEAM_SIDE_HOME)
    }

    pub(crate) fn away_side(&self) -> Option<SideInfo> {
        self.side_with(TEAM_SIDE_AWAY)
    }

    /// 取得元クラブから見てホームかどうか。clubsマップに載っていなければNone。
    pub(crate) fn is_home_for(&self, club_ea_id: &str) -> Option<bool> {
        let side = coerce::as_i64(self.clubs()?.get(club_ea_id)?.get("teamSide"))?;
        match side {
            TEAM_SIDE_HOME => Some(true),
            TEAM_SIDE_AWAY => Some(false),
            _ => None,
        }
    }

    /// スコアから勝者のEA clubIdを導出する。同点・不明はNone。
    pub(crate) fn winning_club_ea_id(&self) -> Option<String> {
        let home = self.home_side()?;
        let away = self.away_side()?;
        let (home_score, away_score) = (home.score?, away.score?);
        match home_score.cmp(&away_score) {
            std::cmp::Ordering::Greater => Some(home.club_ea_id),
            std::cmp::Ordering::Less => Some(away.club_ea_id),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// 両チーム分のプレイヤー統計を列挙する。
    ///
    /// `players` は clubId → (playerId → stats) の二段マップ。
    pub(crate) fn player_entries(&self) -> Vec<PlayerEntry<'_>> {
        let mut entries = Vec::new();
        let Some(players) = self.raw.get("players").and_then(Value::as_object) else {
            return entries;
        };

        for club_players in players.values() {
            let Some(club_players) = club_players.as_object() else {
                continue;
            };
            for (ea_player_id, stats) in club_players {
                entries.push(PlayerEntry { ea_player_id, stats });
            }
        }

        entries
    }
}
