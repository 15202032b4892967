use chrono::{DateTime, Utc};
use uuid::Uuid;

/// ティック1回分の監査レコードの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// シーズンごとのスケジューラ設定。configsテーブルが常に正となる。
#[derive(Debug, Clone)]
pub(crate) struct SchedulerConfig {
    pub(crate) id: Uuid,
    pub(crate) season_id: Uuid,
    pub(crate) is_active: bool,
    pub(crate) is_paused: bool,
    /// 稼働曜日（0=月曜..6=日曜）
    pub(crate) days_of_week: Vec<i32>,
    /// 稼働開始時（0..=23）
    pub(crate) start_hour: i32,
    /// 稼働終了時（1..=24、排他的上限）
    pub(crate) end_hour: i32,
    pub(crate) interval_minutes: i32,
    pub(crate) interval_seconds: i32,
    pub(crate) last_run_at: Option<DateTime<Utc>>,
    pub(crate) last_run_status: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl SchedulerConfig {
    /// ティック間隔。
    pub(crate) fn interval(&self) -> std::time::Duration {
        let secs = i64::from(self.interval_minutes) * 60 + i64::from(self.interval_seconds);
        std::time::Duration::from_secs(u64::try_from(secs.max(60)).unwrap_or(60))
    }
}

/// 設定作成時の入力。
#[derive(Debug, Clone)]
pub(crate) struct SchedulerConfigDraft {
    pub(crate) days_of_week: Vec<i32>,
    pub(crate) start_hour: i32,
    pub(crate) end_hour: i32,
    pub(crate) interval_minutes: i32,
    pub(crate) interval_seconds: i32,
}

impl Default for SchedulerConfigDraft {
    fn default() -> Self {
        Self {
            days_of_week: Vec::new(),
            start_hour: 18,
            end_hour: 23,
            interval_minutes: 30,
            interval_seconds: 0,
        }
    }
}

/// 設定の部分更新。Noneのフィールドは変更しない。
#[derive(Debug, Clone, Default)]
pub(crate) struct SchedulerConfigPatch {
    pub(crate) days_of_week: Option<Vec<i32>>,
    pub(crate) start_hour: Option<i32>,
    pub(crate) end_hour: Option<i32>,
    pub(crate) interval_minutes: Option<i32>,
    pub(crate) interval_seconds: Option<i32>,
}

impl SchedulerConfigDraft {
    /// 値域を検証する。メッセージは呼び出し側で422として返される。
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.days_of_week.iter().any(|d| !(0..=6).contains(d)) {
            return Err("days_of_week entries must be in 0..=6 (0=Monday)".to_string());
        }
        if !(0..=23).contains(&self.start_hour) {
            return Err("start_hour must be in 0..=23".to_string());
        }
        if !(1..=24).contains(&self.end_hour) {
            return Err("end_hour must be in 1..=24".to_string());
        }
        if self.interval_minutes < 1 {
            return Err("interval_minutes must be at least 1".to_string());
        }
        if !(0..=59).contains(&self.interval_seconds) {
            return Err("interval_seconds must be in 0..=59".to_string());
        }
        Ok(())
    }

    pub(crate) fn merged(config: &SchedulerConfig, patch: &SchedulerConfigPatch) -> Self {
        Self {
            days_of_week: patch
                .days_of_week
                .clone()
                .unwrap_or_else(|| config.days_of_week.clone()),
            start_hour: patch.start_hour.unwrap_or(config.start_hour),
            end_hour: patch.end_hour.unwrap_or(config.end_hour),
            interval_minutes: patch.interval_minutes.unwrap_or(config.interval_minutes),
            interval_seconds: patch.interval_seconds.unwrap_or(config.interval_seconds),
        }
    }
}

/// ティックの監査レコード。クローズ後は不変。
#[derive(Debug, Clone)]
pub(crate) struct SchedulerRun {
    pub(crate) id: Uuid,
    pub(crate) scheduler_config_id: Uuid,
    pub(crate) season_id: Uuid,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) status: RunStatus,
    pub(crate) matches_fetched: i32,
    pub(crate) matches_new: i32,
    pub(crate) error_message: Option<String>,
}

/// シーズンに紐づくクラブの取得用ビュー。
#[derive(Debug, Clone)]
pub(crate) struct SeasonClub {
    pub(crate) club_id: Uuid,
    pub(crate) name: String,
    pub(crate) ea_id: Option<String>,
}
