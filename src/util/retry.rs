/// 上流呼び出しの再試行ポリシー。
///
/// 待ち時間は指数的に広がる幅から一様に引く（全幅ジッター）。
/// HTTP 429だけは別枠で、必ず数秒の下駄を履かせる。
use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    /// 試行回数の上限。初回のリクエストも1回と数える。
    pub(crate) max_attempts: usize,
    /// 1回目の再試行で使うジッター幅（ミリ秒）
    pub(crate) base_delay_ms: u64,
    /// ジッター幅をこれ以上は広げない（ミリ秒）
    pub(crate) max_delay_ms: u64,
    /// レート制限を受けた直後に必ず空ける時間（ミリ秒）
    pub(crate) rate_limit_floor_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            rate_limit_floor_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub(crate) const fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// 0起点で `attempt` 回目が失敗した後、まだ次を試してよいか。
    #[must_use]
    pub(crate) const fn can_retry(&self, attempt: usize) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// `attempt` 回目（0起点、0は初回で待ちなし）の前に置く待ち時間。
    ///
    /// ジッター幅は base を1回ごとに倍にし、上限で刈り込む。
    pub(crate) fn delay_for_attempt(&self, attempt: usize, rate_limited: bool) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let doublings = (attempt - 1).min(20) as u32;
        let window = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(doublings))
            .min(self.max_delay_ms);

        let mut wait_ms = if window == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=window)
        };
        if rate_limited {
            wait_ms = wait_ms.saturating_add(self.rate_limit_floor_ms);
        }

        Duration::from_millis(wait_ms)
    }
}
