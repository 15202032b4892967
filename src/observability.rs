use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT_GUARD: OnceCell<()> = OnceCell::new();

/// ログ基盤を立ち上げる。プロセス内で何度呼ばれても設定は一度だけ。
///
/// 既定はJSONの構造化出力。`RUST_LOG_FORMAT=text` で開発向けの
/// プレーン出力になり、フィルタは `RUST_LOG`（無指定なら `info`）。
///
/// # Errors
/// グローバルサブスクライバの登録に失敗した場合はエラーを返す。
pub fn init() -> Result<()> {
    INIT_GUARD.get_or_try_init(install_subscriber)?;
    Ok(())
}

fn install_subscriber() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    let text_format = matches!(std::env::var("RUST_LOG_FORMAT").as_deref(), Ok("text"));
    let outcome = if text_format {
        registry.with(fmt::layer()).try_init()
    } else {
        registry
            .with(fmt::layer().json().flatten_event(true).with_target(false))
            .try_init()
    };

    outcome.map_err(|e| anyhow!("tracing init: {e}"))
}
