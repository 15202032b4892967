/// EA Pro Clubs APIクライアント。
///
/// クラブ検索と試合一覧の2つのエンドポイントだけを叩く。タイムアウト、
/// 再試行、エラー分類をここで吸収し、上位には分類済みの [`EaError`] を返す。
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::util::retry::RetryPolicy;

/// EAはブラウザ以外のUser-Agentに不安定な応答を返すため、
/// デスクトップChrome相当のヘッダープロファイルを使う。
const EA_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36";

const EA_MATCH_TYPE: &str = "club_private";

/// 上流エラーの分類。
#[derive(Debug, thiserror::Error)]
pub(crate) enum EaError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("rate limited by upstream (HTTP 429)")]
    RateLimited,
    #[error("upstream server error: HTTP {0}")]
    Upstream5xx(StatusCode),
    #[error("permanent upstream error: HTTP {0}")]
    Permanent(StatusCode),
    #[error("failed to decode upstream payload: {0}")]
    Decode(String),
}

impl EaError {
    /// ネットワーク障害・5xx・429は再試行可能。4xxとデコード失敗は不可。
    #[must_use]
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited | Self::Upstream5xx(_)
        )
    }

    #[must_use]
    pub(crate) fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// EAクライアントの設定。
#[derive(Debug, Clone)]
pub(crate) struct EaClientConfig {
    pub(crate) base_url: String,
    pub(crate) platform: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) max_attempts: usize,
}

/// EAとの通信を管理するクライアント。プロセス全体で1つ共有する。
pub(crate) struct EaClient {
    client: Client,
    base_url: Url,
    platform: String,
    retry: RetryPolicy,
    // クラブ名→clubId の解決結果は安定なのでプロセス内でキャッシュする
    resolve_cache: Mutex<HashMap<(String, String), String>>,
}

impl EaClient {
    /// 新しいEAクライアントを作成する。
    ///
    /// # Errors
    /// ベースURLが不正、またはHTTPクライアントの組み立てに失敗した場合。
    pub(crate) fn new(config: EaClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers.insert("accept-language", HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("origin", HeaderValue::from_static("https://www.ea.com"));
        headers.insert("referer", HeaderValue::from_static("https://www.ea.com/"));

        let client = Client::builder()
            .user_agent(EA_USER_AGENT)
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .context("failed to build EA HTTP client")?;

        let base_url = Url::parse(&config.base_url).context("invalid EA base URL")?;

        Ok(Self {
            client,
            base_url,
            platform: config.platform,
            retry: RetryPolicy::default().with_max_attempts(config.max_attempts),
            resolve_cache: Mutex::new(HashMap::new()),
        })
    }

    /// クラブ名からEAのclubIdを解決する。
    ///
    /// 結果は(クラブ名, プラットフォーム)をキーにメモリ内キャッシュされる。
    /// 該当なしは `Ok(None)`。応答の形が想定外の場合も `Ok(None)` として扱う。
    ///
    /// # Errors
    /// 再試行を使い切ったネットワーク・5xx・429、および即時失敗の4xxを返す。
    pub(crate) async fn search_club(&self, club_name: &str) -> Result<Option<String>, EaError> {
        let cache_key = (club_name.to_string(), self.platform.clone());
        if let Some(hit) = self
            .resolve_cache
            .lock()
            .expect("resolve cache lock poisoned")
            .get(&cache_key)
        {
            return Ok(Some(hit.clone()));
        }

        let mut url = self.join("clubs/search")?;
        url.query_pairs_mut()
            .append_pair("platform", &self.platform)
            .append_pair("clubName", club_name)
            .append_pair("maxResultCount", "5");

        let body = self.get_json(url, "club search").await?;

        // 応答はclubId文字列をキーにしたオブジェクト。先頭エントリを採用する。
        let resolved = body.as_object().and_then(|map| {
            let (first_key, club_data) = map.iter().next()?;
            let club_id = club_data
                .get("clubId")
                .and_then(value_to_id)
                .unwrap_or_else(|| first_key.clone());
            Some(club_id)
        });

        if let Some(club_id) = &resolved {
            self.resolve_cache
                .lock()
                .expect("resolve cache lock poisoned")
                .insert(cache_key, club_id.clone());
        } else {
            debug!(club_name, "EA club search returned no result");
        }

        Ok(resolved)
    }

    /// 指定clubIdの直近のプライベート試合一覧を取得する。
    ///
    /// 上流は直近数十件のみを返し、過去分のページングは存在しない。
    /// 空ボディや配列以外の応答は空リストとして扱う。
    pub(crate) async fn fetch_matches(&self, club_id: &str) -> Result<Vec<Value>, EaError> {
        let mut url = self.join("clubs/matches")?;
        url.query_pairs_mut()
            .append_pair("matchType", EA_MATCH_TYPE)
            .append_pair("platform", &self.platform)
            .append_pair("clubIds", club_id);

        let body = self.get_json(url, "match list").await?;

        match body {
            Value::Array(matches) => Ok(matches),
            Value::Null => Ok(Vec::new()),
            other => {
                warn!(
                    club_id,
                    payload_type = json_type_name(&other),
                    "EA match list had unexpected shape, treating as empty"
                );
                Ok(Vec::new())
            }
        }
    }

    fn join(&self, path: &str) -> Result<Url, EaError> {
        // base URLはパス結合しやすいよう末尾スラッシュを保証する
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        base.join(path)
            .map_err(|e| EaError::Decode(format!("failed to build EA URL: {e}")))
    }

    /// 再試行ポリシー込みでGETし、ボディをJSONとして返す。
    ///
    /// 空ボディ・壊れたJSONはエラーではなく `Value::Null` になる。
    async fn get_json(&self, url: Url, what: &str) -> Result<Value, EaError> {
        let mut attempt = 0;
        loop {
            match self.try_get(url.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && self.retry.can_retry(attempt) => {
                    let delay = self
                        .retry
                        .delay_for_attempt(attempt + 1, err.is_rate_limited());
                    warn!(
                        %url,
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "EA request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_get(&self, url: Url) -> Result<Value, EaError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(EaError::Network)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EaError::RateLimited);
        }
        if status.is_server_error() {
            return Err(EaError::Upstream5xx(status));
        }
        if !status.is_success() {
            return Err(EaError::Permanent(status));
        }

        let bytes = response.bytes().await.map_err(EaError::Network)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }

        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(value),
            Err(error) => {
                // 壊れたボディは空扱い（分類上はdecodeだがティックは止めない）
                warn!(
                    error = %EaError::Decode(error.to_string()),
                    "EA response body was not valid JSON, treating as empty"
                );
                Ok(Value::Null)
            }
        }
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> EaClientConfig {
        EaClientConfig {
            base_url,
            platform: "common-gen5".to_string(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            max_attempts: 3,
        }
    }

    fn test_client(server: &MockServer) -> EaClient {
        EaClient::new(test_config(server.uri())).expect("client should build")
    }

    #[tokio::test]
    async fn search_club_returns_first_result() {
        let server = MockServer::start().await;

        let body = json!({
            "9001": {"clubId": 9001, "name": "Ice Breakers"},
            "9002": {"clubId": 9002, "name": "Ice Breakers Too"}
        });

        Mock::given(method("GET"))
            .and(path("/clubs/search"))
            .and(query_param("clubName", "Ice Breakers"))
            .and(query_param("platform", "common-gen5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let resolved = client
            .search_club("Ice Breakers")
            .await
            .expect("search should succeed");

        assert_eq!(resolved.as_deref(), Some("9001"));
    }

    #[tokio::test]
    async fn search_club_caches_resolution() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/clubs/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"77": {"clubId": "77"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let first = client.search_club("Night Shift").await.expect("first call");
        let second = client
            .search_club("Night Shift")
            .await
            .expect("cached call");

        assert_eq!(first.as_deref(), Some("77"));
        assert_eq!(second.as_deref(), Some("77"));
    }

    #[tokio::test]
    async fn search_club_empty_object_is_none() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/clubs/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let resolved = client.search_club("Ghost Club").await.expect("search");

        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn fetch_matches_returns_array() {
        let server = MockServer::start().await;

        let body = json!([
            {"matchId": "m-1", "timestamp": 1_700_000_000},
            {"matchId": "m-2", "timestamp": 1_700_000_300}
        ]);

        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .and(query_param("matchType", "club_private"))
            .and(query_param("clubIds", "9001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let matches = client.fetch_matches("9001").await.expect("fetch");

        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn fetch_matches_malformed_body_is_empty() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>sorry</html>"))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let matches = client.fetch_matches("9001").await.expect("fetch");

        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surface() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = EaClient::new(EaClientConfig {
            // ジッター待ちを短くするため再試行設定を縮める
            base_url: server.uri(),
            platform: "common-gen5".to_string(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
            max_attempts: 3,
        })
        .expect("client should build");

        // 短いバックオフで回すためポリシーを差し替え
        let client = EaClient {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
                rate_limit_floor_ms: 1,
            },
            ..client
        };

        let error = client
            .fetch_matches("9001")
            .await
            .expect_err("retries exhausted should fail");

        assert!(matches!(error, EaError::Upstream5xx(_)));
    }

    #[tokio::test]
    async fn client_errors_fail_immediately() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let error = client
            .fetch_matches("9001")
            .await
            .expect_err("403 should not be retried");

        assert!(matches!(error, EaError::Permanent(status) if status == StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/clubs/matches"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let client = EaClient {
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 5,
                rate_limit_floor_ms: 1,
            },
            ..client
        };

        let error = client
            .fetch_matches("9001")
            .await
            .expect_err("rate limit should surface after retries");

        assert!(matches!(error, EaError::RateLimited));
    }
}
