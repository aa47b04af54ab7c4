// src/services/client.rs

//! Request orchestration over a pluggable HTTP transport.
//!
//! [`RequestOrchestrator::execute`] performs exactly one upstream call: it
//! takes a rate-limit token, checks out a credential and proxy, sends the
//! request and feeds the outcome back into the pools and the limiter.
//! Retrying is left to the caller, guided by [`RequestError::disposition`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use super::credentials::{CredentialHandle, CredentialPool};
use super::endpoints::{ApiRequest, AuthKind};
use super::proxies::{ProxyHandle, ProxyPool};
use super::rate_limit::AdaptiveRateLimiter;
use crate::error::{AccountState, RequestError, Result};
use crate::models::{Config, CrawlerConfig};
use crate::utils::http::create_async_client;
use crate::utils::lock;

/// Outgoing GET request envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: Url, timeout: Duration) -> Self {
        Self {
            url,
            headers: BTreeMap::new(),
            proxy: None,
            timeout,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_proxy(mut self, proxy: Option<&ProxyHandle>) -> Self {
        self.proxy = proxy.map(|p| p.url().to_string());
        self
    }
}

/// Response envelope; header names are lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn header_u64(&self, name: &str) -> Option<u64> {
        self.header(name).and_then(|v| v.trim().parse().ok())
    }

    /// Server hint for when the rate limit lifts.
    pub fn reset_after(&self) -> Option<Duration> {
        if let Some(seconds) = self.header_u64("retry-after") {
            return Some(Duration::from_secs(seconds));
        }
        let reset_epoch = self.header("x-rate-limit-reset")?.trim().parse::<i64>().ok()?;
        let remaining = reset_epoch - Utc::now().timestamp();
        (remaining > 0).then(|| Duration::from_secs(remaining as u64))
    }
}

/// Network-level failure: no HTTP status was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub timeout: bool,
}

/// Sends HTTP requests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by reqwest, one client per proxy.
pub struct ReqwestTransport {
    config: CrawlerConfig,
    clients: Mutex<HashMap<Option<String>, reqwest::Client>>,
}

impl ReqwestTransport {
    pub fn new(config: CrawlerConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client> {
        let key = proxy.map(str::to_string);
        let mut clients = lock(&self.clients);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = create_async_client(&self.config, proxy)?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let client = self
            .client_for(request.proxy.as_deref())
            .map_err(|e| TransportError {
                message: e.to_string(),
                timeout: false,
            })?;

        let mut builder = client.get(request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let to_error = |e: reqwest::Error| TransportError {
            timeout: e.is_timeout(),
            message: e.to_string(),
        };
        let response = builder.send().await.map_err(to_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(to_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Known payload-level error codes.
enum PayloadError {
    Authentication,
    RateLimited,
    SessionSuspended(u32),
    TargetSuspended(u32),
    NotFound(String),
}

/// Issues single API calls with credential, proxy and rate-limit bookkeeping.
pub struct RequestOrchestrator {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialPool>,
    proxies: Arc<ProxyPool>,
    limiter: Arc<AdaptiveRateLimiter>,
    base_url: String,
    query_ids: HashMap<String, String>,
    forbidden: HashMap<u32, AccountState>,
    user_agent: String,
    timeout: Duration,
    max_credential_wait: Duration,
}

impl RequestOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialPool>,
        proxies: Arc<ProxyPool>,
        limiter: Arc<AdaptiveRateLimiter>,
        config: &Config,
    ) -> Self {
        Self {
            transport,
            credentials,
            proxies,
            limiter,
            base_url: config.api.base_url.clone(),
            query_ids: config.api.query_ids.clone(),
            forbidden: config.api.forbidden_map(),
            user_agent: config.crawler.user_agent.clone(),
            timeout: config.crawler.timeout(),
            max_credential_wait: config.crawler.max_credential_wait(),
        }
    }

    /// Build the full stack from configuration with a reqwest transport.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(ReqwestTransport::new(config.crawler.clone())),
            Arc::new(CredentialPool::new(
                config.credentials.clone(),
                &config.credential_pool,
            )),
            Arc::new(ProxyPool::new(config.proxies.clone(), &config.proxy_pool)),
            Arc::new(AdaptiveRateLimiter::new(config.rate_limit.clone())),
            config,
        )
    }

    pub fn credentials(&self) -> &Arc<CredentialPool> {
        &self.credentials
    }

    pub fn proxies(&self) -> &Arc<ProxyPool> {
        &self.proxies
    }

    pub fn limiter(&self) -> &Arc<AdaptiveRateLimiter> {
        &self.limiter
    }

    /// Perform one call and classify its outcome.
    pub async fn execute(&self, request: &ApiRequest) -> std::result::Result<Value, RequestError> {
        let endpoint = request.endpoint;
        let name = endpoint.operation;

        self.limiter
            .consume_blocking(endpoint.category, self.limiter.max_wait())
            .await?;
        let credential = self
            .credentials
            .acquire_or_wait(self.max_credential_wait)
            .await?;
        let proxy = if self.proxies.is_empty() {
            None
        } else {
            Some(self.proxies.select()?)
        };

        let url = request
            .url(&self.base_url, &self.query_ids)
            .map_err(|e| RequestError::Scraping {
                endpoint: name.to_string(),
                status: 0,
                message: e.to_string(),
            })?;
        let http = self.build_request(url, &credential, endpoint.auth, proxy.as_ref());

        let started = Instant::now();
        let response = match self.transport.get(http).await {
            Ok(response) => response,
            Err(e) => {
                self.credentials.report_error(&credential);
                if let Some(proxy) = &proxy {
                    self.proxies.report_failure(proxy, None);
                }
                log::warn!("{} request failed: {}", name, e.message);
                return Err(RequestError::Transport {
                    endpoint: name.to_string(),
                    message: e.message,
                    timeout: e.timeout,
                });
            }
        };
        let latency = started.elapsed();

        if let Some(proxy) = &proxy {
            if response.status >= 500 {
                self.proxies.report_failure(proxy, Some(latency));
            } else {
                self.proxies.report_success(proxy, latency);
            }
        }
        if let Some(remaining) = response.header_u64("x-rate-limit-remaining") {
            self.limiter.on_rate_limit_headers(endpoint.category, remaining);
        }

        match response.status {
            200..=299 => self.classify_success(request, &credential, &response),
            429 => {
                let reset = response.reset_after();
                self.credentials.report_rate_limited(&credential, reset);
                self.limiter.on_rate_limit(endpoint.category);
                Err(RequestError::RateLimited {
                    endpoint: name.to_string(),
                    retry_after: reset.unwrap_or_default(),
                })
            }
            401 => {
                self.credentials.report_invalid(&credential);
                Err(RequestError::Authentication {
                    endpoint: name.to_string(),
                })
            }
            403 => {
                self.credentials.report_error(&credential);
                let (code, state) = self.forbidden_state(&response.body);
                if let Some(state) = state {
                    log::warn!("Credential {} is {}", credential.label(), state);
                }
                Err(RequestError::Forbidden {
                    endpoint: name.to_string(),
                    state,
                    code,
                })
            }
            status => {
                self.credentials.report_error(&credential);
                Err(RequestError::Scraping {
                    endpoint: name.to_string(),
                    status,
                    message: truncate(&response.body, 200),
                })
            }
        }
    }

    fn build_request(
        &self,
        url: Url,
        credential: &CredentialHandle,
        auth: AuthKind,
        proxy: Option<&ProxyHandle>,
    ) -> HttpRequest {
        let secrets = credential.credential();
        let request = HttpRequest::get(url, self.timeout)
            .with_proxy(proxy)
            .with_header("authorization", format!("Bearer {}", secrets.bearer_token))
            .with_header("user-agent", self.user_agent.as_str())
            .with_header("content-type", "application/json")
            .with_header("x-twitter-active-user", "yes")
            .with_header("x-twitter-client-language", "en");
        match auth {
            AuthKind::Session => request
                .with_header("cookie", secrets.cookie_header())
                .with_header("x-csrf-token", secrets.ct0.as_str())
                .with_header("x-twitter-auth-type", "OAuth2Session"),
            AuthKind::Bearer => request,
        }
    }

    fn classify_success(
        &self,
        request: &ApiRequest,
        credential: &CredentialHandle,
        response: &HttpResponse,
    ) -> std::result::Result<Value, RequestError> {
        let name = request.endpoint.operation;
        let data: Value = match serde_json::from_str(&response.body) {
            Ok(data) => data,
            Err(e) => {
                self.credentials.report_error(credential);
                return Err(RequestError::Scraping {
                    endpoint: name.to_string(),
                    status: response.status,
                    message: format!("invalid JSON: {e}"),
                });
            }
        };

        match payload_error(name, &data) {
            None => {
                self.credentials.report_success(credential);
                Ok(data)
            }
            Some(PayloadError::Authentication) => {
                self.credentials.report_invalid(credential);
                Err(RequestError::Authentication {
                    endpoint: name.to_string(),
                })
            }
            Some(PayloadError::RateLimited) => {
                let reset = response.reset_after();
                self.credentials.report_rate_limited(credential, reset);
                self.limiter.on_rate_limit(request.endpoint.category);
                Err(RequestError::RateLimited {
                    endpoint: name.to_string(),
                    retry_after: reset.unwrap_or_default(),
                })
            }
            Some(PayloadError::SessionSuspended(code)) => {
                self.credentials.report_invalid(credential);
                Err(RequestError::Forbidden {
                    endpoint: name.to_string(),
                    state: Some(AccountState::Suspended),
                    code: Some(code),
                })
            }
            Some(PayloadError::TargetSuspended(code)) => {
                self.credentials.report_success(credential);
                Err(RequestError::Forbidden {
                    endpoint: name.to_string(),
                    state: None,
                    code: Some(code),
                })
            }
            Some(PayloadError::NotFound(message)) => {
                self.credentials.report_success(credential);
                Err(RequestError::Scraping {
                    endpoint: name.to_string(),
                    status: 404,
                    message,
                })
            }
        }
    }

    fn forbidden_state(&self, body: &str) -> (Option<u32>, Option<AccountState>) {
        let codes = serde_json::from_str::<Value>(body)
            .map(|v| error_codes(&v))
            .unwrap_or_default();
        codes
            .iter()
            .find_map(|code| self.forbidden.get(code).map(|state| (Some(*code), Some(*state))))
            .unwrap_or((codes.first().copied(), None))
    }
}

fn error_codes(data: &Value) -> Vec<u32> {
    data.get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.get("code").and_then(Value::as_u64))
                .filter_map(|code| u32::try_from(code).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn payload_error(endpoint: &str, data: &Value) -> Option<PayloadError> {
    let errors = data.get("errors")?.as_array()?;
    for error in errors {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let code = error
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|code| u32::try_from(code).ok())
            .unwrap_or(0);
        let known = match code {
            32 => Some(PayloadError::Authentication),
            88 => Some(PayloadError::RateLimited),
            64 => Some(PayloadError::SessionSuspended(code)),
            63 => Some(PayloadError::TargetSuspended(code)),
            34 | 50 => Some(PayloadError::NotFound(message.to_string())),
            _ => None,
        };
        if known.is_some() {
            return known;
        }
        log::warn!("{} returned error {}: {}", endpoint, code, message);
    }
    None
}

fn truncate(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::error::{Disposition, PoolError};
    use crate::models::Credential;

    /// Replays canned responses and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<std::result::Result<HttpResponse, TransportError>>>,
        pub(crate) requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn push(&self, response: std::result::Result<HttpResponse, TransportError>) {
            lock(&self.responses).push_back(response);
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(
            &self,
            request: HttpRequest,
        ) -> std::result::Result<HttpResponse, TransportError> {
            lock(&self.requests).push(request);
            lock(&self.responses)
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(200, "{}")))
        }
    }

    fn orchestrator(
        credentials: usize,
        proxies: Vec<String>,
    ) -> (RequestOrchestrator, Arc<ScriptedTransport>) {
        let mut config = Config::default();
        config.credentials = (0..credentials)
            .map(|i| Credential::new("bearer", format!("ct0_{i}"), format!("auth{i}")))
            .collect();
        config.proxies = proxies;
        config.crawler.max_credential_wait_secs = 0;
        config.rate_limit.default_bucket.refill_per_sec = 1000.0;
        config.rate_limit.categories.insert(
            "search".to_string(),
            crate::models::BucketConfig {
                capacity: 5.0,
                refill_per_sec: 0.01,
            },
        );

        let transport = Arc::new(ScriptedTransport::default());
        let orchestrator = RequestOrchestrator::new(
            transport.clone(),
            Arc::new(CredentialPool::new(
                config.credentials.clone(),
                &config.credential_pool,
            )),
            Arc::new(ProxyPool::new(config.proxies.clone(), &config.proxy_pool)),
            Arc::new(AdaptiveRateLimiter::new(config.rate_limit.clone())),
            &config,
        );
        (orchestrator, transport)
    }

    fn cookie_of(transport: &ScriptedTransport, index: usize) -> String {
        lock(&transport.requests)[index].headers["cookie"].clone()
    }

    #[tokio::test]
    async fn test_success_reports_and_parses() {
        let (orch, transport) = orchestrator(1, vec![]);
        transport.push(Ok(HttpResponse::new(200, r#"{"data":{"ok":true}}"#)));

        let data = orch.execute(&ApiRequest::user_by_id("1")).await.unwrap();
        assert_eq!(data["data"]["ok"], true);

        let requests = lock(&transport.requests);
        assert_eq!(requests[0].headers["x-csrf-token"], "ct0_0");
        assert!(requests[0].headers["authorization"].starts_with("Bearer "));
        assert!(requests[0].proxy.is_none());
        drop(requests);

        assert_eq!(orch.credentials().stats().total_requests, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_rotates_credential() {
        let (orch, transport) = orchestrator(2, vec![]);
        transport.push(Ok(HttpResponse::new(429, "").with_header("retry-after", "10")));

        let err = orch
            .execute(&ApiRequest::following("1", 20, None))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RequestError::RateLimited {
                endpoint: "Following".into(),
                retry_after: Duration::from_secs(10),
            }
        );
        assert_eq!(err.disposition(), Disposition::Retry);

        for _ in 0..3 {
            orch.execute(&ApiRequest::following("1", 20, None))
                .await
                .unwrap();
        }
        for i in 1..4 {
            assert_eq!(cookie_of(&transport, i), "auth_token=auth1; ct0=ct0_1");
        }
        assert_eq!(orch.credentials().stats().rate_limited, 1);
        assert!(orch.limiter().snapshot("timeline").refill_per_sec < 1000.0);
    }

    #[tokio::test]
    async fn test_unauthorized_disables_credential() {
        let (orch, transport) = orchestrator(1, vec![]);
        transport.push(Ok(HttpResponse::new(401, "")));

        let err = orch.execute(&ApiRequest::user_by_id("1")).await.unwrap_err();
        assert!(matches!(err, RequestError::Authentication { .. }));

        let err = orch.execute(&ApiRequest::user_by_id("1")).await.unwrap_err();
        assert_eq!(err, RequestError::Pool(PoolError::NoCredentials));
        assert_eq!(err.disposition(), Disposition::Fatal);
    }

    #[tokio::test]
    async fn test_forbidden_code_mapping() {
        let (orch, transport) = orchestrator(1, vec![]);
        transport.push(Ok(HttpResponse::new(
            403,
            r#"{"errors":[{"code":326,"message":"locked"}]}"#,
        )));
        transport.push(Ok(HttpResponse::new(403, r#"{"errors":[{"code":999}]}"#)));

        let err = orch.execute(&ApiRequest::user_by_id("1")).await.unwrap_err();
        assert_eq!(
            err,
            RequestError::Forbidden {
                endpoint: "UserByRestId".into(),
                state: Some(AccountState::NeedsVerification),
                code: Some(326),
            }
        );

        let err = orch.execute(&ApiRequest::user_by_id("1")).await.unwrap_err();
        assert_eq!(
            err,
            RequestError::Forbidden {
                endpoint: "UserByRestId".into(),
                state: None,
                code: Some(999),
            }
        );
        assert_eq!(err.disposition(), Disposition::SkipNode);
    }

    #[tokio::test]
    async fn test_payload_errors_classified() {
        let (orch, transport) = orchestrator(2, vec![]);
        transport.push(Ok(HttpResponse::new(
            200,
            r#"{"errors":[{"code":50,"message":"User not found."}]}"#,
        )));
        transport.push(Ok(HttpResponse::new(
            200,
            r#"{"errors":[{"code":88,"message":"Rate limit exceeded"}]}"#,
        )));
        transport.push(Ok(HttpResponse::new(
            200,
            r#"{"errors":[{"code":32,"message":"Could not authenticate you"}]}"#,
        )));

        let err = orch.execute(&ApiRequest::user_by_id("1")).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.disposition(), Disposition::SkipNode);

        let err = orch.execute(&ApiRequest::user_by_id("1")).await.unwrap_err();
        assert!(matches!(err, RequestError::RateLimited { .. }));

        let err = orch.execute(&ApiRequest::user_by_id("1")).await.unwrap_err();
        assert!(matches!(err, RequestError::Authentication { .. }));

        let stats = orch.credentials().stats();
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.invalid, 1);
    }

    #[test]
    fn test_out_of_range_payload_code_not_truncated() {
        // 2^32 + 32 would read as 32 (authentication) if truncated.
        let data = serde_json::json!({"errors": [{"code": 4_294_967_328u64, "message": "odd"}]});
        assert!(payload_error("UserByRestId", &data).is_none());

        let data = serde_json::json!({"errors": [{"code": 32, "message": "bad token"}]});
        assert!(matches!(
            payload_error("UserByRestId", &data),
            Some(PayloadError::Authentication)
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_and_server_error() {
        let proxy = "http://user:pw@10.0.0.1:8080".to_string();
        let (orch, transport) = orchestrator(1, vec![proxy.clone()]);
        transport.push(Err(TransportError {
            message: "operation timed out".into(),
            timeout: true,
        }));
        transport.push(Ok(HttpResponse::new(503, "upstream unavailable")));

        let err = orch
            .execute(&ApiRequest::following("1", 20, None))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Transport { timeout: true, .. }));

        let err = orch
            .execute(&ApiRequest::following("1", 20, None))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.disposition(), Disposition::Retry);

        assert_eq!(lock(&transport.requests)[0].proxy.as_deref(), Some(proxy.as_str()));
        let proxy_stats = orch.proxies().stats();
        assert_eq!(proxy_stats[0].checks, 2);
        assert_eq!(proxy_stats[0].success_rate, 0.0);
        assert_eq!(orch.credentials().stats().total_errors, 2);
    }

    #[tokio::test]
    async fn test_empty_pool_is_fatal() {
        let (orch, transport) = orchestrator(0, vec![]);
        let err = orch.execute(&ApiRequest::user_by_id("1")).await.unwrap_err();
        assert_eq!(err.disposition(), Disposition::Fatal);
        assert!(lock(&transport.requests).is_empty());
    }

    #[tokio::test]
    async fn test_remaining_header_clamps_budget() {
        let (orch, transport) = orchestrator(1, vec![]);
        transport.push(Ok(
            HttpResponse::new(200, "{}").with_header("x-rate-limit-remaining", "0")
        ));
        orch.execute(&ApiRequest::search_users("rust", 20, None))
            .await
            .unwrap();
        assert!(orch.limiter().snapshot("search").tokens < 1.0);
    }

    #[test]
    fn test_reset_after_prefers_retry_after() {
        let future = (Utc::now().timestamp() + 120).to_string();
        let response = HttpResponse::new(429, "")
            .with_header("retry-after", "7")
            .with_header("x-rate-limit-reset", future.as_str());
        assert_eq!(response.reset_after(), Some(Duration::from_secs(7)));

        let response =
            HttpResponse::new(429, "").with_header("x-rate-limit-reset", future.as_str());
        let reset = response.reset_after().unwrap();
        assert!(reset > Duration::from_secs(100) && reset <= Duration::from_secs(120));

        assert_eq!(HttpResponse::new(429, "").reset_after(), None);
    }
}
