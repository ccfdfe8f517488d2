use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::blocking::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue, ORIGIN, PRAGMA, REFERER,
    USER_AGENT,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::HarvestError;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36 Edg/134.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:135.0) Gecko/20100101 Firefox/135.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:136.0) Gecko/20100101 Firefox/136.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub json: Option<Value>,
    pub bearer: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            params: Vec::new(),
            json: None,
            bearer: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            json: Some(body),
            ..Self::get(url)
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    pub fn params(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }

    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub url: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HarvestError> {
        serde_json::from_slice(&self.body).map_err(|err| HarvestError::Decode {
            url: self.url.clone(),
            message: err.to_string(),
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn snippet(&self) -> String {
        self.text().chars().take(200).collect()
    }
}

// One network round trip. `Err(HarvestError::Transport)` marks a retryable I/O failure.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest, user_agent: &str) -> Result<HttpResponse, HarvestError>;
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json,text/*;q=0.99"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9,zh-CN;q=0.8"),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://openreview.net"));
        headers.insert(REFERER, HeaderValue::from_static("https://openreview.net/"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::Transport(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest, user_agent: &str) -> Result<HttpResponse, HarvestError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        builder = builder.query(&request.params).header(USER_AGENT, user_agent);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }

        let response = builder.send().map_err(|err| {
            if err.is_builder() {
                HarvestError::InvalidQuery(format!("{}: {err}", request.url))
            } else {
                HarvestError::Transport(err.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response
            .bytes()
            .map_err(|err| HarvestError::Transport(err.to_string()))?
            .to_vec();
        Ok(HttpResponse { status, url, body })
    }
}

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

pub fn is_known_user_agent(agent: &str) -> bool {
    USER_AGENTS.contains(&agent)
}

enum Failure {
    RateLimited,
    Retryable(String),
}

/// Issues requests until a 200 or 404 comes back, rotating the User-Agent on
/// every attempt, or until the configured retry ceiling is reached.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryConfig,
}

impl RequestExecutor {
    pub fn new(transport: impl Transport + 'static, retry: RetryConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            sleeper: Arc::new(ThreadSleeper),
            retry,
        }
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn pause(&self, duration: Duration) {
        self.sleeper.sleep(duration);
    }

    pub fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HarvestError> {
        self.execute_accepting(request, &[200, 404])
    }

    pub fn execute_accepting(
        &self,
        request: &HttpRequest,
        accepted: &[u16],
    ) -> Result<HttpResponse, HarvestError> {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut delay = self.retry.initial_delay();

        loop {
            attempts += 1;
            let user_agent = random_user_agent();
            let failure = match self.transport.send(request, user_agent) {
                Ok(response) if accepted.contains(&response.status) => {
                    if attempts > 1 {
                        debug!(url = %request.url, attempts, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(response) if response.status == 429 => Failure::RateLimited,
                Ok(response) => Failure::Retryable(format!(
                    "status {}: {}",
                    response.status,
                    response.snippet()
                )),
                Err(HarvestError::Transport(message)) => Failure::Retryable(message),
                Err(err) => return Err(err),
            };

            if self.exhausted(attempts, started) {
                let last = match failure {
                    Failure::RateLimited => "status 429".to_string(),
                    Failure::Retryable(message) => message,
                };
                warn!(url = %request.url, attempts, last = %last, "retry ceiling reached");
                return Err(HarvestError::RetriesExhausted {
                    url: request.url.clone(),
                    attempts,
                    last,
                });
            }

            match failure {
                Failure::RateLimited => {
                    let wait = self.retry.rate_limit_delay();
                    warn!(
                        url = %request.url,
                        wait_secs = wait.as_secs(),
                        "rate limited, waiting before retry"
                    );
                    self.sleeper.sleep(wait);
                }
                Failure::Retryable(message) => {
                    let wait = if self.retry.jitter {
                        add_jitter(delay)
                    } else {
                        delay
                    };
                    warn!(
                        url = %request.url,
                        attempt = attempts,
                        delay_ms = wait.as_millis(),
                        error = %message,
                        "request failed, retrying"
                    );
                    self.sleeper.sleep(wait);
                    delay = self.next_delay(delay);
                }
            }
        }
    }

    // Anything that does not fit a Duration saturates at the ceiling.
    fn next_delay(&self, delay: Duration) -> Duration {
        let max = self.retry.max_delay();
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.retry.backoff_multiplier)
            .map_or(max, |next| next.min(max))
    }

    fn exhausted(&self, attempts: u32, started: Instant) -> bool {
        let over_attempts = self
            .retry
            .max_attempts
            .map(|max| attempts >= max)
            .unwrap_or(false);
        let over_time = self
            .retry
            .max_elapsed()
            .map(|max| started.elapsed() >= max)
            .unwrap_or(false);
        over_attempts || over_time
    }
}

fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + factor)).unwrap_or(delay)
}
