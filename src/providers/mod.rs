//! Upstream note providers.
//!
//! OpenReview exposes two incompatible API generations. Both are reached
//! through the [`NoteProvider`] capability; [`Providers`] picks the
//! implementation for a resolved [`Dialect`].

pub mod v1;
pub mod v2;

use std::sync::RwLock;

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::Credentials;
use crate::domain::{Dialect, Query};
use crate::error::HarvestError;
use crate::http::{HttpRequest, HttpResponse, RequestExecutor};

pub use v1::LegacyApi;
pub use v2::CurrentApi;

pub const PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct NotePage {
    pub notes: Vec<Value>,
    pub count: Option<u64>,
}

pub trait NoteProvider: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn group(&self, id: &str) -> Result<Option<Value>, HarvestError>;

    fn notes_page(&self, query: &Query, offset: usize, limit: usize)
    -> Result<NotePage, HarvestError>;

    fn all_notes(&self, query: &Query) -> Result<Vec<Value>, HarvestError> {
        let mut notes = Vec::new();
        let mut offset = 0usize;
        loop {
            let page = self.notes_page(query, offset, PAGE_SIZE)?;
            let fetched = page.notes.len();
            notes.extend(page.notes);
            let done = match page.count {
                Some(total) => notes.len() as u64 >= total,
                None => fetched < PAGE_SIZE,
            };
            if done || fetched == 0 {
                return Ok(notes);
            }
            offset += fetched;
        }
    }

    fn reviews(&self, record_id: &str) -> Result<Vec<Value>, HarvestError>;

    fn attachment(&self, record_id: &str, field: &str) -> Result<Option<Vec<u8>>, HarvestError>;
}

pub struct Providers<L, C> {
    legacy: L,
    current: C,
}

impl<L: NoteProvider, C: NoteProvider> Providers<L, C> {
    pub fn new(legacy: L, current: C) -> Self {
        Self { legacy, current }
    }

    pub fn get(&self, dialect: Dialect) -> &dyn NoteProvider {
        match dialect {
            Dialect::V1 => &self.legacy,
            Dialect::V2 => &self.current,
        }
    }

    pub fn legacy(&self) -> &L {
        &self.legacy
    }

    pub fn current(&self) -> &C {
        &self.current
    }
}

pub struct ApiSession {
    base_url: String,
    executor: RequestExecutor,
    token: RwLock<Option<String>>,
}

impl ApiSession {
    pub fn new(base_url: impl Into<String>, executor: RequestExecutor) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            executor,
            token: RwLock::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    pub fn get(
        &self,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<HttpResponse, HarvestError> {
        let request = HttpRequest::get(self.url(path))
            .params(params)
            .bearer(self.token());
        self.executor.execute(&request)
    }

    // A 404 becomes a `Status` error here.
    pub fn get_json(
        &self,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<Value, HarvestError> {
        let response = self.get(path, params)?;
        if response.is_not_found() {
            return Err(HarvestError::Status {
                status: response.status,
                url: response.url,
            });
        }
        response.json()
    }

    pub fn group(&self, id: &str) -> Result<Option<Value>, HarvestError> {
        let response = self.get("groups", vec![("id".to_string(), id.to_string())])?;
        if response.is_not_found() {
            return Ok(None);
        }
        let body: Value = response.json()?;
        Ok(body
            .get("groups")
            .and_then(Value::as_array)
            .and_then(|groups| groups.first())
            .cloned())
    }

    pub fn notes_page(&self, params: Vec<(String, String)>) -> Result<NotePage, HarvestError> {
        let body = self.get_json("notes", params)?;
        let notes = body
            .get("notes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let count = body.get("count").and_then(Value::as_u64);
        Ok(NotePage { notes, count })
    }

    pub fn binary(
        &self,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<Option<Vec<u8>>, HarvestError> {
        let response = self.get(path, params)?;
        if response.is_not_found() {
            return Ok(None);
        }
        Ok(Some(response.body))
    }

    // Logs in and stores the bearer token. "Too many sessions" refusals are
    // retried with a fixed delay, up to `session_attempts`.
    pub fn login(&self, credentials: &Credentials) -> Result<(), HarvestError> {
        let retry = self.executor.retry_config().clone();
        let request = HttpRequest::post_json(
            self.url("login"),
            json!({"id": credentials.username, "password": credentials.password}),
        );
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let response = self
                .executor
                .execute_accepting(&request, &[200, 400, 401, 403, 404])?;
            if response.status == 200 {
                let body: Value = response.json()?;
                let token = body
                    .get("token")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        HarvestError::Auth("login response carried no token".to_string())
                    })?;
                self.set_token(Some(token.to_string()));
                info!(base_url = %self.base_url, "session established");
                return Ok(());
            }

            let message = response.text();
            if !is_session_quota_error(&message) {
                return Err(HarvestError::Auth(format!(
                    "status {}: {}",
                    response.status,
                    message.chars().take(200).collect::<String>()
                )));
            }
            if retry.session_attempts.is_some_and(|max| attempts >= max) {
                return Err(HarvestError::Auth(format!(
                    "too many concurrent sessions after {attempts} attempts"
                )));
            }
            warn!(
                base_url = %self.base_url,
                wait_secs = retry.session_retry_delay().as_secs(),
                "too many concurrent sessions, waiting before login retry"
            );
            self.executor.pause(retry.session_retry_delay());
        }
    }
}

fn is_session_quota_error(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("toomany") || lowered.contains("too many")
}
