use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use openreview_harvester::config::{Credentials, RetryConfig};
use openreview_harvester::domain::Query;
use openreview_harvester::error::HarvestError;
use openreview_harvester::http::{
    HttpRequest, HttpResponse, RequestExecutor, Sleeper, Transport, is_known_user_agent,
};
use openreview_harvester::providers::{CurrentApi, LegacyApi, NoteProvider};

#[derive(Clone, Default)]
struct Script {
    responses: Arc<Mutex<VecDeque<(u16, Value)>>>,
    seen: Arc<Mutex<Vec<(HttpRequest, String)>>>,
}

impl Script {
    fn push(&self, status: u16, body: Value) -> &Self {
        self.responses.lock().unwrap().push_back((status, body));
        self
    }

    fn seen(&self) -> Vec<(HttpRequest, String)> {
        self.seen.lock().unwrap().clone()
    }
}

impl Transport for Script {
    fn send(&self, request: &HttpRequest, user_agent: &str) -> Result<HttpResponse, HarvestError> {
        self.seen
            .lock()
            .unwrap()
            .push((request.clone(), user_agent.to_string()));
        let (status, body) = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((404, json!({"name": "NotFoundError"})));
        Ok(HttpResponse {
            status,
            url: request.url.clone(),
            body: serde_json::to_vec(&body).unwrap(),
        })
    }
}

#[derive(Clone, Default)]
struct Waits(Arc<Mutex<Vec<Duration>>>);

impl Sleeper for Waits {
    fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

fn executor(script: &Script, waits: &Waits) -> RequestExecutor {
    RequestExecutor::new(script.clone(), RetryConfig::default()).with_sleeper(waits.clone())
}

#[test]
fn rate_limited_group_lookup_waits_then_succeeds() {
    let script = Script::default();
    let waits = Waits::default();
    script
        .push(429, json!({}))
        .push(429, json!({}))
        .push(429, json!({}))
        .push(200, json!({"groups": [{"id": "V/2024", "domain": "V/2024"}]}));
    let api = CurrentApi::new("https://api2.example.net", executor(&script, &waits));

    let group = api.group("V/2024").unwrap().unwrap();
    assert_eq!(group["domain"], "V/2024");
    assert_eq!(*waits.0.lock().unwrap(), vec![Duration::from_secs(10); 3]);

    let seen = script.seen();
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|(_, agent)| is_known_user_agent(agent)));
    assert_eq!(seen[0].0.url, "https://api2.example.net/groups");
    assert_eq!(seen[0].0.param_value("id"), Some("V/2024"));
}

#[test]
fn missing_group_is_none() {
    let script = Script::default();
    let waits = Waits::default();
    let api = LegacyApi::new("https://api.example.net", executor(&script, &waits));
    assert_eq!(api.group("Nope/2024").unwrap(), None);
    assert!(waits.0.lock().unwrap().is_empty());
}

#[test]
fn legacy_pdf_uses_pdf_endpoint() {
    let script = Script::default();
    let waits = Waits::default();
    script.push(200, json!("pdf-bytes"));
    let api = LegacyApi::new("https://api.example.net", executor(&script, &waits));

    assert!(api.attachment("abc", "pdf").unwrap().is_some());
    assert_eq!(api.attachment("abc", "supplementary_material").unwrap(), None);

    let seen = script.seen();
    assert_eq!(seen[0].0.url, "https://api.example.net/pdf");
    assert_eq!(seen[1].0.url, "https://api.example.net/attachment");
    assert_eq!(seen[1].0.param_value("name"), Some("supplementary_material"));
}

#[test]
fn legacy_listing_pages_carry_details() {
    let script = Script::default();
    let waits = Waits::default();
    script.push(200, json!({"notes": [{"id": "a"}], "count": 1}));
    let api = LegacyApi::new("https://api.example.net", executor(&script, &waits));

    let notes = api
        .all_notes(&Query::for_invitation("X/2019/-/Blind_Submission"))
        .unwrap();
    assert_eq!(notes.len(), 1);
    let request = &script.seen()[0].0;
    assert_eq!(request.param_value("invitation"), Some("X/2019/-/Blind_Submission"));
    assert_eq!(request.param_value("details"), Some("replyCount,invitation,original"));
    assert_eq!(request.param_value("offset"), Some("0"));
    assert_eq!(request.param_value("limit"), Some("1000"));
}

#[test]
fn login_waits_out_session_quota() {
    let script = Script::default();
    let waits = Waits::default();
    script
        .push(400, json!({"name": "TooManyError", "message": "Too many sessions"}))
        .push(200, json!({"token": "tok"}))
        .push(200, json!({"notes": [], "count": 0}));
    let api = CurrentApi::new("https://api2.example.net", executor(&script, &waits));
    let credentials = Credentials {
        username: "user@example.org".to_string(),
        password: "secret".to_string(),
    };

    api.session().login(&credentials).unwrap();
    assert_eq!(api.session().token().as_deref(), Some("tok"));
    assert_eq!(*waits.0.lock().unwrap(), vec![Duration::from_secs(30)]);

    api.reviews("abc").unwrap();
    let seen = script.seen();
    assert_eq!(seen[0].0.url, "https://api2.example.net/login");
    assert_eq!(seen[2].0.bearer.as_deref(), Some("tok"));
}

#[test]
fn bad_credentials_fail_fast() {
    let script = Script::default();
    let waits = Waits::default();
    script.push(400, json!({"name": "InvalidCredentials"}));
    let api = CurrentApi::new("https://api2.example.net", executor(&script, &waits));
    let credentials = Credentials {
        username: "user@example.org".to_string(),
        password: "wrong".to_string(),
    };

    assert_matches!(api.session().login(&credentials), Err(HarvestError::Auth(_)));
    assert_eq!(script.seen().len(), 1);
}
