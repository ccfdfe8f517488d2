use serde_json::Value;

use crate::domain::{Dialect, Query};
use crate::error::HarvestError;
use crate::http::RequestExecutor;
use crate::providers::{ApiSession, NotePage, NoteProvider, PAGE_SIZE};

const REVIEW_DETAILS: &str = "replyCount,presentation,writable";

pub struct CurrentApi {
    session: ApiSession,
}

impl CurrentApi {
    pub fn new(base_url: impl Into<String>, executor: RequestExecutor) -> Self {
        Self {
            session: ApiSession::new(base_url, executor),
        }
    }

    pub fn session(&self) -> &ApiSession {
        &self.session
    }
}

impl NoteProvider for CurrentApi {
    fn dialect(&self) -> Dialect {
        Dialect::V2
    }

    fn group(&self, id: &str) -> Result<Option<Value>, HarvestError> {
        self.session.group(id)
    }

    fn notes_page(
        &self,
        query: &Query,
        offset: usize,
        limit: usize,
    ) -> Result<NotePage, HarvestError> {
        let mut params = query.params();
        params.push(("limit".to_string(), limit.to_string()));
        params.push(("offset".to_string(), offset.to_string()));
        self.session.notes_page(params)
    }

    fn reviews(&self, record_id: &str) -> Result<Vec<Value>, HarvestError> {
        let params = vec![
            ("forum".to_string(), record_id.to_string()),
            ("trash".to_string(), "true".to_string()),
            ("details".to_string(), REVIEW_DETAILS.to_string()),
            ("limit".to_string(), PAGE_SIZE.to_string()),
        ];
        Ok(self.session.notes_page(params)?.notes)
    }

    fn attachment(&self, record_id: &str, field: &str) -> Result<Option<Vec<u8>>, HarvestError> {
        self.session.binary(
            "attachment",
            vec![
                ("id".to_string(), record_id.to_string()),
                ("name".to_string(), field.to_string()),
            ],
        )
    }
}
