use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{Record, VenueId};
use crate::error::HarvestError;
use crate::providers::{NoteProvider, Providers};
use crate::store::{CacheEntry, Store};

const PDF_FIELD: &str = "pdf";
const SUPPLEMENT_FIELD: &str = "supplementary_material";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Skipped,
    Downloaded,
    NoPdf,
}

pub struct Downloader<'a, L, C> {
    providers: &'a Providers<L, C>,
    store: &'a Store,
}

impl<'a, L: NoteProvider, C: NoteProvider> Downloader<'a, L, C> {
    pub fn new(providers: &'a Providers<L, C>, store: &'a Store) -> Self {
        Self { providers, store }
    }

    // Reviews, then supplement, then the review file, then the PDF. Every
    // step whose target already exists is skipped.
    pub fn process(
        &self,
        record: &Record,
        venue: &VenueId,
        entry: &CacheEntry,
    ) -> Result<RecordOutcome, HarvestError> {
        if self.store.exists(entry) {
            debug!(venue = %venue, id = %record.id, "already downloaded");
            return Ok(RecordOutcome::Skipped);
        }
        let provider = self.providers.get(record.dialect);

        let reviews = if entry.review_path.as_std_path().exists() {
            None
        } else {
            Some(self.reviews(record)?)
        };

        if let Some(path) = &entry.supplement_path {
            if !path.as_std_path().exists() {
                match provider.attachment(&record.id, SUPPLEMENT_FIELD)? {
                    Some(bytes) => {
                        Store::create_bytes_atomic(path, &bytes)?;
                    }
                    None => debug!(id = %record.id, "no supplement upstream"),
                }
            }
        }

        if let Some(reviews) = reviews {
            Store::create_json_atomic(&entry.review_path, &reviews)?;
        }

        match provider.attachment(&record.id, PDF_FIELD)? {
            Some(bytes) => {
                Store::create_bytes_atomic(&entry.pdf_path, &bytes)?;
                debug!(venue = %venue, id = %record.id, path = %entry.pdf_path, "pdf written");
                Ok(RecordOutcome::Downloaded)
            }
            None => {
                warn!(venue = %venue, id = %record.id, title = %record.title, "no pdf upstream");
                Ok(RecordOutcome::NoPdf)
            }
        }
    }

    // A failed fallback lookup fails the record; nothing is written so the
    // next run asks again.
    fn reviews(&self, record: &Record) -> Result<Vec<Value>, HarvestError> {
        let reviews = self.providers.get(record.dialect).reviews(&record.id)?;
        if !reviews.is_empty() {
            return Ok(reviews);
        }
        let fallback = record.dialect.other();
        let reviews = self
            .providers
            .get(fallback)
            .reviews(&record.id)
            .inspect_err(|err| {
                warn!(id = %record.id, %fallback, error = %err, "fallback review lookup failed");
            })?;
        debug!(
            id = %record.id,
            %fallback,
            count = reviews.len(),
            "reviews from fallback api"
        );
        Ok(reviews)
    }
}
