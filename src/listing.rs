use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{Dialect, ListingScope, Query, Record, VenueId};
use crate::error::HarvestError;
use crate::providers::{NoteProvider, PAGE_SIZE, Providers};
use crate::store::Store;

pub struct ListFetcher<'a, L, C> {
    providers: &'a Providers<L, C>,
    store: &'a Store,
}

impl<'a, L: NoteProvider, C: NoteProvider> ListFetcher<'a, L, C> {
    pub fn new(providers: &'a Providers<L, C>, store: &'a Store) -> Self {
        Self { providers, store }
    }

    /// Normalized records of one listing scope. A cached listing is returned
    /// as is; otherwise the queries run in order and the result is cached once.
    pub fn fetch_all(
        &self,
        venue: &VenueId,
        scope: &ListingScope,
        queries: &[Query],
        dialect: Dialect,
    ) -> Result<Vec<Record>, HarvestError> {
        let path = self.store.listing_path(venue, scope);
        if let Some(records) = Store::read_json::<Vec<Record>>(&path)? {
            debug!(venue = %venue, path = %path, records = records.len(), "using cached listing");
            return Ok(records);
        }

        let provider = self.providers.get(dialect);
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut duplicates = 0usize;
        for query in queries {
            let notes = if query.is_domain_scoped() {
                paged_notes(provider, query)?
            } else {
                provider.all_notes(query)?
            };
            debug!(venue = %venue, query = %query.name, notes = notes.len(), "query fetched");

            for note in notes.iter().filter(|note| query.accepts(note)) {
                let record = Record::from_note(note, dialect)?;
                if seen.insert(record.id.clone()) {
                    records.push(record);
                } else {
                    duplicates += 1;
                }
            }
        }
        if duplicates > 0 {
            warn!(venue = %venue, duplicates, "dropped duplicate records");
        }

        Store::write_json_atomic(&path, &records)?;
        info!(venue = %venue, records = records.len(), path = %path, "listing cached");
        Ok(records)
    }
}

pub fn paged_notes(provider: &dyn NoteProvider, query: &Query) -> Result<Vec<Value>, HarvestError> {
    let mut notes = Vec::new();
    let mut offset = 0usize;
    loop {
        let page = provider.notes_page(query, offset, PAGE_SIZE)?;
        let fetched = page.notes.len();
        notes.extend(page.notes);
        if fetched < PAGE_SIZE {
            return Ok(notes);
        }
        offset += PAGE_SIZE;
    }
}
