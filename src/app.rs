use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{CatalogClient, ListingPlan};
use crate::config::VenueTable;
use crate::domain::{Dialect, Record, VenueId};
use crate::download::Downloader;
use crate::error::HarvestError;
use crate::listing::ListFetcher;
use crate::providers::{NoteProvider, Providers};
use crate::scheduler::{BatchReport, run_batch};
use crate::store::{Store, assign_file_stems};

#[derive(Debug, Clone, Serialize)]
pub struct VenuesResult {
    pub venues: Vec<VenueId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingResult {
    pub venue: VenueId,
    pub dialect: Dialect,
    pub listings: Vec<ListingSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingSummary {
    pub tab: Option<String>,
    pub records: usize,
    pub cache_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueStatus {
    Completed,
    NotFound,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct VenueReport {
    pub venue: VenueId,
    pub status: VenueStatus,
    pub dialect: Option<Dialect>,
    pub listings: Vec<ListingReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingReport {
    pub tab: Option<String>,
    pub records: usize,
    pub batch: BatchReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub venues: Vec<VenueReport>,
    pub totals: BatchReport,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<L: NoteProvider, C: NoteProvider> {
    store: Store,
    providers: Providers<L, C>,
    table: VenueTable,
    workers: usize,
}

impl<L: NoteProvider, C: NoteProvider> App<L, C> {
    pub fn new(
        store: Store,
        providers: Providers<L, C>,
        table: VenueTable,
        workers: usize,
    ) -> Self {
        Self {
            store,
            providers,
            table,
            workers: workers.max(1),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn providers(&self) -> &Providers<L, C> {
        &self.providers
    }

    pub fn table(&self) -> &VenueTable {
        &self.table
    }

    pub fn venues(&self, sink: &dyn ProgressSink) -> Result<VenuesResult, HarvestError> {
        sink.event(ProgressEvent {
            message: "phase=Resolve; listing venues".to_string(),
            elapsed: None,
        });
        self.store.ensure_roots()?;
        let venues = self.catalog().list_venues()?;
        Ok(VenuesResult { venues })
    }

    pub fn listing(
        &self,
        venue: &VenueId,
        sink: &dyn ProgressSink,
    ) -> Result<ListingResult, HarvestError> {
        self.store.ensure_roots()?;
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; venue {venue}"),
            elapsed: None,
        });
        let resolved = self.catalog().queries_for(venue, &self.table)?;
        let mut listings = Vec::new();
        for plan in &resolved.plans {
            let records = self.fetch_plan(venue, plan, resolved.dialect, sink)?;
            listings.push(ListingSummary {
                tab: plan.scope.tab().map(str::to_string),
                records: records.len(),
                cache_path: self.store.listing_path(venue, &plan.scope).to_string(),
            });
        }
        Ok(ListingResult {
            venue: venue.clone(),
            dialect: resolved.dialect,
            listings,
        })
    }

    pub fn harvest(
        &self,
        venues: &[VenueId],
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, HarvestError> {
        self.store.ensure_roots()?;
        let mut report = RunReport::default();
        for venue in venues {
            let start = Instant::now();
            let venue_report = self.harvest_venue(venue, sink);
            sink.event(ProgressEvent {
                message: format!("phase=Done; venue {venue}"),
                elapsed: Some(start.elapsed()),
            });
            for listing in &venue_report.listings {
                report.totals.merge(listing.batch.clone());
            }
            report.venues.push(venue_report);
        }
        info!(
            venues = report.venues.len(),
            downloaded = report.totals.downloaded,
            skipped = report.totals.skipped,
            no_pdf = report.totals.no_pdf,
            failed = report.totals.failures.len(),
            "harvest finished"
        );
        Ok(report)
    }

    fn harvest_venue(&self, venue: &VenueId, sink: &dyn ProgressSink) -> VenueReport {
        let mut report = VenueReport {
            venue: venue.clone(),
            status: VenueStatus::Completed,
            dialect: None,
            listings: Vec::new(),
            error: None,
        };

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; venue {venue}"),
            elapsed: None,
        });
        let resolved = match self.catalog().queries_for(venue, &self.table) {
            Ok(resolved) => resolved,
            Err(err) if err.is_not_found() => {
                warn!(venue = %venue, "venue not found, skipping");
                report.status = VenueStatus::NotFound;
                report.error = Some(err.to_string());
                return report;
            }
            Err(err) => {
                warn!(venue = %venue, error = %err, "venue resolution failed");
                report.status = VenueStatus::Failed;
                report.error = Some(err.to_string());
                return report;
            }
        };
        report.dialect = Some(resolved.dialect);

        for plan in &resolved.plans {
            match self.harvest_plan(venue, plan, resolved.dialect, sink) {
                Ok(listing) => report.listings.push(listing),
                Err(err) => {
                    warn!(venue = %venue, tab = ?plan.scope.tab(), error = %err, "listing failed");
                    report.status = VenueStatus::Failed;
                    report.error = Some(err.to_string());
                    break;
                }
            }
        }
        report
    }

    fn harvest_plan(
        &self,
        venue: &VenueId,
        plan: &ListingPlan,
        dialect: Dialect,
        sink: &dyn ProgressSink,
    ) -> Result<ListingReport, HarvestError> {
        let records = self.fetch_plan(venue, plan, dialect, sink)?;
        let stems = assign_file_stems(&records);
        let jobs: Vec<_> = records
            .iter()
            .zip(&stems)
            .map(|(record, stem)| (record, self.store.entry_for(venue, &plan.scope, record, stem)))
            .collect();

        sink.event(ProgressEvent {
            message: format!("phase=Download; {} records", jobs.len()),
            elapsed: None,
        });
        let start = Instant::now();
        let downloader = Downloader::new(&self.providers, &self.store);
        let batch = run_batch(
            &jobs,
            self.workers,
            |(record, _)| record.id.clone(),
            |(record, entry)| downloader.process(record, venue, entry),
        );
        info!(
            venue = %venue,
            tab = ?plan.scope.tab(),
            records = records.len(),
            downloaded = batch.downloaded,
            skipped = batch.skipped,
            failed = batch.failures.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "listing harvested"
        );
        Ok(ListingReport {
            tab: plan.scope.tab().map(str::to_string),
            records: records.len(),
            batch,
        })
    }

    fn fetch_plan(
        &self,
        venue: &VenueId,
        plan: &ListingPlan,
        dialect: Dialect,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<Record>, HarvestError> {
        sink.event(ProgressEvent {
            message: format!("phase=List; {} queries", plan.queries.len()),
            elapsed: None,
        });
        ListFetcher::new(&self.providers, &self.store).fetch_all(
            venue,
            &plan.scope,
            &plan.queries,
            dialect,
        )
    }

    fn catalog(&self) -> CatalogClient<'_, L, C> {
        CatalogClient::new(&self.providers, &self.store)
    }
}
