use std::collections::HashMap;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use serde_json::{Value, json};

use openreview_harvester::app::{App, VenueStatus};
use openreview_harvester::config::VenueTable;
use openreview_harvester::domain::{Dialect, Query, Record, VenueId};
use openreview_harvester::error::HarvestError;
use openreview_harvester::output::JsonOutput;
use openreview_harvester::providers::{NotePage, NoteProvider, Providers};
use openreview_harvester::store::Store;

#[derive(Default)]
struct MockApi {
    dialect: Option<Dialect>,
    groups: HashMap<String, Value>,
    notes: Vec<Value>,
    pdfs: HashMap<String, Vec<u8>>,
    calls: Mutex<usize>,
}

impl MockApi {
    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn hit(&self) {
        *self.calls.lock().unwrap() += 1;
    }
}

impl NoteProvider for MockApi {
    fn dialect(&self) -> Dialect {
        self.dialect.unwrap_or(Dialect::V2)
    }

    fn group(&self, id: &str) -> Result<Option<Value>, HarvestError> {
        self.hit();
        Ok(self.groups.get(id).cloned())
    }

    fn notes_page(
        &self,
        _query: &Query,
        offset: usize,
        limit: usize,
    ) -> Result<NotePage, HarvestError> {
        self.hit();
        let notes = self.notes.iter().skip(offset).take(limit).cloned().collect();
        Ok(NotePage {
            notes,
            count: Some(self.notes.len() as u64),
        })
    }

    fn reviews(&self, record_id: &str) -> Result<Vec<Value>, HarvestError> {
        self.hit();
        Ok(vec![json!({"id": format!("{record_id}-review"), "forum": record_id})])
    }

    fn attachment(&self, record_id: &str, field: &str) -> Result<Option<Vec<u8>>, HarvestError> {
        self.hit();
        if field != "pdf" {
            return Ok(None);
        }
        Ok(self.pdfs.get(record_id).cloned())
    }
}

fn temp_store(temp: &tempfile::TempDir) -> Store {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    Store::new(root.join("data"), root.join("cache"))
}

fn scenario_api() -> MockApi {
    let mut groups = HashMap::new();
    groups.insert(
        "V/2024".to_string(),
        json!({
            "id": "V/2024",
            "domain": "V/2024",
            "content": {"submission_id": {"value": "V/2024/-/Submission"}}
        }),
    );
    let notes = vec![
        json!({
            "id": "foo",
            "pdate": 1700000000000i64,
            "cdate": 1660000000000i64,
            "content": {"title": {"value": "Foo"}}
        }),
        json!({
            "id": "bar",
            "cdate": 1660000000000i64,
            "content": {"title": {"value": "Bar"}}
        }),
    ];
    let mut pdfs = HashMap::new();
    pdfs.insert("foo".to_string(), b"%PDF-foo".to_vec());
    pdfs.insert("bar".to_string(), b"%PDF-bar".to_vec());
    MockApi {
        dialect: Some(Dialect::V2),
        groups,
        notes,
        pdfs,
        ..MockApi::default()
    }
}

#[test]
fn harvest_mirrors_venue_layout() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let app = App::new(
        store.clone(),
        Providers::new(MockApi::default(), scenario_api()),
        VenueTable::default(),
        2,
    );
    let venue: VenueId = "V/2024".parse().unwrap();

    let report = app.harvest(std::slice::from_ref(&venue), &JsonOutput).unwrap();
    assert_eq!(report.venues[0].status, VenueStatus::Completed);
    assert_eq!(report.venues[0].dialect, Some(Dialect::V2));
    assert_eq!(report.totals.downloaded, 2);
    assert!(report.totals.failures.is_empty());

    let data = store.data_root();
    for path in [
        "V-2024/2023/Foo.pdf",
        "V-2024/2023/Foo.json",
        "V-2024/2022/Bar.pdf",
        "V-2024/2022/Bar.json",
    ] {
        assert!(data.join(path).as_std_path().exists(), "missing {path}");
    }
    assert_eq!(
        std::fs::read(data.join("V-2024/2023/Foo.pdf").as_std_path()).unwrap(),
        b"%PDF-foo"
    );

    let listing_path = store.cache_root().join("V-2024.json");
    let listing: Vec<Record> = Store::read_json(&listing_path).unwrap().unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].title, "Foo");
    assert_eq!(listing[0].year, 2023);
    assert_eq!(listing[1].title, "Bar");
    assert_eq!(listing[1].year, 2022);
}

#[test]
fn second_harvest_only_resolves_the_venue() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        temp_store(&temp),
        Providers::new(MockApi::default(), scenario_api()),
        VenueTable::default(),
        4,
    );
    let venue: VenueId = "V/2024".parse().unwrap();

    app.harvest(std::slice::from_ref(&venue), &JsonOutput).unwrap();
    let calls = app.providers().current().calls();
    let report = app.harvest(std::slice::from_ref(&venue), &JsonOutput).unwrap();

    assert_eq!(report.totals.skipped, 2);
    assert_eq!(report.totals.downloaded, 0);
    // group lookups for dialect and invitations; listing and records come from disk
    assert_eq!(app.providers().current().calls(), calls + 2);
}

#[test]
fn unknown_venue_is_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        temp_store(&temp),
        Providers::new(MockApi::default(), scenario_api()),
        VenueTable::default(),
        4,
    );
    let venues: Vec<VenueId> = vec!["Nope/2024".parse().unwrap(), "V/2024".parse().unwrap()];

    let report = app.harvest(&venues, &JsonOutput).unwrap();
    assert_eq!(report.venues[0].status, VenueStatus::NotFound);
    assert_eq!(report.venues[1].status, VenueStatus::Completed);
    assert_eq!(report.totals.downloaded, 2);
}

#[test]
fn undated_listing_fails_only_its_venue() {
    let temp = tempfile::tempdir().unwrap();
    let mut current = scenario_api();
    current.groups.insert(
        "W/2024".to_string(),
        json!({"id": "W/2024", "domain": "W/2024"}),
    );
    let mut table = VenueTable::default();
    table.insert(
        "W/2024".parse().unwrap(),
        vec![Query {
            name: "bad".to_string(),
            domain: Some("W/2024".to_string()),
            ..Query::default()
        }],
    );
    current.notes.push(json!({"id": "undated", "content": {"title": "No date"}}));
    let app = App::new(
        temp_store(&temp),
        Providers::new(MockApi::default(), current),
        table,
        4,
    );
    let venues: Vec<VenueId> = vec!["W/2024".parse().unwrap()];

    let report = app.harvest(&venues, &JsonOutput).unwrap();
    assert_eq!(report.venues[0].status, VenueStatus::Failed);
    assert!(report.venues[0].error.as_deref().unwrap().contains("undated"));
}

#[test]
fn missing_pdf_is_reported_not_failed() {
    let temp = tempfile::tempdir().unwrap();
    let mut current = scenario_api();
    current.pdfs.remove("bar");
    let app = App::new(
        temp_store(&temp),
        Providers::new(MockApi::default(), current),
        VenueTable::default(),
        4,
    );
    let venue: VenueId = "V/2024".parse().unwrap();

    let report = app.harvest(std::slice::from_ref(&venue), &JsonOutput).unwrap();
    assert_eq!(report.totals.downloaded, 1);
    assert_eq!(report.totals.no_pdf, 1);
    assert!(report.totals.failures.is_empty());
}

#[test]
fn listing_reports_cache_path() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        temp_store(&temp),
        Providers::new(MockApi::default(), scenario_api()),
        VenueTable::default(),
        4,
    );
    let venue: VenueId = "V/2024".parse().unwrap();

    let result = app.listing(&venue, &JsonOutput).unwrap();
    assert_eq!(result.dialect, Dialect::V2);
    assert_eq!(result.listings.len(), 1);
    assert_eq!(result.listings[0].records, 2);
    assert!(result.listings[0].cache_path.ends_with("V-2024.json"));
}
