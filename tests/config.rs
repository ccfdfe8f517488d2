use std::time::Duration;

use assert_matches::assert_matches;

use openreview_harvester::config::{Config, ConfigLoader};
use openreview_harvester::domain::VenueId;
use openreview_harvester::error::HarvestError;

const SAMPLE: &str = r#"{
  "schema_version": 1,
  "data_dir": "mirror",
  "workers": 8,
  "retry": { "max_attempts": null, "max_elapsed_secs": null, "jitter": false },
  "api": { "timeout_secs": 15 },
  "venues": [
    {
      "id": "ICLR.cc/2024/Conference",
      "queries": [
        { "domain": "ICLR.cc/2024/Conference", "content": { "venue": "ICLR 2024 oral" } },
        { "name": "rejected", "domain": "ICLR.cc/2024/Conference", "content": { "venueid": "ICLR.cc/2024/Conference/Rejected_Submission" } }
      ]
    },
    {
      "id": "ICLR.cc/2020/Conference",
      "queries": ["ICLR.cc/2020/Conference/-/Withdrawn_Submission"]
    }
  ]
}"#;

#[test]
fn load_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("harvest.json");
    std::fs::write(&path, SAMPLE).unwrap();

    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(resolved.data_dir, "mirror");
    assert_eq!(resolved.cache_dir, "cache");
    assert_eq!(resolved.workers, 8);
    assert_eq!(resolved.api.timeout_secs, 15);
    assert_eq!(resolved.retry.max_attempts, None);
    assert_eq!(resolved.retry.max_elapsed(), None);
    assert!(!resolved.retry.jitter);
    assert_eq!(resolved.retry.rate_limit_delay(), Duration::from_secs(10));
    assert_eq!(resolved.venues.len(), 2);

    let iclr24: VenueId = "ICLR.cc/2024/Conference".parse().unwrap();
    let queries = resolved.venues.get(&iclr24).unwrap();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].name, "ICLR 2024 oral");
    assert!(queries[0].is_domain_scoped());
    assert_eq!(queries[1].name, "rejected");
    assert_eq!(
        queries[1].params(),
        vec![
            ("domain".to_string(), "ICLR.cc/2024/Conference".to_string()),
            (
                "content.venueid".to_string(),
                "ICLR.cc/2024/Conference/Rejected_Submission".to_string()
            ),
        ]
    );

    let iclr20: VenueId = "ICLR.cc/2020/Conference".parse().unwrap();
    let queries = resolved.venues.get(&iclr20).unwrap();
    assert_eq!(
        queries[0].invitation.as_deref(),
        Some("ICLR.cc/2020/Conference/-/Withdrawn_Submission")
    );
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let result = ConfigLoader::resolve(Some(path.to_str().unwrap()));
    assert_matches!(result, Err(HarvestError::ConfigRead(_)));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("harvest.json");
    std::fs::write(&path, "{ \"venues\": 3 }").unwrap();
    let result = ConfigLoader::resolve(Some(path.to_str().unwrap()));
    assert_matches!(result, Err(HarvestError::ConfigParse(_)));
}

#[test]
fn invalid_venue_id_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("harvest.json");
    std::fs::write(&path, r#"{ "venues": [ { "id": "X//2024", "queries": [] } ] }"#).unwrap();
    let result = ConfigLoader::resolve(Some(path.to_str().unwrap()));
    assert_matches!(result, Err(HarvestError::InvalidVenueId(_)));
}

#[test]
fn example_config_resolves() {
    let config: Config = serde_json::from_str(include_str!("../harvest.example.json")).unwrap();
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.venues.len(), 3);

    let iclr25: VenueId = "ICLR.cc/2025/Conference".parse().unwrap();
    let queries = resolved.venues.get(&iclr25).unwrap();
    assert_eq!(queries.len(), 6);
    assert!(queries.iter().all(|query| query.is_domain_scoped()));
    assert_eq!(queries[0].name, "ICLR 2025 Oral");
    assert_eq!(queries[4].name, "Withdrawn");
}

#[test]
fn negative_backoff_multiplier_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("harvest.json");
    std::fs::write(&path, r#"{ "retry": { "backoff_multiplier": -2.0 } }"#).unwrap();
    let result = ConfigLoader::resolve(Some(path.to_str().unwrap()));
    assert_matches!(
        result,
        Err(HarvestError::ConfigParse(message)) if message.contains("backoff_multiplier")
    );
}
