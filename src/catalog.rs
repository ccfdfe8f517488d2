use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::VenueTable;
use crate::domain::{Dialect, ListingScope, Query, VenueId};
use crate::error::HarvestError;
use crate::providers::{NoteProvider, Providers};
use crate::store::Store;

const VENUES_GROUP: &str = "venues";

static SUBMISSION_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b([A-Z_]*SUBMISSION_ID)\s*=\s*['"]([^'"]+)['"]"#).unwrap()
});
static DECISION_MAP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)DECISION_HEADING_MAP\s*=\s*\{(.*?)\}").unwrap());
static QUOTED_PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]([^'"]+)['"]\s*:\s*['"]([^'"]+)['"]"#).unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPlan {
    pub scope: ListingScope,
    pub queries: Vec<Query>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueQueries {
    pub dialect: Dialect,
    pub plans: Vec<ListingPlan>,
}

pub struct CatalogClient<'a, L, C> {
    providers: &'a Providers<L, C>,
    store: &'a Store,
}

impl<'a, L: NoteProvider, C: NoteProvider> CatalogClient<'a, L, C> {
    pub fn new(providers: &'a Providers<L, C>, store: &'a Store) -> Self {
        Self { providers, store }
    }

    // Venue ids from the `venues` group. The first successful lookup is
    // snapshotted and reused forever after.
    pub fn list_venues(&self) -> Result<Vec<VenueId>, HarvestError> {
        let path = self.store.venues_snapshot_path();
        let group = match Store::read_json::<Value>(&path)? {
            Some(group) => {
                debug!(path = %path, "using cached venue snapshot");
                group
            }
            None => {
                let group = self
                    .providers
                    .get(Dialect::V2)
                    .group(VENUES_GROUP)?
                    .ok_or_else(|| HarvestError::VenueNotFound(VENUES_GROUP.to_string()))?;
                Store::write_json_atomic(&path, &group)?;
                group
            }
        };

        let venues: Vec<VenueId> = group
            .get("members")
            .and_then(Value::as_array)
            .map(|members| {
                members
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|member| match member.parse() {
                        Ok(venue) => Some(venue),
                        Err(_) => {
                            warn!(member, "skipping malformed venue id");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        info!(count = venues.len(), "venues listed");
        Ok(venues)
    }

    pub fn resolve_version(&self, venue: &VenueId) -> Result<Dialect, HarvestError> {
        if let Some(group) = self.providers.get(Dialect::V2).group(venue.as_str())? {
            let has_domain = group.get("domain").is_some_and(|domain| !domain.is_null());
            return Ok(if has_domain { Dialect::V2 } else { Dialect::V1 });
        }
        if self.providers.get(Dialect::V1).group(venue.as_str())?.is_some() {
            return Ok(Dialect::V1);
        }
        Err(HarvestError::VenueNotFound(venue.to_string()))
    }

    pub fn resolve_listing_invitations(
        &self,
        venue: &VenueId,
        dialect: Dialect,
    ) -> Result<Vec<String>, HarvestError> {
        let group = self.venue_group(venue, dialect)?;
        Ok(match dialect {
            Dialect::V1 => invitations_from_web(web_script(&group)),
            Dialect::V2 => invitations_from_content(&group),
        })
    }

    // Static table entry first, then legacy decision tabs, then one query per
    // submission invitation.
    pub fn queries_for(
        &self,
        venue: &VenueId,
        table: &VenueTable,
    ) -> Result<VenueQueries, HarvestError> {
        let dialect = self.resolve_version(venue)?;
        if let Some(queries) = table.get(venue) {
            return Ok(VenueQueries {
                dialect,
                plans: vec![ListingPlan {
                    scope: ListingScope::Venue,
                    queries: queries.to_vec(),
                }],
            });
        }

        let group = self.venue_group(venue, dialect)?;
        if dialect == Dialect::V1 {
            let tabs = legacy_tabs(web_script(&group));
            if !tabs.is_empty() {
                debug!(venue = %venue, tabs = tabs.len(), "using legacy decision tabs");
                let plans = tabs
                    .into_iter()
                    .map(|query| ListingPlan {
                        scope: ListingScope::Tab(query.name.clone()),
                        queries: vec![query],
                    })
                    .collect();
                return Ok(VenueQueries { dialect, plans });
            }
        }

        let invitations = match dialect {
            Dialect::V1 => invitations_from_web(web_script(&group)),
            Dialect::V2 => invitations_from_content(&group),
        };
        if invitations.is_empty() {
            warn!(venue = %venue, %dialect, "no submission invitations found");
            return Ok(VenueQueries {
                dialect,
                plans: Vec::new(),
            });
        }
        Ok(VenueQueries {
            dialect,
            plans: vec![ListingPlan {
                scope: ListingScope::Venue,
                queries: invitations
                    .iter()
                    .map(|invitation| Query::for_invitation(invitation))
                    .collect(),
            }],
        })
    }

    fn venue_group(&self, venue: &VenueId, dialect: Dialect) -> Result<Value, HarvestError> {
        self.providers
            .get(dialect)
            .group(venue.as_str())?
            .ok_or_else(|| HarvestError::VenueNotFound(venue.to_string()))
    }
}

fn web_script(group: &Value) -> &str {
    group.get("web").and_then(Value::as_str).unwrap_or_default()
}

// `*SUBMISSION_ID = '...'` assignments of a legacy webfield. When a blind
// submission invitation exists the plain one is dropped, it lists the same
// papers under their non-anonymous ids.
pub fn invitations_from_web(web: &str) -> Vec<String> {
    let assignments: Vec<(String, String)> = SUBMISSION_ID_RE
        .captures_iter(web)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect();
    let has_blind = assignments
        .iter()
        .any(|(name, _)| name == "BLIND_SUBMISSION_ID");

    let mut invitations: Vec<String> = Vec::new();
    for (name, value) in assignments {
        if has_blind && name == "SUBMISSION_ID" {
            continue;
        }
        if !invitations.contains(&value) {
            invitations.push(value);
        }
    }
    invitations
}

pub fn invitations_from_content(group: &Value) -> Vec<String> {
    let Some(content) = group.get("content").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut keys: Vec<&String> = content
        .keys()
        .filter(|key| key.ends_with("submission_id"))
        .collect();
    keys.sort_by_key(|key| (key.as_str() != "submission_id", key.to_string()));

    let mut invitations: Vec<String> = Vec::new();
    for key in keys {
        let value = match &content[key.as_str()] {
            Value::Object(wrapper) => wrapper.get("value").and_then(Value::as_str),
            other => other.as_str(),
        };
        if let Some(value) = value.filter(|value| !value.is_empty()) {
            if !invitations.iter().any(|known| known == value) {
                invitations.push(value.to_string());
            }
        }
    }
    invitations
}

// Decision tabs declared by a legacy webfield's `DECISION_HEADING_MAP`.
// Every tab lists the blind submission invitation, or the plain one when
// the webfield has no blind variant.
pub fn legacy_tabs(web: &str) -> Vec<Query> {
    let Some(map) = DECISION_MAP_RE.captures(web) else {
        return Vec::new();
    };
    let Some(invitation) = tab_invitation(web) else {
        return Vec::new();
    };
    QUOTED_PAIR_RE
        .captures_iter(&map[1])
        .map(|caps| Query {
            name: caps[2].to_string(),
            invitation: Some(invitation.clone()),
            decision: Some(caps[1].to_string()),
            ..Query::default()
        })
        .collect()
}

fn tab_invitation(web: &str) -> Option<String> {
    let mut plain = None;
    for caps in SUBMISSION_ID_RE.captures_iter(web) {
        match &caps[1] {
            "BLIND_SUBMISSION_ID" => return Some(caps[2].to_string()),
            "SUBMISSION_ID" if plain.is_none() => plain = Some(caps[2].to_string()),
            _ => {}
        }
    }
    plain
}
