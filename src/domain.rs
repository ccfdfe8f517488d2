use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarvestError;

/// Timestamp fields consulted for a record's year, highest priority first.
pub const DATE_FIELDS: [&str; 3] = ["pdate", "cdate", "mdate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    V1,
    V2,
}

impl Dialect {
    pub fn other(self) -> Dialect {
        match self {
            Dialect::V1 => Dialect::V2,
            Dialect::V2 => Dialect::V1,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::V1 => write!(f, "v1"),
            Dialect::V2 => write!(f, "v2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VenueId(String);

impl VenueId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VenueId {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed.len() == value.len()
            && trimmed.split('/').all(|segment| !segment.is_empty());
        if !is_valid {
            return Err(HarvestError::InvalidVenueId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListingScope {
    Venue,
    Tab(String),
}

impl ListingScope {
    pub fn tab(&self) -> Option<&str> {
        match self {
            ListingScope::Venue => None,
            ListingScope::Tab(name) => Some(name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invitation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub content: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}

impl Query {
    pub fn for_invitation(invitation: &str) -> Self {
        Self {
            name: invitation_label(invitation),
            invitation: Some(invitation.to_string()),
            ..Self::default()
        }
    }

    pub fn is_domain_scoped(&self) -> bool {
        self.domain.is_some()
    }

    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(invitation) = &self.invitation {
            params.push(("invitation".to_string(), invitation.clone()));
        }
        if let Some(domain) = &self.domain {
            params.push(("domain".to_string(), domain.clone()));
        }
        for (key, value) in &self.content {
            params.push((format!("content.{key}"), value.clone()));
        }
        if let Some(details) = &self.details {
            params.push(("details".to_string(), details.clone()));
        }
        params
    }

    // Client-side filter; only legacy decision tabs reject notes.
    pub fn accepts(&self, note: &Value) -> bool {
        let Some(decision) = &self.decision else {
            return true;
        };
        note.get("content")
            .and_then(|content| content.get("decision"))
            .and_then(unwrap_value)
            .and_then(Value::as_str)
            .map(|value| value == decision)
            .unwrap_or(false)
    }
}

// Short label for an invitation id: `X/2020/Conference/-/Blind_Submission` -> `Blind_Submission`.
pub fn invitation_label(invitation: &str) -> String {
    invitation
        .rsplit('/')
        .next()
        .filter(|label| !label.is_empty())
        .unwrap_or(invitation)
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub title: String,
    pub year: i32,
    pub dialect: Dialect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplement_ext: Option<String>,
}

impl Record {
    pub fn from_note(note: &Value, dialect: Dialect) -> Result<Self, HarvestError> {
        let id = note
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| HarvestError::MalformedRecord {
                id: "<unknown>".to_string(),
                reason: "missing id".to_string(),
            })?
            .to_string();
        let title = extract_title(note).ok_or_else(|| HarvestError::MalformedRecord {
            id: id.clone(),
            reason: "missing title".to_string(),
        })?;
        let year = extract_year(note).ok_or_else(|| HarvestError::MissingDate(id.clone()))?;
        Ok(Self {
            supplement_ext: extract_supplement_ext(note),
            id,
            title,
            year,
            dialect,
        })
    }
}

fn unwrap_value(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(map) => map.get("value"),
        Value::Null => None,
        other => Some(other),
    }
}

fn content_str<'a>(note: &'a Value, field: &str) -> Option<&'a str> {
    note.get("content")
        .and_then(|content| content.get(field))
        .and_then(unwrap_value)
        .and_then(Value::as_str)
}

pub fn extract_title(note: &Value) -> Option<String> {
    let raw = content_str(note, "title")?;
    let cleaned = raw.replace(['\n', '\r'], "");
    let cleaned = cleaned.replace("  ", " ");
    let cleaned = cleaned.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

pub fn extract_year(note: &Value) -> Option<i32> {
    DATE_FIELDS.iter().find_map(|field| {
        let value = note.get(*field)?;
        let millis = value.as_i64().or_else(|| value.as_f64().map(|ms| ms as i64))?;
        DateTime::from_timestamp_millis(millis).map(|dt| dt.year())
    })
}

pub fn extract_supplement_ext(note: &Value) -> Option<String> {
    let path = content_str(note, "supplementary_material")?;
    let file_name = path.rsplit('/').next()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();
    let is_valid = !ext.is_empty() && ext.chars().all(|ch| ch.is_ascii_alphanumeric());
    is_valid.then_some(ext)
}
