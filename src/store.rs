use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;

use crate::domain::{ListingScope, Record, VenueId};
use crate::error::HarvestError;

const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const SUBSTITUTE: char = '-';
// Leaves room for `_<id>` and `_supplement.<ext>` under a 255-byte name limit.
const MAX_STEM_BYTES: usize = 180;

// Every on-disk artifact of one record. The PDF is the completion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub pdf_path: Utf8PathBuf,
    pub supplement_path: Option<Utf8PathBuf>,
    pub review_path: Utf8PathBuf,
    pub listing_path: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new(data_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            data_root,
            cache_root,
        }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn ensure_roots(&self) -> Result<(), HarvestError> {
        for root in [&self.data_root, &self.cache_root] {
            fs::create_dir_all(root.as_std_path())
                .map_err(|err| HarvestError::Filesystem(format!("{root}: {err}")))?;
        }
        Ok(())
    }

    pub fn venues_snapshot_path(&self) -> Utf8PathBuf {
        self.cache_root.join("venues.json")
    }

    pub fn listing_path(&self, venue: &VenueId, scope: &ListingScope) -> Utf8PathBuf {
        let venue = sanitize_component(venue.as_str());
        let file_name = match scope {
            ListingScope::Venue => format!("{venue}.json"),
            ListingScope::Tab(tab) => format!("{venue}_{}.json", sanitize_component(tab)),
        };
        self.cache_root.join(file_name)
    }

    pub fn record_dir(&self, venue: &VenueId, scope: &ListingScope, year: i32) -> Utf8PathBuf {
        let mut dir = self.data_root.join(sanitize_component(venue.as_str()));
        if let Some(tab) = scope.tab() {
            dir = dir.join(sanitize_component(tab));
        }
        dir.join(year.to_string())
    }

    pub fn paths_for(
        &self,
        venue: &VenueId,
        scope: &ListingScope,
        year: i32,
        title: &str,
        supplement_ext: Option<&str>,
    ) -> CacheEntry {
        let dir = self.record_dir(venue, scope, year);
        let stem = sanitize_component(title);
        CacheEntry {
            pdf_path: dir.join(format!("{stem}.pdf")),
            supplement_path: supplement_ext.map(|ext| dir.join(format!("{stem}_supplement.{ext}"))),
            review_path: dir.join(format!("{stem}.json")),
            listing_path: self.listing_path(venue, scope),
        }
    }

    pub fn entry_for(
        &self,
        venue: &VenueId,
        scope: &ListingScope,
        record: &Record,
        file_stem: &str,
    ) -> CacheEntry {
        self.paths_for(
            venue,
            scope,
            record.year,
            file_stem,
            record.supplement_ext.as_deref(),
        )
    }

    pub fn exists(&self, entry: &CacheEntry) -> bool {
        entry.pdf_path.as_std_path().exists()
    }

    pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, HarvestError> {
        let content = match fs::read(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(HarvestError::Filesystem(format!("{path}: {err}"))),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|err| HarvestError::Filesystem(format!("{path}: {err}")))
    }

    pub fn write_json_atomic<T: Serialize + ?Sized>(
        path: &Utf8Path,
        value: &T,
    ) -> Result<(), HarvestError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
        let temp = Self::stage(path, content)?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("{path}: {}", err.error)))?;
        Ok(())
    }

    pub fn create_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<bool, HarvestError> {
        let temp = Self::stage(path, content)?;
        match temp.persist_noclobber(path.as_std_path()) {
            Ok(_) => Ok(true),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(HarvestError::Filesystem(format!("{path}: {}", err.error))),
        }
    }

    pub fn create_json_atomic<T: Serialize + ?Sized>(
        path: &Utf8Path,
        value: &T,
    ) -> Result<bool, HarvestError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Self::create_bytes_atomic(path, &content)
    }

    fn stage(path: &Utf8Path, content: &[u8]) -> Result<tempfile::NamedTempFile, HarvestError> {
        let parent = path
            .parent()
            .ok_or_else(|| HarvestError::Filesystem(format!("invalid destination path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("{parent}: {err}")))?;
        let mut temp = Builder::new()
            .prefix(".or-harvest")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|err| HarvestError::Filesystem(format!("{path}: {err}")))?;
        Ok(temp)
    }
}

/// Makes a string safe as a single path component on every platform.
pub fn sanitize_component(value: &str) -> String {
    let replaced: String = value
        .chars()
        .filter(|ch| !ch.is_control())
        .map(|ch| if ILLEGAL_CHARS.contains(&ch) { SUBSTITUTE } else { ch })
        .collect();
    let collapsed = replaced
        .split(' ')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let mut end = collapsed.len().min(MAX_STEM_BYTES);
    while !collapsed.is_char_boundary(end) {
        end -= 1;
    }
    let stem = collapsed[..end].trim_end_matches('.').trim();
    if stem.is_empty() {
        return SUBSTITUTE.to_string();
    }
    stem.to_string()
}

/// File stem per record, in input order. Records whose sanitized titles
/// collide within the same year directory get their id appended.
pub fn assign_file_stems(records: &[Record]) -> Vec<String> {
    let key = |record: &Record| (record.year, sanitize_component(&record.title).to_lowercase());
    let mut occurrences: HashMap<(i32, String), usize> = HashMap::new();
    for record in records {
        *occurrences.entry(key(record)).or_default() += 1;
    }
    records
        .iter()
        .map(|record| {
            let title = sanitize_component(&record.title);
            if occurrences.get(&key(record)).copied().unwrap_or(0) > 1 {
                format!("{title}_{}", sanitize_component(&record.id))
            } else {
                title
            }
        })
        .collect()
}
