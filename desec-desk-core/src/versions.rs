//! Content-addressed zone version store.
//!
//! Every record mutation eventually produces a snapshot of the zone's full
//! RRset state under `versions/<zone>/<hash>.json`. Entries are immutable
//! and deduplicated by content hash, so re-snapshotting an unchanged zone
//! is a no-op. Restoring does not touch the service: it only computes the
//! bulk-put payload for the caller to push through the queue.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use desec_desk_client::types::{BulkRrset, Rrset};

use crate::error::{CoreError, CoreResult};
use crate::util::fs::atomic_write;

fn safe_zone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        let re = Regex::new(r"^[A-Za-z0-9._-]+$").expect("static regex is valid");
        re
    })
}

/// One record of a zone's canonical state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneStateRecord {
    pub subname: String,
    #[serde(rename = "type")]
    pub rtype: String,
    pub ttl: u32,
    pub records: Vec<String>,
}

/// A full snapshot as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub zone: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub state_hash: String,
    pub state: Vec<ZoneStateRecord>,
}

/// Listing row: enough to render a timeline without loading state blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Append-only, per-profile snapshot log.
pub struct VersionStore {
    dir: PathBuf,
    /// Latest hash per zone, to make dedup O(1) after the first snapshot.
    heads: Mutex<std::collections::HashMap<String, String>>,
}

/// Sorts RRsets into the canonical order used for hashing and storage.
fn canonical_state(rrsets: &[Rrset]) -> Vec<ZoneStateRecord> {
    let mut state: Vec<ZoneStateRecord> = rrsets
        .iter()
        .map(|r| ZoneStateRecord {
            subname: r.subname.clone(),
            rtype: r.rtype.clone(),
            ttl: r.ttl,
            records: r.records.clone(),
        })
        .collect();
    state.sort();
    state
}

/// SHA-256 over the canonical text encoding: one header line per RRset,
/// followed by its record values joined by newlines.
fn state_hash(state: &[ZoneStateRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in state {
        hasher.update(record.subname.as_bytes());
        hasher.update(b"|");
        hasher.update(record.rtype.as_bytes());
        hasher.update(b"|");
        hasher.update(record.ttl.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(record.records.join("\n").as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

impl VersionStore {
    /// Opens the store rooted at `dir`, creating it if needed.
    pub fn new(dir: PathBuf) -> CoreResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            heads: Mutex::new(std::collections::HashMap::new()),
        })
    }

    fn check_zone(zone: &str) -> CoreResult<()> {
        if safe_zone_re().is_match(zone) && !zone.chars().all(|c| c == '.') {
            Ok(())
        } else {
            Err(CoreError::ZoneNotFound(zone.to_string()))
        }
    }

    fn zone_dir(&self, zone: &str) -> PathBuf {
        self.dir.join(zone)
    }

    fn entry_path(&self, zone: &str, hash: &str) -> PathBuf {
        self.zone_dir(zone).join(format!("{hash}.json"))
    }

    fn head_hash(&self, zone: &str) -> CoreResult<Option<String>> {
        {
            let heads = self
                .heads
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(hash) = heads.get(zone) {
                return Ok(Some(hash.clone()));
            }
        }
        Ok(self.list(zone)?.first().map(|entry| entry.hash.clone()))
    }

    /// Appends a snapshot of `rrsets` unless it matches the current head.
    ///
    /// Returns the new entry's hash, or `None` when nothing changed or the
    /// zone is empty. Failures here must never fail the mutation that
    /// triggered the snapshot; callers log and move on.
    pub fn snapshot(
        &self,
        zone: &str,
        message: &str,
        rrsets: &[Rrset],
    ) -> CoreResult<Option<String>> {
        Self::check_zone(zone)?;
        if rrsets.is_empty() {
            return Ok(None);
        }

        let state = canonical_state(rrsets);
        let hash = state_hash(&state);
        if self.head_hash(zone)?.as_deref() == Some(hash.as_str()) {
            log::debug!("No changes to snapshot for {zone}");
            return Ok(None);
        }

        let entry = SnapshotEntry {
            zone: zone.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            state_hash: hash.clone(),
            state,
        };
        let json = serde_json::to_vec_pretty(&entry)?;
        atomic_write(&self.entry_path(zone, &hash), &json)?;

        let mut heads = self
            .heads
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        heads.insert(zone.to_string(), hash.clone());
        log::info!("Version snapshot: [{zone}] {message}");
        Ok(Some(hash))
    }

    /// All snapshots of `zone`, newest first.
    pub fn list(&self, zone: &str) -> CoreResult<Vec<SnapshotRef>> {
        Self::check_zone(zone)?;
        let dir = self.zone_dir(zone);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dir_entry in std::fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path)
                .map_err(CoreError::from)
                .and_then(|bytes| serde_json::from_slice::<SnapshotEntry>(&bytes).map_err(Into::into))
            {
                Ok(entry) => entries.push(SnapshotRef {
                    hash: entry.state_hash,
                    timestamp: entry.timestamp,
                    message: entry.message,
                }),
                Err(e) => log::warn!("Skipping unreadable snapshot {}: {e}", path.display()),
            }
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// Loads the full state captured at `hash`.
    pub fn read(&self, zone: &str, hash: &str) -> CoreResult<SnapshotEntry> {
        Self::check_zone(zone)?;
        let path = self.entry_path(zone, hash);
        if !path.exists() {
            return Err(CoreError::SnapshotNotFound(format!("{zone}@{hash}")));
        }
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Computes the bulk-put payload that would restore `target` on a server
    /// currently holding `current`.
    ///
    /// RRsets present now but absent from the target become empty-record
    /// tombstones, so a single bulk PUT replaces the whole zone.
    #[must_use]
    pub fn restore_payload(current: &[Rrset], target: &SnapshotEntry) -> Vec<BulkRrset> {
        let target_keys: BTreeSet<(String, String)> = target
            .state
            .iter()
            .map(|r| (r.subname.clone(), r.rtype.clone()))
            .collect();

        let mut payload: Vec<BulkRrset> = target
            .state
            .iter()
            .map(|r| BulkRrset {
                subname: r.subname.clone(),
                rtype: r.rtype.clone(),
                ttl: Some(r.ttl),
                records: r.records.clone(),
            })
            .collect();

        for rrset in current {
            if !target_keys.contains(&rrset.key()) {
                payload.push(BulkRrset {
                    subname: rrset.subname.clone(),
                    rtype: rrset.rtype.clone(),
                    ttl: None,
                    records: Vec::new(),
                });
            }
        }
        payload
    }

    /// Drops all snapshots of `zone`. Returns whether anything existed.
    pub fn delete_history(&self, zone: &str) -> CoreResult<bool> {
        Self::check_zone(zone)?;
        let dir = self.zone_dir(zone);
        let existed = dir.exists();
        if existed {
            std::fs::remove_dir_all(&dir)?;
            log::info!("Deleted version history for {zone}");
        }
        let mut heads = self
            .heads
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        heads.remove(zone);
        Ok(existed)
    }

    /// Zones that currently have at least one snapshot.
    pub fn list_versioned_zones(&self) -> CoreResult<Vec<String>> {
        let mut zones = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    zones.push(name.to_string());
                }
            }
        }
        zones.sort();
        Ok(zones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rrset(subname: &str, rtype: &str, records: &[&str]) -> Rrset {
        Rrset {
            subname: subname.to_string(),
            rtype: rtype.to_string(),
            ttl: 3600,
            records: records.iter().map(ToString::to_string).collect(),
            created: None,
            touched: None,
        }
    }

    fn store() -> (VersionStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = VersionStore::new(tmp.path().to_path_buf()).unwrap();
        (store, tmp)
    }

    #[test]
    fn snapshot_then_dedup() {
        let (store, _tmp) = store();
        let records = vec![rrset("www", "A", &["1.2.3.4"])];

        let first = store.snapshot("example.com", "initial", &records).unwrap();
        assert!(first.is_some());

        // Identical state: no new entry.
        let second = store.snapshot("example.com", "again", &records).unwrap();
        assert!(second.is_none());
        assert_eq!(store.list("example.com").unwrap().len(), 1);
    }

    #[test]
    fn hash_ignores_input_order() {
        let a = canonical_state(&[
            rrset("www", "A", &["1.2.3.4"]),
            rrset("", "MX", &["10 mail.example.com."]),
        ]);
        let b = canonical_state(&[
            rrset("", "MX", &["10 mail.example.com."]),
            rrset("www", "A", &["1.2.3.4"]),
        ]);
        assert_eq!(state_hash(&a), state_hash(&b));
    }

    #[test]
    fn changed_state_appends_new_entry() {
        let (store, _tmp) = store();
        store
            .snapshot("example.com", "v1", &[rrset("www", "A", &["1.2.3.4"])])
            .unwrap();
        store
            .snapshot("example.com", "v2", &[rrset("www", "A", &["5.6.7.8"])])
            .unwrap();

        let list = store.list("example.com").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].message, "v2");
        assert_eq!(list[1].message, "v1");
    }

    #[test]
    fn read_returns_captured_state() {
        let (store, _tmp) = store();
        let hash = store
            .snapshot("example.com", "v1", &[rrset("www", "A", &["1.2.3.4"])])
            .unwrap()
            .unwrap();

        let entry = store.read("example.com", &hash).unwrap();
        assert_eq!(entry.state.len(), 1);
        assert_eq!(entry.state[0].records, vec!["1.2.3.4"]);
        assert_eq!(entry.state_hash, hash);
    }

    #[test]
    fn read_unknown_hash_fails() {
        let (store, _tmp) = store();
        assert!(matches!(
            store.read("example.com", "deadbeef"),
            Err(CoreError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn restore_payload_tombstones_extra_rrsets() {
        let (store, _tmp) = store();
        let hash = store
            .snapshot("example.com", "v1", &[rrset("www", "A", &["1.2.3.4"])])
            .unwrap()
            .unwrap();
        let target = store.read("example.com", &hash).unwrap();

        let current = vec![
            rrset("www", "A", &["9.9.9.9"]),
            rrset("extra", "TXT", &["\"added later\""]),
        ];
        let payload = VersionStore::restore_payload(&current, &target);

        assert_eq!(payload.len(), 2);
        let www = payload.iter().find(|r| r.subname == "www").unwrap();
        assert_eq!(www.records, vec!["1.2.3.4"]);
        let extra = payload.iter().find(|r| r.subname == "extra").unwrap();
        assert!(extra.records.is_empty());
    }

    #[test]
    fn empty_zone_is_not_snapshotted() {
        let (store, _tmp) = store();
        assert!(store.snapshot("example.com", "empty", &[]).unwrap().is_none());
    }

    #[test]
    fn unsafe_zone_name_rejected() {
        let (store, _tmp) = store();
        assert!(store
            .snapshot("../evil", "x", &[rrset("", "A", &["1.1.1.1"])])
            .is_err());
    }

    #[test]
    fn delete_history_removes_zone_dir() {
        let (store, _tmp) = store();
        store
            .snapshot("example.com", "v1", &[rrset("www", "A", &["1.2.3.4"])])
            .unwrap();
        assert_eq!(store.list_versioned_zones().unwrap(), vec!["example.com"]);

        assert!(store.delete_history("example.com").unwrap());
        assert!(store.list("example.com").unwrap().is_empty());
        assert!(!store.delete_history("example.com").unwrap());

        // Dedup memo must be gone too: the same state snapshots again.
        let again = store
            .snapshot("example.com", "v1", &[rrset("www", "A", &["1.2.3.4"])])
            .unwrap();
        assert!(again.is_some());
    }
}
