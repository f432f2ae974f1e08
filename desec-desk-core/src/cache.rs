//! Three-layer zone/record cache.
//!
//! - **L1** — in-memory lists with hash indexes; session lifetime.
//! - **L2** — compact binary files (`zones.bin`, `records_<slug>.bin`),
//!   chosen for fast cold-start loads.
//! - **L3** — the same content as human-readable JSON, used as a fallback
//!   when the binary layer fails to deserialise after a schema change.
//!
//! Reads fall through L1 → L2 → L3, populating upward. Writes update L1
//! first, then persist both disk layers atomically. Stale data is still
//! served; refreshing is the caller's job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use desec_desk_client::types::{Rrset, Zone};

use crate::error::{CoreError, CoreResult};
use crate::util::fs::{atomic_write, filename_slug};

/// Records are considered stale this long after they were fetched.
pub const RECORDS_TTL_SECS: i64 = 300;

/// On-disk envelope shared by both persistent layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope<T> {
    fetched_at: DateTime<Utc>,
    items: Vec<T>,
}

#[derive(Debug, Clone)]
struct ZonesEntry {
    list: Vec<Zone>,
    by_name: HashMap<String, usize>,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RecordsEntry {
    list: Vec<Rrset>,
    index: HashMap<(String, String), usize>,
    fetched_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    zones: Option<ZonesEntry>,
    records: HashMap<String, RecordsEntry>,
}

/// Per-profile cache over the service's zones and records.
pub struct ZoneCache {
    dir: PathBuf,
    state: Mutex<MemoryState>,
}

fn zone_index(list: &[Zone]) -> HashMap<String, usize> {
    list.iter()
        .enumerate()
        .map(|(i, z)| (z.name.clone(), i))
        .collect()
}

fn record_index(list: &[Rrset]) -> HashMap<(String, String), usize> {
    list.iter().enumerate().map(|(i, r)| (r.key(), i)).collect()
}

impl ZoneCache {
    /// Opens the cache directory, creating it if needed.
    pub fn new(dir: PathBuf) -> CoreResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            state: Mutex::new(MemoryState::default()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn zones_bin(&self) -> PathBuf {
        self.dir.join("zones.bin")
    }

    fn zones_json(&self) -> PathBuf {
        self.dir.join("zones.json")
    }

    fn records_bin(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("records_{}.bin", filename_slug(domain)))
    }

    fn records_json(&self, domain: &str) -> PathBuf {
        self.dir
            .join(format!("records_{}.json", filename_slug(domain)))
    }

    // ===== Write path =====

    /// Replaces the cached zone list in all three layers.
    pub fn put_zones(&self, zones: Vec<Zone>) -> CoreResult<()> {
        let fetched_at = Utc::now();
        {
            let mut state = self.lock();
            state.zones = Some(ZonesEntry {
                by_name: zone_index(&zones),
                list: zones.clone(),
                fetched_at,
            });
        }
        self.persist(&self.zones_bin(), &self.zones_json(), fetched_at, &zones)?;
        log::debug!("Cached {} zones", zones.len());
        Ok(())
    }

    /// Replaces the cached records of `domain` in all three layers.
    pub fn put_records(&self, domain: &str, records: Vec<Rrset>) -> CoreResult<()> {
        let fetched_at = Utc::now();
        {
            let mut state = self.lock();
            state.records.insert(
                domain.to_string(),
                RecordsEntry {
                    index: record_index(&records),
                    list: records.clone(),
                    fetched_at,
                },
            );
        }
        self.persist(
            &self.records_bin(domain),
            &self.records_json(domain),
            fetched_at,
            &records,
        )?;
        log::debug!("Cached {} records for {domain}", records.len());
        Ok(())
    }

    fn persist<T: Serialize + Clone>(
        &self,
        bin_path: &Path,
        json_path: &Path,
        fetched_at: DateTime<Utc>,
        items: &[T],
    ) -> CoreResult<()> {
        let envelope = Envelope {
            fetched_at,
            items: items.to_vec(),
        };
        let bin = bincode::serialize(&envelope)
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;
        atomic_write(bin_path, &bin)?;
        let json = serde_json::to_vec_pretty(&envelope)?;
        atomic_write(json_path, &json)?;
        Ok(())
    }

    // ===== Read path =====

    /// Returns the zone list and its fetch time, falling through the layers.
    #[must_use]
    pub fn zones(&self) -> Option<(Vec<Zone>, DateTime<Utc>)> {
        {
            let state = self.lock();
            if let Some(entry) = &state.zones {
                return Some((entry.list.clone(), entry.fetched_at));
            }
        }
        let envelope: Envelope<Zone> = self.load_layers(&self.zones_bin(), &self.zones_json())?;
        let mut state = self.lock();
        let result = (envelope.items.clone(), envelope.fetched_at);
        state.zones = Some(ZonesEntry {
            by_name: zone_index(&envelope.items),
            list: envelope.items,
            fetched_at: envelope.fetched_at,
        });
        Some(result)
    }

    /// O(1) zone lookup by name (L1 only; call [`Self::zones`] first to warm).
    #[must_use]
    pub fn zone_by_name(&self, name: &str) -> Option<Zone> {
        let state = self.lock();
        let entry = state.zones.as_ref()?;
        entry.by_name.get(name).map(|&i| entry.list[i].clone())
    }

    /// Returns the records of `domain` and their fetch time.
    #[must_use]
    pub fn records(&self, domain: &str) -> Option<(Vec<Rrset>, DateTime<Utc>)> {
        {
            let state = self.lock();
            if let Some(entry) = state.records.get(domain) {
                return Some((entry.list.clone(), entry.fetched_at));
            }
        }
        let envelope: Envelope<Rrset> =
            self.load_layers(&self.records_bin(domain), &self.records_json(domain))?;
        let mut state = self.lock();
        let result = (envelope.items.clone(), envelope.fetched_at);
        state.records.insert(
            domain.to_string(),
            RecordsEntry {
                index: record_index(&envelope.items),
                list: envelope.items,
                fetched_at: envelope.fetched_at,
            },
        );
        Some(result)
    }

    /// O(1) RRset lookup by `(subname, type)` (L1 only).
    #[must_use]
    pub fn record(&self, domain: &str, subname: &str, rtype: &str) -> Option<Rrset> {
        let state = self.lock();
        let entry = state.records.get(domain)?;
        entry
            .index
            .get(&(subname.to_string(), rtype.to_string()))
            .map(|&i| entry.list[i].clone())
    }

    /// L2 first; on any failure fall back to L3. Both failing is a miss.
    fn load_layers<T: DeserializeOwned>(
        &self,
        bin_path: &Path,
        json_path: &Path,
    ) -> Option<Envelope<T>> {
        match std::fs::read(bin_path) {
            Ok(bytes) => match bincode::deserialize(&bytes) {
                Ok(envelope) => return Some(envelope),
                Err(e) => {
                    log::warn!(
                        "Binary cache {} unreadable ({e}); falling back to JSON",
                        bin_path.display()
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("Failed to read {}: {e}", bin_path.display());
            }
        }

        match std::fs::read(json_path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    log::warn!("JSON cache {} unreadable: {e}", json_path.display());
                    None
                }
            },
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to read {}: {e}", json_path.display());
                }
                None
            }
        }
    }

    // ===== Staleness =====

    /// Whether the zone list is missing or older than `sync_interval_minutes`.
    #[must_use]
    pub fn zones_stale(&self, sync_interval_minutes: u32) -> bool {
        let state = self.lock();
        match &state.zones {
            Some(entry) => {
                Utc::now() - entry.fetched_at > Duration::minutes(i64::from(sync_interval_minutes))
            }
            None => true,
        }
    }

    /// Whether `domain`'s records are missing or past their 5-minute TTL.
    #[must_use]
    pub fn records_stale(&self, domain: &str) -> bool {
        let state = self.lock();
        match state.records.get(domain) {
            Some(entry) => Utc::now() - entry.fetched_at > Duration::seconds(RECORDS_TTL_SECS),
            None => true,
        }
    }

    // ===== Invalidation =====

    /// Evicts `domain`'s records from all three layers.
    pub fn invalidate_records(&self, domain: &str) {
        {
            let mut state = self.lock();
            state.records.remove(domain);
        }
        for path in [self.records_bin(domain), self.records_json(domain)] {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove {}: {e}", path.display());
                }
            }
        }
        log::debug!("Invalidated record cache for {domain}");
    }

    /// Evicts the zone list from all three layers.
    pub fn invalidate_zones(&self) {
        {
            let mut state = self.lock();
            state.zones = None;
        }
        for path in [self.zones_bin(), self.zones_json()] {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove {}: {e}", path.display());
                }
            }
        }
        log::debug!("Invalidated zone cache");
    }

    /// Drops everything, memory and disk.
    pub fn clear(&self) -> CoreResult<()> {
        {
            let mut state = self.lock();
            state.zones = None;
            state.records.clear();
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().is_file() {
                std::fs::remove_file(entry.path())?;
            }
        }
        log::info!("Cleared cache at {}", self.dir.display());
        Ok(())
    }

    /// Overrides a cache entry's fetch time. Test hook for staleness checks.
    #[doc(hidden)]
    pub fn set_records_fetched_at(&self, domain: &str, fetched_at: DateTime<Utc>) {
        let mut state = self.lock();
        if let Some(entry) = state.records.get_mut(domain) {
            entry.fetched_at = fetched_at;
        }
    }

    /// Overrides the zone list's fetch time. Test hook for staleness checks.
    #[doc(hidden)]
    pub fn set_zones_fetched_at(&self, fetched_at: DateTime<Utc>) {
        let mut state = self.lock();
        if let Some(entry) = state.zones.as_mut() {
            entry.fetched_at = fetched_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(name: &str) -> Zone {
        Zone {
            name: name.to_string(),
            created: None,
            published: None,
            touched: None,
            minimum_ttl: Some(3600),
            keys: Vec::new(),
        }
    }

    fn rrset(subname: &str, rtype: &str, value: &str) -> Rrset {
        Rrset {
            subname: subname.to_string(),
            rtype: rtype.to_string(),
            ttl: 3600,
            records: vec![value.to_string()],
            created: None,
            touched: None,
        }
    }

    fn cache() -> (ZoneCache, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ZoneCache::new(tmp.path().to_path_buf()).unwrap();
        (cache, tmp)
    }

    #[test]
    fn memory_hit_after_put() {
        let (cache, _tmp) = cache();
        cache.put_zones(vec![zone("example.com")]).unwrap();
        let (zones, _) = cache.zones().unwrap();
        assert_eq!(zones.len(), 1);
        assert!(cache.zone_by_name("example.com").is_some());
        assert!(cache.zone_by_name("other.com").is_none());
    }

    #[test]
    fn cold_start_loads_from_binary_layer() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let cache = ZoneCache::new(tmp.path().to_path_buf()).unwrap();
            cache
                .put_records("example.com", vec![rrset("www", "A", "1.2.3.4")])
                .unwrap();
        }
        // Fresh instance: L1 is empty, must come from disk.
        let cache = ZoneCache::new(tmp.path().to_path_buf()).unwrap();
        let (records, _) = cache.records("example.com").unwrap();
        assert_eq!(records.len(), 1);
        assert!(cache.record("example.com", "www", "A").is_some());
    }

    #[test]
    fn corrupted_binary_falls_back_to_json() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let cache = ZoneCache::new(tmp.path().to_path_buf()).unwrap();
            cache.put_zones(vec![zone("example.com")]).unwrap();
        }
        std::fs::write(tmp.path().join("zones.bin"), b"garbage").unwrap();

        let cache = ZoneCache::new(tmp.path().to_path_buf()).unwrap();
        let (zones, _) = cache.zones().unwrap();
        assert_eq!(zones[0].name, "example.com");
    }

    #[test]
    fn both_layers_corrupt_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("zones.bin"), b"junk").unwrap();
        std::fs::write(tmp.path().join("zones.json"), b"junk").unwrap();
        let cache = ZoneCache::new(tmp.path().to_path_buf()).unwrap();
        assert!(cache.zones().is_none());
    }

    #[test]
    fn invalidation_removes_all_layers() {
        let (cache, tmp) = cache();
        cache
            .put_records("example.com", vec![rrset("www", "A", "1.2.3.4")])
            .unwrap();
        assert!(tmp.path().join("records_example_com.bin").exists());
        assert!(tmp.path().join("records_example_com.json").exists());

        cache.invalidate_records("example.com");
        assert!(cache.records("example.com").is_none());
        assert!(!tmp.path().join("records_example_com.bin").exists());
        assert!(!tmp.path().join("records_example_com.json").exists());
    }

    #[test]
    fn staleness_thresholds() {
        let (cache, _tmp) = cache();
        assert!(cache.zones_stale(15));
        assert!(cache.records_stale("example.com"));

        cache.put_zones(vec![zone("example.com")]).unwrap();
        cache
            .put_records("example.com", vec![rrset("www", "A", "1.2.3.4")])
            .unwrap();
        assert!(!cache.zones_stale(15));
        assert!(!cache.records_stale("example.com"));

        cache.set_zones_fetched_at(Utc::now() - Duration::minutes(16));
        cache.set_records_fetched_at("example.com", Utc::now() - Duration::seconds(301));
        assert!(cache.zones_stale(15));
        assert!(cache.records_stale("example.com"));
    }

    #[test]
    fn clear_removes_everything() {
        let (cache, tmp) = cache();
        cache.put_zones(vec![zone("example.com")]).unwrap();
        cache
            .put_records("example.com", vec![rrset("www", "A", "1.2.3.4")])
            .unwrap();
        cache.clear().unwrap();
        assert!(cache.zones().is_none());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
