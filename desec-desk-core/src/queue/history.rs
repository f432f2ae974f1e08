//! Queue history persistence.
//!
//! Terminal items are stored as a JSON array, written atomically so an
//! interrupted save never corrupts the previous file. Loading is
//! best-effort: a missing or unreadable file simply yields an empty
//! history.

use std::path::Path;

use super::QueueItem;

/// Saves `items` (most recent first) to `path`.
pub fn save(path: &Path, items: &[QueueItem]) -> std::io::Result<()> {
    let json = serde_json::to_vec(items)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    crate::util::fs::atomic_write(path, &json)
}

/// Loads persisted history. Errors are logged, never raised.
#[must_use]
pub fn load(path: &Path) -> Vec<QueueItem> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to read queue history {}: {e}", path.display());
            }
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Vec<QueueItem>>(&bytes) {
        Ok(items) => {
            log::info!("Loaded {} history items from {}", items.len(), path.display());
            items
        }
        Err(e) => {
            log::warn!("Failed to parse queue history {}: {e}", path.display());
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ItemStatus, Priority};
    use chrono::Utc;
    use desec_desk_client::{ApiRequest, HttpMethod};

    fn item(id: u64) -> QueueItem {
        QueueItem {
            id,
            priority: Priority::Normal,
            category: "zones".to_string(),
            action: format!("item {id}"),
            request: ApiRequest {
                method: HttpMethod::Get,
                path: "/domains/".to_string(),
                body: None,
            },
            status: ItemStatus::Ok,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            response: None,
            error: None,
            group: None,
            seq: 0,
        }
    }

    #[test]
    fn save_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("queue_history.json");

        save(&path, &[item(2), item(1)]).unwrap();
        let loaded = load(&path);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, 2);
        assert_eq!(loaded[1].action, "item 1");
    }

    #[test]
    fn missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load(&tmp.path().join("nope.json")).is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("queue_history.json");
        std::fs::write(&path, "{{{").unwrap();
        assert!(load(&path).is_empty());
    }
}
