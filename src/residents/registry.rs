//! Resident mapping registry and snapshot persistence.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::observability::metrics;
use crate::residents::types::ResidentRecord;

/// Thread-safe map of resident records keyed by owner id, with a unique
/// index over active `(email, community)` pairs.
#[derive(Clone, Default)]
pub struct ResidentRegistry {
    records: Arc<DashMap<String, ResidentRecord>>,
    active_index: Arc<DashMap<String, String>>,
    persistence_path: Option<PathBuf>,
}

impl ResidentRegistry {
    /// Create a new empty registry.
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            active_index: Arc::new(DashMap::new()),
            persistence_path,
        }
    }

    /// Load from file if it exists; otherwise start empty with `path` as the save target.
    pub fn load_from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let registry = Self::new(Some(path.to_path_buf()));
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let records: Vec<ResidentRecord> = serde_json::from_reader(reader)?;
            for record in records {
                if record.is_active {
                    registry
                        .active_index
                        .insert(index_key(&record.email, &record.community), record.owner_id.clone());
                }
                registry.records.insert(record.owner_id.clone(), record);
            }
            metrics::record_registry_size(registry.active_count());
            tracing::info!(
                path = %path.display(),
                residents = registry.records.len(),
                "Loaded resident registry snapshot"
            );
        }
        Ok(registry)
    }

    /// Write every record to the snapshot file, if one is configured.
    pub fn save_to_file(&self) -> std::io::Result<()> {
        if let Some(path) = &self.persistence_path {
            let mut records: Vec<ResidentRecord> =
                self.records.iter().map(|r| r.value().clone()).collect();
            records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, &records)?;
            tracing::info!(
                path = %path.display(),
                residents = records.len(),
                "Saved resident registry snapshot"
            );
        }
        Ok(())
    }

    /// Active resident registered under `(email, community)`.
    pub fn find_active(&self, email: &str, community: &str) -> Option<ResidentRecord> {
        let owner_id = self.active_index.get(&index_key(email, community))?.value().clone();
        self.records
            .get(&owner_id)
            .map(|r| r.value().clone())
            .filter(|r| r.is_active)
    }

    /// Active resident with this owner id living in `unit_id`.
    pub fn get_active(&self, owner_id: &str, unit_id: &str) -> Option<ResidentRecord> {
        self.records
            .get(owner_id)
            .map(|r| r.value().clone())
            .filter(|r| r.is_active && r.unit_id == unit_id)
    }

    /// Active resident mapped to this HikCentral person code.
    pub fn find_by_person_id(&self, person_id: &str) -> Option<ResidentRecord> {
        self.records
            .iter()
            .find(|r| r.is_active && r.hikcentral_person_id == person_id)
            .map(|r| r.value().clone())
    }

    /// Insert a new active record.
    ///
    /// Fails with the existing record when another active resident already
    /// holds the same `(email, community)`.
    pub fn insert(&self, record: ResidentRecord) -> Result<(), ResidentRecord> {
        match self.active_index.entry(index_key(&record.email, &record.community)) {
            Entry::Occupied(occupied) => {
                let existing = self.records.get(occupied.get()).map(|r| r.value().clone());
                match existing {
                    Some(existing) if existing.is_active => return Err(existing),
                    _ => {
                        occupied.replace_entry(record.owner_id.clone());
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record.owner_id.clone());
            }
        }
        self.records.insert(record.owner_id.clone(), record);
        metrics::record_registry_size(self.active_count());
        Ok(())
    }

    /// Apply `change` to an active record and return the updated copy.
    ///
    /// An email change moves the index entry; it fails with the conflicting
    /// record if the new pair is already taken.
    pub fn update<F>(&self, owner_id: &str, change: F) -> Option<Result<ResidentRecord, ResidentRecord>>
    where
        F: FnOnce(&mut ResidentRecord),
    {
        let current = self.records.get(owner_id).map(|r| r.value().clone())?;
        if !current.is_active {
            return None;
        }

        let mut updated = current.clone();
        change(&mut updated);
        updated.updated_at = Utc::now();

        let old_key = index_key(&current.email, &current.community);
        let new_key = index_key(&updated.email, &updated.community);
        if old_key != new_key {
            match self.active_index.entry(new_key) {
                Entry::Occupied(occupied) => {
                    if let Some(other) = self.records.get(occupied.get()) {
                        if other.is_active && other.owner_id != owner_id {
                            return Some(Err(other.value().clone()));
                        }
                    }
                    occupied.replace_entry(owner_id.to_string());
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(owner_id.to_string());
                }
            }
            self.active_index.remove_if(&old_key, |_, v| v == owner_id);
        }

        self.records.insert(owner_id.to_string(), updated.clone());
        Some(Ok(updated))
    }

    /// Mark a record inactive and release its `(email, community)` pair.
    pub fn deactivate(&self, owner_id: &str) -> Option<ResidentRecord> {
        let record = {
            let mut entry = self.records.get_mut(owner_id)?;
            if !entry.is_active {
                return None;
            }
            entry.is_active = false;
            entry.updated_at = Utc::now();
            entry.value().clone()
        };
        self.active_index
            .remove_if(&index_key(&record.email, &record.community), |_, v| v == owner_id);
        metrics::record_registry_size(self.active_count());
        Some(record)
    }

    /// Total records, inactive included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records currently active.
    pub fn active_count(&self) -> usize {
        self.active_index.len()
    }
}

impl std::fmt::Debug for ResidentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResidentRegistry")
            .field("records", &self.records.len())
            .field("active", &self.active_index.len())
            .field("persistence_path", &self.persistence_path)
            .finish()
    }
}

/// Emails compare case-insensitively; communities exactly.
fn index_key(email: &str, community: &str) -> String {
    format!("{}\u{1f}{}", email.trim().to_lowercase(), community.trim())
}
