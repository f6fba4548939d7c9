//! Local demo store.
//!
//! Each entity table lives under one well-known key as a JSON array; the
//! session identity lives under a fourth key. Every operation loads the
//! whole table and every write rewrites it. A table that has never been
//! written is seeded from [`fixtures`] on first read.
//!
//! The in-process lock serializes callers of one `LocalStore`. Two
//! processes pointed at the same directory are not coordinated.

pub mod fixtures;

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::{StoreConfig, StoreLocation};
use crate::db::{
    EntityRepository, Identity, Lead, LeadRepository, LeadStatus, Quote, QuoteRepository, Record,
    Task, TaskRepository,
};
use crate::error::RepositoryError;

pub const LEADS_KEY: &str = "leadpipe.leads";
pub const TASKS_KEY: &str = "leadpipe.tasks";
pub const QUOTES_KEY: &str = "leadpipe.quotes";
pub const SESSION_KEY: &str = "leadpipe.session";

/// Raw string storage keyed by name.
pub trait StorageArea: Send + Sync {
    fn read(&self, key: &str) -> std::io::Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> std::io::Result<()>;
}

/// Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryArea {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryArea {
    fn entries(&self) -> std::io::Result<MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| std::io::Error::other("memory area lock poisoned"))
    }
}

impl StorageArea for MemoryArea {
    fn read(&self, key: &str) -> std::io::Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> std::io::Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One `<key>.json` file per key under `root`.
#[derive(Debug)]
pub struct DirectoryArea {
    root: PathBuf,
}

impl DirectoryArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StorageArea for DirectoryArea {
    fn read(&self, key: &str) -> std::io::Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, value: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let target = self.path_for(key);
        let staging = self.root.join(format!(".{key}.json.tmp"));
        std::fs::write(&staging, value)?;
        std::fs::rename(&staging, &target)
    }
}

/// Entities that have a local table.
pub trait LocalRecord: Record {
    const KEY: &'static str;

    fn fixtures() -> Result<Vec<Self>, RepositoryError>;

    /// Runs before a create is committed, outside the table lock.
    fn before_create(_store: &LocalStore, _input: &Self::Create) -> Result<(), RepositoryError> {
        Ok(())
    }

    /// Runs after a row was removed, outside the table lock.
    fn after_delete(_store: &LocalStore, _id: &str) -> Result<(), RepositoryError> {
        Ok(())
    }
}

impl LocalRecord for Lead {
    const KEY: &'static str = LEADS_KEY;

    fn fixtures() -> Result<Vec<Self>, RepositoryError> {
        fixtures::leads()
    }

    fn after_delete(store: &LocalStore, id: &str) -> Result<(), RepositoryError> {
        let removed = store.mutate::<Quote, _>(|rows| {
            let before = rows.len();
            rows.retain(|quote| quote.lead_id != id);
            Ok(before - rows.len())
        })?;
        if removed > 0 {
            tracing::debug!(lead_id = %id, removed, "Removed quotes of deleted lead");
        }
        Ok(())
    }
}

impl LocalRecord for Task {
    const KEY: &'static str = TASKS_KEY;

    fn fixtures() -> Result<Vec<Self>, RepositoryError> {
        fixtures::tasks()
    }
}

impl LocalRecord for Quote {
    const KEY: &'static str = QUOTES_KEY;

    fn fixtures() -> Result<Vec<Self>, RepositoryError> {
        fixtures::quotes()
    }

    fn before_create(store: &LocalStore, input: &Self::Create) -> Result<(), RepositoryError> {
        let leads = store.snapshot::<Lead>()?;
        if leads.iter().any(|lead| lead.id == input.lead_id) {
            Ok(())
        } else {
            Err(RepositoryError::not_found(Lead::KIND, input.lead_id.clone()))
        }
    }
}

pub struct LocalStore {
    area: Box<dyn StorageArea>,
    lock: Mutex<()>,
    acting_as: Option<Identity>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

impl LocalStore {
    pub fn new(area: Box<dyn StorageArea>) -> Self {
        Self {
            area,
            lock: Mutex::new(()),
            acting_as: None,
        }
    }

    /// Stamp writes with `identity` instead of the stored session. The
    /// session key is left untouched.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.acting_as = Some(identity);
        self
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryArea::default()))
    }

    pub fn in_directory(root: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(DirectoryArea::new(root)))
    }

    pub fn open(config: &StoreConfig) -> Result<Self, RepositoryError> {
        match &config.location {
            StoreLocation::Memory => {
                tracing::info!("Using in-memory local store");
                Ok(Self::in_memory())
            }
            StoreLocation::Directory(root) => {
                std::fs::create_dir_all(root)?;
                tracing::info!(path = %root.display(), "Using local store directory");
                Ok(Self::in_directory(root.clone()))
            }
        }
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>, RepositoryError> {
        self.lock
            .lock()
            .map_err(|_| RepositoryError::Storage("local store lock poisoned".to_string()))
    }

    fn read_key<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, RepositoryError> {
        match self.area.read(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| RepositoryError::Serialization(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    fn write_key<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), RepositoryError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| RepositoryError::Serialization(format!("{key}: {e}")))?;
        self.area.write(key, &raw)?;
        Ok(())
    }

    /// Caller must hold the lock.
    fn load_table<E: LocalRecord>(&self) -> Result<Vec<E>, RepositoryError> {
        if let Some(rows) = self.read_key::<Vec<E>>(E::KEY)? {
            return Ok(rows);
        }
        let seeded = E::fixtures()?;
        self.write_key(E::KEY, &seeded)?;
        tracing::debug!(key = E::KEY, rows = seeded.len(), "Seeded local table");
        Ok(seeded)
    }

    /// Current contents of a table, seeding it if needed.
    pub fn snapshot<E: LocalRecord>(&self) -> Result<Vec<E>, RepositoryError> {
        let _guard = self.guard()?;
        self.load_table()
    }

    /// Load a table, apply `f`, and write the table back if `f` succeeds.
    pub fn mutate<E, R>(
        &self,
        f: impl FnOnce(&mut Vec<E>) -> Result<R, RepositoryError>,
    ) -> Result<R, RepositoryError>
    where
        E: LocalRecord,
    {
        let _guard = self.guard()?;
        let mut rows = self.load_table::<E>()?;
        let out = f(&mut rows)?;
        self.write_key(E::KEY, &rows)?;
        Ok(out)
    }

    /// The pseudo-identity, seeded on first read.
    pub fn identity(&self) -> Result<Identity, RepositoryError> {
        if let Some(identity) = &self.acting_as {
            return Ok(identity.clone());
        }
        let _guard = self.guard()?;
        if let Some(identity) = self.read_key::<Identity>(SESSION_KEY)? {
            return Ok(identity);
        }
        let identity = fixtures::identity();
        self.write_key(SESSION_KEY, &identity)?;
        Ok(identity)
    }
}

/// Generic repository over one local table.
pub struct LocalRepository<E> {
    store: Arc<LocalStore>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> LocalRepository<E> {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }
}

impl<E: LocalRecord> LocalRepository<E> {
    /// Apply `change` to one row and return the updated copy.
    fn modify(
        &self,
        id: &str,
        change: impl FnOnce(&mut E) -> Result<(), RepositoryError>,
    ) -> Result<E, RepositoryError> {
        self.store.mutate::<E, _>(|rows| {
            let row = rows
                .iter_mut()
                .find(|row| row.id() == id)
                .ok_or_else(|| RepositoryError::not_found(E::KIND, id))?;
            change(row)?;
            Ok(row.clone())
        })
    }
}

#[async_trait]
impl<E: LocalRecord> EntityRepository<E> for LocalRepository<E> {
    async fn get_all(&self) -> Result<Vec<E>, RepositoryError> {
        self.store.snapshot()
    }

    async fn get_one(&self, id: &str) -> Result<E, RepositoryError> {
        self.store
            .snapshot::<E>()?
            .into_iter()
            .find(|row| row.id() == id)
            .ok_or_else(|| RepositoryError::not_found(E::KIND, id))
    }

    async fn create(&self, mut input: E::Create) -> Result<E, RepositoryError> {
        E::prepare_create(&mut input)?;
        E::before_create(&self.store, &input)?;
        let owner = self.store.identity()?.id;
        let record = E::from_create(input, Some(owner), Utc::now())?;
        self.store.mutate::<E, _>(|rows| {
            if rows.iter().any(|row| row.id() == record.id()) {
                return Err(RepositoryError::Validation(format!(
                    "{} '{}' already exists",
                    E::KIND,
                    record.id()
                )));
            }
            rows.insert(0, record.clone());
            Ok(())
        })?;
        tracing::debug!(kind = E::KIND, id = %record.id(), "Created local record");
        Ok(record)
    }

    async fn update(&self, id: &str, mut patch: E::Patch) -> Result<E, RepositoryError> {
        E::prepare_patch(&mut patch)?;
        self.modify(id, |row| row.apply_patch(patch, Utc::now()))
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let removed = self.store.mutate::<E, _>(|rows| {
            let before = rows.len();
            rows.retain(|row| row.id() != id);
            Ok(before != rows.len())
        })?;
        if removed {
            E::after_delete(&self.store, id)?;
            tracing::debug!(kind = E::KIND, id = %id, "Deleted local record");
        }
        Ok(())
    }
}

#[async_trait]
impl LeadRepository for LocalRepository<Lead> {
    async fn update_status(&self, id: &str, status: LeadStatus) -> Result<Lead, RepositoryError> {
        self.modify(id, |lead| {
            lead.status = status;
            lead.updated_at = Utc::now();
            Ok(())
        })
    }
}

#[async_trait]
impl TaskRepository for LocalRepository<Task> {
    async fn toggle(&self, id: &str) -> Result<Task, RepositoryError> {
        self.modify(id, |task| {
            task.completed = !task.completed;
            task.updated_at = Utc::now();
            Ok(())
        })
    }
}

#[async_trait]
impl QuoteRepository for LocalRepository<Quote> {
    async fn list_for_lead(&self, lead_id: &str) -> Result<Vec<Quote>, RepositoryError> {
        Ok(self
            .store
            .snapshot::<Quote>()?
            .into_iter()
            .filter(|quote| quote.lead_id == lead_id)
            .collect())
    }
}
