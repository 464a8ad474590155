//! Accumulator persistence.
//!
//! `AccumulatorStore` is the storage port (`get` + `upsert`); `Accumulators`
//! layers the lazy-initialization contract on top of any store.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    domain::{AccumulatorRecord, ScopeKey},
    errors::Error,
    Result,
};

/// Durable key-value storage for accumulator records.
///
/// `upsert` must be atomic per call; callers hold no locks inside the store.
#[async_trait]
pub trait AccumulatorStore: Send + Sync {
    async fn get(&self, id: &ScopeKey) -> Result<Option<AccumulatorRecord>>;
    async fn upsert(&self, record: AccumulatorRecord) -> Result<()>;
}

/// Read/write view over a store with the configured initial value.
pub struct Accumulators<S: ?Sized> {
    store: Arc<S>,
    initial_value: f64,
}

impl<S: AccumulatorStore + ?Sized> Accumulators<S> {
    pub fn new(store: Arc<S>, initial_value: f64) -> Self {
        Self {
            store,
            initial_value,
        }
    }

    /// Current value for `id`; an unseen scope is created with the initial value.
    pub async fn read(&self, id: &ScopeKey) -> Result<f64> {
        if let Some(record) = self.store.get(id).await? {
            return Ok(record.value);
        }

        tracing::debug!(scope = %id, value = self.initial_value, "initializing accumulator");
        self.store
            .upsert(AccumulatorRecord {
                id: id.clone(),
                value: self.initial_value,
            })
            .await?;
        Ok(self.initial_value)
    }

    pub async fn write(&self, id: &ScopeKey, value: f64) -> Result<()> {
        self.store
            .upsert(AccumulatorRecord {
                id: id.clone(),
                value,
            })
            .await
    }
}

// ============== In-memory store ==============

/// Non-durable store, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<ScopeKey, f64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl AccumulatorStore for MemoryStore {
    async fn get(&self, id: &ScopeKey) -> Result<Option<AccumulatorRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .get(id)
            .map(|&value| AccumulatorRecord {
                id: id.clone(),
                value,
            }))
    }

    async fn upsert(&self, record: AccumulatorRecord) -> Result<()> {
        self.records.lock().await.insert(record.id, record.value);
        Ok(())
    }
}

// ============== JSON file store ==============

/// On-disk format: a flat list of records, sorted by id.
#[derive(serde::Serialize, serde::Deserialize, Default)]
struct StoreFileData {
    records: Vec<AccumulatorRecord>,
}

/// File-backed store: the whole table is one JSON document.
///
/// Every upsert rewrites the file through a temp file + rename, so a crash
/// mid-write leaves the previous snapshot intact.
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<BTreeMap<ScopeKey, f64>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = load_store_file(&path)
            .await?
            .map(|data| {
                data.records
                    .into_iter()
                    .map(|r| (r.id, r.value))
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        tracing::info!(
            path = %path.display(),
            scopes = records.len(),
            "accumulator store opened"
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }
}

#[async_trait]
impl AccumulatorStore for JsonFileStore {
    async fn get(&self, id: &ScopeKey) -> Result<Option<AccumulatorRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .get(id)
            .map(|&value| AccumulatorRecord {
                id: id.clone(),
                value,
            }))
    }

    async fn upsert(&self, record: AccumulatorRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        let previous = records.insert(record.id.clone(), record.value);

        let data = StoreFileData {
            records: records
                .iter()
                .map(|(id, &value)| AccumulatorRecord {
                    id: id.clone(),
                    value,
                })
                .collect(),
        };

        if let Err(e) = save_store_file(&self.path, &data).await {
            // Keep memory consistent with disk.
            match previous {
                Some(v) => records.insert(record.id, v),
                None => records.remove(&record.id),
            };
            return Err(e);
        }
        Ok(())
    }
}

async fn load_store_file(path: &Path) -> Result<Option<StoreFileData>> {
    let txt = match tokio::fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let data: StoreFileData = serde_json::from_str(&txt)
        .map_err(|e| Error::Storage(format!("corrupt store file {}: {e}", path.display())))?;
    Ok(Some(data))
}

async fn save_store_file(path: &Path, data: &StoreFileData) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let txt = serde_json::to_string_pretty(data)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, txt).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
